use std::fs;

use imagepkg_catalog::{AccessMode, Catalog};
use sha2::{Digest, Sha256};

use crate::{ImageError, ImageLayout, ImageLock};

/// Rebuilds the search index from the installed catalog.
///
/// The new index is staged in a fresh directory under the image metadata
/// root and swapped into place; creating that staging directory is also the
/// privilege gate, so an unprivileged caller fails there with a permission
/// error before the live index has been touched.
pub fn rebuild_index(layout: &ImageLayout) -> Result<(), ImageError> {
    let staging = layout.index_staging_dir();
    if staging.exists() {
        fs::remove_dir_all(&staging).map_err(|err| ImageError::io(&staging, err))?;
    }
    fs::create_dir_all(&staging).map_err(|err| ImageError::io(&staging, err))?;

    let result = build_and_swap(layout);
    if result.is_err() {
        let _ = fs::remove_dir_all(&staging);
    }
    result
}

fn build_and_swap(layout: &ImageLayout) -> Result<(), ImageError> {
    let _lock = ImageLock::acquire(layout)?;
    let staging = layout.index_staging_dir();

    let installed = Catalog::open(layout.installed_root(), AccessMode::ReadOnly)?;
    let mut body = String::new();
    for fmri in installed.fmris() {
        body.push_str(&format!("{fmri}\n"));
    }

    let packages_path = staging.join("packages");
    fs::write(&packages_path, body.as_bytes())
        .map_err(|err| ImageError::io(&packages_path, err))?;

    let digest = Sha256::digest(body.as_bytes());
    let digest_path = staging.join("digest");
    fs::write(&digest_path, format!("sha256:{}\n", hex::encode(digest)))
        .map_err(|err| ImageError::io(&digest_path, err))?;

    let live = layout.index_dir();
    if live.exists() {
        fs::remove_dir_all(&live).map_err(|err| ImageError::io(&live, err))?;
    }
    fs::rename(&staging, &live).map_err(|err| ImageError::io(&live, err))?;

    tracing::info!(
        index = %live.display(),
        packages = installed.package_version_count(),
        "search index rebuilt"
    );
    Ok(())
}
