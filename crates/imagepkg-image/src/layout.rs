use std::fs;
use std::path::{Path, PathBuf};

use imagepkg_core::Fmri;

use crate::ImageError;

/// Every on-disk location an image owns, derived from its root.
///
/// Metadata lives under `<root>/var/pkg`; the current-format layout keeps
/// per-publisher catalogs under `publisher/`, merged state under `state/`,
/// and per-package markers under `pkg/`. The legacy layout kept a flat
/// `catalog/<publisher>/` tree instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLayout {
    root: PathBuf,
}

impl ImageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta_root(&self) -> PathBuf {
        self.root.join("var").join("pkg")
    }

    pub fn publishers_config_path(&self) -> PathBuf {
        self.meta_root().join("publishers.toml")
    }

    pub fn publisher_dir(&self) -> PathBuf {
        self.meta_root().join("publisher")
    }

    pub fn publisher_catalog_root(&self, prefix: &str) -> PathBuf {
        self.publisher_dir().join(prefix).join("catalog")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.meta_root().join("state")
    }

    pub fn known_root(&self) -> PathBuf {
        self.state_dir().join("known")
    }

    pub fn installed_root(&self) -> PathBuf {
        self.state_dir().join("installed")
    }

    pub fn pkg_dir(&self) -> PathBuf {
        self.meta_root().join("pkg")
    }

    pub fn package_state_dir(&self, fmri: &Fmri) -> PathBuf {
        self.pkg_dir().join(fmri.dir_path())
    }

    pub fn install_marker_path(&self, fmri: &Fmri) -> PathBuf {
        self.package_state_dir(fmri).join("installed")
    }

    pub fn legacy_catalog_dir(&self) -> PathBuf {
        self.meta_root().join("catalog")
    }

    pub fn legacy_linkfile_path(&self, fmri: &Fmri) -> PathBuf {
        self.installed_root().join(fmri.link_path())
    }

    pub fn index_dir(&self) -> PathBuf {
        self.meta_root().join("index")
    }

    pub fn index_staging_dir(&self) -> PathBuf {
        self.meta_root()
            .join(format!(".index.tmp-{}", std::process::id()))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.meta_root().join("lock")
    }

    pub fn ensure_base_dirs(&self) -> Result<(), ImageError> {
        for dir in [
            self.meta_root(),
            self.publisher_dir(),
            self.known_root(),
            self.installed_root(),
            self.pkg_dir(),
            self.index_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|err| ImageError::io(&dir, err))?;
        }
        Ok(())
    }
}
