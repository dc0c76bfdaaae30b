use std::fs;
use std::io;
use std::path::Path;

use imagepkg_catalog::{AccessMode, Catalog, LegacyCatalog};
use imagepkg_core::Fmri;

use crate::image::read_marker_publisher;
use crate::refresh::rebuild_known;
use crate::{ImageError, ImageLayout, ImageLock, PublisherRegistry};

/// The two on-disk generations an image can carry. Selected once when the
/// image is opened; the migration below is the only code path that turns
/// one into the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Legacy,
    Current,
}

pub(crate) fn detect(layout: &ImageLayout) -> Result<ImageFormat, ImageError> {
    if !layout.meta_root().exists() {
        return Err(ImageError::NotAnImage {
            root: layout.root().to_path_buf(),
        });
    }
    if layout.legacy_catalog_dir().exists() && !layout.publisher_dir().exists() {
        return Ok(ImageFormat::Legacy);
    }
    Ok(ImageFormat::Current)
}

/// The legacy known catalogs, one per `catalog/<publisher>/` subtree, with
/// every entry qualified. A bare `catalog/{attrs,catalog}` pair (no
/// publisher subdirectory) is attributed to the preferred publisher.
fn legacy_known_by_publisher(
    layout: &ImageLayout,
    registry: &PublisherRegistry,
) -> Result<Vec<(String, Vec<Fmri>)>, ImageError> {
    let dir = layout.legacy_catalog_dir();
    let mut catalogs = Vec::new();

    if dir.join("attrs").exists() {
        let prefix = preferred_prefix(registry)?;
        catalogs.push((prefix.clone(), qualify(LegacyCatalog::load(&dir)?, &prefix)));
        return Ok(catalogs);
    }

    let mut subdirs: Vec<_> = read_dir_entries(&dir)?
        .into_iter()
        .filter(|path| path.is_dir())
        .collect();
    subdirs.sort();
    for subdir in subdirs {
        let prefix = match subdir.file_name().and_then(|name| name.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        let legacy = LegacyCatalog::load(&subdir)?;
        catalogs.push((prefix.clone(), qualify(legacy, &prefix)));
    }
    Ok(catalogs)
}

fn qualify(legacy: LegacyCatalog, prefix: &str) -> Vec<Fmri> {
    legacy
        .entries
        .into_iter()
        .map(|fmri| {
            if fmri.is_qualified() {
                fmri
            } else {
                fmri.with_publisher(prefix)
            }
        })
        .collect()
}

/// Reconstructs the installed set from the legacy per-package linkfiles,
/// taking the installing publisher from each marker and falling back to the
/// preferred publisher when a marker is missing.
fn legacy_installed_entries(
    layout: &ImageLayout,
    registry: &PublisherRegistry,
) -> Result<Vec<Fmri>, ImageError> {
    let dir = layout.installed_root();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    let mut names: Vec<_> = read_dir_entries(&dir)?
        .into_iter()
        .filter(|path| path.is_file())
        .filter_map(|path| path.file_name().and_then(|n| n.to_str()).map(String::from))
        .filter(|name| !name.starts_with("catalog") && !name.starts_with('.'))
        .collect();
    names.sort();

    for name in names {
        let fmri = Fmri::from_link_path(&name)?;
        let publisher = match read_marker_publisher(layout, &fmri)? {
            Some(publisher) => publisher,
            None => preferred_prefix(registry)?,
        };
        entries.push(fmri.with_publisher(&publisher));
    }
    Ok(entries)
}

/// Read-side emulation of the current format over legacy data. Pure
/// translation: never writes, so unprivileged list/info work on a legacy
/// image without migrating it.
pub(crate) fn legacy_known_catalog(
    layout: &ImageLayout,
    registry: &PublisherRegistry,
) -> Result<Catalog, ImageError> {
    let mut entries = Vec::new();
    for (_, mut publisher_entries) in legacy_known_by_publisher(layout, registry)? {
        entries.append(&mut publisher_entries);
    }
    let mut catalog = Catalog::open(layout.known_root(), AccessMode::ReadOnly)?;
    catalog.replace_entries(entries)?;
    Ok(catalog)
}

pub(crate) fn legacy_installed_catalog(
    layout: &ImageLayout,
    registry: &PublisherRegistry,
) -> Result<Catalog, ImageError> {
    let entries = legacy_installed_entries(layout, registry)?;
    let mut catalog = Catalog::open(layout.installed_root(), AccessMode::ReadOnly)?;
    catalog.replace_entries(entries)?;
    Ok(catalog)
}

/// One-way migration from the legacy layout to the current one.
///
/// Ordering matters: the current-format state is durably written before any
/// legacy artifact is removed, so an interruption leaves a readable image.
/// Post-condition: `var/pkg/catalog/` is gone and `state/installed/` holds
/// only the `catalog.attrs`/`catalog` pair; install markers remain, since
/// the current layout keeps them too.
pub(crate) fn migrate(
    layout: &ImageLayout,
    registry: &PublisherRegistry,
) -> Result<(), ImageError> {
    if !layout.legacy_catalog_dir().exists() {
        return Ok(());
    }
    let _lock = ImageLock::acquire(layout)?;
    tracing::info!(root = %layout.root().display(), "migrating legacy image format");

    for (prefix, entries) in legacy_known_by_publisher(layout, registry)? {
        let mut catalog = Catalog::open(
            layout.publisher_catalog_root(&prefix),
            AccessMode::ReadWrite,
        )?;
        catalog.replace_entries(entries)?;
        catalog.save()?;
    }

    let installed_entries = legacy_installed_entries(layout, registry)?;
    let mut installed = Catalog::open(layout.installed_root(), AccessMode::ReadWrite)?;
    installed.replace_entries(installed_entries)?;
    installed.save()?;

    rebuild_known(layout, registry)?;

    // The new state is durable; now the legacy artifacts can go.
    remove_legacy_linkfiles(&layout.installed_root())?;
    let legacy_dir = layout.legacy_catalog_dir();
    fs::remove_dir_all(&legacy_dir).map_err(|err| ImageError::io(&legacy_dir, err))?;

    tracing::info!(root = %layout.root().display(), "legacy image migration complete");
    Ok(())
}

fn remove_legacy_linkfiles(dir: &Path) -> Result<(), ImageError> {
    for path in read_dir_entries(dir)? {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if path.is_file() && !name.starts_with("catalog") {
            fs::remove_file(&path).map_err(|err| ImageError::io(&path, err))?;
        }
    }
    Ok(())
}

fn read_dir_entries(dir: &Path) -> Result<Vec<std::path::PathBuf>, ImageError> {
    let mut paths = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(paths),
        Err(err) => return Err(ImageError::io(dir, err)),
    };
    for entry in entries {
        let entry = entry.map_err(|err| ImageError::io(dir, err))?;
        paths.push(entry.path());
    }
    Ok(paths)
}

fn preferred_prefix(registry: &PublisherRegistry) -> Result<String, ImageError> {
    registry
        .preferred()
        .map(|publisher| publisher.prefix.clone())
        .ok_or(ImageError::NoPreferredPublisher)
}
