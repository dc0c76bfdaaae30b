use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use imagepkg_core::{Fmri, Version};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

mod v0;

pub use v0::LegacyCatalog;

#[cfg(test)]
mod tests;

pub const ATTRS_FILE: &str = "catalog.attrs";
pub const ENTRIES_FILE: &str = "catalog";

const ATTRS_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("corrupt catalog {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("catalog at {} was opened read-only", path.display())]
    ReadOnly { path: PathBuf },
    #[error("catalog entry '{entry}' has no version")]
    MissingVersion { entry: String },
    #[error("catalog entry '{entry}' has no publisher")]
    Unqualified { entry: String },
    #[error("catalog I/O failure at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CatalogError {
    fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Serialize, Deserialize)]
struct CatalogAttrs {
    version: u32,
    #[serde(rename = "last-modified")]
    last_modified: Option<String>,
    #[serde(rename = "package-version-count")]
    package_version_count: usize,
}

/// A set of package FMRIs bound to an on-disk metadata root.
///
/// The persisted form is a `catalog.attrs` JSON document and a line-oriented
/// `catalog` file with one `V pkg://publisher/stem@version` entry per line.
/// Any disagreement between the two, or any unparsable content, marks the
/// whole catalog corrupt; there is no partial parse.
#[derive(Debug)]
pub struct Catalog {
    meta_root: PathBuf,
    mode: AccessMode,
    last_modified: Option<OffsetDateTime>,
    entries: BTreeSet<Fmri>,
}

impl Catalog {
    /// Opens the catalog at `meta_root`, or an empty one when no files exist
    /// there yet.
    pub fn open(meta_root: impl Into<PathBuf>, mode: AccessMode) -> Result<Self, CatalogError> {
        let meta_root = meta_root.into();
        let attrs_path = meta_root.join(ATTRS_FILE);
        let entries_path = meta_root.join(ENTRIES_FILE);

        let raw_attrs = read_optional(&attrs_path)?;
        let raw_entries = read_optional(&entries_path)?;
        if raw_attrs.is_none() && raw_entries.is_none() {
            return Ok(Self {
                meta_root,
                mode,
                last_modified: None,
                entries: BTreeSet::new(),
            });
        }

        let raw_attrs = raw_attrs
            .ok_or_else(|| CatalogError::corrupt(&attrs_path, "attrs file is missing"))?;
        let attrs: CatalogAttrs = serde_json::from_str(&raw_attrs)
            .map_err(|err| CatalogError::corrupt(&attrs_path, format!("unparsable attrs: {err}")))?;
        if attrs.version != ATTRS_VERSION {
            return Err(CatalogError::corrupt(
                &attrs_path,
                format!("unsupported attrs version {}", attrs.version),
            ));
        }

        let last_modified = match &attrs.last_modified {
            Some(raw) => Some(OffsetDateTime::parse(raw, &Rfc3339).map_err(|err| {
                CatalogError::corrupt(&attrs_path, format!("unparsable last-modified: {err}"))
            })?),
            None => None,
        };

        let mut entries = BTreeSet::new();
        if let Some(raw_entries) = &raw_entries {
            for line in raw_entries.lines().filter(|line| !line.trim().is_empty()) {
                let Some(text) = line.strip_prefix("V ") else {
                    return Err(CatalogError::corrupt(
                        &entries_path,
                        format!("unrecognized entry line '{line}'"),
                    ));
                };
                let fmri = Fmri::parse(text.trim()).map_err(|err| {
                    CatalogError::corrupt(&entries_path, format!("bad entry: {err}"))
                })?;
                if !fmri.is_qualified() {
                    return Err(CatalogError::corrupt(
                        &entries_path,
                        format!("unqualified entry '{text}'"),
                    ));
                }
                entries.insert(fmri);
            }
        }

        if entries.len() != attrs.package_version_count {
            return Err(CatalogError::corrupt(
                &attrs_path,
                format!(
                    "attrs claim {} packages but the catalog holds {}",
                    attrs.package_version_count,
                    entries.len()
                ),
            ));
        }

        tracing::debug!(
            meta_root = %meta_root.display(),
            packages = entries.len(),
            "catalog loaded"
        );
        Ok(Self {
            meta_root,
            mode,
            last_modified,
            entries,
        })
    }

    pub fn meta_root(&self) -> &Path {
        &self.meta_root
    }

    pub fn last_modified(&self) -> Option<OffsetDateTime> {
        self.last_modified
    }

    pub fn package_version_count(&self) -> usize {
        self.entries.len()
    }

    /// Restartable traversal over `(publisher, stem, version)` tuples in
    /// catalog order. Holds no lock; each call starts a fresh pass.
    pub fn tuples(&self) -> impl Iterator<Item = (&str, &str, &Version)> + '_ {
        self.entries.iter().filter_map(|fmri| {
            match (fmri.publisher.as_deref(), fmri.version.as_ref()) {
                (Some(publisher), Some(version)) => Some((publisher, fmri.stem.as_str(), version)),
                _ => None,
            }
        })
    }

    pub fn fmris(&self) -> impl Iterator<Item = &Fmri> + '_ {
        self.entries.iter()
    }

    pub fn contains(&self, fmri: &Fmri) -> bool {
        self.entries.contains(fmri)
    }

    /// Newest entry for `stem`, optionally restricted to one publisher.
    pub fn newest(&self, stem: &str, publisher: Option<&str>) -> Option<&Fmri> {
        self.entries
            .iter()
            .filter(|fmri| fmri.stem == stem)
            .filter(|fmri| publisher.is_none() || fmri.publisher.as_deref() == publisher)
            .max()
    }

    /// Distinct publishers offering `stem`.
    pub fn publishers_for(&self, stem: &str) -> Vec<&str> {
        let mut publishers: Vec<&str> = self
            .entries
            .iter()
            .filter(|fmri| fmri.stem == stem)
            .filter_map(|fmri| fmri.publisher.as_deref())
            .collect();
        publishers.sort_unstable();
        publishers.dedup();
        publishers
    }

    pub fn add(&mut self, fmri: Fmri) -> Result<(), CatalogError> {
        if fmri.version.is_none() {
            return Err(CatalogError::MissingVersion {
                entry: fmri.to_string(),
            });
        }
        if !fmri.is_qualified() {
            return Err(CatalogError::Unqualified {
                entry: fmri.to_string(),
            });
        }
        self.entries.insert(fmri);
        Ok(())
    }

    pub fn remove(&mut self, fmri: &Fmri) -> bool {
        self.entries.remove(fmri)
    }

    /// Replaces the whole tuple set, e.g. when rebuilding the merged known
    /// catalog from per-publisher catalogs.
    pub fn replace_entries(
        &mut self,
        entries: impl IntoIterator<Item = Fmri>,
    ) -> Result<(), CatalogError> {
        self.entries.clear();
        for fmri in entries {
            self.add(fmri)?;
        }
        Ok(())
    }

    /// Persists the catalog: both files are serialized to temporaries in the
    /// metadata root and renamed over the live pair, so a concurrent reader
    /// observes either the prior or the new generation. The tuple file lands
    /// first; the attrs document that vouches for its count lands second.
    /// A reader interleaving between the two renames can see new tuples
    /// against the old attrs count; the count check reports that one-rename
    /// window as corrupt rather than serving a mixed generation.
    pub fn save(&mut self) -> Result<(), CatalogError> {
        if self.mode == AccessMode::ReadOnly {
            return Err(CatalogError::ReadOnly {
                path: self.meta_root.clone(),
            });
        }

        fs::create_dir_all(&self.meta_root)
            .map_err(|err| CatalogError::io(&self.meta_root, err))?;

        let now = OffsetDateTime::now_utc();
        let last_modified = match self.last_modified {
            Some(prev) if prev > now => prev,
            _ => now,
        };

        let mut body = String::new();
        for fmri in &self.entries {
            body.push_str(&format!("V {fmri}\n"));
        }

        let attrs = CatalogAttrs {
            version: ATTRS_VERSION,
            last_modified: Some(last_modified.format(&Rfc3339).map_err(|err| {
                CatalogError::io(
                    &self.meta_root,
                    io::Error::new(io::ErrorKind::InvalidData, err),
                )
            })?),
            package_version_count: self.entries.len(),
        };
        let attrs_body = serde_json::to_string_pretty(&attrs).map_err(|err| {
            CatalogError::io(
                &self.meta_root,
                io::Error::new(io::ErrorKind::InvalidData, err),
            )
        })?;

        replace_atomic(&self.meta_root, ENTRIES_FILE, body.as_bytes())?;
        replace_atomic(&self.meta_root, ATTRS_FILE, attrs_body.as_bytes())?;

        self.last_modified = Some(last_modified);
        tracing::debug!(
            meta_root = %self.meta_root.display(),
            packages = self.entries.len(),
            "catalog saved"
        );
        Ok(())
    }

    /// Removes the on-disk representation entirely.
    pub fn destroy(self) -> Result<(), CatalogError> {
        if self.mode == AccessMode::ReadOnly {
            return Err(CatalogError::ReadOnly {
                path: self.meta_root.clone(),
            });
        }
        if self.meta_root.exists() {
            fs::remove_dir_all(&self.meta_root)
                .map_err(|err| CatalogError::io(&self.meta_root, err))?;
        }
        Ok(())
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, CatalogError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(CatalogError::io(path, err)),
    }
}

/// Writes `bytes` to a temporary sibling of `name` and renames it into
/// place. The rename is the only point at which readers can observe the
/// change; an interrupted write leaves the prior file intact.
fn replace_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<(), CatalogError> {
    let live = dir.join(name);
    let tmp = dir.join(format!(".{name}.tmp-{}", std::process::id()));
    fs::write(&tmp, bytes).map_err(|err| CatalogError::io(&tmp, err))?;
    fs::rename(&tmp, &live).map_err(|err| CatalogError::io(&live, err))?;
    Ok(())
}
