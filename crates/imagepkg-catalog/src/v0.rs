use std::fs;
use std::path::Path;

use imagepkg_core::Fmri;

use crate::CatalogError;

/// The flat legacy catalog pair: an `attrs` file of `S key: value` lines and
/// a `catalog` file of unqualified `V pkg:/stem@version` lines.
///
/// This codec is read-only; the format upgrader is the only consumer, and
/// writing new v0 catalogs is deliberately unsupported.
#[derive(Debug, Clone)]
pub struct LegacyCatalog {
    pub last_modified: String,
    pub entries: Vec<Fmri>,
}

impl LegacyCatalog {
    pub fn load(dir: &Path) -> Result<Self, CatalogError> {
        let attrs_path = dir.join("attrs");
        let entries_path = dir.join("catalog");

        let raw_attrs = fs::read_to_string(&attrs_path)
            .map_err(|err| CatalogError::io(&attrs_path, err))?;

        let mut last_modified = None;
        let mut npkgs = None;
        for line in raw_attrs.lines().filter(|line| !line.trim().is_empty()) {
            let Some(rest) = line.strip_prefix("S ") else {
                return Err(CatalogError::corrupt(
                    &attrs_path,
                    format!("unrecognized attrs line '{line}'"),
                ));
            };
            let Some((key, value)) = rest.split_once(':') else {
                return Err(CatalogError::corrupt(
                    &attrs_path,
                    format!("unrecognized attrs line '{line}'"),
                ));
            };
            match key.trim() {
                "Last-Modified" => last_modified = Some(value.trim().to_string()),
                "npkgs" => {
                    let count = value.trim().parse::<usize>().map_err(|_| {
                        CatalogError::corrupt(
                            &attrs_path,
                            format!("unparsable npkgs value '{}'", value.trim()),
                        )
                    })?;
                    npkgs = Some(count);
                }
                // "prefix" and any other summary fields carry no state we
                // keep; they still must be well-formed S lines.
                _ => {}
            }
        }

        let last_modified = last_modified.ok_or_else(|| {
            CatalogError::corrupt(&attrs_path, "attrs file is missing Last-Modified")
        })?;
        let npkgs =
            npkgs.ok_or_else(|| CatalogError::corrupt(&attrs_path, "attrs file is missing npkgs"))?;

        let raw_entries = fs::read_to_string(&entries_path)
            .map_err(|err| CatalogError::io(&entries_path, err))?;
        let mut entries = Vec::new();
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
            entries.push(fmri);
        }

        if entries.len() != npkgs {
            return Err(CatalogError::corrupt(
                &attrs_path,
                format!(
                    "attrs claim {npkgs} packages but the catalog holds {}",
                    entries.len()
                ),
            ));
        }

        tracing::debug!(dir = %dir.display(), packages = entries.len(), "legacy catalog loaded");
        Ok(Self {
            last_modified,
            entries,
        })
    }
}
