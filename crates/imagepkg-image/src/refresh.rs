use std::time::Duration;

use imagepkg_catalog::{AccessMode, Catalog};
use imagepkg_core::Fmri;
use serde::Deserialize;

use crate::{ImageError, ImageLayout, Publisher, PublisherRegistry};

/// Attrs document served by the depot alongside the catalog body.
#[derive(Debug, Deserialize)]
struct WireAttrs {
    version: u32,
    #[serde(rename = "package-version-count")]
    package_version_count: usize,
}

/// Fetches the publisher's catalog from its origin, falling over to each
/// mirror in order, and replaces the cached per-publisher catalog. The
/// merged known catalog is rebuilt separately so one rebuild can cover a
/// batch of refreshes.
pub(crate) fn refresh_publisher(
    layout: &ImageLayout,
    publisher: &Publisher,
) -> Result<(), ImageError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|err| ImageError::RefreshFailed {
            prefix: publisher.prefix.clone(),
            detail: err.to_string(),
        })?;

    let mut last_failure = String::from("no origin configured");
    for base in std::iter::once(&publisher.origin).chain(publisher.mirrors.iter()) {
        match fetch_catalog_pair(&client, base) {
            Ok((attrs_raw, catalog_raw)) => {
                let entries = parse_wire_catalog(&publisher.prefix, &attrs_raw, &catalog_raw)
                    .map_err(|detail| ImageError::RefreshFailed {
                        prefix: publisher.prefix.clone(),
                        detail: format!("{base}: {detail}"),
                    })?;
                store_publisher_catalog(layout, &publisher.prefix, entries)?;
                tracing::info!(publisher = %publisher.prefix, origin = %base, "catalog refreshed");
                return Ok(());
            }
            Err(detail) => {
                tracing::warn!(publisher = %publisher.prefix, origin = %base, %detail, "catalog fetch failed");
                last_failure = format!("{base}: {detail}");
            }
        }
    }

    Err(ImageError::RefreshFailed {
        prefix: publisher.prefix.clone(),
        detail: last_failure,
    })
}

fn fetch_catalog_pair(
    client: &reqwest::blocking::Client,
    base: &str,
) -> Result<(String, String), String> {
    let attrs = fetch_text(client, &catalog_url(base, "catalog.attrs"))?;
    let body = fetch_text(client, &catalog_url(base, "catalog"))?;
    Ok((attrs, body))
}

fn catalog_url(base: &str, file: &str) -> String {
    format!("{}/catalog/1/{file}", base.trim_end_matches('/'))
}

fn fetch_text(client: &reqwest::blocking::Client, url: &str) -> Result<String, String> {
    let response = client
        .get(url)
        .send()
        .map_err(|err| err.to_string())?
        .error_for_status()
        .map_err(|err| err.to_string())?;
    response.text().map_err(|err| err.to_string())
}

/// Validates a fetched attrs/catalog pair with the same all-or-nothing
/// policy the on-disk store applies. Unqualified lines are attributed to
/// the publisher being refreshed.
pub(crate) fn parse_wire_catalog(
    prefix: &str,
    attrs_raw: &str,
    catalog_raw: &str,
) -> Result<Vec<Fmri>, String> {
    let attrs: WireAttrs =
        serde_json::from_str(attrs_raw).map_err(|err| format!("unparsable attrs: {err}"))?;
    if attrs.version != 1 {
        return Err(format!("unsupported catalog version {}", attrs.version));
    }

    let mut entries = Vec::new();
    for line in catalog_raw.lines().filter(|line| !line.trim().is_empty()) {
        let Some(text) = line.strip_prefix("V ") else {
            return Err(format!("unrecognized entry line '{line}'"));
        };
        let fmri = Fmri::parse(text.trim()).map_err(|err| err.to_string())?;
        let fmri = if fmri.is_qualified() {
            fmri
        } else {
            fmri.with_publisher(prefix)
        };
        entries.push(fmri);
    }

    if entries.len() != attrs.package_version_count {
        return Err(format!(
            "attrs claim {} packages but the payload holds {}",
            attrs.package_version_count,
            entries.len()
        ));
    }
    Ok(entries)
}

pub(crate) fn store_publisher_catalog(
    layout: &ImageLayout,
    prefix: &str,
    entries: Vec<Fmri>,
) -> Result<(), ImageError> {
    let mut catalog = Catalog::open(
        layout.publisher_catalog_root(prefix),
        AccessMode::ReadWrite,
    )?;
    catalog.replace_entries(entries)?;
    catalog.save()?;
    Ok(())
}

/// Rebuilds the merged known catalog as the union of every *enabled*
/// publisher's cached catalog. Disabled publishers keep their cached data
/// but drop out of discovery until re-enabled.
pub(crate) fn rebuild_known(
    layout: &ImageLayout,
    registry: &PublisherRegistry,
) -> Result<(), ImageError> {
    let mut entries = Vec::new();
    for publisher in registry.enabled() {
        let catalog = Catalog::open(
            layout.publisher_catalog_root(&publisher.prefix),
            AccessMode::ReadOnly,
        )?;
        entries.extend(catalog.fmris().cloned());
    }

    let mut known = Catalog::open(layout.known_root(), AccessMode::ReadWrite)?;
    known.replace_entries(entries)?;
    known.save()?;
    Ok(())
}
