use std::fs;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ImageError;

const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publisher {
    pub prefix: String,
    pub origin: String,
    #[serde(default)]
    pub mirrors: Vec<String>,
    #[serde(default)]
    pub preferred: bool,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default = "config_version_default")]
    version: u32,
    #[serde(default)]
    publishers: Vec<Publisher>,
}

fn config_version_default() -> u32 {
    CONFIG_VERSION
}

/// The configured repositories of one image, persisted as
/// `publishers.toml` under the image metadata root.
///
/// Invariant: at most one publisher carries the preferred flag, and adding
/// the first publisher makes it preferred.
#[derive(Debug, Clone)]
pub struct PublisherRegistry {
    config_path: PathBuf,
    publishers: Vec<Publisher>,
}

impl PublisherRegistry {
    pub fn load(config_path: impl Into<PathBuf>) -> Result<Self, ImageError> {
        let config_path = config_path.into();
        let publishers = match fs::read_to_string(&config_path) {
            Ok(raw) => {
                let file: RegistryFile =
                    toml::from_str(&raw).map_err(|err| ImageError::Config {
                        path: config_path.clone(),
                        reason: err.to_string(),
                    })?;
                file.publishers
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(ImageError::io(&config_path, err)),
        };

        Ok(Self {
            config_path,
            publishers,
        })
    }

    pub fn save(&self) -> Result<(), ImageError> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).map_err(|err| ImageError::io(parent, err))?;
        }
        let file = RegistryFile {
            version: CONFIG_VERSION,
            publishers: self.publishers.clone(),
        };
        let content = toml::to_string(&file).map_err(|err| ImageError::Config {
            path: self.config_path.clone(),
            reason: err.to_string(),
        })?;
        fs::write(&self.config_path, content)
            .map_err(|err| ImageError::io(&self.config_path, err))
    }

    pub fn add(&mut self, mut publisher: Publisher) -> Result<(), ImageError> {
        validate_prefix(&publisher.prefix)?;
        validate_depot_uri(&publisher.origin)?;
        for mirror in &publisher.mirrors {
            validate_depot_uri(mirror)?;
        }
        if self.get(&publisher.prefix).is_some() {
            return Err(ImageError::DuplicatePublisher {
                prefix: publisher.prefix,
            });
        }

        if self.publishers.is_empty() {
            publisher.preferred = true;
        } else if publisher.preferred {
            for existing in &mut self.publishers {
                existing.preferred = false;
            }
        }
        self.publishers.push(publisher);
        Ok(())
    }

    pub fn get(&self, prefix: &str) -> Option<&Publisher> {
        self.publishers.iter().find(|p| p.prefix == prefix)
    }

    fn get_mut(&mut self, prefix: &str) -> Result<&mut Publisher, ImageError> {
        self.publishers
            .iter_mut()
            .find(|p| p.prefix == prefix)
            .ok_or_else(|| ImageError::UnknownPublisher {
                prefix: prefix.to_string(),
            })
    }

    pub fn preferred(&self) -> Option<&Publisher> {
        self.publishers.iter().find(|p| p.preferred)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Publisher> + '_ {
        self.publishers.iter()
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Publisher> + '_ {
        self.publishers.iter().filter(|p| p.enabled)
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }

    /// Makes `prefix` the single preferred publisher; the previous holder's
    /// flag is cleared in the same in-memory update and persisted together.
    pub fn set_preferred(&mut self, prefix: &str) -> Result<(), ImageError> {
        self.get_mut(prefix)?;
        for publisher in &mut self.publishers {
            publisher.preferred = publisher.prefix == prefix;
        }
        Ok(())
    }

    /// Updates the origin and reports whether it actually changed. An origin
    /// change is what forces a catalog refresh; an identical origin must not.
    pub fn set_origin(&mut self, prefix: &str, origin: &str) -> Result<bool, ImageError> {
        validate_depot_uri(origin)?;
        let publisher = self.get_mut(prefix)?;
        if publisher.origin == origin {
            return Ok(false);
        }
        publisher.origin = origin.to_string();
        Ok(true)
    }

    pub fn add_mirror(&mut self, prefix: &str, mirror: &str) -> Result<(), ImageError> {
        validate_depot_uri(mirror)?;
        let publisher = self.get_mut(prefix)?;
        if !publisher.mirrors.iter().any(|m| m == mirror) {
            publisher.mirrors.push(mirror.to_string());
        }
        Ok(())
    }

    /// Enables or disables a publisher. Disabling only excludes it from
    /// refresh and unqualified resolution; its configuration and cached
    /// catalog data stay on disk.
    pub fn set_enabled(&mut self, prefix: &str, enabled: bool) -> Result<(), ImageError> {
        self.get_mut(prefix)?.enabled = enabled;
        Ok(())
    }
}

/// Publisher prefixes are short printable tokens: an ASCII letter or digit
/// followed by letters, digits, `-`, `_`, or `.`, at most 64 characters.
pub fn validate_prefix(prefix: &str) -> Result<(), ImageError> {
    let invalid = || ImageError::InvalidPrefix {
        prefix: prefix.to_string(),
    };

    if prefix.is_empty() || prefix.len() > 64 {
        return Err(invalid());
    }
    let mut chars = prefix.chars();
    let first = chars.next().ok_or_else(invalid)?;
    if !first.is_ascii_alphanumeric() {
        return Err(invalid());
    }
    if chars.any(|ch| !(ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.')) {
        return Err(invalid());
    }
    Ok(())
}

/// Validates a depot URI: `http` or `https` scheme, a well-formed host, and
/// a numeric port if one is given. Runs before any disk state is written.
pub fn validate_depot_uri(uri: &str) -> Result<(), ImageError> {
    let invalid = |reason: &str| ImageError::InvalidUri {
        uri: uri.to_string(),
        reason: reason.to_string(),
    };

    let Some((scheme, rest)) = uri.split_once("://") else {
        return Err(invalid("missing scheme"));
    };
    if scheme != "http" && scheme != "https" {
        return Err(invalid(&format!("unsupported scheme '{scheme}'")));
    }

    let authority = rest.split('/').next().unwrap_or("");
    if authority.is_empty() {
        return Err(invalid("missing host"));
    }

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (authority, None),
    };
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    if host
        .chars()
        .any(|ch| !(ch.is_ascii_alphanumeric() || ch == '-' || ch == '.'))
    {
        return Err(invalid("invalid character in host"));
    }
    if let Some(port) = port {
        if port.is_empty() || port.parse::<u16>().is_err() {
            return Err(invalid(&format!("unparsable port '{port}'")));
        }
    }
    Ok(())
}
