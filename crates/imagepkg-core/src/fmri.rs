use std::cmp::Ordering;
use std::fmt;

use crate::Version;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed FMRI '{input}': {reason}")]
pub struct MalformedFmri {
    pub input: String,
    pub reason: String,
}

impl MalformedFmri {
    pub(crate) fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// A package coordinate: publisher, stem, and version.
///
/// Accepted string forms: `pkg://publisher/stem@version`, `pkg:/stem@version`,
/// `stem@version`, and a bare `stem` for lookups. The publisher is absent on
/// unqualified references and resolved against the preferred publisher.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fmri {
    pub publisher: Option<String>,
    pub stem: String,
    pub version: Option<Version>,
}

impl Fmri {
    pub fn parse(input: &str) -> Result<Self, MalformedFmri> {
        let original = input;
        let (publisher, rest) = if let Some(rest) = input.strip_prefix("pkg://") {
            let Some((publisher, rest)) = rest.split_once('/') else {
                return Err(MalformedFmri::new(original, "missing stem after publisher"));
            };
            if publisher.is_empty() {
                return Err(MalformedFmri::new(original, "empty publisher"));
            }
            (Some(publisher.to_string()), rest)
        } else if let Some(rest) = input.strip_prefix("pkg:/") {
            (None, rest)
        } else if input.contains(':') && !input.contains('@') {
            return Err(MalformedFmri::new(original, "unrecognized scheme"));
        } else {
            (None, input)
        };

        let (stem, version) = match rest.split_once('@') {
            Some((stem, version)) => (stem, Some(Version::parse(version)?)),
            None => (rest, None),
        };

        if stem.is_empty() {
            return Err(MalformedFmri::new(original, "empty package stem"));
        }
        if stem
            .chars()
            .any(|ch| ch.is_whitespace() || ch.is_control() || ch == '@')
        {
            return Err(MalformedFmri::new(original, "invalid character in stem"));
        }

        Ok(Self {
            publisher,
            stem: stem.to_string(),
            version,
        })
    }

    pub fn new(publisher: Option<&str>, stem: &str, version: Version) -> Self {
        Self {
            publisher: publisher.map(ToOwned::to_owned),
            stem: stem.to_string(),
            version: Some(version),
        }
    }

    /// Requalifies this FMRI under the given publisher.
    pub fn with_publisher(&self, publisher: &str) -> Self {
        Self {
            publisher: Some(publisher.to_string()),
            stem: self.stem.clone(),
            version: self.version.clone(),
        }
    }

    pub fn is_qualified(&self) -> bool {
        self.publisher.is_some()
    }

    /// Filesystem encoding used for the per-package directory:
    /// `<stem>/<encoded-version>`.
    pub fn dir_path(&self) -> String {
        match &self.version {
            Some(version) => format!("{}/{}", self.stem, quote_component(&version.to_string())),
            None => self.stem.clone(),
        }
    }

    /// Single-component encoding used for state-file names.
    pub fn link_path(&self) -> String {
        match &self.version {
            Some(version) => quote_component(&format!("{}@{}", self.stem, version)),
            None => quote_component(&self.stem),
        }
    }
}

impl Ord for Fmri {
    fn cmp(&self, other: &Self) -> Ordering {
        self.stem
            .cmp(&other.stem)
            .then_with(|| self.version.cmp(&other.version))
            .then_with(|| self.publisher.cmp(&other.publisher))
    }
}

impl PartialOrd for Fmri {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Fmri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.publisher {
            Some(publisher) => write!(f, "pkg://{}/{}", publisher, self.stem)?,
            None => write!(f, "pkg:/{}", self.stem)?,
        }
        if let Some(version) = &self.version {
            write!(f, "@{version}")?;
        }
        Ok(())
    }
}

/// Percent-escapes everything outside `[A-Za-z0-9._-]` so the result is a
/// single safe path component.
fn quote_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => {
                out.push(byte as char);
            }
            other => {
                out.push('%');
                out.push_str(&format!("{other:02X}"));
            }
        }
    }
    out
}

/// Decodes a `link_path` file name back into an FMRI string.
pub(crate) fn unquote_component(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

impl Fmri {
    /// Parses the `<stem>@<version>` encoding produced by [`Fmri::link_path`].
    pub fn from_link_path(name: &str) -> Result<Self, MalformedFmri> {
        let decoded = unquote_component(name)
            .ok_or_else(|| MalformedFmri::new(name, "invalid link-path encoding"))?;
        Self::parse(&decoded)
    }
}
