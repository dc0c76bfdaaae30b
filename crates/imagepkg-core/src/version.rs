use std::cmp::Ordering;
use std::fmt;

use crate::MalformedFmri;

/// A dotted sequence of numeric segments, e.g. `5.21.4.10.8`.
///
/// Segments compare numerically, so `0.10` sorts after `0.9`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DotSequence(Vec<u64>);

impl DotSequence {
    pub fn parse(input: &str, original: &str) -> Result<Self, MalformedFmri> {
        if input.is_empty() {
            return Err(MalformedFmri::new(original, "empty version sequence"));
        }

        let mut segments = Vec::new();
        for segment in input.split('.') {
            let value = segment.parse::<u64>().map_err(|_| {
                MalformedFmri::new(original, format!("non-numeric version segment '{segment}'"))
            })?;
            segments.push(value);
        }
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[u64] {
        &self.0
    }
}

impl fmt::Display for DotSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.0 {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{segment}")?;
            first = false;
        }
        Ok(())
    }
}

/// A package version: `release[,build][-branch][:timestamp]`.
///
/// Example: `5.21.4.10.8,5.11-0.86:20080426T173208Z`. The timestamp uses
/// basic ISO form, which orders correctly under plain string comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub release: DotSequence,
    pub build: Option<DotSequence>,
    pub branch: Option<DotSequence>,
    pub timestamp: Option<String>,
}

impl Version {
    pub fn parse(input: &str) -> Result<Self, MalformedFmri> {
        let original = input;
        let (head, timestamp) = match input.split_once(':') {
            Some((head, ts)) => {
                if ts.is_empty() {
                    return Err(MalformedFmri::new(original, "empty version timestamp"));
                }
                (head, Some(ts.to_string()))
            }
            None => (input, None),
        };

        let (head, branch) = match head.split_once('-') {
            Some((head, branch)) => (head, Some(DotSequence::parse(branch, original)?)),
            None => (head, None),
        };

        let (release, build) = match head.split_once(',') {
            Some((release, build)) => (
                DotSequence::parse(release, original)?,
                Some(DotSequence::parse(build, original)?),
            ),
            None => (DotSequence::parse(head, original)?, None),
        };

        Ok(Self {
            release,
            build,
            branch,
            timestamp,
        })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.release
            .cmp(&other.release)
            .then_with(|| self.build.cmp(&other.build))
            .then_with(|| self.branch.cmp(&other.branch))
            .then_with(|| self.timestamp.cmp(&other.timestamp))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.release)?;
        if let Some(build) = &self.build {
            write!(f, ",{build}")?;
        }
        if let Some(branch) = &self.branch {
            write!(f, "-{branch}")?;
        }
        if let Some(timestamp) = &self.timestamp {
            write!(f, ":{timestamp}")?;
        }
        Ok(())
    }
}
