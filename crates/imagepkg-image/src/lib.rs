use std::io;
use std::path::PathBuf;

use imagepkg_catalog::CatalogError;
use imagepkg_core::MalformedFmri;

mod image;
mod index;
mod layout;
mod lock;
mod publisher;
mod refresh;
mod upgrade;

pub use image::{CreateOptions, Image, ImageMode, PublisherSpec, VerifyFinding};
pub use index::rebuild_index;
pub use layout::ImageLayout;
pub use lock::ImageLock;
pub use publisher::{validate_depot_uri, validate_prefix, Publisher, PublisherRegistry};
pub use upgrade::ImageFormat;


#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("invalid repository URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },
    #[error("invalid publisher prefix '{prefix}'")]
    InvalidPrefix { prefix: String },
    #[error("publisher '{prefix}' already exists")]
    DuplicatePublisher { prefix: String },
    #[error("unknown publisher '{prefix}'")]
    UnknownPublisher { prefix: String },
    #[error("image has no preferred publisher")]
    NoPreferredPublisher,
    #[error("at least one publisher must be provided")]
    NoPublishers,
    #[error("an image already exists at {}", root.display())]
    ImageAlreadyExists { root: PathBuf },
    #[error("directory {} is not empty (use force to create an image there anyway)", root.display())]
    RootNotEmpty { root: PathBuf },
    #[error("no image found at {}", root.display())]
    NotAnImage { root: PathBuf },
    #[error("no package matching '{name}' was found")]
    UnknownPackage { name: String },
    #[error("'{name}' matches packages from multiple publishers: {}", publishers.join(", "))]
    AmbiguousPackage {
        name: String,
        publishers: Vec<String>,
    },
    #[error("package '{name}' is not installed")]
    NotInstalled { name: String },
    #[error("image is locked by another process (pid {holder}) at {}", path.display())]
    LockHeld { path: PathBuf, holder: String },
    #[error("refresh of publisher '{prefix}' failed: {detail}")]
    RefreshFailed { prefix: String, detail: String },
    #[error("bad image configuration {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Fmri(#[from] MalformedFmri),
    #[error("I/O failure at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ImageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for failures caused by insufficient privilege.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::Io { source, .. } => source.kind() == io::ErrorKind::PermissionDenied,
            Self::Catalog(CatalogError::Io { source, .. }) => {
                source.kind() == io::ErrorKind::PermissionDenied
            }
            _ => false,
        }
    }
}
