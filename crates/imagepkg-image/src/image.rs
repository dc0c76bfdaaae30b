use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use imagepkg_catalog::{AccessMode, Catalog};
use imagepkg_core::Fmri;

use crate::refresh::{rebuild_known, refresh_publisher};
use crate::{upgrade, ImageError, ImageFormat, ImageLayout, ImageLock, Publisher, PublisherRegistry};

const MARKER_VERSION_LINE: &str = "VERSION_1";
const MARKER_PUBLISHER_TAG: &str = "_PRE_";

/// How an image is being accessed. Read-only access never mutates the disk
/// (legacy images are emulated, not migrated); read-write access is the
/// privileged path and migrates a legacy image before anything else runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOptions {
    pub force: bool,
    pub no_refresh: bool,
}

/// A `prefix=origin` publisher specification as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherSpec {
    pub prefix: String,
    pub origin: String,
}

impl PublisherSpec {
    pub fn parse(text: &str) -> Result<Self, ImageError> {
        let Some((prefix, origin)) = text.split_once('=') else {
            return Err(ImageError::InvalidUri {
                uri: text.to_string(),
                reason: "publisher must be specified as prefix=origin".to_string(),
            });
        };
        Ok(Self {
            prefix: prefix.to_string(),
            origin: origin.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyFinding {
    pub fmri: Fmri,
    pub problem: String,
}

/// An image root plus everything bound to it: its publisher registry and
/// its known/installed catalogs. Catalogs are loaded per operation, so a
/// corrupt known catalog only fails the operations that need it.
#[derive(Debug)]
pub struct Image {
    layout: ImageLayout,
    mode: ImageMode,
    format: ImageFormat,
    registry: PublisherRegistry,
}

impl Image {
    /// Opens an existing image. Read-write opens of a legacy image migrate
    /// it to the current format first; read-only opens translate on the fly.
    pub fn open(root: impl AsRef<Path>, mode: ImageMode) -> Result<Self, ImageError> {
        let root = normalize_root(root.as_ref())?;
        let layout = ImageLayout::new(root);
        let mut format = upgrade::detect(&layout)?;
        let registry = PublisherRegistry::load(layout.publishers_config_path())?;

        if format == ImageFormat::Legacy && mode == ImageMode::ReadWrite {
            upgrade::migrate(&layout, &registry)?;
            format = ImageFormat::Current;
        }

        Ok(Self {
            layout,
            mode,
            format,
            registry,
        })
    }

    /// Creates a new image. Validation runs before anything touches the
    /// disk, and a partial failure removes whatever this call created, so a
    /// later `create` without force never sees a residual "already exists".
    pub fn create(
        root: impl AsRef<Path>,
        specs: &[PublisherSpec],
        mirrors: &[String],
        options: CreateOptions,
    ) -> Result<Self, ImageError> {
        if specs.is_empty() {
            return Err(ImageError::NoPublishers);
        }
        for spec in specs {
            crate::validate_prefix(&spec.prefix)?;
            crate::validate_depot_uri(&spec.origin)?;
        }
        for mirror in mirrors {
            crate::validate_depot_uri(mirror)?;
        }

        let root = normalize_root(root.as_ref())?;
        let layout = ImageLayout::new(&root);

        let meta_existed = layout.meta_root().exists();
        if meta_existed && !options.force {
            return Err(ImageError::ImageAlreadyExists { root });
        }
        let root_existed = root.exists();
        if root_existed && !meta_existed && !options.force && !dir_is_empty(&root)? {
            return Err(ImageError::RootNotEmpty { root });
        }
        if meta_existed {
            // Force re-create drops the prior image state wholesale.
            fs::remove_dir_all(layout.meta_root())
                .map_err(|err| ImageError::io(layout.meta_root(), err))?;
        }

        match Self::build_new(&layout, specs, mirrors, options) {
            Ok(image) => Ok(image),
            Err(err) => {
                if root_existed {
                    let _ = fs::remove_dir_all(layout.meta_root());
                    let _ = fs::remove_dir(root.join("var"));
                } else {
                    let _ = fs::remove_dir_all(&root);
                }
                Err(err)
            }
        }
    }

    fn build_new(
        layout: &ImageLayout,
        specs: &[PublisherSpec],
        mirrors: &[String],
        options: CreateOptions,
    ) -> Result<Self, ImageError> {
        layout.ensure_base_dirs()?;

        let mut registry = PublisherRegistry::load(layout.publishers_config_path())?;
        for (position, spec) in specs.iter().enumerate() {
            let seed = position == 0;
            registry.add(Publisher {
                prefix: spec.prefix.clone(),
                origin: spec.origin.clone(),
                mirrors: if seed { mirrors.to_vec() } else { Vec::new() },
                preferred: seed,
                enabled: true,
            })?;
        }
        registry.save()?;

        for meta_root in [layout.known_root(), layout.installed_root()] {
            Catalog::open(meta_root, AccessMode::ReadWrite)?.save()?;
        }

        let mut image = Self {
            layout: layout.clone(),
            mode: ImageMode::ReadWrite,
            format: ImageFormat::Current,
            registry,
        };
        if !options.no_refresh {
            image.refresh(None)?;
        }
        tracing::info!(root = %layout.root().display(), "image created");
        Ok(image)
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn registry(&self) -> &PublisherRegistry {
        &self.registry
    }

    fn catalog_mode(&self) -> AccessMode {
        match self.mode {
            ImageMode::ReadOnly => AccessMode::ReadOnly,
            ImageMode::ReadWrite => AccessMode::ReadWrite,
        }
    }

    fn require_write(&self) -> Result<(), ImageError> {
        match self.mode {
            ImageMode::ReadWrite => Ok(()),
            ImageMode::ReadOnly => Err(ImageError::io(
                self.layout.meta_root(),
                io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "operation requires a writable image",
                ),
            )),
        }
    }

    /// The union of enabled publishers' packages.
    pub fn known_catalog(&self) -> Result<Catalog, ImageError> {
        match self.format {
            ImageFormat::Current => {
                Ok(Catalog::open(self.layout.known_root(), self.catalog_mode())?)
            }
            ImageFormat::Legacy => upgrade::legacy_known_catalog(&self.layout, &self.registry),
        }
    }

    /// What is actually present in this image.
    pub fn installed_catalog(&self) -> Result<Catalog, ImageError> {
        match self.format {
            ImageFormat::Current => Ok(Catalog::open(
                self.layout.installed_root(),
                self.catalog_mode(),
            )?),
            ImageFormat::Legacy => upgrade::legacy_installed_catalog(&self.layout, &self.registry),
        }
    }

    pub fn list(&self, all_known: bool) -> Result<Vec<Fmri>, ImageError> {
        let catalog = if all_known {
            self.known_catalog()?
        } else {
            self.installed_catalog()?
        };
        Ok(catalog.fmris().cloned().collect())
    }

    /// Resolution for `info`/`uninstall`: installed state answers first, so
    /// a package installed from a since-disabled publisher is still
    /// addressable; discovery falls back to the known catalog.
    pub fn resolve(&self, name: &str) -> Result<Fmri, ImageError> {
        match self.resolve_installed(name) {
            Ok(fmri) => Ok(fmri),
            Err(ImageError::NotInstalled { .. }) => self.resolve_known(name),
            Err(err) => Err(err),
        }
    }

    pub fn resolve_installed(&self, name: &str) -> Result<Fmri, ImageError> {
        let request = Fmri::parse(name)?;
        let installed = self.installed_catalog()?;
        pick_match(&installed, &request)
            .cloned()
            .ok_or_else(|| ImageError::NotInstalled {
                name: name.to_string(),
            })
    }

    /// Resolution against the known catalog. Unqualified names go to the
    /// preferred publisher first; failing that, a single offering publisher
    /// wins and several make the name ambiguous.
    pub fn resolve_known(&self, name: &str) -> Result<Fmri, ImageError> {
        let request = Fmri::parse(name)?;
        let known = self.known_catalog()?;

        if request.is_qualified() {
            return pick_match(&known, &request)
                .cloned()
                .ok_or_else(|| ImageError::UnknownPackage {
                    name: name.to_string(),
                });
        }

        if let Some(preferred) = self.registry.preferred() {
            let qualified = request.with_publisher(&preferred.prefix);
            if let Some(hit) = pick_match(&known, &qualified) {
                return Ok(hit.clone());
            }
        }

        let publishers: Vec<String> = known
            .publishers_for(&request.stem)
            .into_iter()
            .map(String::from)
            .collect();
        match publishers.as_slice() {
            [] => Err(ImageError::UnknownPackage {
                name: name.to_string(),
            }),
            [single] => {
                let qualified = request.with_publisher(single);
                pick_match(&known, &qualified)
                    .cloned()
                    .ok_or_else(|| ImageError::UnknownPackage {
                        name: name.to_string(),
                    })
            }
            _ => Err(ImageError::AmbiguousPackage {
                name: name.to_string(),
                publishers,
            }),
        }
    }

    /// Records a package as installed: adds it to the installed catalog and
    /// writes the marker naming the installing publisher. Unqualified names
    /// are resolved against the preferred publisher *now*; later publisher
    /// changes do not re-attribute this install.
    pub fn install(&mut self, name: &str) -> Result<Fmri, ImageError> {
        self.require_write()?;
        let _lock = ImageLock::acquire(&self.layout)?;

        let fmri = self.resolve_known(name)?;
        let mut installed = Catalog::open(self.layout.installed_root(), AccessMode::ReadWrite)?;
        installed.add(fmri.clone())?;
        installed.save()?;
        write_install_marker(&self.layout, &fmri)?;

        tracing::info!(package = %fmri, "package installed");
        Ok(fmri)
    }

    /// Removes a package from the installed state: catalog entry, marker,
    /// and the per-package state directory.
    pub fn uninstall(&mut self, name: &str) -> Result<Fmri, ImageError> {
        self.require_write()?;
        let _lock = ImageLock::acquire(&self.layout)?;

        let fmri = self.resolve_installed(name)?;
        let mut installed = Catalog::open(self.layout.installed_root(), AccessMode::ReadWrite)?;
        installed.remove(&fmri);
        installed.save()?;

        let state_dir = self.layout.package_state_dir(&fmri);
        if state_dir.exists() {
            fs::remove_dir_all(&state_dir).map_err(|err| ImageError::io(&state_dir, err))?;
        }

        tracing::info!(package = %fmri, "package uninstalled");
        Ok(fmri)
    }

    /// Adds a publisher to an existing image and, unless suppressed,
    /// refreshes its catalog right away.
    pub fn add_publisher(
        &mut self,
        spec: &PublisherSpec,
        preferred: bool,
        no_refresh: bool,
    ) -> Result<(), ImageError> {
        self.require_write()?;
        self.registry.add(Publisher {
            prefix: spec.prefix.clone(),
            origin: spec.origin.clone(),
            mirrors: Vec::new(),
            preferred,
            enabled: true,
        })?;
        self.registry.save()?;
        if no_refresh {
            return Ok(());
        }
        self.refresh(Some(std::slice::from_ref(&spec.prefix)))
    }

    /// Sets a publisher's origin. An actual change forces a refresh of that
    /// publisher, the one case where refresh cannot be skipped; an unchanged
    /// origin refreshes nothing.
    pub fn set_publisher_origin(&mut self, prefix: &str, origin: &str) -> Result<bool, ImageError> {
        self.require_write()?;
        let changed = self.registry.set_origin(prefix, origin)?;
        if !changed {
            return Ok(false);
        }
        self.registry.save()?;
        self.refresh(Some(&[prefix.to_string()]))?;
        Ok(true)
    }

    pub fn add_publisher_mirror(&mut self, prefix: &str, mirror: &str) -> Result<(), ImageError> {
        self.require_write()?;
        self.registry.add_mirror(prefix, mirror)?;
        self.registry.save()
    }

    pub fn set_preferred_publisher(&mut self, prefix: &str) -> Result<(), ImageError> {
        self.require_write()?;
        self.registry.set_preferred(prefix)?;
        self.registry.save()
    }

    pub fn set_publisher_enabled(&mut self, prefix: &str, enabled: bool) -> Result<(), ImageError> {
        self.require_write()?;
        self.registry.set_enabled(prefix, enabled)?;
        self.registry.save()?;
        rebuild_known(&self.layout, &self.registry)
    }

    /// Refreshes the named publishers (or every enabled one) and rebuilds
    /// the merged known catalog. This is the only path by which known
    /// contents change for unqualified discovery.
    pub fn refresh(&mut self, prefixes: Option<&[String]>) -> Result<(), ImageError> {
        self.require_write()?;
        let targets: Vec<Publisher> = match prefixes {
            None => self.registry.enabled().cloned().collect(),
            Some(prefixes) => {
                let mut targets = Vec::with_capacity(prefixes.len());
                for prefix in prefixes {
                    let publisher = self.registry.get(prefix).ok_or_else(|| {
                        ImageError::UnknownPublisher {
                            prefix: prefix.clone(),
                        }
                    })?;
                    targets.push(publisher.clone());
                }
                targets
            }
        };

        for publisher in &targets {
            refresh_publisher(&self.layout, publisher)?;
        }
        rebuild_known(&self.layout, &self.registry)
    }

    /// Cross-checks the installed catalog against the per-package markers.
    pub fn verify(&self) -> Result<Vec<VerifyFinding>, ImageError> {
        let installed = self.installed_catalog()?;
        let mut findings = Vec::new();
        for fmri in installed.fmris() {
            match read_marker_publisher(&self.layout, fmri)? {
                None => findings.push(VerifyFinding {
                    fmri: fmri.clone(),
                    problem: format!(
                        "install marker {} is missing",
                        self.layout.install_marker_path(fmri).display()
                    ),
                }),
                Some(publisher) if Some(publisher.as_str()) != fmri.publisher.as_deref() => {
                    findings.push(VerifyFinding {
                        fmri: fmri.clone(),
                        problem: format!(
                            "install marker names publisher '{publisher}' but the catalog says '{}'",
                            fmri.publisher.as_deref().unwrap_or("")
                        ),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(findings)
    }
}

pub(crate) fn write_install_marker(layout: &ImageLayout, fmri: &Fmri) -> Result<(), ImageError> {
    let publisher = fmri.publisher.as_deref().unwrap_or_default();
    let dir = layout.package_state_dir(fmri);
    fs::create_dir_all(&dir).map_err(|err| ImageError::io(&dir, err))?;
    let path = layout.install_marker_path(fmri);
    fs::write(
        &path,
        format!("{MARKER_VERSION_LINE}\n{MARKER_PUBLISHER_TAG}{publisher}"),
    )
    .map_err(|err| ImageError::io(&path, err))
}

/// Reads the installing publisher out of a marker file, or `None` when the
/// marker does not exist.
pub(crate) fn read_marker_publisher(
    layout: &ImageLayout,
    fmri: &Fmri,
) -> Result<Option<String>, ImageError> {
    let path = layout.install_marker_path(fmri);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(ImageError::io(&path, err)),
    };

    let mut lines = raw.lines();
    if lines.next() != Some(MARKER_VERSION_LINE) {
        return Err(ImageError::Config {
            path,
            reason: "unrecognized install marker version".to_string(),
        });
    }
    let publisher = lines
        .next()
        .and_then(|line| line.strip_prefix(MARKER_PUBLISHER_TAG))
        .map(str::to_string);
    Ok(publisher)
}

fn pick_match<'a>(catalog: &'a Catalog, request: &Fmri) -> Option<&'a Fmri> {
    if request.version.is_none() {
        return catalog.newest(&request.stem, request.publisher.as_deref());
    }
    catalog
        .fmris()
        .filter(|entry| entry.stem == request.stem)
        .filter(|entry| request.publisher.is_none() || entry.publisher == request.publisher)
        .find(|entry| entry.version == request.version)
}

fn normalize_root(root: &Path) -> Result<PathBuf, ImageError> {
    if root.is_absolute() {
        return Ok(root.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|err| ImageError::io(root, err))?;
    Ok(cwd.join(root))
}

fn dir_is_empty(dir: &Path) -> Result<bool, ImageError> {
    let mut entries = fs::read_dir(dir).map_err(|err| ImageError::io(dir, err))?;
    Ok(entries.next().is_none())
}
