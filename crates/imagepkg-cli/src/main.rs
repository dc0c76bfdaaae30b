use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use imagepkg_image::{rebuild_index, CreateOptions, Image, ImageMode, PublisherSpec};

#[derive(Parser, Debug)]
#[command(name = "imagepkg")]
#[command(about = "Image packaging client", long_about = None)]
struct Cli {
    /// Operate on the image rooted at this directory.
    #[arg(short = 'R', long = "image-root", global = true, default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new image at the given path.
    ImageCreate {
        /// Publisher to seed the image with, as prefix=origin. The first
        /// one becomes the preferred publisher. May be repeated.
        #[arg(
            short = 'p',
            long = "publisher",
            required = true,
            value_name = "prefix=origin"
        )]
        publishers: Vec<String>,
        /// Additional origin URI, kept as a mirror of the preferred
        /// publisher. May be repeated.
        #[arg(short = 'g', long = "origin", value_name = "uri")]
        origins: Vec<String>,
        /// Mirror URI for the preferred publisher. May be repeated.
        #[arg(short = 'm', long = "mirror", value_name = "uri")]
        mirrors: Vec<String>,
        /// Create the image even if the directory is not empty, replacing
        /// any image already there.
        #[arg(short = 'f', long = "force")]
        force: bool,
        /// Do not contact the publishers' repositories after creation.
        #[arg(long = "no-refresh")]
        no_refresh: bool,
        path: PathBuf,
    },
    /// List installed packages, or every known package with -a.
    List {
        #[arg(short = 'a', long = "all-known")]
        all_known: bool,
        /// Do not refresh publisher catalogs before listing.
        #[arg(long = "no-refresh")]
        no_refresh: bool,
    },
    /// Show details for the named packages.
    Info {
        /// Look the packages up in the publishers' catalogs instead of the
        /// installed state.
        #[arg(short = 'r', long = "remote")]
        remote: bool,
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Install the named packages.
    Install {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Uninstall the named packages.
    Uninstall {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Retrieve updated catalogs from the named publishers, or all of them.
    Refresh { publishers: Vec<String> },
    /// Show the image's publishers.
    Publisher,
    /// Add a publisher or change an existing one.
    SetPublisher {
        /// Set the publisher's origin repository URI.
        #[arg(short = 'O', long = "origin", value_name = "uri")]
        origin: Option<String>,
        /// Add a mirror URI to the publisher.
        #[arg(short = 'm', long = "mirror", value_name = "uri")]
        mirror: Option<String>,
        /// Make this the preferred publisher.
        #[arg(short = 'P', long = "preferred")]
        preferred: bool,
        /// Disable the publisher, hiding its packages from discovery.
        #[arg(short = 'd', long = "disable", conflicts_with = "enable")]
        disable: bool,
        /// Re-enable a disabled publisher.
        #[arg(short = 'e', long = "enable")]
        enable: bool,
        /// Do not refresh the publisher's catalog after the change.
        #[arg(long = "no-refresh")]
        no_refresh: bool,
        prefix: String,
    },
    /// Rebuild the image's search index from the installed catalog.
    RebuildIndex,
    /// Cross-check installed packages against their state records.
    Verify,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("imagepkg: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::ImageCreate {
            publishers,
            origins,
            mut mirrors,
            force,
            no_refresh,
            path,
        } => {
            let specs = publishers
                .iter()
                .map(|text| PublisherSpec::parse(text))
                .collect::<Result<Vec<_>, _>>()?;
            // Extra origins behave as additional sources for the preferred
            // publisher, same as mirrors.
            mirrors.extend(origins);
            let image = Image::create(&path, &specs, &mirrors, CreateOptions { force, no_refresh })
                .with_context(|| format!("cannot create image at {}", path.display()))?;
            println!("Image created at {}", image.layout().root().display());
        }
        Commands::List {
            all_known,
            no_refresh,
        } => {
            if all_known && !no_refresh {
                // Best-effort catalog refresh; a stale listing is still a
                // listing.
                match Image::open(&cli.root, ImageMode::ReadWrite) {
                    Ok(mut image) => {
                        if let Err(err) = image.refresh(None) {
                            eprintln!("imagepkg: refresh failed, listing cached data: {err}");
                        }
                    }
                    Err(err) => {
                        eprintln!("imagepkg: cannot refresh, listing cached data: {err}");
                    }
                }
            }
            let image = Image::open(&cli.root, ImageMode::ReadOnly)?;
            let packages = image.list(all_known)?;
            if packages.is_empty() {
                bail!("no packages {}", if all_known { "known" } else { "installed" });
            }
            for fmri in packages {
                println!("{fmri}");
            }
        }
        Commands::Info { remote, names } => {
            let image = Image::open(&cli.root, ImageMode::ReadOnly)?;
            let installed = image.installed_catalog()?;
            for (position, name) in names.iter().enumerate() {
                let fmri = if remote {
                    image.resolve_known(name)
                } else {
                    image.resolve(name)
                }
                .with_context(|| format!("cannot look up '{name}'"))?;
                if position > 0 {
                    println!();
                }
                println!("          Name: {}", fmri.stem);
                if let Some(publisher) = &fmri.publisher {
                    println!("     Publisher: {publisher}");
                }
                if let Some(version) = &fmri.version {
                    println!("       Version: {version}");
                }
                let state = if installed.contains(&fmri) {
                    "Installed"
                } else {
                    "Not installed"
                };
                println!("         State: {state}");
            }
        }
        Commands::Install { names } => {
            let mut image = Image::open(&cli.root, ImageMode::ReadWrite)?;
            for name in &names {
                let fmri = image
                    .install(name)
                    .with_context(|| format!("cannot install '{name}'"))?;
                println!("Installed {fmri}");
            }
            rebuild_index(image.layout())?;
        }
        Commands::Uninstall { names } => {
            let mut image = Image::open(&cli.root, ImageMode::ReadWrite)?;
            for name in &names {
                let fmri = image
                    .uninstall(name)
                    .with_context(|| format!("cannot uninstall '{name}'"))?;
                println!("Uninstalled {fmri}");
            }
            rebuild_index(image.layout())?;
        }
        Commands::Refresh { publishers } => {
            let mut image = Image::open(&cli.root, ImageMode::ReadWrite)?;
            let targets = if publishers.is_empty() {
                None
            } else {
                Some(publishers)
            };
            image.refresh(targets.as_deref())?;
        }
        Commands::Publisher => {
            let image = Image::open(&cli.root, ImageMode::ReadOnly)?;
            for publisher in image.registry().iter() {
                let mut flags = Vec::new();
                if publisher.preferred {
                    flags.push("preferred");
                }
                if !publisher.enabled {
                    flags.push("disabled");
                }
                let annotation = if flags.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", flags.join(", "))
                };
                println!("{}{annotation} {}", publisher.prefix, publisher.origin);
                for mirror in &publisher.mirrors {
                    println!("    mirror: {mirror}");
                }
            }
        }
        Commands::SetPublisher {
            origin,
            mirror,
            preferred,
            disable,
            enable,
            no_refresh,
            prefix,
        } => {
            let mut image = Image::open(&cli.root, ImageMode::ReadWrite)?;
            let exists = image.registry().get(&prefix).is_some();

            if let Some(origin) = origin {
                if exists {
                    image.set_publisher_origin(&prefix, &origin)?;
                } else {
                    let spec = PublisherSpec {
                        prefix: prefix.clone(),
                        origin,
                    };
                    image.add_publisher(&spec, preferred, no_refresh)?;
                }
            } else if !exists {
                bail!("unknown publisher '{prefix}' (use -O to add one)");
            }

            if let Some(mirror) = mirror {
                image.add_publisher_mirror(&prefix, &mirror)?;
            }
            if preferred && exists {
                image.set_preferred_publisher(&prefix)?;
            }
            if disable {
                image.set_publisher_enabled(&prefix, false)?;
            }
            if enable {
                image.set_publisher_enabled(&prefix, true)?;
            }
        }
        Commands::RebuildIndex => {
            let image = Image::open(&cli.root, ImageMode::ReadWrite)?;
            rebuild_index(image.layout())
                .context("cannot rebuild the search index")?;
        }
        Commands::Verify => {
            let image = Image::open(&cli.root, ImageMode::ReadOnly)?;
            let findings = image.verify()?;
            if findings.is_empty() {
                println!("OK");
            } else {
                for finding in &findings {
                    println!("{}: {}", finding.fmri, finding.problem);
                }
                bail!("{} package(s) failed verification", findings.len());
            }
        }
    }
    Ok(())
}
