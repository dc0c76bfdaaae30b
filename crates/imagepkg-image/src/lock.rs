use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use crate::{ImageError, ImageLayout};

/// Advisory lock scoped to one image root.
///
/// Privileged mutations (install, uninstall, migration, index rebuild)
/// serialize through this; readers never take it. The claim is a
/// `create_new` open of `var/pkg/lock`, so exactly one process wins, and
/// the file is removed again when the guard drops.
#[derive(Debug)]
pub struct ImageLock {
    path: PathBuf,
}

impl ImageLock {
    pub fn acquire(layout: &ImageLayout) -> Result<Self, ImageError> {
        let path = layout.lock_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| ImageError::io(parent, err))?;
        }

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path)
                    .ok()
                    .map(|raw| raw.trim().to_string())
                    .filter(|raw| !raw.is_empty())
                    .unwrap_or_else(|| "unknown".to_string());
                return Err(ImageError::LockHeld { path, holder });
            }
            Err(err) => return Err(ImageError::io(&path, err)),
        };

        file.write_all(format!("{}\n", std::process::id()).as_bytes())
            .map_err(|err| ImageError::io(&path, err))?;
        Ok(Self { path })
    }
}

impl Drop for ImageLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
