//! Boot file - a few bytes replaced atomically.
//!
//! The boot file (`<path>.bt`) holds whatever small pointer the layers above
//! need to find their roots across restarts. Updates go to `<path>.bt_tmp`
//! first and are renamed over the real file, so a crash leaves either the old
//! or the new contents, never a mix.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::common::{codec, Error, Result, Uid};
use crate::storage::path_with_suffix;

const BOOTER_SUFFIX: &str = ".bt";
const BOOTER_TMP_SUFFIX: &str = ".bt_tmp";

/// Handle on a database's boot file.
pub struct Booter {
    path: PathBuf,
    tmp_path: PathBuf,
}

impl Booter {
    /// Create an empty boot file next to `path`.
    ///
    /// # Errors
    /// Returns `Error::FileExists` if the boot file already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let booter = Self::at(path.as_ref());
        booter.remove_stale_tmp()?;

        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&booter.path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => Error::FileExists(booter.path.clone()),
                _ => Error::Io(e),
            })?;

        Ok(booter)
    }

    /// Open the boot file next to `path`.
    ///
    /// # Errors
    /// Returns `Error::FileNotExists` if the boot file is missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let booter = Self::at(path.as_ref());
        booter.remove_stale_tmp()?;

        if !booter.path.exists() {
            return Err(Error::FileNotExists(booter.path.clone()));
        }
        Ok(booter)
    }

    fn at(path: &Path) -> Self {
        Self {
            path: path_with_suffix(path, BOOTER_SUFFIX),
            tmp_path: path_with_suffix(path, BOOTER_TMP_SUFFIX),
        }
    }

    /// A temp file left behind by a crash mid-update is never trusted.
    fn remove_stale_tmp(&self) -> Result<()> {
        match fs::remove_file(&self.tmp_path) {
            Ok(()) => {
                warn!(path = %self.tmp_path.display(), "removed stale boot temp file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Read the whole boot file.
    pub fn load(&self) -> Result<Vec<u8>> {
        Ok(fs::read(&self.path)?)
    }

    /// Replace the boot file's contents.
    pub fn update(&self, data: &[u8]) -> Result<()> {
        {
            let mut tmp = File::create(&self.tmp_path)?;
            tmp.write_all(data)?;
            tmp.sync_all()?;
        }
        fs::rename(&self.tmp_path, &self.path)?;
        debug!(len = data.len(), "updated boot file");
        Ok(())
    }

    /// Read the boot file as a single uid.
    ///
    /// # Errors
    /// Returns `Error::BadBootFile` if the file is not exactly 8 bytes.
    pub fn load_uid(&self) -> Result<Uid> {
        let raw = self.load()?;
        if raw.len() != 8 {
            return Err(Error::BadBootFile(format!(
                "expected 8 bytes, found {}",
                raw.len()
            )));
        }
        Ok(Uid::from_raw(codec::get_u64(&raw, 0)))
    }

    pub fn update_uid(&self, uid: Uid) -> Result<()> {
        self.update(&uid.raw().to_be_bytes())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
