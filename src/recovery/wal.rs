//! Write-ahead log.
//!
//! # File Layout
//! ```text
//! ┌──────────────┬─────────────────────────────┬─────┬───────────┐
//! │ checksum (4) │ size (4) │ checksum (4) │ data │ ... │ bad tail? │
//! └──────────────┴─────────────────────────────┴─────┴───────────┘
//!  global          one entry
//! ```
//!
//! Each entry's checksum covers its data. The global checksum at offset 0
//! folds every complete entry (header and data) in order and is rewritten
//! after each append, once the entry itself is on disk. A crash can therefore
//! only damage the last entry, which [`Wal::open`] detects and truncates.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::common::{codec, Error, Result};

const SEED: u32 = 13331;

const OF_SIZE: usize = 0;
const OF_CHECKSUM: usize = 4;
const OF_DATA: usize = 8;

/// Bytes before the first entry.
const LOG_HEADER: u64 = 4;

/// Rolling hash `acc = acc * SEED + byte` over `bytes`, starting from `acc`.
pub fn calc_checksum(acc: u32, bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(acc, |acc, &b| acc.wrapping_mul(SEED).wrapping_add(b as u32))
}

/// What sits at a given log position.
enum Scan {
    /// A well-formed entry, header included.
    Entry(Vec<u8>),
    /// A header or body that runs past the end of the file, or whose checksum
    /// does not match. `end` is where the entry claims to stop, if that is
    /// inside the file.
    Malformed { end: Option<u64> },
    Eof,
}

fn scan_entry(file: &mut File, pos: u64, file_size: u64) -> Result<Scan> {
    if pos == file_size {
        return Ok(Scan::Eof);
    }
    if pos + OF_DATA as u64 > file_size {
        return Ok(Scan::Malformed { end: None });
    }

    let mut header = [0u8; OF_DATA];
    file.seek(SeekFrom::Start(pos))?;
    file.read_exact(&mut header)?;

    let size = codec::get_u32(&header, OF_SIZE) as u64;
    let checksum = codec::get_u32(&header, OF_CHECKSUM);
    let end = pos + OF_DATA as u64 + size;
    if end > file_size {
        return Ok(Scan::Malformed { end: None });
    }

    let mut entry = vec![0u8; OF_DATA + size as usize];
    entry[..OF_DATA].copy_from_slice(&header);
    file.read_exact(&mut entry[OF_DATA..])?;

    if calc_checksum(0, &entry[OF_DATA..]) != checksum {
        return Ok(Scan::Malformed { end: Some(end) });
    }
    Ok(Scan::Entry(entry))
}

/// Whether `buf` is a run of non-empty, intact entries with nothing after.
fn reaches_end(mut buf: &[u8]) -> bool {
    if buf.is_empty() {
        return false;
    }
    while !buf.is_empty() {
        if buf.len() < OF_DATA {
            return false;
        }
        let size = codec::get_u32(buf, OF_SIZE) as usize;
        if size == 0 || size > buf.len() - OF_DATA {
            return false;
        }
        let data = &buf[OF_DATA..OF_DATA + size];
        if calc_checksum(0, data) != codec::get_u32(buf, OF_CHECKSUM) {
            return false;
        }
        buf = &buf[OF_DATA + size..];
    }
    true
}

/// Frame `data` as a log entry.
fn wrap_entry(data: &[u8]) -> Vec<u8> {
    let mut entry = vec![0u8; OF_DATA + data.len()];
    codec::put_u32(&mut entry, OF_SIZE, data.len() as u32);
    codec::put_u32(&mut entry, OF_CHECKSUM, calc_checksum(0, data));
    entry[OF_DATA..].copy_from_slice(data);
    entry
}

struct WalInner {
    file: File,
    /// Global checksum of every entry in the file.
    checksum: u32,
    file_size: u64,
    /// Read cursor for [`Wal::next`].
    position: u64,
}

/// Append-only, checksummed log of record mutations.
///
/// # Thread Safety
/// One `Mutex` serialises appends and the read cursor, so log order is a
/// total order of all logged mutations.
pub struct Wal {
    inner: Mutex<WalInner>,
}

impl Wal {
    /// Create an empty log file.
    ///
    /// # Errors
    /// Returns `Error::FileExists` if the file already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => Error::FileExists(path.to_path_buf()),
                _ => Error::Io(e),
            })?;

        file.write_all(&0u32.to_be_bytes())?;
        file.sync_all()?;

        Ok(Self {
            inner: Mutex::new(WalInner {
                file,
                checksum: 0,
                file_size: LOG_HEADER,
                position: LOG_HEADER,
            }),
        })
    }

    /// Open a log file, discarding a bad tail left by a crash.
    ///
    /// # Errors
    /// - `Error::FileNotExists` if the file is missing
    /// - `Error::BadLogFile` if the file is damaged anywhere but its tail
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => Error::FileNotExists(path.to_path_buf()),
                _ => Error::Io(e),
            })?;

        let file_size = file.metadata()?.len();
        if file_size < LOG_HEADER {
            return Err(Error::BadLogFile(format!(
                "file is {} bytes, shorter than its header",
                file_size
            )));
        }

        let mut header = [0u8; LOG_HEADER as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;
        let stored = codec::get_u32(&header, 0);

        let (keep, checksum) = Self::check_tail(&mut file, file_size, stored)?;

        if keep < file_size {
            warn!(
                path = %path.display(),
                truncated = file_size - keep,
                "discarding bad log tail"
            );
            file.set_len(keep)?;
        }
        if checksum != stored {
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&checksum.to_be_bytes())?;
        }
        file.sync_all()?;
        debug!(path = %path.display(), size = keep, "opened log");

        Ok(Self {
            inner: Mutex::new(WalInner {
                file,
                checksum,
                file_size: keep,
                position: LOG_HEADER,
            }),
        })
    }

    /// Decide how much of the file to keep and the checksum it must carry.
    fn check_tail(file: &mut File, file_size: u64, stored: u32) -> Result<(u64, u32)> {
        // ends[i] / sums[i]: position and global checksum after i entries.
        let mut ends = vec![LOG_HEADER];
        let mut sums = vec![0u32];
        let mut pos = LOG_HEADER;

        let stopped_at = loop {
            match scan_entry(file, pos, file_size)? {
                Scan::Entry(entry) => {
                    pos += entry.len() as u64;
                    let acc = calc_checksum(sums[sums.len() - 1], &entry);
                    sums.push(acc);
                    ends.push(pos);
                }
                Scan::Malformed { end } => break Some(end),
                Scan::Eof => break None,
            }
        };

        let n = sums.len() - 1;
        if stored == sums[n] {
            return Ok((ends[n], sums[n]));
        }
        if n >= 1 && stored == sums[n - 1] {
            // Crashed after the entry hit disk but before the checksum did.
            return Ok((ends[n - 1], sums[n - 1]));
        }
        if let Some(end) = stopped_at {
            let nothing_follows = match end {
                None => !Self::chain_follows(file, ends[n], file_size)?,
                Some(end) => !matches!(scan_entry(file, end, file_size)?, Scan::Entry(_)),
            };
            if nothing_follows {
                return Ok((ends[n], sums[n]));
            }
            return Err(Error::BadLogFile(format!(
                "damaged entry at offset {} is followed by valid entries",
                ends[n]
            )));
        }

        Err(Error::BadLogFile(format!(
            "checksum mismatch: stored {:#010x}, computed {:#010x}",
            stored, sums[n]
        )))
    }

    /// Whether well-formed entries after the one at `damaged` run exactly to
    /// the end of the file. The damaged entry's size cannot be trusted, so
    /// every later offset is tried.
    fn chain_follows(file: &mut File, damaged: u64, file_size: u64) -> Result<bool> {
        let mut tail = vec![0u8; (file_size - damaged) as usize];
        file.seek(SeekFrom::Start(damaged))?;
        file.read_exact(&mut tail)?;
        Ok((OF_DATA..tail.len()).any(|start| reaches_end(&tail[start..])))
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Append `data` as one entry and make it durable.
    ///
    /// The entry is synced before the global checksum is updated.
    pub fn log(&self, data: &[u8]) -> Result<()> {
        let entry = wrap_entry(data);
        let mut inner = self.inner.lock();

        let end = inner.file_size;
        inner.file.seek(SeekFrom::Start(end))?;
        inner.file.write_all(&entry)?;
        inner.file.sync_data()?;

        let checksum = calc_checksum(inner.checksum, &entry);
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.write_all(&checksum.to_be_bytes())?;
        inner.file.sync_data()?;

        inner.checksum = checksum;
        inner.file_size += entry.len() as u64;
        Ok(())
    }

    /// Shrink the file to `len` bytes.
    pub fn truncate(&self, len: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.set_len(len)?;
        inner.file.sync_all()?;
        inner.file_size = len;
        inner.position = inner.position.min(len);
        Ok(())
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Move the read cursor back to the first entry.
    pub fn rewind(&self) {
        self.inner.lock().position = LOG_HEADER;
    }

    /// Data of the next entry, or `None` at the end of the log or at an
    /// entry whose checksum does not match.
    pub fn next(&self) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock();
        let (pos, size) = (inner.position, inner.file_size);

        match scan_entry(&mut inner.file, pos, size)? {
            Scan::Entry(entry) => {
                inner.position += entry.len() as u64;
                Ok(Some(entry[OF_DATA..].to_vec()))
            }
            Scan::Malformed { .. } | Scan::Eof => Ok(None),
        }
    }

    pub fn file_size(&self) -> u64 {
        self.inner.lock().file_size
    }

    /// Sync everything to disk.
    pub fn close(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn read_all(wal: &Wal) -> Vec<Vec<u8>> {
        wal.rewind();
        let mut out = Vec::new();
        while let Some(data) = wal.next().unwrap() {
            out.push(data);
        }
        out
    }

    #[test]
    fn test_reaches_end() {
        let mut buf = wrap_entry(b"ab");
        buf.extend(wrap_entry(b"cde"));
        assert!(reaches_end(&buf));
        assert!(!reaches_end(&buf[..buf.len() - 1]));
        assert!(!reaches_end(&[]));
        assert!(!reaches_end(&[0u8; 16]));

        buf.push(0);
        assert!(!reaches_end(&buf));
    }

    #[test]
    fn test_checksum_is_rolling_hash() {
        assert_eq!(calc_checksum(0, &[]), 0);
        assert_eq!(calc_checksum(0, &[1]), 1);
        assert_eq!(calc_checksum(0, &[1, 2]), 13331 + 2);
        assert_eq!(
            calc_checksum(calc_checksum(0, &[1]), &[2]),
            calc_checksum(0, &[1, 2])
        );
    }

    #[test]
    fn test_log_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");

        let wal = Wal::create(&path).unwrap();
        wal.log(b"first").unwrap();
        wal.log(b"second").unwrap();
        assert_eq!(wal.file_size(), 4 + 8 + 5 + 8 + 6);
        assert_eq!(read_all(&wal), vec![b"first".to_vec(), b"second".to_vec()]);
        drop(wal);

        let wal = Wal::open(&path).unwrap();
        assert_eq!(read_all(&wal), vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn test_open_truncates_partial_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");

        let wal = Wal::create(&path).unwrap();
        wal.log(b"kept").unwrap();
        let good_size = wal.file_size();
        drop(wal);

        // A crash mid-append leaves half an entry behind.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0, 0, 0, 9, 1, 2]).unwrap();
        drop(file);

        let wal = Wal::open(&path).unwrap();
        assert_eq!(wal.file_size(), good_size);
        assert_eq!(read_all(&wal), vec![b"kept".to_vec()]);
    }

    #[test]
    fn test_open_rejects_short_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");
        std::fs::write(&path, [0u8; 3]).unwrap();

        assert!(matches!(Wal::open(&path), Err(Error::BadLogFile(_))));
    }

    #[test]
    fn test_append_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");

        Wal::create(&path).unwrap().log(b"a").unwrap();
        Wal::open(&path).unwrap().log(b"b").unwrap();

        let wal = Wal::open(&path).unwrap();
        assert_eq!(read_all(&wal), vec![b"a".to_vec(), b"b".to_vec()]);
    }
}
