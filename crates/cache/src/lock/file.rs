//! Advisory file locks.
//!
//! Every lock here is an `fs2` advisory lock held through an open handle and
//! released when the handle is dropped. Lock files can be unlinked while a
//! handle is open, so every acquisition is followed by [`FileLock::is_current`]
//! before the holder trusts what it locked.
//!
//! `std::fs::File` grew inherent locking methods with the same names as
//! `fs2::FileExt`'s; calls go through the trait explicitly so the `fs2`
//! semantics are the ones in effect.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// An open lock file with an advisory lock held on it.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

/// Whether `err` means another handle holds a conflicting lock.
pub fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl FileLock {
    /// Create `path`, failing if it already exists, and lock it exclusively.
    ///
    /// Exactly one concurrent caller can create a given path. Returns
    /// `Ok(None)` when the file already exists.
    pub fn create_exclusive(path: &Path) -> io::Result<Option<Self>> {
        let file = match OpenOptions::new().read(true).write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(e),
        };
        // Nobody else can hold a lock on a file this new, except a purger
        // that opened it between our create and this call; waiting for it is
        // bounded by the purge itself.
        FileExt::lock_exclusive(&file)?;
        Ok(Some(Self {
            file,
            path: path.to_path_buf(),
            mode: LockMode::Exclusive,
        }))
    }

    /// Open an existing lock file and try to lock it without blocking.
    ///
    /// Returns `Ok(None)` when the lock is contended. A missing file is an
    /// error of kind [`io::ErrorKind::NotFound`].
    pub fn try_open(path: &Path, mode: LockMode) -> io::Result<Option<Self>> {
        Self::try_open_with(path, mode, false)
    }

    /// As [`try_open`](Self::try_open), but with a writable handle.
    pub fn try_open_writable(path: &Path, mode: LockMode) -> io::Result<Option<Self>> {
        Self::try_open_with(path, mode, true)
    }

    fn try_open_with(path: &Path, mode: LockMode, write: bool) -> io::Result<Option<Self>> {
        let file = OpenOptions::new().read(true).write(write).open(path)?;
        let locked = match mode {
            LockMode::Shared => FileExt::try_lock_shared(&file),
            LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
        };
        match locked {
            Ok(()) => Ok(Some(Self {
                file,
                path: path.to_path_buf(),
                mode,
            })),
            Err(e) if is_contended(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// Whether the locked handle is still the file at [`path`](Self::path).
    ///
    /// `false` means the file was unlinked (and possibly recreated) after it
    /// was opened, so the lock protects nothing anyone else will look at.
    #[cfg(unix)]
    pub fn is_current(&self) -> io::Result<bool> {
        use std::os::unix::fs::MetadataExt;

        let held = self.file.metadata()?;
        match fs::metadata(&self.path) {
            Ok(named) => Ok(held.dev() == named.dev() && held.ino() == named.ino()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Whether the locked handle is still the file at [`path`](Self::path).
    ///
    /// Without inode numbers the best available check is that the path still
    /// exists; a handle to a deleted file keeps the name in a pending state.
    #[cfg(not(unix))]
    pub fn is_current(&self) -> io::Result<bool> {
        match fs::metadata(&self.path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Read the whole file from the start. Invalid UTF-8 is replaced rather
    /// than reported; the record parser rejects it either way.
    pub fn read_to_string(&self) -> io::Result<String> {
        let mut contents = Vec::new();
        let mut reader = &self.file;
        io::Seek::rewind(&mut reader)?;
        reader.read_to_end(&mut contents)?;
        Ok(String::from_utf8_lossy(&contents).into_owned())
    }

    /// Replace the file's contents with `contents` and sync to disk.
    pub fn overwrite(&self, contents: &[u8]) -> io::Result<()> {
        let mut writer = &self.file;
        self.file.set_len(0)?;
        io::Seek::rewind(&mut writer)?;
        writer.write_all(contents)?;
        writer.flush()?;
        self.file.sync_all()
    }

    /// Unlink the locked file while still holding the lock.
    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}
