//! File system capability used for standard stream redirection.
//!
//! Batch jobs write their stdout/stderr into files and may read stdin from a
//! file. The scheduler never touches the file system itself; only
//! [`crate::batch::BatchProcess`] does, through the [`FileSystem`] trait so
//! tests and remote transports can supply their own implementation.

use std::io::{self, Read, Write};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs::OpenOptions;
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

/// Errors raised by [`FileSystem`] implementations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FsError {
    /// Raised when the path already exists and must not be overwritten.
    #[error("{path} already exists")]
    AlreadyExists {
        /// Path that was expected to be absent.
        path: Utf8PathBuf,
    },
    /// Raised when the path does not exist.
    #[error("{path} not found")]
    NotFound {
        /// Path that was expected to exist.
        path: Utf8PathBuf,
    },
    /// Raised when an absolute path lies outside the file system root.
    #[error("{path} lies outside {root}")]
    OutsideRoot {
        /// Offending path.
        path: Utf8PathBuf,
        /// Root of the file system.
        root: Utf8PathBuf,
    },
    /// Raised for any other I/O failure.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

impl FsError {
    fn from_io(path: &Utf8Path, err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AlreadyExists => Self::AlreadyExists {
                path: path.to_path_buf(),
            },
            io::ErrorKind::NotFound => Self::NotFound {
                path: path.to_path_buf(),
            },
            _ => Self::Io {
                path: path.to_path_buf(),
                message: err.to_string(),
            },
        }
    }
}

/// Writer returned by [`FileSystem::open_write`].
pub type OutputStream = Box<dyn Write + Send>;

/// Reader returned by [`FileSystem::open_read`].
pub type InputStream = Box<dyn Read + Send>;

/// Minimal file system surface needed for stream redirection.
pub trait FileSystem: Send + Sync {
    /// Returns `true` when `path` names an existing file or directory.
    fn exists(&self, path: &Utf8Path) -> bool;

    /// Creates a single directory.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when the directory exists or cannot be created.
    fn create_directory(&self, path: &Utf8Path) -> Result<(), FsError>;

    /// Creates an empty file, failing if it already exists.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::AlreadyExists`] when the file exists, or another
    /// [`FsError`] when it cannot be created.
    fn create_file(&self, path: &Utf8Path) -> Result<(), FsError>;

    /// Creates a new file and opens it for writing.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::AlreadyExists`] when the file exists, or another
    /// [`FsError`] when it cannot be opened.
    fn open_write(&self, path: &Utf8Path) -> Result<OutputStream, FsError>;

    /// Opens an existing file for reading.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::NotFound`] when the file is missing.
    fn open_read(&self, path: &Utf8Path) -> Result<InputStream, FsError>;
}

/// Local file system confined to a root directory via `cap-std`.
///
/// Relative paths resolve against the root; absolute paths are accepted only
/// when they lie beneath it.
#[derive(Debug)]
pub struct LocalFileSystem {
    root: Utf8PathBuf,
    dir: Dir,
}

impl LocalFileSystem {
    /// Opens `root` as the base of all subsequent operations.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when the directory cannot be opened.
    pub fn open(root: impl Into<Utf8PathBuf>) -> Result<Self, FsError> {
        let root_path = root.into();
        let dir = Dir::open_ambient_dir(&root_path, ambient_authority())
            .map_err(|err| FsError::from_io(&root_path, &err))?;
        Ok(Self {
            root: root_path,
            dir,
        })
    }

    /// Root directory of this file system.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn relative(&self, path: &Utf8Path) -> Result<Utf8PathBuf, FsError> {
        if path.is_relative() {
            return Ok(non_empty(path));
        }
        path.strip_prefix(&self.root)
            .map(non_empty)
            .map_err(|_| FsError::OutsideRoot {
                path: path.to_path_buf(),
                root: self.root.clone(),
            })
    }

    fn open_new(&self, path: &Utf8Path) -> Result<cap_std::fs_utf8::File, FsError> {
        let relative = self.relative(path)?;
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        self.dir
            .open_with(&relative, &options)
            .map_err(|err| FsError::from_io(path, &err))
    }
}

fn non_empty(path: &Utf8Path) -> Utf8PathBuf {
    if path.as_str().is_empty() {
        Utf8PathBuf::from(".")
    } else {
        path.to_path_buf()
    }
}

impl FileSystem for LocalFileSystem {
    fn exists(&self, path: &Utf8Path) -> bool {
        self.relative(path)
            .is_ok_and(|relative| self.dir.exists(relative))
    }

    fn create_directory(&self, path: &Utf8Path) -> Result<(), FsError> {
        let relative = self.relative(path)?;
        self.dir
            .create_dir(&relative)
            .map_err(|err| FsError::from_io(path, &err))
    }

    fn create_file(&self, path: &Utf8Path) -> Result<(), FsError> {
        self.open_new(path).map(drop)
    }

    fn open_write(&self, path: &Utf8Path) -> Result<OutputStream, FsError> {
        let file = self.open_new(path)?;
        Ok(Box::new(file))
    }

    fn open_read(&self, path: &Utf8Path) -> Result<InputStream, FsError> {
        let relative = self.relative(path)?;
        let file = self
            .dir
            .open(&relative)
            .map_err(|err| FsError::from_io(path, &err))?;
        Ok(Box::new(file))
    }
}
