//! Error types and the related `Result<T>`

use camino::Utf8PathBuf;
use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

#[derive(Debug, Error)]
pub enum ZipError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    /// The ZIP archive contained data APPNOTE.TXT doesn't allow,
    /// or uses a compression method we can't extract.
    #[error("Invalid Zip archive: {0}")]
    InvalidArchive(String),

    /// A file wasn't found at the provided path,
    /// even after parsing the whole central directory.
    #[error("No file in the archive with the path {0}")]
    NoSuchFile(Utf8PathBuf),

    /// A byte range whose end comes before its start
    #[error("Invalid byte range {start}-{end}")]
    InvalidRange { start: u64, end: u64 },

    /// The reader was used after [`close()`](../read/struct.ZipReader.html#method.close)
    #[error("Zip archive not opened")]
    NotOpen,

    /// A cast from a 64-bit int to a usize failed while buffering an entry,
    /// probably on a 32-bit system.
    #[error("Zip entry too large for address space")]
    InsufficientAddressSpace,
}

impl ZipError {
    /// Returns true for errors caused by a corrupt or unsupported archive,
    /// as opposed to a bad request or failing I/O.
    pub fn is_invalid_archive(&self) -> bool {
        matches!(self, ZipError::InvalidArchive(_))
    }

    pub(crate) fn invalid<S: Into<String>>(msg: S) -> Self {
        ZipError::InvalidArchive(msg.into())
    }
}
