//! ozxread reads ZIP archives and zipped OME-Zarr (`.ozx`) files
//! without parsing more of them than it has to:
//!
//! ```no_run
//! # use ozxread::*;
//! let mut reader = ZipReader::open("huge.zip")?;
//!
//! // Opening only reads the archive's tail. Lookups parse the central directory
//! // until they find what they're after, and remember everything they parsed.
//! if let Some(entry) = reader.get_entry("some/specific/file")? {
//!     println!("{} is {} bytes", entry.filename, entry.uncompressed_size);
//! }
//!
//! // Files can be read whole...
//! let bytes = reader.read_file("some/specific/file")?;
//!
//! // ...or streamed in chunks...
//! for chunk in reader.stream_file("some/specific/file", DEFAULT_BUFFER_SIZE)? {
//!     let chunk = chunk?;
//!     // Send it somewhere!
//! }
//!
//! // ...or by (inclusive) byte range, like an HTTP `Range` request would want.
//! let first_kilobyte: Vec<u8> = reader
//!     .stream_file_range("some/specific/file", 0, 1023, DEFAULT_BUFFER_SIZE)?
//!     .collect::<ZipResult<Vec<_>>>()?
//!     .concat();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ZIP64 archives, stored entries, and deflated entries are supported.
//! Ranges of stored entries are a seek away;
//! ranges of deflated entries have to be inflated from the start of the entry.
//!
//! OZX archives ([RFC-9](https://ngff.openmicroscopy.org/rfc/9/index.html))
//! keep OME metadata in the ZIP comment, and can promise that all JSON metadata
//! comes first in the central directory. [`OzxReader`] uses that promise
//! to find the metadata without touching the (possibly millions of) chunk entries:
//!
//! ```no_run
//! # use ozxread::*;
//! let mut reader = OzxReader::open("image.ozx")?;
//! if let Some(metadata) = reader.metadata() {
//!     println!("OME-Zarr {}", metadata.version);
//! }
//! let entries = reader.parse_central_directory(true)?;
//! for entry in entries.iter().filter(|e| e.is_json_metadata()) {
//!     println!("{}", entry.filename);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! A reader is a stateful, blocking, single-caller object. Servers should
//! give each request its own reader (they're cheap to open)
//! and run them off their async executors.
//!
//! [`OzxReader`]: ozx/struct.OzxReader.html

pub mod directory;
pub mod extract;
pub mod ozx;
pub mod read;
pub mod result;

pub use directory::{EntryRegistry, StopReason};
pub use extract::{EntryChunks, DEFAULT_BUFFER_SIZE};
pub use ozx::{is_ozx_file, OzxMetadata, OzxReader};
pub use read::{CompressionMethod, ReadOptions, ZipEntry, ZipReader};
pub use result::{ZipError, ZipResult};

mod arch;
mod crc_reader;
mod cursor;
mod spec;
