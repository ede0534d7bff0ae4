//! Tools for reading a ZIP archive.
//!
//! To start reading an archive, open a [`ZipReader`] on the file.
//! Opening only reads the archive's tail (the end of central directory record
//! and, for Zip64 archives, the records it points to).
//! The central directory itself is parsed lazily, as lookups need it.
//!
//! [`ZipReader`]: struct.ZipReader.html

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use camino::Utf8Path;
use chrono::NaiveDateTime;
use log::*;

use crate::arch::usize;
use crate::cursor::BinaryCursor;
use crate::directory::{DirectoryCursor, EntryRegistry};
use crate::extract::DEFAULT_BUFFER_SIZE;
use crate::ozx;
use crate::result::*;
use crate::spec::{self, EndOfCentralDirectory};

/// The compression method used to store a file
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    /// The file is uncompressed
    Store,
    /// The file is raw [DEFLATE](https://en.wikipedia.org/wiki/DEFLATE) data.
    /// This is the most common format used by ZIP archives.
    Deflate,
    /// The file is compressed with a yet-unsupported format.
    /// (The u16 indicates the internal format code.)
    /// It can be listed, but not read.
    Unsupported(u16),
}

impl CompressionMethod {
    pub(crate) fn from_u16(u: u16) -> Self {
        match u {
            0 => CompressionMethod::Store,
            8 => CompressionMethod::Deflate,
            v => CompressionMethod::Unsupported(v),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            CompressionMethod::Store => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unsupported(v) => v,
        }
    }
}

/// Metadata for a file or directory in the archive,
/// retrieved from its central directory record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    /// The entry's archive-relative, slash-separated path.
    /// Invalid UTF-8 is replaced with U+FFFD.
    pub filename: String,

    /// Compressed size of the file in bytes
    pub compressed_size: u64,

    /// Uncompressed size of the file in bytes
    pub uncompressed_size: u64,

    /// Compression algorithm used to store the file
    pub compression_method: CompressionMethod,

    /// The offset to the local file header in the archive
    pub local_header_offset: u64,

    /// The CRC-32 of the decompressed file
    pub crc32: u32,

    /// When the file was last modified, if the archive recorded a valid date
    pub last_modified: Option<NaiveDateTime>,

    /// The raw extra field from the central directory record
    pub extra_field: Vec<u8>,
}

impl ZipEntry {
    /// Returns true if the given entry is a directory
    pub fn is_directory(&self) -> bool {
        self.filename.ends_with('/')
    }

    /// Returns true if the given entry is a file
    pub fn is_file(&self) -> bool {
        !self.is_directory()
    }

    pub fn path(&self) -> &Utf8Path {
        Utf8Path::new(&self.filename)
    }

    /// Returns true for the JSON and Zarr v2 metadata files
    /// that OZX archives can list first.
    pub fn is_json_metadata(&self) -> bool {
        ozx::is_json_metadata_file(&self.filename)
    }
}

/// Runtime knobs for a [`ZipReader`](struct.ZipReader.html)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Chunk size used by [`ZipReader::read_file()`](struct.ZipReader.html#method.read_file)
    /// and [`ZipReader::open_entry()`](struct.ZipReader.html#method.open_entry)
    pub buffer_size: usize,

    /// Check each whole-entry read against the CRC-32 in the central directory.
    /// Range reads are never checked.
    pub verify_checksums: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            verify_checksums: false,
        }
    }
}

/// Where the end of central directory records say the central directory is
#[derive(Debug)]
struct Location {
    comment: String,
    is_zip64: bool,
    offset: u64,
    size: u64,
    entries: u64,
}

/// A ZIP archive to be read
///
/// The reader owns its source and all state parsed from it.
/// It's meant for one caller at a time: lookups advance the central directory
/// parse in place, so every operation takes `&mut self`.
/// Independent readers on the same file share nothing and can be used in parallel.
pub struct ZipReader<R = File> {
    /// `None` once the reader has been closed
    source: Option<BinaryCursor<R>>,
    options: ReadOptions,
    file_size: u64,
    comment: String,
    is_zip64: bool,
    cd_offset: u64,
    cd_size: u64,
    directory: DirectoryCursor,
    entries: EntryRegistry,
}

impl ZipReader<File> {
    /// Opens the ZIP archive at the given path and reads its end of central directory.
    ///
    /// ```no_run
    /// # use ozxread::*;
    /// let mut reader = ZipReader::open("foo.zip")?;
    /// let readme = reader.read_file("README.md")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> ZipResult<Self> {
        Self::open_with_options(path, ReadOptions::default())
    }

    pub fn open_with_options<P: AsRef<Path>>(path: P, options: ReadOptions) -> ZipResult<Self> {
        let path = path.as_ref();
        debug!("Opening {}", path.display());
        Self::with_options(File::open(path)?, options)
    }
}

impl<R: Read + Seek> ZipReader<R> {
    /// Reads a ZIP archive from any seekable source,
    /// like an `io::Cursor` over bytes already in memory.
    pub fn new(source: R) -> ZipResult<Self> {
        Self::with_options(source, ReadOptions::default())
    }

    pub fn with_options(source: R, options: ReadOptions) -> ZipResult<Self> {
        let mut source = BinaryCursor::new(source)?;
        let location = locate_central_directory(&mut source)?;
        debug!(
            "{} entries in {} bytes of central directory at offset {}{}",
            location.entries,
            location.size,
            location.offset,
            if location.is_zip64 { " (Zip64)" } else { "" }
        );

        Ok(Self {
            file_size: source.len(),
            source: Some(source),
            options,
            comment: location.comment,
            is_zip64: location.is_zip64,
            cd_offset: location.offset,
            cd_size: location.size,
            directory: DirectoryCursor::new(location.offset, location.entries),
            entries: EntryRegistry::default(),
        })
    }

    /// Releases the underlying source.
    ///
    /// Parsed metadata stays readable,
    /// but anything that touches the archive fails with [`ZipError::NotOpen`].
    /// Dropping the reader closes it too.
    pub fn close(&mut self) {
        if self.source.take().is_some() {
            debug!("Closed archive");
        }
    }

    pub fn is_open(&self) -> bool {
        self.source.is_some()
    }

    pub(crate) fn source(&mut self) -> ZipResult<&mut BinaryCursor<R>> {
        self.source.as_mut().ok_or(ZipError::NotOpen)
    }

    pub fn options(&self) -> &ReadOptions {
        &self.options
    }

    /// Size of the whole archive in bytes
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// The archive's comment, possibly empty
    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn is_zip64(&self) -> bool {
        self.is_zip64
    }

    /// Number of entries the central directory claims to hold
    pub fn cd_entries_count(&self) -> u64 {
        self.directory.total()
    }

    pub fn cd_offset(&self) -> u64 {
        self.cd_offset
    }

    pub fn cd_size(&self) -> u64 {
        self.cd_size
    }

    /// Everything parsed from the central directory so far
    pub fn entries(&self) -> &EntryRegistry {
        &self.entries
    }

    /// The resumable parse position in the central directory
    pub fn directory_cursor(&self) -> &DirectoryCursor {
        &self.directory
    }

    /// True once every central directory record has been parsed
    pub fn is_fully_parsed(&self) -> bool {
        self.directory.is_exhausted()
    }

    /// Parses up to `max_new_entries` more central directory records
    /// (or all the rest if `None`), then returns everything parsed so far.
    pub fn parse_central_directory(
        &mut self,
        max_new_entries: Option<u64>,
    ) -> ZipResult<&EntryRegistry> {
        self.parse_central_directory_until(max_new_entries, |_, _| false)
    }

    /// Like [`parse_central_directory()`](#method.parse_central_directory),
    /// but also stops after the first new entry for which `stop` returns true.
    ///
    /// `stop` gets each entry and its index in the directory.
    /// The next call picks up after the entry that stopped this one.
    pub fn parse_central_directory_until<P>(
        &mut self,
        max_new_entries: Option<u64>,
        stop: P,
    ) -> ZipResult<&EntryRegistry>
    where
        P: FnMut(&ZipEntry, u64) -> bool,
    {
        let source = self.source.as_mut().ok_or(ZipError::NotOpen)?;
        let advance = self
            .directory
            .advance(source, &mut self.entries, max_new_entries, stop)?;
        trace!("{:?}", advance);
        Ok(&self.entries)
    }

    /// Looks up an entry by its path in the archive,
    /// parsing just enough of the central directory to find it.
    ///
    /// Returns `None` if the whole directory has been parsed
    /// without finding it.
    pub fn get_entry(&mut self, path: &str) -> ZipResult<Option<&ZipEntry>> {
        self.source()?;
        if !self.entries.contains(path) && !self.directory.is_exhausted() {
            self.parse_central_directory_until(None, |entry, _| entry.filename == path)?;
        }
        Ok(self.entries.get(path))
    }

    /// Like [`get_entry()`](#method.get_entry), but a missing entry is an error.
    pub(crate) fn require_entry(&mut self, path: &str) -> ZipResult<ZipEntry> {
        self.get_entry(path)?
            .cloned()
            .ok_or_else(|| ZipError::NoSuchFile(path.into()))
    }

    /// Lists the files (not directories) in the archive
    /// whose paths start with `prefix`, in directory order.
    ///
    /// This parses the whole central directory.
    pub fn list_files(&mut self, prefix: &str) -> ZipResult<Vec<&str>> {
        self.parse_central_directory(None)?;
        Ok(self
            .entries
            .file_names()
            .filter(|name| name.starts_with(prefix))
            .collect())
    }

    /// Returns every file (not directory) entry in the archive, in directory order.
    ///
    /// This parses the whole central directory.
    pub fn list_files_all(&mut self) -> ZipResult<Vec<&ZipEntry>> {
        self.parse_central_directory(None)?;
        Ok(self.entries.iter().filter(|e| e.is_file()).collect())
    }
}

/// Finds the end of central directory record in the archive's tail,
/// following it to the Zip64 records if it defers to them.
fn locate_central_directory<R: Read + Seek>(source: &mut BinaryCursor<R>) -> ZipResult<Location> {
    let file_size = source.len();
    let search_size = spec::MAX_EOCDR_SEARCH.min(file_size);
    let tail_start = file_size - search_size;
    let tail = source.read_at(tail_start, usize(search_size)?)?;

    let (eocdr_posit, eocdr) = spec::find_eocdr(&tail)?;
    trace!("{:?}", eocdr);

    let comment_start = eocdr_posit + EndOfCentralDirectory::SIZE;
    let declared = eocdr.comment_length as usize;
    let available = (tail.len() - comment_start).min(declared);
    if available < declared {
        warn!("Archive comment claims {declared} bytes but only {available} remain");
    }
    let comment =
        String::from_utf8_lossy(&tail[comment_start..comment_start + available]).into_owned();

    if !eocdr.needs_zip64() {
        return Ok(Location {
            comment,
            is_zip64: false,
            offset: eocdr.central_directory_offset as u64,
            size: eocdr.central_directory_size as u64,
            entries: eocdr.entries as u64,
        });
    }

    // The Zip64 locator sits immediately before the classic record.
    let eocdr_offset = tail_start + eocdr_posit as u64;
    let locator_offset = eocdr_offset
        .checked_sub(spec::Zip64EndOfCentralDirectoryLocator::SIZE as u64)
        .ok_or_else(|| {
            ZipError::invalid("Too small for a Zip64 End Of Central Directory Locator")
        })?;
    let locator_bytes =
        source.read_at(locator_offset, spec::Zip64EndOfCentralDirectoryLocator::SIZE)?;
    let locator = spec::Zip64EndOfCentralDirectoryLocator::parse(&locator_bytes)?;
    trace!("{:?}", locator);

    let zip64_bytes = source.read_at(
        locator.zip64_eocdr_offset,
        spec::Zip64EndOfCentralDirectory::SIZE,
    )?;
    let zip64_eocdr = spec::Zip64EndOfCentralDirectory::parse(&zip64_bytes)?;
    trace!("{:?}", zip64_eocdr);

    Ok(Location {
        comment,
        is_zip64: true,
        offset: zip64_eocdr.central_directory_offset,
        size: zip64_eocdr.central_directory_size,
        entries: zip64_eocdr.entries,
    })
}
