//! Reading file contents out of the archive.
//!
//! Every read starts by finding the entry (parsing the central directory
//! as far as needed), seeking to its local header, and checking it.
//! From there:
//!
//! - Stored entries are copied straight out of the archive,
//!   and byte ranges of them are a seek away.
//!
//! - Deflated entries are inflated as they're read.
//!   DEFLATE streams can't be entered partway through,
//!   so a byte range inflates (and throws away) everything before its start.
//!   Many small range reads of a large deflated entry
//!   pay for that decompression every time. Store entries you want to range over.
//!   Inflation stops as soon as the range is satisfied, though,
//!   so compressed data past the end of the range is never read.
//!
//! Contents come out as [`EntryChunks`]: a finite, single-pass iterator of byte chunks
//! that borrows the reader until it's dropped.
//! To read the same bytes again, ask the reader for a new iterator.
//!
//! [`EntryChunks`]: struct.EntryChunks.html

use std::io::{self, Read, Seek};

use flate2::read::DeflateDecoder;
use log::*;

use crate::arch::usize;
use crate::crc_reader::Crc32Reader;
use crate::read::{CompressionMethod, ZipEntry, ZipReader};
use crate::result::*;
use crate::spec::LocalFileHeader;

/// Chunk size used when the caller doesn't pick one
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Don't trust an entry's claimed size with more than this much up-front allocation.
const MAX_PREALLOCATION: usize = 1 << 24;

/// A finite, single-pass sequence of chunks of a file's decompressed contents
///
/// Yields `Err` at most once, then stops.
pub struct EntryChunks<'a> {
    inner: Box<dyn Read + 'a>,
    buffer_size: usize,
    /// Decompressed bytes to throw away before yielding anything
    skip: u64,
    /// Decompressed bytes left to yield
    remaining: u64,
    done: bool,
}

impl<'a> EntryChunks<'a> {
    fn new(inner: Box<dyn Read + 'a>, buffer_size: usize, skip: u64, remaining: u64) -> Self {
        Self {
            inner,
            buffer_size: buffer_size.max(1),
            skip,
            remaining,
            done: false,
        }
    }

    fn empty() -> Self {
        Self::new(Box::new(io::empty()), 1, 0, 0)
    }

    fn next_chunk(&mut self) -> ZipResult<Option<Vec<u8>>> {
        if self.skip > 0 {
            let skipped = io::copy(&mut (&mut self.inner).take(self.skip), &mut io::sink())
                .map_err(data_error)?;
            trace!("Inflated and discarded {skipped} bytes");
            if skipped < self.skip {
                return Ok(None);
            }
            self.skip = 0;
        }
        if self.remaining == 0 {
            return Ok(None);
        }

        let want = self.remaining.min(self.buffer_size as u64);
        let mut chunk = Vec::with_capacity(want as usize);
        (&mut self.inner)
            .take(want)
            .read_to_end(&mut chunk)
            .map_err(data_error)?;
        if chunk.is_empty() {
            return Ok(None);
        }
        self.remaining -= chunk.len() as u64;
        Ok(Some(chunk))
    }
}

impl Iterator for EntryChunks<'_> {
    type Item = ZipResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = self.next_chunk().transpose();
        if !matches!(next, Some(Ok(_))) {
            self.done = true;
        }
        next
    }
}

/// Errors from inflating or checksumming entry data mean the archive's bad,
/// not the disk.
fn data_error(e: io::Error) -> ZipError {
    match e.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => {
            ZipError::invalid(format!("Corrupt entry data: {e}"))
        }
        io::ErrorKind::UnexpectedEof => ZipError::invalid("Entry data ends early"),
        _ => ZipError::Io(e),
    }
}

/// Returns a boxed read trait for a compressed file, given its compression method.
///
/// `buffer_size` is how much compressed data is pulled from the archive at a time.
fn make_reader<'a, R: Read + 'a>(
    entry: &ZipEntry,
    reader: R,
    buffer_size: usize,
) -> ZipResult<Box<dyn Read + 'a>> {
    match entry.compression_method {
        CompressionMethod::Store => Ok(Box::new(reader)),
        CompressionMethod::Deflate => Ok(Box::new(DeflateDecoder::new_with_buf(
            reader,
            vec![0; buffer_size.max(1)],
        ))),
        CompressionMethod::Unsupported(method) => Err(ZipError::invalid(format!(
            "Compression method {method} of {} not supported",
            entry.filename
        ))),
    }
}

impl<R: Read + Seek> ZipReader<R> {
    /// Looks up `path`, then moves the source to the start of its data
    /// by way of its local file header.
    fn seek_to_data(&mut self, path: &str) -> ZipResult<ZipEntry> {
        let entry = self.require_entry(path)?;
        let source = self.source()?;

        source.seek_to(entry.local_header_offset)?;
        let header_bytes = source
            .read_array::<{ LocalFileHeader::SIZE }>()
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => {
                    ZipError::invalid(format!("Truncated local file header for {path}"))
                }
                _ => ZipError::Io(e),
            })?;
        let local = LocalFileHeader::parse(&header_bytes)
            .map_err(|_| ZipError::invalid(format!("Invalid local file header for {path}")))?;
        trace!("{:?}", local);

        if cfg!(feature = "check-local-metadata") {
            // The extra fields can legitimately differ (padding, local-only timestamps),
            // but the name and method can't.
            let local_path = source.read_up_to(local.path_length as usize)?;
            if String::from_utf8_lossy(&local_path) != entry.filename
                || local.compression_method != entry.compression_method.as_u16()
            {
                return Err(ZipError::invalid(format!(
                    "Central directory entry for {path} doesn't match its local file header"
                )));
            }
            source.skip(local.extra_field_length as u64)?;
        } else {
            source.skip(local.variable_length())?;
        }
        debug!("Reading {:?}", entry);
        trace!("{path} data starts at offset {}", source.position());
        Ok(entry)
    }

    /// Reads the given file from the archive into memory.
    ///
    /// Fails with [`ZipError::NoSuchFile`] if it's not in the archive.
    pub fn read_file(&mut self, path: &str) -> ZipResult<Vec<u8>> {
        let size = self.require_entry(path)?.uncompressed_size;
        let mut contents = Vec::with_capacity(usize(size)?.min(MAX_PREALLOCATION));
        let buffer_size = self.options().buffer_size;
        for chunk in self.stream_file(path, buffer_size)? {
            contents.extend_from_slice(&chunk?);
        }
        Ok(contents)
    }

    /// Streams the given file's contents in chunks of up to `buffer_size` bytes.
    pub fn stream_file(&mut self, path: &str, buffer_size: usize) -> ZipResult<EntryChunks<'_>> {
        let reader = self.open_entry_with_buffer(path, buffer_size)?;
        Ok(EntryChunks::new(reader, buffer_size, 0, u64::MAX))
    }

    /// Returns a reader over the given file's whole contents,
    /// for callers who'd rather `io::copy()` than iterate.
    pub fn open_entry(&mut self, path: &str) -> ZipResult<Box<dyn Read + '_>> {
        let buffer_size = self.options().buffer_size;
        self.open_entry_with_buffer(path, buffer_size)
    }

    fn open_entry_with_buffer(
        &mut self,
        path: &str,
        buffer_size: usize,
    ) -> ZipResult<Box<dyn Read + '_>> {
        let verify = self.options().verify_checksums;
        let entry = self.seek_to_data(path)?;
        let limit = match entry.compression_method {
            CompressionMethod::Store => entry.uncompressed_size,
            _ => entry.compressed_size,
        };
        let data = self.source()?.take(limit);
        let reader = make_reader(&entry, data, buffer_size)?;
        if verify {
            Ok(Box::new(Crc32Reader::new(reader, entry.crc32)))
        } else {
            Ok(reader)
        }
    }

    /// Streams bytes `start` through `end` (inclusive) of the given file's
    /// decompressed contents, in chunks of up to `buffer_size` bytes.
    ///
    /// `end` past the end of the file is clamped to it,
    /// and a `start` at or past the end of the file yields nothing.
    /// An `end` before `start` is [`ZipError::InvalidRange`].
    ///
    /// Deflated files are inflated from their start every time;
    /// see the [module documentation](index.html).
    pub fn stream_file_range(
        &mut self,
        path: &str,
        start: u64,
        end: u64,
        buffer_size: usize,
    ) -> ZipResult<EntryChunks<'_>> {
        let entry = self.require_entry(path)?;
        if end < start {
            return Err(ZipError::InvalidRange { start, end });
        }
        if start >= entry.uncompressed_size {
            return Ok(EntryChunks::empty());
        }
        let end = end.min(entry.uncompressed_size - 1);
        let length = end - start + 1;

        let entry = self.seek_to_data(path)?;
        let file_size = self.file_size();
        let source = self.source()?;
        match entry.compression_method {
            CompressionMethod::Store => {
                // Stored data can't run past the archive, whatever the directory claims.
                let data_start = source.position();
                if data_start
                    .checked_add(start)
                    .and_then(|s| s.checked_add(length))
                    .map_or(true, |range_end| range_end > file_size)
                {
                    return Err(ZipError::invalid(format!(
                        "Bytes {start}-{end} of {path} lie past the end of the archive"
                    )));
                }
                source.skip(start)?;
                let data = source.take(length);
                Ok(EntryChunks::new(Box::new(data), buffer_size, 0, length))
            }
            _ => {
                let data = source.take(entry.compressed_size);
                let reader = make_reader(&entry, data, buffer_size)?;
                Ok(EntryChunks::new(reader, buffer_size, start, length))
            }
        }
    }
}
