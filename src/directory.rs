//! The central directory, parsed a little at a time.
//!
//! A [`DirectoryCursor`] remembers where the next unparsed central directory
//! record sits, so each call to [`advance()`](struct.DirectoryCursor.html#method.advance)
//! picks up exactly where the last one stopped.
//! Everything it parses lands in an [`EntryRegistry`], which only ever grows.
//!
//! This lets a reader answer "where's `foo/.zattrs`?" in a million-entry archive
//! by reading a handful of records instead of all of them.

use std::collections::HashMap;
use std::io::{self, Read, Seek};

use log::*;

use crate::cursor::BinaryCursor;
use crate::read::{CompressionMethod, ZipEntry};
use crate::result::*;
use crate::spec::{self, CentralDirectoryHeader, Zip64Fields};

/// Every central directory entry parsed so far, in directory order
#[derive(Debug, Default)]
pub struct EntryRegistry {
    records: Vec<ZipEntry>,
    /// Maps a name to its latest record, should the archive contain duplicates.
    by_name: HashMap<String, usize>,
}

impl EntryRegistry {
    /// The number of central directory records parsed so far,
    /// duplicates included
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ZipEntry> {
        self.by_name.get(name).map(|&i| &self.records[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Iterates over the entries in directory order.
    /// A name that appears more than once is only visited for its last record.
    pub fn iter(&self) -> impl Iterator<Item = &ZipEntry> {
        self.records
            .iter()
            .enumerate()
            .filter(move |(i, entry)| self.by_name.get(&entry.filename) == Some(i))
            .map(|(_, entry)| entry)
    }

    /// Iterates over the names of everything that isn't a directory
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.iter()
            .filter(|e| !e.is_directory())
            .map(|e| e.filename.as_str())
    }

    fn insert(&mut self, entry: ZipEntry) {
        let index = self.records.len();
        if let Some(previous) = self.by_name.insert(entry.filename.clone(), index) {
            warn!(
                "Duplicate entry for {} (records {previous} and {index})",
                entry.filename
            );
        }
        self.records.push(entry);
    }
}

/// Why a call to [`DirectoryCursor::advance()`] returned
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Every record in the directory has been parsed.
    Exhausted,
    /// The cap on new entries was reached.
    Limit,
    /// The stop predicate returned true for the last entry parsed.
    Predicate,
}

/// The result of one [`DirectoryCursor::advance()`] call
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Advance {
    /// How many new entries were parsed
    pub parsed: u64,
    pub stop: StopReason,
}

/// The resumable parse position in the central directory
#[derive(Debug, Clone)]
pub struct DirectoryCursor {
    /// File offset of the next unparsed record
    offset: u64,
    /// Index of the next unparsed record
    index: u64,
    /// Total number of records, from the end of central directory record
    total: u64,
}

impl DirectoryCursor {
    pub fn new(central_directory_offset: u64, total: u64) -> Self {
        Self {
            offset: central_directory_offset,
            index: 0,
            total,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// True once every record has been parsed
    pub fn is_exhausted(&self) -> bool {
        self.index >= self.total
    }

    /// Parses records from where the last call left off into `registry`.
    ///
    /// Stops after `max_new_entries` (if given), when `stop` returns true
    /// for a freshly-parsed entry and its index (that entry is kept),
    /// or at the end of the directory.
    ///
    /// A bad record fails the call at that record.
    /// Entries parsed before it stay in the registry,
    /// and the cursor stays pointed at the bad record.
    pub fn advance<R, P>(
        &mut self,
        source: &mut BinaryCursor<R>,
        registry: &mut EntryRegistry,
        max_new_entries: Option<u64>,
        mut stop: P,
    ) -> ZipResult<Advance>
    where
        R: Read + Seek,
        P: FnMut(&ZipEntry, u64) -> bool,
    {
        let mut parsed = 0;
        loop {
            if self.is_exhausted() {
                debug!("Central directory exhausted after {} entries", self.index);
                return Ok(Advance {
                    parsed,
                    stop: StopReason::Exhausted,
                });
            }
            if max_new_entries.is_some_and(|max| parsed >= max) {
                debug!("Parsed {parsed} new entries; stopping at index {}", self.index);
                return Ok(Advance {
                    parsed,
                    stop: StopReason::Limit,
                });
            }

            let (entry, next_offset) = self.read_record(source)?;
            let index = self.index;
            self.offset = next_offset;
            self.index += 1;
            parsed += 1;

            let halt = stop(&entry, index);
            if halt {
                debug!("Stop condition met at index {index}: {}", entry.filename);
            }
            registry.insert(entry);
            if halt {
                return Ok(Advance {
                    parsed,
                    stop: StopReason::Predicate,
                });
            }
        }
    }

    /// Reads the record at the cursor without moving it.
    /// Returns the entry and the offset of the record after it.
    fn read_record<R: Read + Seek>(
        &self,
        source: &mut BinaryCursor<R>,
    ) -> ZipResult<(ZipEntry, u64)> {
        let bad_record = |what: &str| {
            ZipError::invalid(format!(
                "{what} central directory entry at index {} (offset {})",
                self.index, self.offset
            ))
        };
        let truncated = |e: io::Error| match e.kind() {
            io::ErrorKind::UnexpectedEof => bad_record("Truncated"),
            _ => ZipError::Io(e),
        };

        source.seek_to(self.offset)?;
        let header_bytes = source
            .read_array::<{ CentralDirectoryHeader::SIZE }>()
            .map_err(truncated)?;
        let header = CentralDirectoryHeader::parse(&header_bytes).map_err(|_| bad_record("Invalid"))?;
        trace!("{:?}", header);

        let path = source.read_up_to(header.path_length as usize)?;
        let extra_field = source.read_up_to(header.extra_field_length as usize)?;
        if path.len() != header.path_length as usize
            || extra_field.len() != header.extra_field_length as usize
        {
            return Err(bad_record("Truncated"));
        }
        // The per-entry comment isn't kept; the next record starts after it.
        let next_offset =
            self.offset + CentralDirectoryHeader::SIZE as u64 + header.variable_length();

        let entry = ZipEntry::from_central_directory(&header, &path, extra_field)
            .map_err(|e| match e {
                ZipError::InvalidArchive(why) => ZipError::invalid(format!(
                    "{why} (central directory entry at index {})",
                    self.index
                )),
                other => other,
            })?;
        debug!("{:?}", entry);
        Ok((entry, next_offset))
    }
}

impl ZipEntry {
    /// Builds an entry from a central directory record,
    /// resolving any Zip64 sentinels along the way.
    pub(crate) fn from_central_directory(
        header: &CentralDirectoryHeader,
        path: &[u8],
        extra_field: Vec<u8>,
    ) -> ZipResult<Self> {
        let mut fields = Zip64Fields::from_header(header);
        spec::resolve_zip64(&mut fields, &extra_field)?;

        Ok(Self {
            // Names that aren't UTF-8 are rare enough that
            // a few replacement characters beat a code page table.
            filename: String::from_utf8_lossy(path).into_owned(),
            compressed_size: fields.compressed_size,
            uncompressed_size: fields.uncompressed_size,
            compression_method: CompressionMethod::from_u16(header.compression_method),
            local_header_offset: fields.header_offset,
            crc32: header.crc32,
            last_modified: spec::parse_msdos(header.last_modified_time, header.last_modified_date),
            extra_field,
        })
    }
}
