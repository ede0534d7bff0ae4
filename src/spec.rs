//! Code specific to the ZIP file format specification.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`read`] and [`directory`] modules.
//! Everything in this module works on byte slices already pulled from the archive;
//! the [`cursor`] module decides which bytes to pull.
//!
//! Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//!
//! [`read`]: ../read/index.html
//! [`directory`]: ../directory/index.html
//! [`cursor`]: ../cursor/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT

use std::convert::TryInto;

use chrono::{NaiveDate, NaiveDateTime};
use memchr::memmem;

use crate::result::*;

// Magic numbers denoting various sections of a ZIP archive

/// End of central directory magic number
pub const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Zip64 end of central directory magic number
pub const ZIP64_EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 6, 6];
/// Zip64 end of central directory locator magic number
pub const ZIP64_EOCDR_LOCATOR_MAGIC: [u8; 4] = [b'P', b'K', 6, 7];
/// Central directory magic number
pub const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];
/// Local file header magic number
pub const LOCAL_FILE_HEADER_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];

/// A 32-bit field with this value has its real value in a Zip64 record.
pub const ZIP64_SENTINEL: u32 = u32::MAX;
/// Same, for the 16-bit entry count in the end of central directory record.
pub const ZIP64_SENTINEL_16: u16 = u16::MAX;

/// Header ID of the Zip64 extended information extra field
const ZIP64_EXTRA_FIELD_ID: u16 = 0x0001;

/// The largest comment (65535 bytes) plus the fixed EOCDR fields,
/// rounded up the same way every other reader seems to.
pub const MAX_EOCDR_SEARCH: u64 = 65536 + EndOfCentralDirectory::SIZE as u64 - 1;

// Straight from the Rust docs.
// Callers check lengths up front, so running short is a bug in this module.

/// Reads a little-endian u64 from the front of the provided slice, shrinking it.
fn read_u64(input: &mut &[u8]) -> u64 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u64>());
    *input = rest;
    u64::from_le_bytes(int_bytes.try_into().expect("less than eight bytes for u64"))
}

/// Reads a little-endian u32 from the front of the provided slice, shrinking it.
fn read_u32(input: &mut &[u8]) -> u32 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u32>());
    *input = rest;
    u32::from_le_bytes(int_bytes.try_into().expect("less than four bytes for u32"))
}

/// Reads a little-endian u16 from the front of the provided slice, shrinking it.
fn read_u16(input: &mut &[u8]) -> u16 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u16>());
    *input = rest;
    u16::from_le_bytes(int_bytes.try_into().expect("less than two bytes for u16"))
}

/// Checks that `record` is at least `size` bytes and starts with `magic`,
/// then returns what follows the magic.
fn check_record<'a>(
    record: &'a [u8],
    size: usize,
    magic: [u8; 4],
    name: &str,
) -> ZipResult<&'a [u8]> {
    if record.len() < size {
        return Err(ZipError::invalid(format!(
            "Truncated {name} ({} of {size} bytes)",
            record.len()
        )));
    }
    if record[..4] != magic {
        return Err(ZipError::invalid(format!("Invalid {name} signature")));
    }
    Ok(&record[4..size])
}

/// Data from the End of central directory record
///
/// Found at the back of the ZIP archive and provides offsets for finding
/// its central directory, along with lots of stuff that stopped being relevant
/// when we stopped breaking ZIP archives onto multiple floppies.
// Not every field is used, but every field is parsed to walk the record.
#[allow(dead_code)]
#[derive(Debug)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_this_disk: u16,
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub comment_length: u16,
}

impl EndOfCentralDirectory {
    pub const SIZE: usize = 22;

    pub fn parse(eocdr: &[u8]) -> ZipResult<Self> {
        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // zipfile comment length          2 bytes
        let mut eocdr = check_record(
            eocdr,
            Self::SIZE,
            EOCDR_MAGIC,
            "End Of Central Directory Record",
        )?;
        Ok(Self {
            disk_number: read_u16(&mut eocdr),
            disk_with_central_directory: read_u16(&mut eocdr),
            entries_on_this_disk: read_u16(&mut eocdr),
            entries: read_u16(&mut eocdr),
            central_directory_size: read_u32(&mut eocdr),
            central_directory_offset: read_u32(&mut eocdr),
            comment_length: read_u16(&mut eocdr),
        })
    }

    /// True if any field has been pushed out to the Zip64 records
    pub fn needs_zip64(&self) -> bool {
        self.central_directory_offset == ZIP64_SENTINEL
            || self.central_directory_size == ZIP64_SENTINEL
            || self.entries == ZIP64_SENTINEL_16
    }
}

/// Searches backward through the tail of the archive to find the
/// End of central directory record, returning its position in `tail`.
///
/// It should be right at the end of the file,
/// but its variable size means we can't jump to a known offset.
/// The rightmost record whose comment runs exactly to the end of the file wins,
/// so a comment containing the magic can't fool us.
/// Failing that, we settle for the rightmost record that parses.
pub fn find_eocdr(tail: &[u8]) -> ZipResult<(usize, EndOfCentralDirectory)> {
    let mut fallback = None;
    for posit in memmem::rfind_iter(tail, &EOCDR_MAGIC) {
        let Ok(eocdr) = EndOfCentralDirectory::parse(&tail[posit..]) else {
            continue;
        };
        if posit + EndOfCentralDirectory::SIZE + eocdr.comment_length as usize == tail.len() {
            return Ok((posit, eocdr));
        }
        if fallback.is_none() {
            fallback = Some((posit, eocdr));
        }
    }
    fallback.ok_or_else(|| ZipError::invalid("Couldn't find End Of Central Directory Record"))
}

/// Data from the Zip64 end of central directory locator
///
/// This should immediately precede the End of central directory record
/// on Zip64 files and tell us where to find the Zip64 end of central directory record.
// Not every field is used, but every field is parsed to walk the record.
#[allow(dead_code)]
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectoryLocator {
    pub disk_with_central_directory: u32,
    pub zip64_eocdr_offset: u64,
    pub disks: u32,
}

impl Zip64EndOfCentralDirectoryLocator {
    pub const SIZE: usize = 20;

    pub fn parse(locator: &[u8]) -> ZipResult<Self> {
        // 4.3.15 Zip64 end of central directory locator
        //
        // zip64 end of central dir locator
        // signature                       4 bytes  (0x07064b50)
        // number of the disk with the
        // start of the zip64 end of
        // central directory               4 bytes
        // relative offset of the zip64
        // end of central directory record 8 bytes
        // total number of disks           4 bytes
        let mut locator = check_record(
            locator,
            Self::SIZE,
            ZIP64_EOCDR_LOCATOR_MAGIC,
            "Zip64 End Of Central Directory Locator",
        )?;
        Ok(Self {
            disk_with_central_directory: read_u32(&mut locator),
            zip64_eocdr_offset: read_u64(&mut locator),
            disks: read_u32(&mut locator),
        })
    }
}

/// Data from the Zip64 end of central directory record
///
/// We only read its fixed fields; the extensible data sector
/// holds nothing we need.
// Not every field is used, but every field is parsed to walk the record.
#[allow(dead_code)]
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectory {
    pub record_size: u64,
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub disk_number: u32,
    pub disk_with_central_directory: u32,
    pub entries_on_this_disk: u64,
    pub entries: u64,
    pub central_directory_size: u64,
    pub central_directory_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    pub const SIZE: usize = 56;

    pub fn parse(eocdr: &[u8]) -> ZipResult<Self> {
        // 4.3.14  Zip64 end of central directory record
        //
        // zip64 end of central dir
        // signature                       4 bytes  (0x06064b50)
        // size of zip64 end of central
        // directory record                8 bytes
        // version made by                 2 bytes
        // version needed to extract       2 bytes
        // number of this disk             4 bytes
        // number of the disk with the
        // start of the central directory  4 bytes
        // total number of entries in the
        // central directory on this disk  8 bytes
        // total number of entries in the
        // central directory               8 bytes
        // size of the central directory   8 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        8 bytes
        // zip64 extensible data sector    (variable size)
        let mut eocdr = check_record(
            eocdr,
            Self::SIZE,
            ZIP64_EOCDR_MAGIC,
            "Zip64 End Of Central Directory Record",
        )?;
        Ok(Self {
            record_size: read_u64(&mut eocdr),
            source_version: read_u16(&mut eocdr),
            minimum_extract_version: read_u16(&mut eocdr),
            disk_number: read_u32(&mut eocdr),
            disk_with_central_directory: read_u32(&mut eocdr),
            entries_on_this_disk: read_u64(&mut eocdr),
            entries: read_u64(&mut eocdr),
            central_directory_size: read_u64(&mut eocdr),
            central_directory_offset: read_u64(&mut eocdr),
        })
    }
}

/// The fixed-size part of a central directory entry
///
/// The path, extra field, and comment follow it in the file;
/// their lengths are given here.
// Not every field is used, but every field is parsed to walk the record.
#[allow(dead_code)]
#[derive(Debug)]
pub struct CentralDirectoryHeader {
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub path_length: u16,
    pub extra_field_length: u16,
    pub file_comment_length: u16,
    pub disk_number: u16,
    pub internal_file_attributes: u16,
    pub external_file_attributes: u32,
    pub header_offset: u32,
}

impl CentralDirectoryHeader {
    pub const SIZE: usize = 46;

    pub fn parse(header: &[u8]) -> ZipResult<Self> {
        // 4.3.12  Central directory structure:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        let mut header = check_record(
            header,
            Self::SIZE,
            CENTRAL_DIRECTORY_MAGIC,
            "central directory entry",
        )?;
        Ok(Self {
            source_version: read_u16(&mut header),
            minimum_extract_version: read_u16(&mut header),
            flags: read_u16(&mut header),
            compression_method: read_u16(&mut header),
            last_modified_time: read_u16(&mut header),
            last_modified_date: read_u16(&mut header),
            crc32: read_u32(&mut header),
            compressed_size: read_u32(&mut header),
            uncompressed_size: read_u32(&mut header),
            path_length: read_u16(&mut header),
            extra_field_length: read_u16(&mut header),
            file_comment_length: read_u16(&mut header),
            disk_number: read_u16(&mut header),
            internal_file_attributes: read_u16(&mut header),
            external_file_attributes: read_u32(&mut header),
            header_offset: read_u32(&mut header),
        })
    }

    /// Length of the path, extra field, and comment that follow the header
    pub fn variable_length(&self) -> u64 {
        self.path_length as u64 + self.extra_field_length as u64 + self.file_comment_length as u64
    }
}

/// The fixed-size part of a local file header
///
/// Each files' actual contents is preceded by this header,
/// then its path and extra field.
/// Those can differ in length from the central directory's copies
/// (padding in the extra field is common), so we always read them here.
// Not every field is used, but every field is parsed to walk the record.
#[allow(dead_code)]
#[derive(Debug)]
pub struct LocalFileHeader {
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub path_length: u16,
    pub extra_field_length: u16,
}

impl LocalFileHeader {
    pub const SIZE: usize = 30;

    pub fn parse(header: &[u8]) -> ZipResult<Self> {
        // 4.3.7  Local file header:
        //
        // local file header signature     4 bytes  (0x04034b50)
        // version needed to extract       2 bytes
        // general purpose bit flag        2 bytes
        // compression method              2 bytes
        // last mod file time              2 bytes
        // last mod file date              2 bytes
        // crc-32                          4 bytes
        // compressed size                 4 bytes
        // uncompressed size               4 bytes
        // file name length                2 bytes
        // extra field length              2 bytes
        //
        // file name (variable size)
        // extra field (variable size)
        let mut header = check_record(
            header,
            Self::SIZE,
            LOCAL_FILE_HEADER_MAGIC,
            "local file header",
        )?;
        Ok(Self {
            minimum_extract_version: read_u16(&mut header),
            flags: read_u16(&mut header),
            compression_method: read_u16(&mut header),
            last_modified_time: read_u16(&mut header),
            last_modified_date: read_u16(&mut header),
            crc32: read_u32(&mut header),
            compressed_size: read_u32(&mut header),
            uncompressed_size: read_u32(&mut header),
            path_length: read_u16(&mut header),
            extra_field_length: read_u16(&mut header),
        })
    }

    /// Length of the path and extra field that sit between this header and the data
    pub fn variable_length(&self) -> u64 {
        self.path_length as u64 + self.extra_field_length as u64
    }
}

/// The central directory fields that Zip64 can push into the extra field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zip64Fields {
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub header_offset: u64,
}

impl Zip64Fields {
    pub fn from_header(header: &CentralDirectoryHeader) -> Self {
        Self {
            uncompressed_size: header.uncompressed_size as u64,
            compressed_size: header.compressed_size as u64,
            header_offset: header.header_offset as u64,
        }
    }
}

/// Replaces sentinel values in `fields` with the 64-bit values
/// from the Zip64 extended information extra field.
///
/// Fails if a field was a sentinel but the extra field doesn't provide it,
/// so nobody downstream ever sees a `0xFFFFFFFF` placeholder.
pub fn resolve_zip64(fields: &mut Zip64Fields, mut extra_field: &[u8]) -> ZipResult<()> {
    let sentinel = ZIP64_SENTINEL as u64;
    let mut need_size = fields.uncompressed_size == sentinel;
    let mut need_compressed = fields.compressed_size == sentinel;
    let mut need_offset = fields.header_offset == sentinel;
    if !(need_size || need_compressed || need_offset) {
        return Ok(());
    }

    // 4.5.1 ... the following structure MUST be used for all
    // programs storing data in this field:
    //
    //     header1+data1 + header2+data2 . . .
    //
    // Each header MUST consist of:
    //
    //     Header ID - 2 bytes
    //     Data Size - 2 bytes
    while extra_field.len() >= 4 {
        let kind = read_u16(&mut extra_field);
        let field_len = (read_u16(&mut extra_field) as usize).min(extra_field.len());
        let (mut data, rest) = extra_field.split_at(field_len);
        extra_field = rest;

        if kind != ZIP64_EXTRA_FIELD_ID {
            continue;
        }
        // 4.5.3 -Zip64 Extended Information Extra Field (0x0001):
        // The order of the fields in the zip64 extended
        // information record is fixed, but the fields MUST
        // only appear if the corresponding Local or Central
        // directory record field is set to 0xFFFF or 0xFFFFFFFF.
        if need_size && data.len() >= 8 {
            fields.uncompressed_size = read_u64(&mut data);
            need_size = false;
        }
        if need_compressed && data.len() >= 8 {
            fields.compressed_size = read_u64(&mut data);
            need_compressed = false;
        }
        if need_offset && data.len() >= 8 {
            fields.header_offset = read_u64(&mut data);
            need_offset = false;
        }
        break;
    }

    if need_size || need_compressed || need_offset {
        return Err(ZipError::invalid(
            "Zip64 extra field missing a value its central directory entry defers to it",
        ));
    }
    Ok(())
}

/// Converts an MS-DOS timestamp, which has two-second precision
/// and counts years from 1980.
///
/// Returns `None` for impossible dates (zeroed stamps are common).
pub fn parse_msdos(time: u16, date: u16) -> Option<NaiveDateTime> {
    let seconds = (0b0000_0000_0001_1111 & time) as u32 * 2;
    let minutes = (0b0000_0111_1110_0000 & time) as u32 >> 5;
    let hours = (0b1111_1000_0000_0000 & time) as u32 >> 11;

    let days = (0b0000_0000_0001_1111 & date) as u32;
    let months = (0b0000_0001_1110_0000 & date) as u32 >> 5;
    let years = ((0b1111_1110_0000_0000 & date) >> 9) as i32 + 1980;

    NaiveDate::from_ymd_opt(years, months, days)?.and_hms_opt(hours, minutes, seconds)
}
