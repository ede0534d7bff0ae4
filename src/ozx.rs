//! Zipped OME-Zarr (`.ozx`) archives, per [RFC-9].
//!
//! An OZX file is an ordinary ZIP archive whose comment is a JSON object like
//!
//! ```json
//! {"ome": {"version": "0.5", "zipFile": {"centralDirectory": {"jsonFirst": true}}}}
//! ```
//!
//! `jsonFirst` promises that the central directory lists every JSON metadata
//! file before any chunk data. A viewer that only wants the metadata can then
//! stop parsing the directory at the first entry that's neither metadata nor
//! a directory, which matters when the archive holds millions of chunks.
//!
//! [`OzxReader`] adds that to a [`ZipReader`]; everything else is delegated.
//!
//! [RFC-9]: https://ngff.openmicroscopy.org/rfc/9/index.html
//! [`OzxReader`]: struct.OzxReader.html
//! [`ZipReader`]: ../read/struct.ZipReader.html

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use log::*;
use serde_json::Value;

use crate::directory::EntryRegistry;
use crate::extract::EntryChunks;
use crate::read::{ReadOptions, ZipEntry, ZipReader};
use crate::result::*;

/// Suffixes of the files `jsonFirst` archives list first
const JSON_METADATA_SUFFIXES: [&str; 4] = [".json", ".zattrs", ".zarray", ".zgroup"];

/// Returns true if the name has an `.ozx` extension, in any case.
pub fn is_ozx_file(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".ozx")
}

/// Returns true for Zarr metadata files:
/// `*.json` (Zarr v3 and OME) or `.zattrs`, `.zarray`, `.zgroup` (Zarr v2), in any case.
pub fn is_json_metadata_file(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    JSON_METADATA_SUFFIXES
        .iter()
        .any(|suffix| name.ends_with(suffix))
}

/// The stop predicate for a `jsonFirst` archive:
/// the first entry that's neither a directory nor metadata ends the metadata section.
pub fn ends_json_section(entry: &ZipEntry, _index: u64) -> bool {
    !entry.is_directory() && !entry.is_json_metadata()
}

/// OME metadata from an OZX archive's comment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OzxMetadata {
    /// The OME-Zarr version, as a string even if the comment gave a number
    pub version: String,
    /// Whether the central directory lists all JSON metadata first
    pub json_first: bool,
    /// The comment this was parsed from
    pub raw_comment: String,
}

impl OzxMetadata {
    /// Parses an archive comment.
    ///
    /// Returns `None`, not an error, if the comment is empty, isn't JSON,
    /// or has no `ome` object with a `version`:
    /// plenty of ordinary ZIP files end in `.ozx` by accident or have other comments.
    pub fn parse(comment: &str) -> Option<Self> {
        if comment.is_empty() {
            return None;
        }
        let root: Value = match serde_json::from_str(comment) {
            Ok(v) => v,
            Err(e) => {
                debug!("Archive comment isn't JSON: {e}");
                return None;
            }
        };
        let Some(ome) = root.get("ome").filter(|o| o.is_object()) else {
            debug!("Archive comment isn't OME metadata");
            return None;
        };
        let Some(version) = ome.get("version") else {
            debug!("OME metadata has no version");
            return None;
        };
        let version = match version {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        let json_first = ome
            .get("zipFile")
            .and_then(|z| z.get("centralDirectory"))
            .and_then(|cd| cd.get("jsonFirst"))
            .map(truthy)
            .unwrap_or(false);

        debug!("Parsed OZX metadata: version={version}, jsonFirst={json_first}");
        Some(Self {
            version,
            json_first,
            raw_comment: comment.to_owned(),
        })
    }
}

/// Loose truthiness, so `"jsonFirst": 1` works as well as `true`.
fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// A reader for `.ozx` archives
///
/// Wraps a [`ZipReader`](../read/struct.ZipReader.html), adding the OME metadata
/// from the archive comment and `jsonFirst`-aware directory parsing.
pub struct OzxReader<R = File> {
    zip: ZipReader<R>,
    metadata: Option<OzxMetadata>,
}

impl OzxReader<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> ZipResult<Self> {
        Ok(Self::from_zip(ZipReader::open(path)?))
    }

    pub fn open_with_options<P: AsRef<Path>>(path: P, options: ReadOptions) -> ZipResult<Self> {
        Ok(Self::from_zip(ZipReader::open_with_options(path, options)?))
    }
}

impl<R: Read + Seek> OzxReader<R> {
    pub fn new(source: R) -> ZipResult<Self> {
        Ok(Self::from_zip(ZipReader::new(source)?))
    }

    /// Interprets an already-open archive as OZX.
    pub fn from_zip(zip: ZipReader<R>) -> Self {
        let metadata = OzxMetadata::parse(zip.comment());
        Self { zip, metadata }
    }

    /// The OME metadata from the archive comment, if there was any
    pub fn metadata(&self) -> Option<&OzxMetadata> {
        self.metadata.as_ref()
    }

    fn json_first(&self) -> bool {
        self.metadata.as_ref().is_some_and(|m| m.json_first)
    }

    /// Parses the central directory and returns everything parsed so far.
    ///
    /// With `json_only` set on a `jsonFirst` archive, parsing stops at
    /// (and includes) the first entry that's neither a directory nor metadata.
    /// A later call with `json_only` unset picks up from there.
    /// Otherwise this parses the whole directory.
    pub fn parse_central_directory(&mut self, json_only: bool) -> ZipResult<&EntryRegistry> {
        if json_only && self.json_first() {
            debug!("jsonFirst: parsing central directory up to the first non-metadata entry");
            self.zip.parse_central_directory_until(None, ends_json_section)
        } else {
            self.zip.parse_central_directory(None)
        }
    }

    pub fn get_entry(&mut self, path: &str) -> ZipResult<Option<&ZipEntry>> {
        self.zip.get_entry(path)
    }

    pub fn list_files(&mut self, prefix: &str) -> ZipResult<Vec<&str>> {
        self.zip.list_files(prefix)
    }

    pub fn list_files_all(&mut self) -> ZipResult<Vec<&ZipEntry>> {
        self.zip.list_files_all()
    }

    pub fn read_file(&mut self, path: &str) -> ZipResult<Vec<u8>> {
        self.zip.read_file(path)
    }

    pub fn stream_file(&mut self, path: &str, buffer_size: usize) -> ZipResult<EntryChunks<'_>> {
        self.zip.stream_file(path, buffer_size)
    }

    pub fn stream_file_range(
        &mut self,
        path: &str,
        start: u64,
        end: u64,
        buffer_size: usize,
    ) -> ZipResult<EntryChunks<'_>> {
        self.zip.stream_file_range(path, start, end, buffer_size)
    }

    pub fn close(&mut self) {
        self.zip.close()
    }

    /// The underlying ZIP reader, for everything else
    pub fn zip(&self) -> &ZipReader<R> {
        &self.zip
    }

    pub fn zip_mut(&mut self) -> &mut ZipReader<R> {
        &mut self.zip
    }

    pub fn into_zip(self) -> ZipReader<R> {
        self.zip
    }
}
