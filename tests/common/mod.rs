//! Builds ZIP archives byte-for-byte, so tests control every field
//! (and can break any of them).

#![allow(dead_code)]

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use flate2::write::DeflateEncoder;
use flate2::Compression;

pub const STORE: u16 = 0;
pub const DEFLATE: u16 = 8;

/// 2024-01-02 03:04:06 in MS-DOS format
pub const DOS_DATE: u16 = ((2024 - 1980) << 9) | (1 << 5) | 2;
pub const DOS_TIME: u16 = (3 << 11) | (4 << 5) | 3;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct FileSpec {
    name: Vec<u8>,
    data: Vec<u8>,
    method: u16,
    local_extra: Vec<u8>,
    entry_comment: Vec<u8>,
}

/// Offsets of interesting records in a built archive
#[derive(Debug, Clone)]
pub struct Layout {
    pub local_headers: Vec<u64>,
    pub central_directory: u64,
    pub records: Vec<u64>,
    pub eocdr: u64,
}

#[derive(Default)]
pub struct ArchiveBuilder {
    files: Vec<FileSpec>,
    comment: Vec<u8>,
    zip64: bool,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(mut self, name: &[u8], data: &[u8], method: u16) -> Self {
        self.files.push(FileSpec {
            name: name.to_vec(),
            data: data.to_vec(),
            method,
            local_extra: Vec::new(),
            entry_comment: Vec::new(),
        });
        self
    }

    pub fn stored(self, name: &str, data: &[u8]) -> Self {
        self.raw(name.as_bytes(), data, STORE)
    }

    pub fn deflated(self, name: &str, data: &[u8]) -> Self {
        self.raw(name.as_bytes(), data, DEFLATE)
    }

    pub fn directory(self, name: &str) -> Self {
        assert!(name.ends_with('/'));
        self.raw(name.as_bytes(), b"", STORE)
    }

    /// Pads the last file's local header with an extra field
    /// the central directory doesn't have.
    pub fn with_local_padding(mut self, len: usize) -> Self {
        let last = self.files.last_mut().expect("no files yet");
        // An unknown header ID, then the data
        last.local_extra = vec![0xCA, 0xFE];
        last.local_extra
            .extend_from_slice(&((len as u16).to_le_bytes()));
        last.local_extra.resize(4 + len, 0);
        self
    }

    /// Gives the last file a per-entry comment in the central directory.
    pub fn with_entry_comment(mut self, comment: &str) -> Self {
        let last = self.files.last_mut().expect("no files yet");
        last.entry_comment = comment.as_bytes().to_vec();
        self
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = comment.as_bytes().to_vec();
        self
    }

    /// Pushes every size, offset, and count into Zip64 records,
    /// as if the archive were enormous.
    pub fn zip64(mut self) -> Self {
        self.zip64 = true;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        self.build_with_layout().0
    }

    pub fn build_with_layout(&self) -> (Vec<u8>, Layout) {
        let mut out = Vec::new();
        let mut local_headers = Vec::new();
        let mut sizes = Vec::new();

        for file in &self.files {
            let offset = out.len() as u64;
            local_headers.push(offset);
            let payload = match file.method {
                DEFLATE => deflate(&file.data),
                _ => file.data.clone(),
            };
            let crc = crc32fast::hash(&file.data);

            out.extend_from_slice(b"PK\x03\x04");
            put16(&mut out, 20);
            put16(&mut out, 0);
            put16(&mut out, file.method);
            put16(&mut out, DOS_TIME);
            put16(&mut out, DOS_DATE);
            put32(&mut out, crc);
            put32(&mut out, payload.len() as u32);
            put32(&mut out, file.data.len() as u32);
            put16(&mut out, file.name.len() as u16);
            put16(&mut out, file.local_extra.len() as u16);
            out.extend_from_slice(&file.name);
            out.extend_from_slice(&file.local_extra);
            out.extend_from_slice(&payload);

            sizes.push((crc, payload.len() as u64, file.data.len() as u64, offset));
        }

        let central_directory = out.len() as u64;
        let mut records = Vec::new();
        for (file, &(crc, compressed, uncompressed, offset)) in self.files.iter().zip(&sizes) {
            records.push(out.len() as u64);
            let extra = if self.zip64 {
                let mut extra = Vec::new();
                put16(&mut extra, 0x0001);
                put16(&mut extra, 24);
                put64(&mut extra, uncompressed);
                put64(&mut extra, compressed);
                put64(&mut extra, offset);
                extra
            } else {
                Vec::new()
            };
            let field32 = |v: u64| if self.zip64 { u32::MAX } else { v as u32 };

            out.extend_from_slice(b"PK\x01\x02");
            put16(&mut out, 0x031E);
            put16(&mut out, 20);
            put16(&mut out, 0);
            put16(&mut out, file.method);
            put16(&mut out, DOS_TIME);
            put16(&mut out, DOS_DATE);
            put32(&mut out, crc);
            put32(&mut out, field32(compressed));
            put32(&mut out, field32(uncompressed));
            put16(&mut out, file.name.len() as u16);
            put16(&mut out, extra.len() as u16);
            put16(&mut out, file.entry_comment.len() as u16);
            put16(&mut out, 0);
            put16(&mut out, 0);
            put32(&mut out, 0);
            put32(&mut out, field32(offset));
            out.extend_from_slice(&file.name);
            out.extend_from_slice(&extra);
            out.extend_from_slice(&file.entry_comment);
        }
        let cd_size = out.len() as u64 - central_directory;
        let count = self.files.len() as u64;

        if self.zip64 {
            let zip64_eocdr = out.len() as u64;
            out.extend_from_slice(b"PK\x06\x06");
            put64(&mut out, 44);
            put16(&mut out, 45);
            put16(&mut out, 45);
            put32(&mut out, 0);
            put32(&mut out, 0);
            put64(&mut out, count);
            put64(&mut out, count);
            put64(&mut out, cd_size);
            put64(&mut out, central_directory);

            out.extend_from_slice(b"PK\x06\x07");
            put32(&mut out, 0);
            put64(&mut out, zip64_eocdr);
            put32(&mut out, 1);
        }

        let eocdr = out.len() as u64;
        out.extend_from_slice(b"PK\x05\x06");
        put16(&mut out, 0);
        put16(&mut out, 0);
        if self.zip64 {
            put16(&mut out, u16::MAX);
            put16(&mut out, u16::MAX);
            put32(&mut out, u32::MAX);
            put32(&mut out, u32::MAX);
        } else {
            put16(&mut out, count as u16);
            put16(&mut out, count as u16);
            put32(&mut out, cd_size as u32);
            put32(&mut out, central_directory as u32);
        }
        put16(&mut out, self.comment.len() as u16);
        out.extend_from_slice(&self.comment);

        let layout = Layout {
            local_headers,
            central_directory,
            records,
            eocdr,
        };
        (out, layout)
    }
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn put16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Deterministic, somewhat compressible bytes
pub fn sample_bytes(len: usize, seed: u32) -> Vec<u8> {
    const WORDS: [&[u8]; 8] = [
        b"zarr ", b"chunk ", b"ome ", b"pixel ", b"tile ", b"7 ", b"42 ", b"\n",
    ];
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let word = WORDS[(state % 8) as usize];
        out.extend_from_slice(word);
        // Some noise so it doesn't compress to nothing
        out.push((state >> 8) as u8);
    }
    out.truncate(len);
    out
}

/// A source that counts the bytes read through it
pub struct CountingSource<R> {
    inner: R,
    bytes_read: Arc<AtomicU64>,
}

impl<R> CountingSource<R> {
    pub fn new(inner: R) -> (Self, Arc<AtomicU64>) {
        let bytes_read = Arc::new(AtomicU64::new(0));
        (
            Self {
                inner,
                bytes_read: bytes_read.clone(),
            },
            bytes_read,
        )
    }
}

impl<R: Read> Read for CountingSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

impl<R: Seek> Seek for CountingSource<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

pub fn read_count(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}
