//! Positioned reads from the archive file.
//!
//! Everything above this module asks for "these bytes at that offset";
//! this module turns those requests into as few seeks as it can.
//! Reading the central directory is a long run of small sequential reads,
//! so the source is buffered and we skip the seek when we're already there.

use std::io::{self, BufReader, Read, Seek, SeekFrom};

use log::*;

/// Set after a failed or handed-off read so the next positioned read seeks.
/// Nobody reads from here.
const UNKNOWN_POSITION: u64 = u64::MAX;

/// A buffered, position-tracking reader over a seekable source
pub struct BinaryCursor<R> {
    inner: BufReader<R>,
    /// Where the next read will start
    position: u64,
    /// Total size of the source, found once when the cursor is created
    len: u64,
}

impl<R: Read + Seek> BinaryCursor<R> {
    pub fn new(mut source: R) -> io::Result<Self> {
        let len = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(0))?;
        trace!("Opened a {len} byte source");
        Ok(Self {
            inner: BufReader::new(source),
            position: 0,
            len,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Moves to the given absolute offset.
    pub fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        if offset != self.position {
            let delta = offset as i128 - self.position as i128;
            // Short hops stay inside BufReader's buffer.
            match i64::try_from(delta) {
                Ok(delta) => self.inner.seek_relative(delta)?,
                Err(_) => {
                    self.inner.seek(SeekFrom::Start(offset))?;
                }
            }
            self.position = offset;
        }
        Ok(())
    }

    /// Skips `count` bytes forward.
    pub fn skip(&mut self, count: u64) -> io::Result<()> {
        let offset = self.position.checked_add(count).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Can't skip {count} bytes past offset {}", self.position),
            )
        })?;
        self.seek_to(offset)
    }

    /// Reads as many bytes as possible, up to `count`, from the current position.
    /// Only returns fewer at the end of the source.
    pub fn read_up_to(&mut self, count: usize) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(count);
        if let Err(e) = (&mut self.inner).take(count as u64).read_to_end(&mut buf) {
            self.position = UNKNOWN_POSITION;
            return Err(e);
        }
        self.position += buf.len() as u64;
        Ok(buf)
    }

    /// Reads up to `count` bytes at `offset`.
    pub fn read_at(&mut self, offset: u64, count: usize) -> io::Result<Vec<u8>> {
        self.seek_to(offset)?;
        self.read_up_to(count)
    }

    /// Reads a whole fixed-size record from the current position.
    ///
    /// Unlike [`read_up_to()`](#method.read_up_to), this returns
    /// [`io::ErrorKind::UnexpectedEof`] when the source runs out.
    pub fn read_array<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut buf = [0; N];
        if let Err(e) = self.inner.read_exact(&mut buf) {
            self.position = UNKNOWN_POSITION;
            return Err(e);
        }
        self.position += N as u64;
        Ok(buf)
    }

    /// Hands out a reader over the next `limit` bytes.
    ///
    /// The cursor loses track of where it is once the reader's been used,
    /// so the next positioned read always seeks.
    pub fn take(&mut self, limit: u64) -> io::Take<&mut BufReader<R>> {
        self.position = UNKNOWN_POSITION;
        (&mut self.inner).take(limit)
    }
}
