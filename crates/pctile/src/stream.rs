//! Sector-aligned, forward-only file streams.
//!
//! For multi-gigabyte sequential scans the OS page cache only adds a
//! copy and evicts everything else, so transfers run in large
//! sector-aligned blocks from a single pooled buffer, with the logical
//! position tracked independently of physical read granularity.
//! Seeking is permitted but expensive: it discards the lookahead buffer
//! and reissues an aligned read.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::arena::{BufferArena, BufferLease};
use crate::error::{Error, Result};

/// Transfer alignment. Covers common 512e/4Kn devices.
pub const SECTOR_SIZE: u64 = 4096;

pub struct SequentialReader {
    path: PathBuf,
    file: File,
    buffer: BufferLease,
    /// valid bytes in `buffer`
    buffer_len: usize,
    /// consumer offset within `buffer`
    buffer_pos: usize,
    /// logical stream position
    position: u64,
    /// bytes to discard after the next physical read (set by seek)
    pending_skip: usize,
}

impl SequentialReader {
    pub fn open(path: impl AsRef<Path>, arena: &BufferArena) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug_assert_eq!(arena.buffer_size() as u64 % SECTOR_SIZE, 0);
        let file = File::open(&path).map_err(|e| Error::io(&path, e))?;
        let buffer = arena.acquire("sequential-read");
        Ok(Self {
            path,
            file,
            buffer,
            buffer_len: 0,
            buffer_pos: 0,
            position: 0,
            pending_skip: 0,
        })
    }

    /// Logical position, independent of the sector-aligned physical one.
    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Repositions the stream. Discards the lookahead buffer, so prefer
    /// long forward runs between seeks.
    pub fn seek(&mut self, position: u64) -> Result<()> {
        if position == self.position {
            return Ok(());
        }
        let aligned = position & !(SECTOR_SIZE - 1);
        self.file
            .seek(SeekFrom::Start(aligned))
            .map_err(|e| Error::io(&self.path, e))?;
        self.buffer_len = 0;
        self.buffer_pos = 0;
        self.pending_skip = (position - aligned) as usize;
        self.position = position;
        Ok(())
    }

    /// Fills `out` completely or fails with `UnexpectedEof`.
    pub fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        let mut filled = 0usize;
        while filled < out.len() {
            if self.buffer_pos == self.buffer_len {
                self.refill()?;
                if self.buffer_len == 0 {
                    return Err(Error::UnexpectedEof {
                        path: self.path.clone(),
                        expected: out.len() as u64,
                        actual: filled as u64,
                    });
                }
            }
            let available = self.buffer_len - self.buffer_pos;
            let n = available.min(out.len() - filled);
            out[filled..filled + n]
                .copy_from_slice(&self.buffer[self.buffer_pos..self.buffer_pos + n]);
            self.buffer_pos += n;
            filled += n;
            self.position += n as u64;
        }
        Ok(())
    }

    fn refill(&mut self) -> Result<()> {
        // one large aligned read; short reads only happen at EOF
        let mut len = 0usize;
        while len < self.buffer.len() {
            let n = self
                .file
                .read(&mut self.buffer[len..])
                .map_err(|e| Error::io(&self.path, e))?;
            if n == 0 {
                break;
            }
            len += n;
        }
        self.buffer_pos = self.pending_skip.min(len);
        self.pending_skip = 0;
        self.buffer_len = len;
        Ok(())
    }
}

pub struct SequentialWriter {
    path: PathBuf,
    file: File,
    buffer: BufferLease,
    buffer_pos: usize,
    /// logical bytes written
    position: u64,
}

impl SequentialWriter {
    pub fn create(path: impl AsRef<Path>, arena: &BufferArena) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug_assert_eq!(arena.buffer_size() as u64 % SECTOR_SIZE, 0);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;
        let buffer = arena.acquire("sequential-write");
        Ok(Self {
            path,
            file,
            buffer,
            buffer_pos: 0,
            position: 0,
        })
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            if self.buffer_pos == self.buffer.len() {
                self.flush_buffer(self.buffer.len())?;
            }
            let n = (self.buffer.len() - self.buffer_pos).min(data.len());
            self.buffer[self.buffer_pos..self.buffer_pos + n].copy_from_slice(&data[..n]);
            self.buffer_pos += n;
            self.position += n as u64;
            data = &data[n..];
        }
        Ok(())
    }

    /// Flushes the tail (padded to sector alignment) and trims the file
    /// back to the logical length.
    pub fn finish(mut self) -> Result<()> {
        if self.buffer_pos > 0 {
            let padded = (self.buffer_pos as u64 + SECTOR_SIZE - 1) & !(SECTOR_SIZE - 1);
            let padded = (padded as usize).min(self.buffer.len());
            self.buffer[self.buffer_pos..padded].fill(0);
            self.flush_buffer(padded)?;
        }
        self.file
            .set_len(self.position)
            .map_err(|e| Error::io(&self.path, e))?;
        self.file.sync_all().map_err(|e| Error::io(&self.path, e))?;
        Ok(())
    }

    fn flush_buffer(&mut self, len: usize) -> Result<()> {
        self.file
            .write_all(&self.buffer[..len])
            .map_err(|e| Error::io(&self.path, e))?;
        self.buffer_pos = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena() -> BufferArena {
        // small pool so tests exercise multi-buffer paths
        BufferArena::new(8192)
    }

    #[test]
    fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.bin");
        let arena = arena();

        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        {
            let mut w = SequentialWriter::create(&path, &arena).unwrap();
            for chunk in payload.chunks(1234) {
                w.write_all(chunk).unwrap();
            }
            assert_eq!(w.position(), payload.len() as u64);
            w.finish().unwrap();
        }
        assert_eq!(std::fs::metadata(&path).unwrap().len(), payload.len() as u64);

        let mut r = SequentialReader::open(&path, &arena).unwrap();
        let mut back = vec![0u8; payload.len()];
        r.read_exact(&mut back).unwrap();
        assert_eq!(back, payload);
        assert_eq!(r.position(), payload.len() as u64);
        drop(r);
        assert_eq!(arena.outstanding(), 0);
    }

    #[test]
    fn seek_tracks_logical_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seek.bin");
        let arena = arena();

        let payload: Vec<u8> = (0..50_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let mut w = SequentialWriter::create(&path, &arena).unwrap();
        w.write_all(&payload).unwrap();
        w.finish().unwrap();

        let mut r = SequentialReader::open(&path, &arena).unwrap();
        // an unaligned offset in the middle of a sector
        r.seek(10_001).unwrap();
        assert_eq!(r.position(), 10_001);
        let mut buf = [0u8; 16];
        r.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &payload[10_001..10_017]);

        // seeking backwards works too, it just costs a re-read
        r.seek(5).unwrap();
        r.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &payload[5..21]);
    }

    #[test]
    fn short_file_reports_expected_and_actual() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        let arena = arena();

        let mut r = SequentialReader::open(&path, &arena).unwrap();
        let mut buf = [0u8; 8];
        match r.read_exact(&mut buf) {
            Err(Error::UnexpectedEof {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 8);
                assert_eq!(actual, 3);
            }
            other => panic!("expected UnexpectedEof, got {other:?}"),
        }
    }
}
