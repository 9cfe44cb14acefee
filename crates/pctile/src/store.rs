//! The tiled point store.
//!
//! File layout (little-endian):
//!   00  : [u8;4]  magic = b"PCTS"
//!   04  : u32     version = 1
//!   08  : u64     point_count
//!   10  : u16     point_size (stored record stride)
//!   12  : u8      compression method code
//!   13  : u8      flags (bit 0 => statistics, bit 1 => density)
//!   14  : f64[6]  quantization: scale x,y,z then offset x,y,z
//!   44  : f64[6]  extent: max/min per axis, x then y then z
//!   ..  : f64[3]  elevation mean, variance, mode   (flag bit 0)
//!   ..  : [u8;64] tile density summary             (flag bit 1)
//!   ..  : u16     tiles_x, u16 tiles_y
//!   ..  : u32[tiles_x*tiles_y]  per-tile point counts, row-major
//!   ..  : tile payloads, row-major; under a real compression method
//!         each payload is prefixed with its stored length (u32)
//!
//! With the passthrough method every tile's offset is computable from
//! the directory alone, so tile reads are a single seek.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::arena::BufferArena;
use crate::compress::{CompressionMethod, Compressor, CompressorRegistry};
use crate::density::TileDensity;
use crate::error::{Error, Result};
use crate::geom::extent::Extent;
use crate::geom::quant::Quantization;
use crate::grid::{Grid, GridDef};
use crate::process::Statistics;
use crate::stream::{SequentialReader, SequentialWriter};

pub const STORE_MAGIC: [u8; 4] = *b"PCTS";
pub const STORE_VERSION: u32 = 1;

const FLAG_STATS: u8 = 1 << 0;
const FLAG_DENSITY: u8 = 1 << 1;

#[derive(Debug, Clone)]
pub struct StoreHeader {
    pub point_count: u64,
    pub point_size: u16,
    pub compression: CompressionMethod,
    pub quantization: Quantization,
    pub extent: Extent,
    pub stats: Option<Statistics>,
    pub density: Option<TileDensity>,
    pub tiles_x: u16,
    pub tiles_y: u16,
}

impl StoreHeader {
    pub fn tile_count(&self) -> usize {
        self.tiles_x as usize * self.tiles_y as usize
    }

    pub fn grid_def(&self) -> Result<GridDef> {
        GridDef::new(self.tiles_x, self.tiles_y)
    }
}

/// Sequential tile writer. Tiles must be appended in row-major order
/// with exactly the point counts promised by the directory.
pub struct StoreWriter<'r> {
    path: PathBuf,
    writer: SequentialWriter,
    compressor: &'r (dyn Compressor + Send + Sync),
    point_size: usize,
    counts: Vec<u32>,
    next_tile: usize,
    scratch: Vec<u8>,
}

impl<'r> StoreWriter<'r> {
    /// Writes the header and directory; `counts` is the corrected fine
    /// count grid whose logical dimensions must match the header.
    pub fn create(
        path: impl AsRef<Path>,
        arena: &BufferArena,
        header: &StoreHeader,
        counts: &Grid<u32>,
        registry: &'r CompressorRegistry,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug_assert_eq!(counts.def().size_x(), header.tiles_x);
        debug_assert_eq!(counts.def().size_y(), header.tiles_y);
        let compressor = registry.get(header.compression)?;

        let counts: Vec<u32> = counts.cells().copied().collect();
        let mut encoded = Vec::with_capacity(256 + counts.len() * 4);
        encode_header(&mut encoded, header, &counts).map_err(|e| Error::io(&path, e))?;

        let mut writer = SequentialWriter::create(&path, arena)?;
        writer.write_all(&encoded)?;

        Ok(Self {
            path,
            writer,
            compressor,
            point_size: header.point_size as usize,
            counts,
            next_tile: 0,
            scratch: Vec::new(),
        })
    }

    /// Appends the next tile's record bytes.
    pub fn append_tile(&mut self, records: &[u8]) -> Result<()> {
        let expected = match self.counts.get(self.next_tile) {
            Some(&count) => count as usize * self.point_size,
            None => {
                return Err(Error::BadStore {
                    path: self.path.clone(),
                    reason: "tile appended past the directory".into(),
                })
            }
        };
        if records.len() != expected {
            return Err(Error::BadStore {
                path: self.path.clone(),
                reason: format!(
                    "tile {} holds {} bytes, directory promises {}",
                    self.next_tile,
                    records.len(),
                    expected
                ),
            });
        }

        if self.compressor.method() == CompressionMethod::None {
            self.writer.write_all(records)?;
        } else {
            self.compressor.compress(records, &mut self.scratch);
            let len = (self.scratch.len() as u32).to_le_bytes();
            self.writer.write_all(&len)?;
            self.writer.write_all(&self.scratch)?;
        }
        self.next_tile += 1;
        Ok(())
    }

    pub fn finish(self) -> Result<()> {
        if self.next_tile != self.counts.len() {
            return Err(Error::BadStore {
                path: self.path.clone(),
                reason: format!(
                    "store closed after {} of {} tiles",
                    self.next_tile,
                    self.counts.len()
                ),
            });
        }
        self.writer.finish()
    }
}

fn encode_header(out: &mut Vec<u8>, header: &StoreHeader, counts: &[u32]) -> std::io::Result<()> {
    out.extend_from_slice(&STORE_MAGIC);
    out.write_u32::<LittleEndian>(STORE_VERSION)?;
    out.write_u64::<LittleEndian>(header.point_count)?;
    out.write_u16::<LittleEndian>(header.point_size)?;
    out.write_u8(header.compression.code())?;

    let mut flags = 0u8;
    if header.stats.is_some() {
        flags |= FLAG_STATS;
    }
    if header.density.is_some() {
        flags |= FLAG_DENSITY;
    }
    out.write_u8(flags)?;

    header.quantization.write_to(out)?;
    header.extent.write_to(out)?;
    if let Some(stats) = header.stats.as_ref() {
        stats.write_to(out)?;
    }
    if let Some(density) = header.density.as_ref() {
        density.write_to(out)?;
    }

    out.write_u16::<LittleEndian>(header.tiles_x)?;
    out.write_u16::<LittleEndian>(header.tiles_y)?;
    for &c in counts {
        out.write_u32::<LittleEndian>(c)?;
    }
    Ok(())
}

/// Random-access view of a written store.
pub struct StoreReader {
    path: PathBuf,
    header: StoreHeader,
    counts: Vec<u32>,
    data_offset: u64,
    /// Absolute tile offsets; present only for the passthrough method.
    offsets: Option<Vec<u64>>,
}

impl StoreReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| Error::io(&path, e))?;
        let mut r = BufReader::new(file);

        let bad = |reason: &str| Error::BadStore {
            path: path.clone(),
            reason: reason.into(),
        };
        let io_err = |e: std::io::Error| Error::io(&path, e);

        let mut magic = [0u8; 4];
        std::io::Read::read_exact(&mut r, &mut magic).map_err(io_err)?;
        if magic != STORE_MAGIC {
            return Err(bad("bad magic"));
        }
        let version = r.read_u32::<LittleEndian>().map_err(io_err)?;
        if version != STORE_VERSION {
            return Err(bad(&format!("unsupported version {version}")));
        }

        let point_count = r.read_u64::<LittleEndian>().map_err(io_err)?;
        let point_size = r.read_u16::<LittleEndian>().map_err(io_err)?;
        if point_size == 0 {
            return Err(bad("zero point size"));
        }
        let code = r.read_u8().map_err(io_err)?;
        let compression = CompressionMethod::from_code(code)
            .ok_or_else(|| bad(&format!("unknown compression method {code}")))?;
        let flags = r.read_u8().map_err(io_err)?;

        let quantization = Quantization::read_from(&mut r).map_err(io_err)?;
        let extent = Extent::read_from(&mut r).map_err(io_err)?;
        let stats = if flags & FLAG_STATS != 0 {
            Some(Statistics::read_from(&mut r).map_err(io_err)?)
        } else {
            None
        };
        let density = if flags & FLAG_DENSITY != 0 {
            Some(TileDensity::read_from(&mut r).map_err(io_err)?)
        } else {
            None
        };

        let tiles_x = r.read_u16::<LittleEndian>().map_err(io_err)?;
        let tiles_y = r.read_u16::<LittleEndian>().map_err(io_err)?;
        if tiles_x == 0 || tiles_y == 0 {
            return Err(bad("zero tile dimension"));
        }

        let tile_count = tiles_x as usize * tiles_y as usize;
        let mut counts = vec![0u32; tile_count];
        r.read_u32_into::<LittleEndian>(&mut counts).map_err(io_err)?;
        if counts.iter().map(|&c| c as u64).sum::<u64>() != point_count {
            return Err(bad("directory does not sum to the point count"));
        }

        let data_offset = 20
            + 48
            + 48
            + if stats.is_some() { 24 } else { 0 }
            + if density.is_some() { 64 } else { 0 }
            + 4
            + 4 * tile_count as u64;

        let offsets = (compression == CompressionMethod::None).then(|| {
            let mut offsets = Vec::with_capacity(tile_count);
            let mut at = data_offset;
            for &c in &counts {
                offsets.push(at);
                at += c as u64 * point_size as u64;
            }
            offsets
        });

        Ok(Self {
            path,
            header: StoreHeader {
                point_count,
                point_size,
                compression,
                quantization,
                extent,
                stats,
                density,
                tiles_x,
                tiles_y,
            },
            counts,
            data_offset,
            offsets,
        })
    }

    #[inline]
    pub fn header(&self) -> &StoreHeader {
        &self.header
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tile_point_count(&self, row: u16, col: u16) -> u32 {
        self.counts[row as usize * self.header.tiles_x as usize + col as usize]
    }

    /// Per-tile counts in row-major order.
    pub fn tile_counts(&self) -> &[u32] {
        &self.counts
    }

    /// Reads and decompresses one tile's record bytes.
    pub fn read_tile(
        &self,
        arena: &BufferArena,
        registry: &CompressorRegistry,
        row: u16,
        col: u16,
    ) -> Result<Vec<u8>> {
        let tile = row as usize * self.header.tiles_x as usize + col as usize;
        let expected = self.counts[tile] as usize * self.header.point_size as usize;
        if expected == 0 {
            return Ok(Vec::new());
        }

        let mut reader = SequentialReader::open(&self.path, arena)?;
        let mut out = vec![0u8; expected];
        match self.offsets.as_ref() {
            Some(offsets) => {
                reader.seek(offsets[tile])?;
                reader.read_exact(&mut out)?;
            }
            None => {
                // walk the length prefixes up to the target tile
                let compressor = registry.get(self.header.compression)?;
                reader.seek(self.data_offset)?;
                for t in 0..=tile {
                    let mut len = [0u8; 4];
                    reader.read_exact(&mut len)?;
                    let len = u32::from_le_bytes(len) as u64;
                    if t < tile {
                        reader.seek(reader.position() + len)?;
                    } else {
                        let mut stored = vec![0u8; len as usize];
                        reader.read_exact(&mut stored)?;
                        compressor.decompress(&stored, &mut out)?;
                    }
                }
            }
        }
        Ok(out)
    }
}
