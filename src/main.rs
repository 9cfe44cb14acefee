use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};

use pctile::chunk::{decode_raw, RAW_XYZ_SIZE};
use pctile::stream::SequentialReader;
use pctile::{
    BufferArena, CompressorRegistry, Extent, PointSource, Quantization, StoreReader, TileOptions,
    Tiler,
};

#[derive(Parser)]
#[command(name = "cloudtiler", version)]
/// Tile large point cloud files into a quantized spatial store.
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a raw point file and report its extent and derived lattice.
    Analyze { input: PathBuf },

    /// Build a tiled store from a raw point file.
    Tile {
        input: PathBuf,

        /// Defaults to the input path with a .pcts extension.
        output: Option<PathBuf>,

        #[arg(long, default_value_t = 40_000)]
        points_per_tile: u32,

        /// Per-segment point budget in MiB.
        #[arg(long, default_value_t = 256)]
        segment_budget_mb: usize,

        /// Stream buffer size in KiB; must be a multiple of 4.
        #[arg(long, default_value_t = 1024)]
        buffer_kb: usize,
    },

    /// Print a tiled store's header and tile summary.
    Inspect { store: PathBuf },
}

fn main() -> Result<()> {
    env_logger::init();
    match Args::parse().command {
        Command::Analyze { input } => analyze(&input),
        Command::Tile {
            input,
            output,
            points_per_tile,
            segment_budget_mb,
            buffer_kb,
        } => {
            let output = output.unwrap_or_else(|| input.with_extension("pcts"));
            tile(
                &input,
                &output,
                points_per_tile,
                segment_budget_mb << 20,
                buffer_kb << 10,
            )
        }
        Command::Inspect { store } => inspect(&store),
    }
}

/// Raw input: unadorned little-endian f64 x,y,z records.
fn open_raw_source(path: &Path, arena: &BufferArena) -> Result<(PointSource, u64)> {
    let len = std::fs::metadata(path)
        .with_context(|| format!("stat {}", path.display()))?
        .len();
    if len == 0 {
        bail!("{}: empty input", path.display());
    }
    if len % RAW_XYZ_SIZE as u64 != 0 {
        bail!(
            "{}: length {} is not a multiple of the {}-byte record size",
            path.display(),
            len,
            RAW_XYZ_SIZE
        );
    }
    let count = len / RAW_XYZ_SIZE as u64;
    let extent = scan_extent(path, count, arena)?;
    let source = PointSource::new(path, 0, count, RAW_XYZ_SIZE as u16, extent, None)?;
    Ok((source, count))
}

/// Streams the file once to find the bounding extent.
fn scan_extent(path: &Path, count: u64, arena: &BufferArena) -> Result<Extent> {
    let mut reader = SequentialReader::open(path, arena)?;
    let mut min = [f64::INFINITY; 3];
    let mut max = [f64::NEG_INFINITY; 3];

    let records_per_read = arena.buffer_size() / RAW_XYZ_SIZE;
    let mut buf = vec![0u8; records_per_read * RAW_XYZ_SIZE];
    let mut remaining = count;
    while remaining > 0 {
        let n = (remaining as usize).min(records_per_read);
        reader.read_exact(&mut buf[..n * RAW_XYZ_SIZE])?;
        for rec in buf[..n * RAW_XYZ_SIZE].chunks_exact(RAW_XYZ_SIZE) {
            let p = decode_raw(rec);
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }
        remaining -= n as u64;
    }

    Extent::new(min, max).context("input extent is degenerate")
}

fn analyze(input: &Path) -> Result<()> {
    let arena = BufferArena::default();
    let (source, count) = open_raw_source(input, &arena)?;
    let extent = source.extent();
    let q = Quantization::derive(extent);

    println!("{}", input.display());
    println!("  points     {count}");
    println!("  min        {:?}", extent.min());
    println!("  max        {:?}", extent.max());
    println!(
        "  range      [{:.3}, {:.3}, {:.3}]",
        extent.range_x(),
        extent.range_y(),
        extent.range_z()
    );
    println!("  scale      {:?}", q.scale());
    println!("  offset     {:?}", q.offset());
    Ok(())
}

fn tile(
    input: &Path,
    output: &Path,
    points_per_tile: u32,
    segment_budget: usize,
    buffer_size: usize,
) -> Result<()> {
    if buffer_size % 4096 != 0 {
        bail!("buffer size must be a multiple of 4 KiB");
    }
    let arena = BufferArena::new(buffer_size);
    let registry = CompressorRegistry::new();
    let (source, count) = open_raw_source(input, &arena)?;
    info!("tiling {} points from {}", count, input.display());

    let options = TileOptions {
        desired_points_per_tile: points_per_tile,
        segment_budget,
        ..TileOptions::default()
    };

    let mut last_decile = 0u32;
    let mut report = |ratio: f32| {
        let decile = (ratio * 10.0) as u32;
        if decile > last_decile {
            last_decile = decile;
            info!("  {}%", decile * 10);
        }
        true
    };

    let outcome = Tiler::new(source, &arena, &registry)
        .with_options(options)
        .run(output, &mut report)?;
    let Some(summary) = outcome.completed() else {
        bail!("tiling cancelled");
    };

    println!(
        "{}: {} points in {}x{} tiles across {} segment(s)",
        output.display(),
        summary.point_count,
        summary.tiles_x,
        summary.tiles_y,
        summary.segments
    );
    Ok(())
}

fn inspect(store: &Path) -> Result<()> {
    let reader = StoreReader::open(store)?;
    let h = reader.header();

    println!("{}", store.display());
    println!("  points       {}", h.point_count);
    println!("  record size  {} bytes", h.point_size);
    println!("  compression  {}", h.compression.name());
    println!("  tiles        {}x{}", h.tiles_x, h.tiles_y);
    println!("  min          {:?}", h.extent.min());
    println!("  max          {:?}", h.extent.max());
    println!("  scale        {:?}", h.quantization.scale());
    println!("  offset       {:?}", h.quantization.offset());
    if let Some(stats) = h.stats.as_ref() {
        println!(
            "  elevation    mean {:.3}  std-dev {:.3}  mode {:.3}",
            stats.mean,
            stats.std_dev(),
            stats.mode
        );
    }
    if let Some(d) = h.density.as_ref() {
        println!(
            "  occupancy    {}/{} tiles, counts {}..{} (median {}, mean {})",
            d.valid_tile_count,
            d.tile_count,
            d.min_tile_count,
            d.max_tile_count,
            d.median_tile_count,
            d.mean_tile_count
        );
        println!(
            "  density      {:.4}..{:.4} pts/unit^2 (median {:.4})",
            d.min_tile_density, d.max_tile_density, d.median_tile_density
        );
    }
    Ok(())
}
