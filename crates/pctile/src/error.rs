//! Error types for the tiling core.

use std::path::PathBuf;

/// Errors surfaced to callers of the tiling core.
///
/// Resource-discipline violations (double-released buffers, chunk views
/// escaping their buffer) are not represented here; those are programmer
/// errors and panic instead.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An extent has a non-positive range on some axis.
    #[error("degenerate extent: range ({0}, {1}, {2}) must be positive on every axis")]
    DegenerateExtent(f64, f64, f64),

    /// A quantization scale factor is not positive, or a derived scale
    /// cannot represent the extent within 32 bits.
    #[error("invalid quantization: scale factor {0} must be positive")]
    InvalidQuantization(f64),

    /// A quantized value was reinterpreted with a mismatched record layout.
    #[error("quantization type mismatch: expected {expected} records, got {actual}")]
    QuantizationMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// A grid dimension was zero.
    #[error("invalid grid dimensions: {0}x{1}")]
    InvalidGridSize(u16, u16),

    /// Open/read/write failed on the named file.
    #[error("i/o on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file ended before the expected byte count was read.
    #[error("{path:?}: expected {expected} bytes, got {actual}")]
    UnexpectedEof {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// A tiled store header did not parse.
    #[error("{path:?}: {reason}")]
    BadStore { path: PathBuf, reason: String },

    /// A persisted compression method code has no registered codec.
    #[error("no codec registered for compression method {0}")]
    UnknownCompression(u8),

    /// A tile payload did not decompress to its directory size.
    #[error("corrupt tile payload: expected {expected} bytes, got {actual}")]
    CorruptPayload { expected: usize, actual: usize },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
