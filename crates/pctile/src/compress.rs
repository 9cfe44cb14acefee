//! Tile payload compression methods.
//!
//! Methods are identified by a stable one-byte code persisted in the
//! store header, and resolved through an explicit registry built at
//! startup. Registering a method is the only way to make its code
//! resolvable; there is no ambient global table.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionMethod {
    None = 0,
}

impl CompressionMethod {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(CompressionMethod::None),
            _ => None,
        }
    }

    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressionMethod::None => "none",
        }
    }
}

pub trait Compressor {
    fn method(&self) -> CompressionMethod;

    /// Compresses `input` into `output` (cleared first).
    fn compress(&self, input: &[u8], output: &mut Vec<u8>);

    /// Decompresses `input`; `output` is pre-sized to the exact
    /// uncompressed length.
    fn decompress(&self, input: &[u8], output: &mut [u8]) -> Result<()>;
}

/// Identity codec; the payload is stored as-is.
pub struct Passthrough;

impl Compressor for Passthrough {
    fn method(&self) -> CompressionMethod {
        CompressionMethod::None
    }

    fn compress(&self, input: &[u8], output: &mut Vec<u8>) {
        output.clear();
        output.extend_from_slice(input);
    }

    fn decompress(&self, input: &[u8], output: &mut [u8]) -> Result<()> {
        if input.len() != output.len() {
            return Err(Error::CorruptPayload {
                expected: output.len(),
                actual: input.len(),
            });
        }
        output.copy_from_slice(input);
        Ok(())
    }
}

/// Method-code to codec table.
pub struct CompressorRegistry {
    entries: Vec<Box<dyn Compressor + Send + Sync>>,
}

impl CompressorRegistry {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// The standard table: passthrough only.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(Passthrough));
        registry
    }

    pub fn register(&mut self, compressor: Box<dyn Compressor + Send + Sync>) {
        debug_assert!(self.lookup(compressor.method()).is_none());
        self.entries.push(compressor);
    }

    fn lookup(&self, method: CompressionMethod) -> Option<&(dyn Compressor + Send + Sync)> {
        self.entries
            .iter()
            .find(|c| c.method() == method)
            .map(|c| c.as_ref())
    }

    pub fn get(&self, method: CompressionMethod) -> Result<&(dyn Compressor + Send + Sync)> {
        self.lookup(method).ok_or(Error::UnknownCompression(method.code()))
    }

    /// Resolves a persisted method code.
    pub fn get_code(&self, code: u8) -> Result<&(dyn Compressor + Send + Sync)> {
        let method = CompressionMethod::from_code(code).ok_or(Error::UnknownCompression(code))?;
        self.get(method)
    }
}

impl Default for CompressorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_registered_methods() {
        let registry = CompressorRegistry::new();
        assert!(registry.get(CompressionMethod::None).is_ok());
        assert!(registry.get_code(0).is_ok());
        assert!(matches!(
            registry.get_code(200),
            Err(Error::UnknownCompression(200))
        ));
    }

    #[test]
    fn empty_registry_resolves_nothing() {
        let registry = CompressorRegistry::empty();
        assert!(registry.get(CompressionMethod::None).is_err());
    }

    #[test]
    fn passthrough_roundtrip() {
        let c = Passthrough;
        let input = [1u8, 2, 3, 4];
        let mut stored = Vec::new();
        c.compress(&input, &mut stored);
        assert_eq!(stored, input);
        let mut back = [0u8; 4];
        c.decompress(&stored, &mut back).unwrap();
        assert_eq!(back, input);
    }
}
