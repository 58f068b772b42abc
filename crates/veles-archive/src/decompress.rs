//! Codec boundary and the built-in decoders.
//!
//! Pack entries with `encryption_type != -1` are Oodle-compressed. Oodle is a
//! native library, so it is reached through the [`Decompressor`] trait and
//! supplied by the caller, usually as an [`OodleCodec`] loaded at runtime.
//! zlib and LZ4 (used by GFLXPACK files) are decoded in-process.

use std::io::Read;
use std::path::Path;

use flate2::read::ZlibDecoder;
use libloading::Library;
use tracing::{debug, warn};

use crate::{Error, Result};

/// An opaque block decompressor.
///
/// Returns `None` when the data cannot be decoded. Callers must surface that
/// as an error and never fall back to the compressed bytes.
pub trait Decompressor: Send + Sync {
    fn decompress(&self, data: &[u8], expected_size: usize) -> Option<Vec<u8>>;
}

impl<F> Decompressor for F
where
    F: Fn(&[u8], usize) -> Option<Vec<u8>> + Send + Sync,
{
    fn decompress(&self, data: &[u8], expected_size: usize) -> Option<Vec<u8>> {
        self(data, expected_size)
    }
}

/// Placeholder used when no native codec is configured. Always fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct MissingCodec;

impl Decompressor for MissingCodec {
    fn decompress(&self, _data: &[u8], _expected_size: usize) -> Option<Vec<u8>> {
        None
    }
}

/// Export name of the block decoder in the Oodle core library.
const OODLE_DECOMPRESS_SYMBOL: &[u8] = b"OodleLZ_Decompress\0";

/// `OodleLZ_Decompress(src, src_len, dst, dst_len, fuzz, crc, verbosity,
/// dst_base, dst_base_size, callback, callback_ctx, scratch, scratch_size,
/// thread_phase)`. Returns the number of bytes decoded, or a value <= 0.
type OodleLzDecompress = unsafe extern "C" fn(
    *const u8,
    i64,
    *mut u8,
    i64,
    i32,
    i32,
    i32,
    i64,
    i64,
    i64,
    i64,
    i64,
    i64,
    i32,
) -> i64;

/// Oodle decoder backed by a shared library loaded at runtime
/// (`oo2core_8_win64.dll` or `liboo2corelinux64.so`).
pub struct OodleCodec {
    decompress: OodleLzDecompress,
    // Keeps `decompress` valid.
    _library: Library,
}

impl OodleCodec {
    /// Load the library at `path` and resolve `OodleLZ_Decompress`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let codec_error = |e: libloading::Error| Error::Codec {
            library: path.to_path_buf(),
            reason: e.to_string(),
        };
        // SAFETY: loading runs the library's initializers; the Oodle core
        // library has none beyond the C runtime.
        let library = unsafe { Library::new(path) }.map_err(codec_error)?;
        // SAFETY: the signature matches the exported C function.
        let decompress = unsafe {
            *library
                .get::<OodleLzDecompress>(OODLE_DECOMPRESS_SYMBOL)
                .map_err(codec_error)?
        };
        debug!(library = %path.display(), "loaded Oodle codec");
        Ok(Self {
            decompress,
            _library: library,
        })
    }
}

impl std::fmt::Debug for OodleCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OodleCodec").finish_non_exhaustive()
    }
}

impl Decompressor for OodleCodec {
    fn decompress(&self, data: &[u8], expected_size: usize) -> Option<Vec<u8>> {
        let src_len = i64::try_from(data.len()).ok()?;
        let dst_len = i64::try_from(expected_size).ok()?;
        let mut output = vec![0u8; expected_size];
        // SAFETY: both buffers are valid for the lengths passed and the
        // decoder writes at most `dst_len` bytes.
        let decoded = unsafe {
            (self.decompress)(
                data.as_ptr(),
                src_len,
                output.as_mut_ptr(),
                dst_len,
                1,
                0,
                0,
                0,
                0,
                0,
                0,
                0,
                0,
                3,
            )
        };
        if decoded != dst_len {
            warn!(decoded, expected = expected_size, "Oodle decode size mismatch");
            return None;
        }
        Some(output)
    }
}

/// Decompress zlib-wrapped DEFLATE data.
pub fn decompress_zlib(data: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(expected_size);
    ZlibDecoder::new(data)
        .read_to_end(&mut output)
        .map_err(|e| Error::malformed("zlib stream", e.to_string()))?;
    check_size(output, expected_size, "zlib stream")
}

/// Decompress a raw LZ4 block.
pub fn decompress_lz4(data: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    let output = lz4_flex::block::decompress(data, expected_size)
        .map_err(|e| Error::malformed("lz4 block", e.to_string()))?;
    check_size(output, expected_size, "lz4 block")
}

fn check_size(output: Vec<u8>, expected: usize, what: &'static str) -> Result<Vec<u8>> {
    if output.len() != expected {
        return Err(Error::malformed(
            what,
            format!("decoded {} bytes, expected {expected}", output.len()),
        ));
    }
    Ok(output)
}
