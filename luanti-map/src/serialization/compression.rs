//! Streaming compressors wrapping map block payloads.
//!
//! Format version 29 compresses the entire payload with zstd; older versions use zlib for the node
//! and metadata sections only.

use miniz_oxide::inflate::{
    self,
    core::{DecompressorOxide, inflate_flags},
};
use zstd_safe::{CParameter, InBuffer, OutBuffer};

use super::{DeserializeError, DeserializeResult, SerializeError, SerializeResult};

const BUFSIZE: usize = 0x4000;

/// Upper bound for decompressed sections, far above the size of any legitimate block.
const MAX_DECOMPRESSED_SIZE: usize = 0x0100_0000;

/// Compression level `-1` selects the compressor's default.
const DEFAULT_LEVEL: i32 = -1;

/// Streaming zstd compression of `input`.
///
/// A negative `level` selects zstd's default level.
pub(crate) fn zstd_compress(input: &[u8], level: i32) -> SerializeResult<Vec<u8>> {
    let mut ctx = zstd_safe::CCtx::create();
    if level >= 0 {
        ctx.set_parameter(CParameter::CompressionLevel(level))
            .map_err(|code| SerializeError::CompressionFailed(error_name(code)))?;
    }

    let mut result = Vec::with_capacity(input.len() / 4);
    let mut buf = [0_u8; BUFSIZE];
    let mut input_buffer = InBuffer {
        src: input,
        pos: 0,
    };
    while input_buffer.pos < input.len() {
        let mut output_buffer = OutBuffer::around(&mut buf);
        ctx.compress_stream(&mut output_buffer, &mut input_buffer)
            .map_err(|code| SerializeError::CompressionFailed(error_name(code)))?;
        result.extend_from_slice(output_buffer.as_slice());
    }
    loop {
        let mut output_buffer = OutBuffer::around(&mut buf);
        let remaining = ctx
            .end_stream(&mut output_buffer)
            .map_err(|code| SerializeError::CompressionFailed(error_name(code)))?;
        result.extend_from_slice(output_buffer.as_slice());
        if remaining == 0 {
            break;
        }
    }
    Ok(result)
}

/// Streaming zstd decompression.
///
/// The input is allowed to contain more data than zstd will consume.
/// Returns the number of bytes consumed from the input together with the decompressed data.
pub(crate) fn zstd_decompress(input: &[u8]) -> DeserializeResult<(usize, Vec<u8>)> {
    let mut ctx = zstd_safe::DCtx::create();
    let mut result = Vec::with_capacity(input.len().saturating_mul(4));
    let mut buf = [0_u8; BUFSIZE];
    let mut input_buffer = InBuffer {
        src: input,
        pos: 0,
    };
    loop {
        let consumed_before = input_buffer.pos;
        let mut output_buffer = OutBuffer::around(&mut buf);
        let hint = ctx
            .decompress_stream(&mut output_buffer, &mut input_buffer)
            .map_err(|code| DeserializeError::DecompressionFailed(error_name(code)))?;
        let produced = output_buffer.as_slice();
        let stalled = produced.is_empty() && input_buffer.pos == consumed_before;
        result.extend_from_slice(produced);
        if hint == 0 {
            break;
        }
        if stalled {
            return Err(DeserializeError::DecompressionFailed(
                "truncated zstd stream".into(),
            ));
        }
        if result.len() > MAX_DECOMPRESSED_SIZE {
            return Err(DeserializeError::DecompressionFailed(
                "zstd stream exceeds the size limit".into(),
            ));
        }
    }
    Ok((input_buffer.pos, result))
}

/// zlib compression as used by format version 28 and older.
pub(crate) fn compress_zlib(uncompressed: &[u8], level: i32) -> Vec<u8> {
    let level = if level == DEFAULT_LEVEL {
        6
    } else {
        u8::try_from(level.clamp(0, 10)).unwrap_or(6)
    };
    miniz_oxide::deflate::compress_to_vec_zlib(uncompressed, level)
}

/// This method must detect the end of the stream.
/// `input` may have more data past the end of the zlib stream.
/// Returns (`bytes_consumed`, `uncompressed_data`)
pub(crate) fn decompress_zlib(input: &[u8]) -> DeserializeResult<(usize, Vec<u8>)> {
    let flags = inflate_flags::TINFL_FLAG_PARSE_ZLIB_HEADER
        | inflate_flags::TINFL_FLAG_USING_NON_WRAPPING_OUTPUT_BUF;
    let mut ret: Vec<u8> = vec![0; input.len().saturating_mul(2).max(BUFSIZE)];

    let mut decompressor = Box::<DecompressorOxide>::default();

    let mut in_pos = 0;
    let mut out_pos = 0;
    loop {
        // Wrap the whole output slice so we know we have enough of the
        // decompressed data for matches.
        let (status, in_consumed, out_consumed) = inflate::core::decompress(
            &mut decompressor,
            input.get(in_pos..).unwrap_or_default(),
            &mut ret,
            out_pos,
            flags,
        );
        in_pos += in_consumed;
        out_pos += out_consumed;

        match status {
            inflate::TINFLStatus::Done => {
                ret.truncate(out_pos);
                return Ok((in_pos, ret));
            }
            inflate::TINFLStatus::HasMoreOutput if ret.len() < MAX_DECOMPRESSED_SIZE => {
                let new_len = ret.len().saturating_mul(2);
                ret.resize(new_len, 0);
            }
            err => {
                return Err(DeserializeError::DecompressionFailed(format!(
                    "zlib: in_pos={in_pos}, out_pos={out_pos}, {err:?}"
                )));
            }
        }
    }
}

fn error_name(code: usize) -> String {
    zstd_safe::get_error_name(code).to_owned()
}
