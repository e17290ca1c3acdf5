//! Binary stream format for `LodTensor`.
//!
//! All integers are little-endian.
//!
//! ```text
//! u32        stream version (0)
//! u64        LoD level count
//!   u64      level size in bytes (offsets * 8)
//!   u64 * n  offsets
//! u32        tensor version (0)
//! u64        rank (2)
//! u64 * r    dims
//! i32 * m    values, row-major
//! ```
use std::io::{self, Read, Write};

use crate::align::Token;
use crate::error::{Error, Result};
use crate::lod::Lod;
use crate::tensor::LodTensor;

const STREAM_VERSION: u32 = 0;
const TENSOR_VERSION: u32 = 0;
const OFFSET_BYTES: u64 = 8;

// cap on speculative allocation driven by untrusted length fields
const MAX_PREALLOC: usize = 1 << 16;

pub fn to_bytes(tensor: &LodTensor) -> Vec<u8> {
    let levels = tensor.lod().levels();
    let offsets: usize = levels.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(4 + 8 + levels.len() * 8 + offsets * 8 + 4 + 24 + tensor.data().len() * 4);

    out.extend_from_slice(&STREAM_VERSION.to_le_bytes());
    out.extend_from_slice(&(levels.len() as u64).to_le_bytes());
    for level in levels {
        out.extend_from_slice(&(level.len() as u64 * OFFSET_BYTES).to_le_bytes());
        for &offset in level {
            out.extend_from_slice(&(offset as u64).to_le_bytes());
        }
    }

    out.extend_from_slice(&TENSOR_VERSION.to_le_bytes());
    let dims = tensor.dims();
    out.extend_from_slice(&(dims.len() as u64).to_le_bytes());
    for d in dims {
        out.extend_from_slice(&(d as u64).to_le_bytes());
    }
    for &v in tensor.data() {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn encode<W: Write>(tensor: &LodTensor, w: &mut W) -> Result<()> {
    w.write_all(&to_bytes(tensor))?;
    Ok(())
}

pub fn decode<R: Read>(r: &mut R) -> Result<LodTensor> {
    let version = read_u32(r)?;
    if version != STREAM_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }

    let level_count = to_usize(read_u64(r)?)?;
    let mut levels = Vec::with_capacity(level_count.min(MAX_PREALLOC));
    for _ in 0..level_count {
        let size = read_u64(r)?;
        if size % OFFSET_BYTES != 0 {
            return Err(Error::invalid(format!(
                "LoD level size {} is not a multiple of {}",
                size, OFFSET_BYTES
            )));
        }
        let n = to_usize(size / OFFSET_BYTES)?;
        let mut level = Vec::with_capacity(n.min(MAX_PREALLOC));
        for _ in 0..n {
            level.push(to_usize(read_u64(r)?)?);
        }
        levels.push(level);
    }

    let version = read_u32(r)?;
    if version != TENSOR_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }
    let rank = read_u64(r)?;
    let (rows, width) = match rank {
        1 => (to_usize(read_u64(r)?)?, 1),
        2 => (to_usize(read_u64(r)?)?, to_usize(read_u64(r)?)?),
        _ => return Err(Error::invalid(format!("unsupported tensor rank {}", rank))),
    };
    let numel = rows
        .checked_mul(width)
        .ok_or_else(|| Error::invalid(format!("dims {}x{} overflow", rows, width)))?;

    let mut data: Vec<Token> = Vec::with_capacity(numel.min(MAX_PREALLOC));
    for _ in 0..numel {
        data.push(Token::from_le_bytes(read_array::<4, _>(r)?));
    }

    LodTensor::new(data, width, Lod::new(levels))
}

/// Decode a complete buffer; trailing bytes are an error.
pub fn from_bytes(bytes: &[u8]) -> Result<LodTensor> {
    let mut cursor = bytes;
    let tensor = decode(&mut cursor)?;
    if !cursor.is_empty() {
        return Err(Error::invalid(format!("{} trailing bytes after tensor", cursor.len())));
    }
    Ok(tensor)
}

fn read_array<const N: usize, R: Read>(r: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    let mut filled = 0;
    while filled < N {
        match r.read(&mut buf[filled..]) {
            Ok(0) => return Err(Error::Truncated { expected: N, found: filled }),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(buf)
}

#[inline]
fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array::<4, _>(r)?))
}

#[inline]
fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    Ok(u64::from_le_bytes(read_array::<8, _>(r)?))
}

fn to_usize(v: u64) -> Result<usize> {
    usize::try_from(v).map_err(|_| Error::invalid(format!("length {} does not fit in usize", v)))
}
