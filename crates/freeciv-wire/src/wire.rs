//! FreeCiv wire primitives — the scalar codec every packet body is built from.
//!
//! Every multi-byte integer on the wire is big-endian. Strings are
//! null-terminated UTF-8. A bool occupies one byte when it is actually
//! transmitted (non-delta packets, array elements); inside a delta packet a
//! standalone bool is folded into its bitvector bit instead (see
//! `freeciv-protocol`'s decoder).

use thiserror::Error;

/// The compression border: length values at or above this mark a compressed
/// envelope rather than an uncompressed frame of that length.
pub const COMPRESSION_BORDER: u16 = 16385;

/// Length-field sentinel for a jumbo compressed envelope (actual length
/// follows as a big-endian u32).
pub const JUMBO_SENTINEL: u16 = 65535;

/// Default FreeCiv server TCP port.
pub const DEFAULT_PORT: u16 = 6556;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("short read: needed {needed} bytes at offset {offset}, have {available}")]
    ShortRead {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("malformed string: no null terminator found starting at offset {0}")]
    MalformedString(usize),
}

/// Decode result: the value plus the offset immediately after it.
pub type DecodeResult<T> = Result<(T, usize), WireError>;

fn require(buf: &[u8], offset: usize, needed: usize) -> Result<(), WireError> {
    if buf.len().saturating_sub(offset) < needed {
        return Err(WireError::ShortRead {
            offset,
            needed,
            available: buf.len().saturating_sub(offset),
        });
    }
    Ok(())
}

pub fn decode_u8(buf: &[u8], offset: usize) -> DecodeResult<u8> {
    require(buf, offset, 1)?;
    Ok((buf[offset], offset + 1))
}

pub fn decode_s8(buf: &[u8], offset: usize) -> DecodeResult<i8> {
    let (v, next) = decode_u8(buf, offset)?;
    Ok((v as i8, next))
}

pub fn decode_u16(buf: &[u8], offset: usize) -> DecodeResult<u16> {
    require(buf, offset, 2)?;
    let bytes = [buf[offset], buf[offset + 1]];
    Ok((u16::from_be_bytes(bytes), offset + 2))
}

pub fn decode_s16(buf: &[u8], offset: usize) -> DecodeResult<i16> {
    let (v, next) = decode_u16(buf, offset)?;
    Ok((v as i16, next))
}

pub fn decode_u32(buf: &[u8], offset: usize) -> DecodeResult<u32> {
    require(buf, offset, 4)?;
    let bytes = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
    Ok((u32::from_be_bytes(bytes), offset + 4))
}

pub fn decode_s32(buf: &[u8], offset: usize) -> DecodeResult<i32> {
    let (v, next) = decode_u32(buf, offset)?;
    Ok((v as i32, next))
}

pub fn decode_bool8(buf: &[u8], offset: usize) -> DecodeResult<bool> {
    let (v, next) = decode_u8(buf, offset)?;
    Ok((v != 0, next))
}

/// Reads a null-terminated UTF-8 string. `new_offset` lands just past the
/// terminator.
pub fn decode_string(buf: &[u8], offset: usize) -> DecodeResult<String> {
    let rest = buf.get(offset..).ok_or(WireError::MalformedString(offset))?;
    let nul = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or(WireError::MalformedString(offset))?;
    let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
    Ok((s, offset + nul + 1))
}

/// Reads `n` raw bitvector bytes, copied out of the buffer.
pub fn decode_bitvector(buf: &[u8], offset: usize, n: usize) -> DecodeResult<Vec<u8>> {
    require(buf, offset, n)?;
    Ok((buf[offset..offset + n].to_vec(), offset + n))
}

pub fn encode_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

pub fn encode_s8(out: &mut Vec<u8>, v: i8) {
    out.push(v as u8);
}

pub fn encode_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn encode_s16(out: &mut Vec<u8>, v: i16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn encode_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn encode_s32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn encode_bool8(out: &mut Vec<u8>, v: bool) {
    out.push(if v { 1 } else { 0 });
}

pub fn encode_string(out: &mut Vec<u8>, v: &str) {
    out.extend_from_slice(v.as_bytes());
    out.push(0);
}

pub fn encode_bitvector(out: &mut Vec<u8>, v: &[u8]) {
    out.extend_from_slice(v);
}

/// Bit `i` of a little-endian-within-byte bitvector.
pub fn bit_is_set(bitvector: &[u8], i: usize) -> bool {
    let byte = i / 8;
    let bit = i % 8;
    byte < bitvector.len() && (bitvector[byte] & (1 << bit)) != 0
}

pub fn set_bit(bitvector: &mut [u8], i: usize) {
    let byte = i / 8;
    let bit = i % 8;
    bitvector[byte] |= 1 << bit;
}

pub fn bitvector_byte_count(bit_count: usize) -> usize {
    bit_count.div_ceil(8)
}
