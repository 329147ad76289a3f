//! Byte-exact TCP frame reader: uncompressed / normal-compressed / jumbo
//! frames, and the two-phase (negotiation vs full) packet-type header.

use std::collections::VecDeque;
use std::io::Read;

use flate2::read::ZlibDecoder;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use freeciv_wire::wire::{COMPRESSION_BORDER, JUMBO_SENTINEL};

use crate::error::ClientError;

/// Negotiation uses a 1-byte packet-type field; full mode uses 2 bytes.
/// The switch happens once, after a successful join-reply dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMode {
    Negotiation,
    Full,
}

impl HeaderMode {
    fn type_field_size(self) -> usize {
        match self {
            HeaderMode::Negotiation => 1,
            HeaderMode::Full => 2,
        }
    }
}

/// Reads frames off an async byte stream, handling the compression envelope
/// transparently: a compressed envelope decompresses into a run of inner
/// uncompressed frames, which this reader buffers and yields one at a time
/// before returning to the transport.
pub struct FrameReader<R> {
    transport: R,
    pending: VecDeque<(u16, Vec<u8>)>,
    capture: Option<tokio::fs::File>,
    validate_frames: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(transport: R) -> Self {
        Self {
            transport,
            pending: VecDeque::new(),
            capture: None,
            validate_frames: false,
        }
    }

    pub fn set_capture(&mut self, file: tokio::fs::File) {
        self.capture = Some(file);
    }

    pub fn set_validate_frames(&mut self, validate: bool) {
        self.validate_frames = validate;
    }

    /// Reads the next complete frame, decompressing and splitting any
    /// compressed envelope as needed. `header_mode` governs how the
    /// packet-type field is read for this call — and, for a compressed
    /// envelope, for every inner frame it contains.
    pub async fn next_frame(&mut self, header_mode: HeaderMode) -> Result<(u16, Vec<u8>), ClientError> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(frame);
        }

        let mut len_buf = [0u8; 2];
        self.transport.read_exact(&mut len_buf).await?;
        let length = u16::from_be_bytes(len_buf);

        if length < COMPRESSION_BORDER {
            self.read_uncompressed(length, header_mode, &len_buf).await
        } else {
            self.read_compressed(length, header_mode, &len_buf).await?;
            self.pending
                .pop_front()
                .ok_or_else(|| ClientError::MalformedFrame("compressed envelope contained no frames".into()))
        }
    }

    async fn read_uncompressed(
        &mut self,
        length: u16,
        header_mode: HeaderMode,
        len_buf: &[u8; 2],
    ) -> Result<(u16, Vec<u8>), ClientError> {
        let type_size = header_mode.type_field_size();
        let mut type_buf = vec![0u8; type_size];
        self.transport.read_exact(&mut type_buf).await?;
        let packet_type = decode_type_field(&type_buf);

        let header_so_far = 2 + type_size;
        if (length as usize) < header_so_far {
            return Err(ClientError::MalformedFrame(format!(
                "length {length} smaller than header size {header_so_far}"
            )));
        }
        let body_len = length as usize - header_so_far;
        let mut body = vec![0u8; body_len];
        self.transport.read_exact(&mut body).await?;

        if self.validate_frames {
            let consumed = header_so_far + body.len();
            if consumed != length as usize {
                return Err(ClientError::MalformedFrame(format!(
                    "length header {length} does not match bytes consumed {consumed}"
                )));
            }
        }

        if let Some(file) = &mut self.capture {
            file.write_all(len_buf).await?;
            file.write_all(&type_buf).await?;
            file.write_all(&body).await?;
        }

        Ok((packet_type, body))
    }

    async fn read_compressed(
        &mut self,
        length: u16,
        header_mode: HeaderMode,
        len_buf: &[u8; 2],
    ) -> Result<(), ClientError> {
        let mut capture_prefix = len_buf.to_vec();
        let compressed_len = if length == JUMBO_SENTINEL {
            let mut alen_buf = [0u8; 4];
            self.transport.read_exact(&mut alen_buf).await?;
            capture_prefix.extend_from_slice(&alen_buf);
            u32::from_be_bytes(alen_buf) as usize
        } else {
            (length - COMPRESSION_BORDER) as usize
        };

        let mut compressed = vec![0u8; compressed_len];
        self.transport.read_exact(&mut compressed).await?;

        if let Some(file) = &mut self.capture {
            file.write_all(&capture_prefix).await?;
            file.write_all(&compressed).await?;
        }

        let mut decoder = ZlibDecoder::new(&compressed[..]);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(ClientError::DecompressionFailed)?;

        let mut offset = 0;
        while offset < decompressed.len() {
            let (packet_type, body, next) = parse_inner_frame(&decompressed, offset, header_mode)?;
            self.pending.push_back((packet_type, body));
            offset = next;
        }
        if offset != decompressed.len() {
            return Err(ClientError::MalformedFrame(
                "compressed envelope has trailing bytes after the last inner frame".into(),
            ));
        }
        Ok(())
    }
}

fn decode_type_field(buf: &[u8]) -> u16 {
    match buf.len() {
        1 => buf[0] as u16,
        2 => u16::from_be_bytes([buf[0], buf[1]]),
        n => unreachable!("type field is always 1 or 2 bytes, got {n}"),
    }
}

/// Parses one inner frame out of a decompressed envelope buffer. Inner
/// frames are always uncompressed — envelopes never nest.
fn parse_inner_frame(
    buf: &[u8],
    offset: usize,
    header_mode: HeaderMode,
) -> Result<(u16, Vec<u8>, usize), ClientError> {
    if buf.len() - offset < 2 {
        return Err(ClientError::MalformedFrame("inner frame truncated before length field".into()));
    }
    let length = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
    if length >= COMPRESSION_BORDER {
        return Err(ClientError::MalformedFrame("compressed envelopes cannot nest".into()));
    }

    let type_size = header_mode.type_field_size();
    let header_so_far = 2 + type_size;
    if (length as usize) < header_so_far {
        return Err(ClientError::MalformedFrame(format!(
            "inner frame length {length} smaller than header size {header_so_far}"
        )));
    }
    let frame_end = offset + length as usize;
    if frame_end > buf.len() {
        return Err(ClientError::MalformedFrame("inner frame runs past envelope end".into()));
    }

    let type_start = offset + 2;
    let packet_type = decode_type_field(&buf[type_start..type_start + type_size]);
    let body_start = type_start + type_size;
    let body = buf[body_start..frame_end].to_vec();
    Ok((packet_type, body, frame_end))
}

/// Encodes a frame for sending (used by the join-request path). Only
/// uncompressed frames are ever sent by this client.
pub fn encode_frame(header_mode: HeaderMode, packet_type: u16, body: &[u8]) -> Vec<u8> {
    let type_size = header_mode.type_field_size();
    let length = 2 + type_size + body.len();
    let mut out = Vec::with_capacity(length);
    out.extend_from_slice(&(length as u16).to_be_bytes());
    match header_mode {
        HeaderMode::Negotiation => out.push(packet_type as u8),
        HeaderMode::Full => out.extend_from_slice(&packet_type.to_be_bytes()),
    }
    out.extend_from_slice(body);
    out
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    transport: &mut W,
    header_mode: HeaderMode,
    packet_type: u16,
    body: &[u8],
) -> Result<(), ClientError> {
    let frame = encode_frame(header_mode, packet_type, body);
    transport.write_all(&frame).await?;
    transport.flush().await?;
    Ok(())
}
