use thiserror::Error;

use freeciv_protocol::ProtocolError;
use freeciv_wire::wire::WireError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("zlib decompression failed: {0}")]
    DecompressionFailed(std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("join timed out after {0:?}")]
    JoinTimeout(std::time::Duration),
}
