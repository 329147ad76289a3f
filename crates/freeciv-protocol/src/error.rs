use thiserror::Error;

use freeciv_wire::wire::WireError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("array index {index} out of range for capacity {capacity}")]
    ArrayIndexOutOfRange { index: u32, capacity: u16 },

    #[error("packet type {0} is not registered")]
    NotRegistered(u16),
}
