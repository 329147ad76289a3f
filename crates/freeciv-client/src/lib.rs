//! freeciv-client — the TCP frame reader, dispatcher, and connection driver
//! that sit on top of `freeciv-protocol`'s schema/cache/decoder.

pub mod connection;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod handlers;

pub use connection::{connect, Connection, ConnectionHandle};
pub use dispatch::{Dispatcher, PacketHandler};
pub use error::ClientError;
pub use frame::{encode_frame, write_frame, FrameReader, HeaderMode};
