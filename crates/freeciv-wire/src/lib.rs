//! freeciv-wire — scalar wire codec, framing constants, and client
//! configuration. Every other crate in this workspace depends on this one.

pub mod config;
pub mod wire;

pub use config::{ClientConfig, ConfigError, ServerConfig};
pub use wire::WireError;
