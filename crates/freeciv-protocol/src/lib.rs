//! freeciv-protocol — the packet schema registry, delta cache, and
//! delta/array-diff decoder built on top of `freeciv-wire`'s scalar codec.

pub mod cache;
pub mod decode;
pub mod error;
pub mod schema;
pub mod value;

pub use cache::DeltaCache;
pub use decode::{decode, decode_delta, decode_nondelta, encode_delta, encode_nondelta};
pub use error::ProtocolError;
pub use schema::{registry, FieldSchema, PacketSchema, SchemaError, SchemaRegistry};
pub use value::{DecodedRecord, FieldKind, FieldValue, KeyTuple};
