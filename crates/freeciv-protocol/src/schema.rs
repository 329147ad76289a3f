//! Packet schema registry — the declarative table every decode starts from.

use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

use crate::value::FieldKind;

pub const PACKET_PROCESSING_STARTED: u16 = 0;
pub const PACKET_PROCESSING_FINISHED: u16 = 1;
pub const PACKET_SERVER_JOIN_REQ: u16 = 4;
pub const PACKET_SERVER_JOIN_REPLY: u16 = 5;
pub const PACKET_SERVER_INFO: u16 = 6;
pub const PACKET_CHAT_MSG: u16 = 29;
pub const PACKET_GAME_INFO: u16 = 30;

/// One field in a packet body.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub name: &'static str,
    pub kind: FieldKind,
    pub is_key: bool,
    /// Set only when `kind == FieldKind::Array`.
    pub element_kind: Option<FieldKind>,
    pub capacity: Option<u16>,
    pub use_diff: bool,
}

impl FieldSchema {
    pub fn scalar(name: &'static str, kind: FieldKind, is_key: bool) -> Self {
        assert!(!matches!(kind, FieldKind::Array), "use FieldSchema::array for array fields");
        Self {
            name,
            kind,
            is_key,
            element_kind: None,
            capacity: None,
            use_diff: false,
        }
    }

    pub fn array(name: &'static str, element_kind: FieldKind, capacity: u16, use_diff: bool) -> Self {
        assert!(capacity >= 1, "array capacity must be at least 1");
        Self {
            name,
            kind: FieldKind::Array,
            is_key: false,
            element_kind: Some(element_kind),
            capacity: Some(capacity),
            use_diff,
        }
    }

    /// 1-byte array-diff indices if capacity fits in a byte, else 2-byte BE.
    pub fn index_is_wide(&self) -> bool {
        self.capacity.map(|c| c > 255).unwrap_or(false)
    }
}

/// One packet type's full field layout.
#[derive(Debug, Clone)]
pub struct PacketSchema {
    pub packet_type: u16,
    pub has_delta: bool,
    pub fields: Vec<FieldSchema>,
}

impl PacketSchema {
    pub fn key_fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields.iter().filter(|f| f.is_key)
    }

    pub fn non_key_fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields.iter().filter(|f| !f.is_key)
    }

    pub fn bitvector_bit_count(&self) -> usize {
        self.non_key_fields().count()
    }

    pub fn bitvector_byte_count(&self) -> usize {
        freeciv_wire::wire::bitvector_byte_count(self.bitvector_bit_count())
    }

    /// The four negotiation types that are pinned to 1-byte headers and are
    /// never themselves delta-encoded.
    pub fn is_pinned_negotiation_type(&self) -> bool {
        matches!(
            self.packet_type,
            PACKET_PROCESSING_STARTED | PACKET_PROCESSING_FINISHED | PACKET_SERVER_JOIN_REQ | PACKET_SERVER_JOIN_REPLY
        )
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("packet type {0} is already registered")]
    DuplicatePacketType(u16),

    #[error("capability-gated field presence is not supported by this registry")]
    CapabilityGatedFieldsUnsupported,
}

/// The packet-type → schema table. Built once and shared as `&'static`.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<u16, PacketSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: PacketSchema) -> Result<(), SchemaError> {
        if self.schemas.contains_key(&schema.packet_type) {
            return Err(SchemaError::DuplicatePacketType(schema.packet_type));
        }
        self.schemas.insert(schema.packet_type, schema);
        Ok(())
    }

    pub fn lookup(&self, packet_type: u16) -> Option<&PacketSchema> {
        self.schemas.get(&packet_type)
    }
}

static REGISTRY: OnceLock<SchemaRegistry> = OnceLock::new();

/// The shared, process-wide registry seeded with the packets this crate
/// knows how to decode. Additional packet types are registered here, not by
/// touching the decoder or the cache.
pub fn registry() -> &'static SchemaRegistry {
    REGISTRY.get_or_init(build_seed_registry)
}

fn build_seed_registry() -> SchemaRegistry {
    let mut reg = SchemaRegistry::new();

    reg.register(PacketSchema {
        packet_type: PACKET_PROCESSING_STARTED,
        has_delta: false,
        fields: vec![],
    })
    .expect("seed registration");

    reg.register(PacketSchema {
        packet_type: PACKET_PROCESSING_FINISHED,
        has_delta: false,
        fields: vec![],
    })
    .expect("seed registration");

    reg.register(PacketSchema {
        packet_type: PACKET_SERVER_JOIN_REQ,
        has_delta: false,
        fields: vec![
            FieldSchema::scalar("username", FieldKind::String, false),
            FieldSchema::scalar("capability", FieldKind::String, false),
            FieldSchema::scalar("version_label", FieldKind::String, false),
            FieldSchema::scalar("major_version", FieldKind::U32, false),
            FieldSchema::scalar("minor_version", FieldKind::U32, false),
            FieldSchema::scalar("patch_version", FieldKind::U32, false),
        ],
    })
    .expect("seed registration");

    reg.register(PacketSchema {
        packet_type: PACKET_SERVER_JOIN_REPLY,
        has_delta: false,
        fields: vec![
            FieldSchema::scalar("you_can_join", FieldKind::Bool, false),
            FieldSchema::scalar("message", FieldKind::String, false),
            FieldSchema::scalar("capability", FieldKind::String, false),
            FieldSchema::scalar("challenge_file", FieldKind::String, false),
            FieldSchema::scalar("conn_id", FieldKind::S16, false),
        ],
    })
    .expect("seed registration");

    reg.register(PacketSchema {
        packet_type: PACKET_SERVER_INFO,
        has_delta: true,
        fields: vec![
            FieldSchema::scalar("version_label", FieldKind::String, false),
            FieldSchema::scalar("major_version", FieldKind::U32, false),
            FieldSchema::scalar("minor_version", FieldKind::U32, false),
            FieldSchema::scalar("patch_version", FieldKind::U32, false),
        ],
    })
    .expect("seed registration");

    reg.register(PacketSchema {
        packet_type: PACKET_CHAT_MSG,
        has_delta: true,
        fields: vec![
            FieldSchema::scalar("message", FieldKind::String, false),
            FieldSchema::scalar("tile", FieldKind::S32, false),
            FieldSchema::scalar("event", FieldKind::S16, false),
            FieldSchema::scalar("turn", FieldKind::S16, false),
            FieldSchema::scalar("phase", FieldKind::S16, false),
            FieldSchema::scalar("conn_id", FieldKind::S16, false),
        ],
    })
    .expect("seed registration");

    reg.register(PacketSchema {
        packet_type: PACKET_GAME_INFO,
        has_delta: true,
        fields: vec![
            FieldSchema::scalar("turn", FieldKind::S16, false),
            FieldSchema::array("id_of_max_city_size", FieldKind::Bool, 10, true),
        ],
    })
    .expect("seed registration");

    reg
}
