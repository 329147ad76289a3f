//! Packet dispatch: resolves a schema, decodes the body, and invokes the
//! registered handler for the packet type. Handler failures are isolated —
//! they never poison the read loop.

use std::collections::HashMap;

use freeciv_protocol::{decode, DecodedRecord, DeltaCache, ProtocolError};

use crate::connection::ConnectionHandle;

/// Implemented by anything that wants to react to a decoded packet.
pub trait PacketHandler: Send + Sync {
    fn handle(&self, conn: &ConnectionHandle, packet_type: u16, record: &DecodedRecord) -> anyhow::Result<()>;
}

struct LoggingDefaultHandler;

impl PacketHandler for LoggingDefaultHandler {
    fn handle(&self, _conn: &ConnectionHandle, packet_type: u16, _record: &DecodedRecord) -> anyhow::Result<()> {
        tracing::warn!(packet_type, "no handler registered for packet type, discarding");
        Ok(())
    }
}

/// True when dispatch decoded and invoked a handler for packet type 5
/// (the join-reply). The connection driver uses this to flip header mode.
pub struct DispatchOutcome {
    pub was_join_reply: bool,
}

pub struct Dispatcher {
    handlers: HashMap<u16, Box<dyn PacketHandler>>,
    default_handler: Box<dyn PacketHandler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            default_handler: Box::new(LoggingDefaultHandler),
        }
    }

    pub fn register(&mut self, packet_type: u16, handler: Box<dyn PacketHandler>) {
        self.handlers.insert(packet_type, handler);
    }

    /// Resolves the schema, decodes `body`, and invokes the handler (or the
    /// default handler for unregistered types). `NotRegistered` schema
    /// lookups are non-fatal: they're logged and the frame is dropped.
    pub fn dispatch(
        &self,
        conn: &ConnectionHandle,
        cache: &DeltaCache,
        packet_type: u16,
        body: &[u8],
    ) -> Result<DispatchOutcome, ProtocolError> {
        let schema = match freeciv_protocol::registry().lookup(packet_type) {
            Some(schema) => schema,
            None => {
                tracing::warn!(packet_type, "unknown packet type, dropping frame");
                return Err(ProtocolError::NotRegistered(packet_type));
            }
        };

        let record = decode(schema, body, cache)?;

        let handler = self.handlers.get(&packet_type).unwrap_or(&self.default_handler);
        if let Err(e) = handler.handle(conn, packet_type, &record) {
            tracing::warn!(packet_type, error = %e, "handler failed, continuing read loop");
        }

        Ok(DispatchOutcome {
            was_join_reply: packet_type == freeciv_protocol::schema::PACKET_SERVER_JOIN_REPLY,
        })
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
