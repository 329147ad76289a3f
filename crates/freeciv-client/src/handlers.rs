//! Example handlers demonstrating the dispatcher's registration surface.
//! These just log; real game-state integration is the caller's job.

use freeciv_protocol::DecodedRecord;

use crate::connection::ConnectionHandle;
use crate::dispatch::PacketHandler;

pub struct LogServerInfo;

impl PacketHandler for LogServerInfo {
    fn handle(&self, _conn: &ConnectionHandle, _packet_type: u16, record: &DecodedRecord) -> anyhow::Result<()> {
        tracing::info!(?record, "server-info");
        Ok(())
    }
}

pub struct LogChatMessage;

impl PacketHandler for LogChatMessage {
    fn handle(&self, _conn: &ConnectionHandle, _packet_type: u16, record: &DecodedRecord) -> anyhow::Result<()> {
        if let Some(message) = record.get("message") {
            tracing::info!(%message, "chat-msg");
        }
        Ok(())
    }
}
