//! Connection driver: owns the transport, negotiates header mode, and runs
//! the frame-reader → dispatcher loop until shutdown.

use std::time::Duration;

use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;

use freeciv_protocol::schema::{PACKET_SERVER_JOIN_REPLY, PACKET_SERVER_JOIN_REQ};
use freeciv_protocol::{decode_nondelta, encode_nondelta, DecodedRecord, DeltaCache, FieldValue, ProtocolError};
use freeciv_wire::ClientConfig;

use crate::dispatch::{Dispatcher, PacketHandler};
use crate::error::ClientError;
use crate::frame::{write_frame, FrameReader, HeaderMode};

/// A lightweight, cloneable handle passed to handlers. Lets a handler
/// request connection shutdown without owning the transport itself.
#[derive(Clone)]
pub struct ConnectionHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl ConnectionHandle {
    fn new(shutdown_tx: watch::Sender<bool>) -> Self {
        Self { shutdown_tx }
    }

    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    #[cfg(test)]
    pub fn for_test() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self::new(tx)
    }
}

/// Connects to a FreeCiv server over TCP using the host/port in `config`.
pub async fn connect(config: &ClientConfig) -> Result<Connection<TcpStream>, ClientError> {
    let stream = TcpStream::connect((config.server.host.as_str(), config.server.port)).await?;
    let mut conn = Connection::new(stream, config);
    if let Some(path) = &config.capture_path {
        conn.enable_capture(path).await?;
    }
    Ok(conn)
}

/// One live connection. Generic over the transport so tests can drive it
/// with an in-memory duplex stream instead of a real socket.
pub struct Connection<T> {
    header_mode: HeaderMode,
    cache: DeltaCache,
    dispatcher: Dispatcher,
    reader: FrameReader<ReadHalf<T>>,
    writer: WriteHalf<T>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    join_timeout: Duration,
}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Connection<T> {
    pub fn new(transport: T, config: &ClientConfig) -> Self {
        let (read_half, write_half) = split(transport);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut reader = FrameReader::new(read_half);
        reader.set_validate_frames(config.validate_frames);
        Self {
            header_mode: HeaderMode::Negotiation,
            cache: DeltaCache::new(),
            dispatcher: Dispatcher::new(),
            reader,
            writer: write_half,
            shutdown_tx,
            shutdown_rx,
            join_timeout: config.join_timeout(),
        }
    }

    pub fn register_handler(&mut self, packet_type: u16, handler: Box<dyn PacketHandler>) {
        self.dispatcher.register(packet_type, handler);
    }

    /// Opens `path` for append and starts mirroring every raw frame to it.
    /// Debug facility only; carries no wire-compatibility meaning.
    pub async fn enable_capture(&mut self, path: &std::path::Path) -> Result<(), ClientError> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        self.reader.set_capture(file);
        Ok(())
    }

    pub fn cache(&self) -> &DeltaCache {
        &self.cache
    }

    fn handle(&self) -> ConnectionHandle {
        ConnectionHandle::new(self.shutdown_tx.clone())
    }

    /// Sends the join-request and waits for a join-reply, switching header
    /// mode to `Full` on success. Fails with `JoinTimeout` if no reply
    /// arrives within the configured deadline.
    pub async fn join(&mut self, username: &str) -> Result<DecodedRecord, ClientError> {
        let schema = freeciv_protocol::registry()
            .lookup(PACKET_SERVER_JOIN_REQ)
            .expect("join-request schema is always registered");

        let mut request = DecodedRecord::new();
        request.push("username", FieldValue::String(username.to_string()));
        request.push("capability", FieldValue::String(String::new()));
        request.push("version_label", FieldValue::String("freeciv-client".to_string()));
        request.push("major_version", FieldValue::U32(3));
        request.push("minor_version", FieldValue::U32(0));
        request.push("patch_version", FieldValue::U32(0));
        let body = encode_nondelta(schema, &request);

        write_frame(&mut self.writer, HeaderMode::Negotiation, PACKET_SERVER_JOIN_REQ, &body).await?;

        let timeout = self.join_timeout;
        match tokio::time::timeout(timeout, self.await_join_reply()).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::JoinTimeout(timeout)),
        }
    }

    async fn await_join_reply(&mut self) -> Result<DecodedRecord, ClientError> {
        loop {
            let (packet_type, body) = self.reader.next_frame(self.header_mode).await?;
            if packet_type == PACKET_SERVER_JOIN_REPLY {
                let schema = freeciv_protocol::registry()
                    .lookup(packet_type)
                    .expect("join-reply schema is always registered");
                let record = decode_nondelta(schema, &body)?;
                self.header_mode = HeaderMode::Full;
                return Ok(record);
            }
            // Other negotiation packets (processing-started/finished) are
            // dispatched normally; an unknown type is non-fatal here too.
            if let Some(schema) = freeciv_protocol::registry().lookup(packet_type) {
                debug_assert!(
                    !schema.is_pinned_negotiation_type() || self.header_mode == HeaderMode::Negotiation,
                    "pinned negotiation packet type {packet_type} arrived outside negotiation header mode"
                );
            }
            let handle = self.handle();
            match self.dispatcher.dispatch(&handle, &self.cache, packet_type, &body) {
                Ok(_) | Err(ProtocolError::NotRegistered(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Runs the frame-reader → dispatcher loop until an explicit shutdown,
    /// transport EOF, or transport error. Always clears the cache and closes
    /// the transport on exit, regardless of how the loop ended.
    pub async fn run(&mut self) -> Result<(), ClientError> {
        let result = self.run_inner().await;
        self.cache.clear_all();
        if let Err(e) = self.writer.flush().await {
            tracing::warn!(error = %e, "failed to flush transport on disconnect");
        }
        if let Err(e) = self.writer.shutdown().await {
            tracing::warn!(error = %e, "failed to close transport cleanly");
        }
        result
    }

    async fn run_inner(&mut self) -> Result<(), ClientError> {
        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        return Ok(());
                    }
                }
                frame = self.reader.next_frame(self.header_mode) => {
                    let (packet_type, body) = match frame {
                        Ok(frame) => frame,
                        Err(ClientError::Transport(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                            return Ok(());
                        }
                        Err(e) => return Err(e),
                    };

                    if let Some(schema) = freeciv_protocol::registry().lookup(packet_type) {
                        debug_assert!(
                            !schema.is_pinned_negotiation_type() || self.header_mode == HeaderMode::Negotiation,
                            "pinned negotiation packet type {packet_type} arrived outside negotiation header mode"
                        );
                    }

                    let handle = self.handle();
                    match self.dispatcher.dispatch(&handle, &self.cache, packet_type, &body) {
                        Ok(outcome) => {
                            if outcome.was_join_reply {
                                self.header_mode = HeaderMode::Full;
                            }
                        }
                        Err(ProtocolError::NotRegistered(_)) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }

    pub fn disconnect(&self) {
        self.cache.clear_all();
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_frame;
    use freeciv_protocol::schema::PACKET_CHAT_MSG;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::duplex;

    struct CountingHandler(Arc<AtomicUsize>);

    impl PacketHandler for CountingHandler {
        fn handle(&self, _conn: &ConnectionHandle, _packet_type: u16, _record: &DecodedRecord) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn join_times_out_when_server_is_silent() {
        let (client_side, _server_side) = duplex(64);
        let config = ClientConfig::default();
        let mut conn = Connection::new(client_side, &config);
        conn.join_timeout = Duration::from_millis(1);
        let err = conn.join("newton").await.unwrap_err();
        assert!(matches!(err, ClientError::JoinTimeout(_)));
    }

    #[tokio::test]
    async fn join_succeeds_and_switches_header_mode() {
        let (client_side, mut server_side) = duplex(4096);
        let config = ClientConfig::default();
        let mut conn = Connection::new(client_side, &config);

        let server = tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            // drain the join-request frame (negotiation header: 2-byte length + 1-byte type)
            let mut len_buf = [0u8; 2];
            server_side.read_exact(&mut len_buf).await.unwrap();
            let length = u16::from_be_bytes(len_buf) as usize;
            let mut rest = vec![0u8; length - 2];
            server_side.read_exact(&mut rest).await.unwrap();

            let schema = freeciv_protocol::registry().lookup(PACKET_SERVER_JOIN_REPLY).unwrap();
            let mut reply = DecodedRecord::new();
            reply.push("you_can_join", FieldValue::Bool(true));
            reply.push("message", FieldValue::String("welcome".to_string()));
            reply.push("capability", FieldValue::String(String::new()));
            reply.push("challenge_file", FieldValue::String(String::new()));
            reply.push("conn_id", FieldValue::S16(1));
            let body = encode_nondelta(schema, &reply);
            let frame = encode_frame(HeaderMode::Negotiation, PACKET_SERVER_JOIN_REPLY, &body);
            server_side.write_all(&frame).await.unwrap();
        });

        let reply = conn.join("newton").await.unwrap();
        assert_eq!(reply.get("you_can_join"), Some(&FieldValue::Bool(true)));
        assert_eq!(conn.header_mode, HeaderMode::Full);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn run_dispatches_until_shutdown_requested() {
        let (client_side, mut server_side) = duplex(4096);
        let config = ClientConfig::default();
        let mut conn = Connection::new(client_side, &config);
        let calls = Arc::new(AtomicUsize::new(0));
        conn.register_handler(PACKET_CHAT_MSG, Box::new(CountingHandler(calls.clone())));
        conn.header_mode = HeaderMode::Full;

        use tokio::io::AsyncWriteExt;
        let body: &[u8] = &[
            0x3F, b'H', b'i', 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x05, 0x00, 0x01, 0x00, 0x00, 0x00, 0x07,
        ];
        let frame = encode_frame(HeaderMode::Full, PACKET_CHAT_MSG, body);
        server_side.write_all(&frame).await.unwrap();

        let shutdown_tx = conn.shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = shutdown_tx.send(true);
        });

        conn.run().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(conn.cache().is_empty(), "disconnect must clear the delta cache");
    }

    #[tokio::test]
    async fn enable_capture_mirrors_raw_frames_to_disk() {
        let (client_side, mut server_side) = duplex(4096);
        let config = ClientConfig::default();
        let mut conn = Connection::new(client_side, &config);

        let capture_path = std::env::temp_dir().join(format!("freeciv-capture-test-{}", std::process::id()));
        conn.enable_capture(&capture_path).await.unwrap();

        use tokio::io::AsyncWriteExt;
        let body: &[u8] = b"hi";
        let frame = encode_frame(HeaderMode::Full, PACKET_CHAT_MSG, body);
        server_side.write_all(&frame).await.unwrap();
        conn.header_mode = HeaderMode::Full;

        let (packet_type, got_body) = conn.reader.next_frame(conn.header_mode).await.unwrap();
        assert_eq!(packet_type, PACKET_CHAT_MSG);
        assert_eq!(got_body, body);
        drop(conn);

        let captured = tokio::fs::read(&capture_path).await.unwrap();
        assert_eq!(captured, frame);
        let _ = std::fs::remove_file(&capture_path);
    }
}
