//! # Session
//!
//! A reliable duplex byte stream over a connected TCP socket: framing,
//! optional encryption, and lock-free handoff between I/O and application
//! code.
//!
//! ## Task structure
//! A session owns four cooperative task groups, each holding a strong
//! reference captured at spawn time:
//!
//! 1. **Reader**: one outstanding socket read, pushing raw chunks into a
//!    bounded queue. The bounded queue is what caps the raw stream buffer: a
//!    slow framer backpressures the reader, which in turn stalls the TCP
//!    window.
//! 2. **Framer**: assembles chunks, cuts `len:u32_le || body` frames, and
//!    pushes bodies into the ingress queue. A zero or maximal length prefix
//!    is a fatal protocol error.
//! 3. **Batcher**: drains the egress queue into a single write, up to 1000
//!    frames or 64 KiB per batch.
//! 4. **Adapters (×4)**: decrypt, deserialize, and hand envelopes to the
//!    installed receiver callback in parallel.
//!
//! Every idle loop sleeps on an exponential backoff (1 µs to 1 ms, ×2, ÷32,
//! 10 % jitter). Queue slots own their buffers exclusively; a dequeued
//! buffer belongs to the dequeuer.
//!
//! ## Wire format
//! ```text
//! frame := len:u32_le body:byte[len]
//! body  := flag:u8 (plain | cipher)
//! plain := id:u32_le payload:byte[*]
//! ```
//! The cipher flag switches from 0x00 to 0x01 at most once per session, when
//! both sides have agreed on the shared key.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use crossbeam_queue::ArrayQueue;
use once_cell::sync::OnceCell;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::SessionConfig;
use crate::core::byte_buffer::{ByteBuffer, ByteReader};
use crate::core::packet::{self, Envelope, PacketId, PacketKind};
use crate::crypto::aes::Aes256Cbc;
use crate::error::{NodeError, Result};
use crate::utils::backoff::ExponentialBackoff;

/// Flag byte: the body is `id || payload` in clear.
const FLAG_PLAIN: u8 = 0x00;

/// Flag byte: the body is AES-256-CBC ciphertext of `id || payload`.
const FLAG_ENCRYPTED: u8 = 0x01;

/// Frame lengths must be non-zero and below this bound. A `u32` prefix
/// cannot express 4 GiB, so the oversize check collapses to the maximum
/// encodable value.
pub const MAX_FRAME_LEN: u32 = u32::MAX;

type PacketReceiver = Box<dyn Fn(Envelope) + Send + Sync>;

fn io_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_micros(1),
        Duration::from_millis(1),
        2.0,
        32.0,
        0.1,
    )
}

/// One live connection: framing, encryption, and the queues between the
/// socket and the application.
///
/// Constructed as a shared resource; the I/O tasks and the application each
/// hold an `Arc`. [`close`](Session::close) marks the session dead so every
/// task exits and releases its reference.
pub struct Session {
    alive: AtomicBool,
    raw_ingress: ArrayQueue<Vec<u8>>,
    ingress: ArrayQueue<Vec<u8>>,
    egress: ArrayQueue<Vec<u8>>,
    aes: OnceCell<Aes256Cbc>,
    receiver: OnceCell<PacketReceiver>,
    closed_tx: watch::Sender<bool>,
    config: SessionConfig,
}

impl Session {
    /// Start a session over a connected socket with default settings.
    pub fn start(stream: TcpStream) -> Arc<Self> {
        Self::start_with_config(stream, SessionConfig::default())
    }

    /// Start a session over a connected socket.
    ///
    /// Spawns the reader, framer, batcher, and adapter tasks on the current
    /// runtime. Each task holds a strong reference until it exits.
    pub fn start_with_config(stream: TcpStream, config: SessionConfig) -> Arc<Self> {
        let (read_half, write_half) = stream.into_split();
        let (closed_tx, closed_rx) = watch::channel(false);

        let session = Arc::new(Self {
            alive: AtomicBool::new(true),
            raw_ingress: ArrayQueue::new(config.queue_capacity),
            ingress: ArrayQueue::new(config.queue_capacity),
            egress: ArrayQueue::new(config.queue_capacity),
            aes: OnceCell::new(),
            receiver: OnceCell::new(),
            closed_tx,
            config,
        });

        tokio::spawn(session.clone().run_reader(read_half, closed_rx.clone()));
        tokio::spawn(session.clone().run_framer());
        tokio::spawn(session.clone().run_batcher(write_half, closed_rx));
        for index in 0..session.config.adapter_tasks {
            tokio::spawn(session.clone().run_adapter(index));
        }

        info!("session created");
        session
    }

    /// Whether the socket is still usable.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Whether encryption has been installed.
    pub fn secured(&self) -> bool {
        self.aes.get().is_some()
    }

    /// Mark the session dead. Tasks observe the flag, drain what they must,
    /// and exit; in-flight reads and writes are interrupted.
    pub fn close(&self) {
        self.mark_dead();
    }

    /// Install the symmetric cipher negotiated by the handshake.
    ///
    /// May succeed at most once over the session's lifetime.
    pub fn install_encryption(&self, key_material: &[u8], salt: &[u8], rounds: u16) -> Result<()> {
        let aes = Aes256Cbc::new(key_material, salt, rounds)?;
        self.aes
            .set(aes)
            .map_err(|_| NodeError::Crypto("encryption already installed".into()))?;
        info!(rounds, "session encryption installed");
        Ok(())
    }

    /// Install the callback invoked once per inbound packet.
    ///
    /// The adapter tasks idle until a receiver is present, so packets
    /// arriving earlier are not lost. May succeed at most once.
    pub fn set_packet_receiver<F>(&self, receiver: F) -> Result<()>
    where
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        self.receiver
            .set(Box::new(receiver))
            .map_err(|_| NodeError::InvalidArgument("packet receiver already installed".into()))
    }

    /// Serialize and queue a packet for transmission.
    ///
    /// Retries with backoff while the egress queue is full. Returns `true`
    /// once the queue accepted the buffer (the session owns it from then
    /// on), `false` if the session died first.
    pub async fn send_packet<T: PacketKind>(&self, packet: T) -> bool {
        if !self.is_alive() {
            warn!("session is closed, cannot send packet");
            return false;
        }

        let mut plain = ByteBuffer::with_capacity(64);
        packet::serialize_packet(&packet, &mut plain);

        let mut body;
        if let Some(aes) = self.aes.get() {
            let cipher = aes.encrypt(plain.as_slice());
            body = Vec::with_capacity(cipher.len() + 1);
            body.push(FLAG_ENCRYPTED);
            body.extend_from_slice(&cipher);
        } else {
            body = Vec::with_capacity(plain.len() + 1);
            body.push(FLAG_PLAIN);
            body.extend_from_slice(plain.as_slice());
        }

        let mut backoff = io_backoff();
        loop {
            if !self.is_alive() {
                return false;
            }
            match self.egress.push(body) {
                Ok(()) => {
                    trace!(packet_id = %T::ID, "packet queued for send");
                    return true;
                }
                Err(returned) => {
                    body = returned;
                    tokio::time::sleep(backoff.delay()).await;
                    backoff.increase();
                }
            }
        }
    }

    /// Take one framed packet off the ingress path without waiting.
    ///
    /// Competes with the adapter tasks for the same queue; useful for
    /// applications that poll instead of installing a receiver.
    pub fn pop_packet_now(&self) -> Option<Envelope> {
        loop {
            let body = self.ingress.pop()?;
            match self.decode_frame(&body) {
                Ok(envelope) => return Some(envelope),
                Err(e) => warn!(error = %e, "dropping undecodable frame"),
            }
        }
    }

    /// Wait for the next inbound packet.
    ///
    /// Yields cooperatively while the queue is empty. Returns `None` once
    /// the session dies.
    pub async fn pop_packet_async(&self) -> Option<Envelope> {
        let mut backoff = io_backoff();
        loop {
            if !self.is_alive() {
                return None;
            }
            match self.ingress.pop() {
                Some(body) => match self.decode_frame(&body) {
                    Ok(envelope) => return Some(envelope),
                    Err(e) => warn!(error = %e, "dropping undecodable frame"),
                },
                None => {
                    tokio::time::sleep(backoff.delay()).await;
                    backoff.increase();
                }
            }
        }
    }

    fn mark_dead(&self) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        // No new buffers enter after the flag drops; discard what remains.
        while self.egress.pop().is_some() {}
        let _ = self.closed_tx.send(true);
        debug!("session marked dead");
    }

    /// Decode a frame body (`flag || rest`) into an envelope.
    fn decode_frame(&self, body: &[u8]) -> Result<Envelope> {
        let mut reader = ByteReader::new(body);
        match reader.read_u8()? {
            FLAG_PLAIN => decode_plain(reader.rest()),
            FLAG_ENCRYPTED => {
                let aes = self.aes.get().ok_or_else(|| {
                    NodeError::Crypto("encrypted frame received before key agreement".into())
                })?;
                let plain = aes.decrypt(reader.rest())?;
                decode_plain(&plain)
            }
            other => Err(NodeError::Framing(format!(
                "unknown cipher flag {other:#04x}"
            ))),
        }
    }

    #[instrument(name = "reader", skip_all)]
    async fn run_reader(
        self: Arc<Self>,
        mut read_half: OwnedReadHalf,
        mut closed_rx: watch::Receiver<bool>,
    ) {
        let mut backoff = io_backoff();
        let mut buf = BytesMut::with_capacity(64 * 1024);

        while self.is_alive() {
            let read = tokio::select! {
                read = read_half.read_buf(&mut buf) => read,
                _ = closed_rx.changed() => {
                    debug!("read interrupted by close");
                    break;
                }
            };
            match read {
                Ok(0) => {
                    debug!("peer closed the connection");
                    self.mark_dead();
                    break;
                }
                Ok(n) => {
                    trace!(bytes = n, "received chunk");
                    let mut chunk = buf.split().to_vec();
                    loop {
                        match self.raw_ingress.push(chunk) {
                            Ok(()) => break,
                            Err(returned) => {
                                // Queue full: the framer is behind. Waiting
                                // here is what stalls the TCP window.
                                chunk = returned;
                                if !self.is_alive() {
                                    debug!("reader exiting with chunk unqueued");
                                    return;
                                }
                                tokio::time::sleep(backoff.delay()).await;
                                backoff.increase();
                            }
                        }
                    }
                    backoff.decrease();
                }
                Err(e) => {
                    warn!(error = %e, "error reading from socket");
                    self.mark_dead();
                    break;
                }
            }
        }
        debug!("reader exiting");
    }

    #[instrument(name = "framer", skip_all)]
    async fn run_framer(self: Arc<Self>) {
        let mut backoff = io_backoff();
        let mut streambuf = BytesMut::new();

        while self.is_alive() {
            self.drain_raw(&mut streambuf);

            if streambuf.len() < 4 {
                tokio::time::sleep(backoff.delay()).await;
                backoff.increase();
                continue;
            }

            let len = u32::from_le_bytes([streambuf[0], streambuf[1], streambuf[2], streambuf[3]]);
            if len == 0 || len >= MAX_FRAME_LEN {
                warn!(len, "fatal frame length on the wire");
                self.mark_dead();
                break;
            }
            let frame_len = len as usize;

            while streambuf.len() < 4 + frame_len && self.is_alive() {
                self.drain_raw(&mut streambuf);
                if streambuf.len() >= 4 + frame_len {
                    break;
                }
                tokio::time::sleep(backoff.delay()).await;
                backoff.increase();
            }
            if streambuf.len() < 4 + frame_len {
                // The wait above only ends short when the session died.
                warn!("truncated frame after socket close");
                break;
            }

            streambuf.advance(4);
            let mut body = streambuf.split_to(frame_len).to_vec();
            loop {
                match self.ingress.push(body) {
                    Ok(()) => break,
                    Err(returned) => {
                        body = returned;
                        if !self.is_alive() {
                            debug!("framer exiting with frame unqueued");
                            return;
                        }
                        tokio::time::sleep(backoff.delay()).await;
                        backoff.increase();
                    }
                }
            }
            trace!(bytes = frame_len, "frame queued");
            backoff.decrease();
        }
        debug!("framer exiting");
    }

    fn drain_raw(&self, streambuf: &mut BytesMut) {
        while let Some(chunk) = self.raw_ingress.pop() {
            streambuf.extend_from_slice(&chunk);
        }
    }

    #[instrument(name = "batcher", skip_all)]
    async fn run_batcher(
        self: Arc<Self>,
        mut write_half: OwnedWriteHalf,
        mut closed_rx: watch::Receiver<bool>,
    ) {
        let mut backoff = io_backoff();
        let mut batch = ByteBuffer::with_capacity(self.config.write_batch_bytes);

        while self.is_alive() {
            if self.egress.is_empty() {
                tokio::time::sleep(backoff.delay()).await;
                backoff.increase();
                continue;
            }

            batch.clear();
            if batch.capacity() >= self.config.write_shrink_bytes {
                // An oversized packet grew the buffer; release the memory.
                batch = ByteBuffer::with_capacity(self.config.write_batch_bytes);
            }

            let mut frames = 0;
            while frames < self.config.write_batch_frames
                && batch.len() < self.config.write_batch_bytes
            {
                let Some(body) = self.egress.pop() else {
                    break;
                };
                batch.append_u32(body.len() as u32);
                batch.append_bytes(&body);
                frames += 1;
            }
            if frames == 0 {
                tokio::time::sleep(backoff.delay()).await;
                backoff.increase();
                continue;
            }

            trace!(frames, bytes = batch.len(), "writing batch");
            let write = tokio::select! {
                write = write_half.write_all(batch.as_slice()) => write,
                _ = closed_rx.changed() => {
                    debug!("write interrupted by close");
                    break;
                }
            };
            if let Err(e) = write {
                warn!(error = %e, "error writing to socket");
                self.mark_dead();
                break;
            }
            backoff.decrease();
        }

        // Discard whatever the application queued after death.
        while self.egress.pop().is_some() {}
        debug!("batcher exiting");
    }

    #[instrument(name = "adapter", skip(self))]
    async fn run_adapter(self: Arc<Self>, index: usize) {
        let mut backoff = io_backoff();

        while self.is_alive() {
            let Some(receiver) = self.receiver.get() else {
                tokio::time::sleep(backoff.delay()).await;
                backoff.increase();
                continue;
            };

            match self.ingress.pop() {
                Some(body) => {
                    match self.decode_frame(&body) {
                        Ok(envelope) => {
                            if catch_unwind(AssertUnwindSafe(|| receiver(envelope))).is_err() {
                                warn!("packet receiver panicked");
                            }
                        }
                        Err(e) => warn!(error = %e, "dropping undecodable frame"),
                    }
                    backoff.decrease();
                }
                None => {
                    tokio::time::sleep(backoff.delay()).await;
                    backoff.increase();
                }
            }
        }
        debug!(index, "adapter exiting");
    }
}

fn decode_plain(bytes: &[u8]) -> Result<Envelope> {
    let mut reader = ByteReader::new(bytes);
    let id = PacketId::from_raw(reader.read_u32()?);
    packet::decode_packet(id, reader.rest())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packets::network::{Echo, Message};
    use crate::protocol::packets::register_builtin_packets;
    use tokio::net::TcpListener;

    async fn session_pair() -> (Arc<Session>, Arc<Session>) {
        register_builtin_packets();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (Session::start(client), Session::start(server))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn plaintext_round_trip() {
        let (client, server) = session_pair().await;

        assert!(client.send_packet(Message { text: "0".into() }).await);
        let envelope = server.pop_packet_async().await.unwrap();
        let msg = envelope.downcast::<Message>().unwrap();
        assert_eq!(msg.text, "0");

        client.close();
        server.close();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn encrypted_round_trip() {
        let (client, server) = session_pair().await;

        let key = [7u8; 32];
        let salt = [0u8, 1, 2, 3, 4, 5, 6, 7];
        client.install_encryption(&key, &salt, 10).unwrap();
        server.install_encryption(&key, &salt, 10).unwrap();
        assert!(client.secured() && server.secured());

        assert!(client.send_packet(Echo { text: "42".into() }).await);
        let envelope = server.pop_packet_async().await.unwrap();
        assert_eq!(envelope.downcast::<Echo>().unwrap().text, "42");

        client.close();
        server.close();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn encryption_installs_only_once() {
        let (client, server) = session_pair().await;
        let key = [7u8; 32];
        let salt = [0u8; 8];
        client.install_encryption(&key, &salt, 5).unwrap();
        assert!(matches!(
            client.install_encryption(&key, &salt, 5),
            Err(NodeError::Crypto(_))
        ));
        client.close();
        server.close();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn send_fails_after_close() {
        let (client, server) = session_pair().await;
        client.close();
        assert!(!client.send_packet(Message { text: "x".into() }).await);
        assert!(client.pop_packet_async().await.is_none());
        server.close();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn receiver_callback_gets_packets() {
        let (client, server) = session_pair().await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        server
            .set_packet_receiver(move |envelope| {
                let _ = tx.send(envelope);
            })
            .unwrap();

        for i in 0..3 {
            assert!(client.send_packet(Message { text: i.to_string() }).await);
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            let envelope = rx.recv().await.unwrap();
            seen.push(envelope.downcast::<Message>().unwrap().text);
        }
        seen.sort();
        assert_eq!(seen, vec!["0", "1", "2"]);

        client.close();
        server.close();
    }
}
