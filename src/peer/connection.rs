use super::bitfield::Bitfield;
use super::error::PeerError;
use super::framer::Frame;
use super::message::{Handshake, Message};
use super::peer_id::PeerId;
use super::queue::PeerRequestQueue;
use super::transport::PeerTransport;
use crate::config::SwarmConfig;
use crate::piece::{BlockOutcome, BlockRequest, PieceError, PieceTracker};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// Advisory progress callback, invoked with the durable fraction of the
/// torrent after every received block.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Lifecycle of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport established, local handshake not yet sent.
    Connecting,
    /// Local handshake sent, waiting for the peer's.
    AwaitingHandshake,
    /// Peer handshake accepted, `interested` on its way.
    Interested,
    /// Exchanging messages.
    Exchanging,
    /// Terminal; nothing more is sent.
    Closed,
}

/// Counters for one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub bytes_downloaded: u64,
    pub blocks_received: u64,
    pub pieces_verified: u32,
    pub pieces_corrupt: u32,
    pub blocks_released: u32,
}

/// A download-only connection to one peer.
///
/// Drives the handshake, keeps the peer's request pipeline full and feeds
/// delivered blocks to the shared [`PieceTracker`].
///
/// # Examples
///
/// ```no_run
/// use swarmwire::peer::PeerConnection;
/// use swarmwire::{MemorySink, PeerId, PieceTracker, SwarmConfig, TorrentMetadata};
/// use std::sync::Arc;
///
/// # async fn example(meta: TorrentMetadata) -> Result<(), Box<dyn std::error::Error>> {
/// let config = SwarmConfig::default();
/// let tracker = Arc::new(PieceTracker::new(
///     Arc::new(meta),
///     config.block_size,
///     Arc::new(MemorySink::new()),
/// ));
///
/// let mut conn =
///     PeerConnection::connect("192.168.1.100:6881", tracker, PeerId::generate(), &config).await?;
/// conn.run().await?;
/// println!("downloaded {} bytes", conn.stats().bytes_downloaded);
/// # Ok(())
/// # }
/// ```
pub struct PeerConnection<S> {
    peer: String,
    state: ConnectionState,
    transport: PeerTransport<S>,
    queue: PeerRequestQueue,
    tracker: Arc<PieceTracker>,
    local_peer_id: PeerId,
    remote_peer_id: Option<PeerId>,
    connected_at: Instant,
    last_activity: Instant,
    stats: ConnectionStats,
    release_on_close: bool,
    progress: Option<ProgressFn>,
}

impl PeerConnection<TcpStream> {
    /// Dials `addr` within the configured connect timeout.
    ///
    /// `addr` is anything tokio can resolve, e.g. `"10.0.0.7:6881"` or a
    /// [`SocketAddr`](std::net::SocketAddr); its display form labels the
    /// connection in logs.
    pub async fn connect<A>(
        addr: A,
        tracker: Arc<PieceTracker>,
        local_peer_id: PeerId,
        config: &SwarmConfig,
    ) -> Result<Self, PeerError>
    where
        A: ToSocketAddrs + fmt::Display,
    {
        let peer = addr.to_string();
        let stream = timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| PeerError::Timeout)??;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, peer, tracker, local_peer_id, config))
    }
}

impl<S> PeerConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an already connected stream.
    pub fn new(
        stream: S,
        peer: impl Into<String>,
        tracker: Arc<PieceTracker>,
        local_peer_id: PeerId,
        config: &SwarmConfig,
    ) -> Self {
        let transport = PeerTransport::new(stream)
            .with_timeouts(config.idle_timeout, config.write_timeout)
            .with_max_message_size(config.max_message_size);
        let queue = PeerRequestQueue::new(tracker.piece_count())
            .with_max_in_flight(config.max_in_flight)
            .with_requester(tracker.register_requester());
        let now = Instant::now();

        Self {
            peer: peer.into(),
            state: ConnectionState::Connecting,
            transport,
            queue,
            tracker,
            local_peer_id,
            remote_peer_id: None,
            connected_at: now,
            last_activity: now,
            stats: ConnectionStats::default(),
            release_on_close: config.release_on_close,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn queue(&self) -> &PeerRequestQueue {
        &self.queue
    }

    pub fn remote_peer_id(&self) -> Option<PeerId> {
        self.remote_peer_id
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// When the peer last sent us anything, for idle policies layered on top.
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Runs the connection until the torrent completes, the peer goes
    /// away, or the stream turns invalid. The connection is Closed
    /// afterwards in every case.
    pub async fn run(&mut self) -> Result<(), PeerError> {
        let result = self.drive().await;
        self.close().await;

        match &result {
            Ok(()) => debug!(peer = %self.peer, "connection closed"),
            Err(e) => debug!(peer = %self.peer, error = %e, "connection closed with error"),
        }
        result
    }

    /// Exchanges handshakes and declares interest.
    ///
    /// [`run`](Self::run) calls this on a fresh connection. Calling it
    /// first lets the caller look at the remote peer id before any piece
    /// traffic starts.
    pub async fn handshake(&mut self) -> Result<(), PeerError> {
        match self.state {
            ConnectionState::Connecting => {}
            ConnectionState::Exchanging => return Ok(()),
            _ => return Err(PeerError::ConnectionLost),
        }

        let ours = Handshake::new(
            *self.tracker.metadata().info_hash(),
            *self.local_peer_id.as_bytes(),
        );
        self.transport.send_handshake(&ours).await?;
        self.state = ConnectionState::AwaitingHandshake;

        let data = match self.transport.receive_frame().await? {
            Frame::Handshake(data) => data,
            Frame::Message(_) => {
                return Err(PeerError::HandshakeRejected("expected handshake".into()))
            }
        };
        self.last_activity = Instant::now();

        let theirs = Handshake::decode(&data)
            .map_err(|_| PeerError::HandshakeRejected("malformed handshake".into()))?;
        if &theirs.info_hash != self.tracker.metadata().info_hash() {
            warn!(peer = %self.peer, "handshake for a different torrent");
            return Err(PeerError::HandshakeRejected("info hash mismatch".into()));
        }

        self.remote_peer_id = PeerId::from_bytes(&theirs.peer_id);
        debug!(peer = %self.peer, remote = ?self.remote_peer_id, "handshake accepted");

        self.state = ConnectionState::Interested;
        self.transport.send_message(&Message::Interested).await?;
        self.state = ConnectionState::Exchanging;
        Ok(())
    }

    async fn drive(&mut self) -> Result<(), PeerError> {
        self.handshake().await?;

        let tracker = self.tracker.clone();
        let mut released = tracker.subscribe_released();

        while self.state != ConnectionState::Closed {
            if tracker.is_done() {
                debug!(peer = %self.peer, "torrent complete");
                break;
            }

            let frame = tokio::select! {
                frame = self.transport.receive_frame() => Some(frame?),
                Ok(()) = released.changed() => None,
                _ = tracker.wait_done() => break,
            };

            match frame {
                // The framer yields a single handshake, consumed above.
                Some(Frame::Handshake(_)) => {}
                Some(Frame::Message(data)) => {
                    self.last_activity = Instant::now();
                    self.dispatch(data).await?;
                }
                None => self.on_blocks_released().await?,
            }
        }

        Ok(())
    }

    async fn dispatch(&mut self, data: Bytes) -> Result<(), PeerError> {
        match Message::decode(data) {
            Ok(message) => self.on_message(message).await,
            Err(e) if !e.is_fatal() => {
                debug!(peer = %self.peer, error = %e, "skipping message");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Blocks went back to Needed somewhere in the torrent. A queue that
    /// already ran dry would never see them otherwise.
    async fn on_blocks_released(&mut self) -> Result<(), PeerError> {
        let requeued = self.queue.resync(&self.tracker);
        if requeued > 0 {
            trace!(peer = %self.peer, requeued, "pieces needed again");
        }
        self.fill_pipeline().await
    }

    async fn on_message(&mut self, message: Message) -> Result<(), PeerError> {
        match message {
            Message::KeepAlive => trace!(peer = %self.peer, "keep-alive"),
            Message::Choke => {
                debug!(peer = %self.peer, in_flight = self.queue.in_flight(), "choked");
                self.queue.on_choke();
            }
            Message::Unchoke => {
                debug!(peer = %self.peer, "unchoked");
                let was_choked = self.queue.is_choked();
                if self.queue.on_unchoke() {
                    if was_choked {
                        self.resend_in_flight().await?;
                    }
                    if self.queue.is_empty() {
                        self.queue.resync(&self.tracker);
                    }
                    self.fill_pipeline().await?;
                }
            }
            Message::Have { piece } => {
                if self.queue.on_have(piece) {
                    self.fill_pipeline().await?;
                }
            }
            Message::Bitfield(bits) => {
                let bitfield = Bitfield::from_bytes(&bits, self.tracker.piece_count());
                debug!(peer = %self.peer, pieces = bitfield.count(), "bitfield");
                if self.queue.on_bitfield(&bitfield) {
                    self.fill_pipeline().await?;
                }
            }
            Message::Piece { index, begin, data } => self.on_piece(index, begin, data).await?,
            // Download only: nothing is served back.
            Message::Interested
            | Message::NotInterested
            | Message::Request { .. }
            | Message::Cancel { .. }
            | Message::Port(_) => trace!(peer = %self.peer, ?message, "ignored"),
        }
        Ok(())
    }

    async fn on_piece(&mut self, index: u32, begin: u32, data: Bytes) -> Result<(), PeerError> {
        let len = data.len();

        match self.tracker.mark_received(index, begin, data) {
            Ok(outcome) => {
                self.queue.complete(index, begin);
                self.stats.bytes_downloaded += len as u64;
                self.stats.blocks_received += 1;

                match outcome {
                    BlockOutcome::Verified(piece) => {
                        self.stats.pieces_verified += 1;
                        trace!(peer = %self.peer, piece, "piece stored");
                    }
                    BlockOutcome::Corrupt(piece) => {
                        self.stats.pieces_corrupt += 1;
                        warn!(peer = %self.peer, piece, "piece corrupt, re-requesting");
                        self.queue.requeue(piece);
                    }
                    BlockOutcome::Accepted | BlockOutcome::Duplicate => {}
                }
            }
            Err(e @ PieceError::Storage(_)) => return Err(e.into()),
            Err(e) => {
                // The block stays Requested; the slot is freed on close.
                debug!(peer = %self.peer, error = %e, "discarding block");
            }
        }

        if let Some(progress) = &self.progress {
            progress(self.tracker.percent_done());
        }

        if self.tracker.is_done() {
            info!(peer = %self.peer, "download complete");
            self.state = ConnectionState::Closed;
            return Ok(());
        }

        if self.queue.is_empty() && self.queue.in_flight() == 0 {
            self.queue.resync(&self.tracker);
        }
        self.fill_pipeline().await
    }

    /// Asks again for blocks requested before a choke; the peer dropped them.
    async fn resend_in_flight(&mut self) -> Result<(), PeerError> {
        let pending = self.queue.in_flight_blocks().to_vec();
        for block in &pending {
            trace!(peer = %self.peer, ?block, "re-request");
            self.transport.send_message(&request_message(block)).await?;
        }
        Ok(())
    }

    async fn fill_pipeline(&mut self) -> Result<(), PeerError> {
        while let Some(block) = self.queue.pull(&self.tracker) {
            trace!(peer = %self.peer, ?block, "request");
            self.transport.send_message(&request_message(&block)).await?;
        }
        Ok(())
    }

    async fn close(&mut self) {
        let in_flight = self.queue.drain_in_flight();
        if self.release_on_close {
            for block in &in_flight {
                if self.tracker.release_held(block, self.queue.requester()) {
                    self.stats.blocks_released += 1;
                }
            }
        }

        self.transport.shutdown().await;
        self.state = ConnectionState::Closed;
    }
}

fn request_message(block: &BlockRequest) -> Message {
    Message::Request {
        index: block.piece,
        begin: block.offset,
        length: block.length,
    }
}
