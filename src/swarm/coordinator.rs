use super::endpoint::PeerEndpoint;
use super::error::SwarmError;
use crate::config::SwarmConfig;
use crate::metainfo::TorrentMetadata;
use crate::peer::{ConnectionStats, PeerConnection, PeerError, PeerId, ProgressFn};
use crate::piece::PieceTracker;
use crate::storage::PieceSink;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Totals over every connection of one download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwarmSummary {
    /// Endpoints actually dialed.
    pub attempted: usize,
    /// Connections that ran until the torrent completed.
    pub succeeded: usize,
    /// Dial failures plus connections closed by an error.
    pub failed: usize,
    /// Endpoints never dialed because the torrent was already complete.
    pub skipped: usize,
    pub bytes_downloaded: u64,
    pub pieces_verified: u32,
    pub pieces_corrupt: u32,
}

impl SwarmSummary {
    fn record(&mut self, outcome: PeerOutcome) {
        match outcome {
            PeerOutcome::Skipped => self.skipped += 1,
            PeerOutcome::Unreachable => {
                self.attempted += 1;
                self.failed += 1;
            }
            PeerOutcome::Finished { stats, result } => {
                self.attempted += 1;
                if result.is_ok() {
                    self.succeeded += 1;
                } else {
                    self.failed += 1;
                }
                self.bytes_downloaded += stats.bytes_downloaded;
                self.pieces_verified += stats.pieces_verified;
                self.pieces_corrupt += stats.pieces_corrupt;
            }
        }
    }
}

enum PeerOutcome {
    Skipped,
    Unreachable,
    Finished {
        stats: ConnectionStats,
        result: Result<(), PeerError>,
    },
}

/// Downloads one torrent from a set of peers.
///
/// # Examples
///
/// ```no_run
/// use swarmwire::swarm::{PeerEndpoint, Swarm};
/// use swarmwire::{FileSink, SwarmConfig, TorrentMetadata};
/// use std::sync::Arc;
///
/// # async fn example(meta: TorrentMetadata) -> Result<(), Box<dyn std::error::Error>> {
/// let sink = Arc::new(FileSink::create("downloads/file.bin", meta.total_length())?);
/// let swarm = Swarm::new(Arc::new(meta), sink, SwarmConfig::default())
///     .on_progress(|done| println!("{:.1}%", done * 100.0));
///
/// let summary = swarm
///     .download(vec![
///         PeerEndpoint::new("10.0.0.7", 6881),
///         PeerEndpoint::new("seed.example.org", 51413),
///     ])
///     .await?;
/// println!("{} bytes from {} peers", summary.bytes_downloaded, summary.succeeded);
/// # Ok(())
/// # }
/// ```
pub struct Swarm {
    tracker: Arc<PieceTracker>,
    peer_id: PeerId,
    config: SwarmConfig,
    progress: Option<ProgressFn>,
}

impl Swarm {
    /// A swarm writing verified pieces to `sink`, under a fresh local peer id.
    pub fn new(metadata: Arc<TorrentMetadata>, sink: Arc<dyn PieceSink>, config: SwarmConfig) -> Self {
        let tracker = Arc::new(PieceTracker::new(metadata, config.block_size, sink));
        Self {
            tracker,
            peer_id: PeerId::generate(),
            config,
            progress: None,
        }
    }

    pub fn with_peer_id(mut self, peer_id: PeerId) -> Self {
        self.peer_id = peer_id;
        self
    }

    /// Installs a progress hook, called with the durable fraction after
    /// every received block.
    pub fn on_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn tracker(&self) -> &Arc<PieceTracker> {
        &self.tracker
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    /// Runs one connection per endpoint until the torrent is complete.
    ///
    /// At most `max_connections` connections are open at once; the other
    /// endpoints wait for a slot and stand in for connections that fail.
    /// Duplicate endpoints are dialed once.
    pub async fn download(&self, peers: Vec<PeerEndpoint>) -> Result<SwarmSummary, SwarmError> {
        let meta = self.tracker.metadata();
        info!(
            info_hash = %meta.info_hash_hex(),
            pieces = meta.piece_count(),
            peers = peers.len(),
            "starting download"
        );

        let slots = Arc::new(Semaphore::new(self.config.max_connections.max(1)));
        let mut tasks = JoinSet::new();
        let mut seen = HashSet::new();

        for endpoint in peers {
            if !seen.insert(endpoint.clone()) {
                continue;
            }

            let slots = slots.clone();
            let tracker = self.tracker.clone();
            let config = self.config.clone();
            let progress = self.progress.clone();
            let peer_id = self.peer_id;

            tasks.spawn(async move {
                let Ok(_slot) = slots.acquire_owned().await else {
                    return PeerOutcome::Skipped;
                };
                if tracker.is_done() {
                    return PeerOutcome::Skipped;
                }
                run_peer(endpoint, tracker, peer_id, &config, progress).await
            });
        }

        let mut summary = SwarmSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    warn!(error = %e, "connection task failed");
                    summary.attempted += 1;
                    summary.failed += 1;
                }
            }
        }

        if self.tracker.is_done() {
            info!(
                bytes = summary.bytes_downloaded,
                connections = summary.attempted,
                "download complete"
            );
            Ok(summary)
        } else {
            let percent_done = self.tracker.percent_done();
            warn!(
                percent_done,
                remaining = self.tracker.remaining_pieces(),
                failed = summary.failed,
                "download stalled"
            );
            Err(SwarmError::DownloadStalled { percent_done })
        }
    }
}

async fn run_peer(
    endpoint: PeerEndpoint,
    tracker: Arc<PieceTracker>,
    peer_id: PeerId,
    config: &SwarmConfig,
    progress: Option<ProgressFn>,
) -> PeerOutcome {
    debug!(peer = %endpoint, "dialing");

    let dial = PeerConnection::connect(endpoint.to_string(), tracker.clone(), peer_id, config);
    let mut conn = tokio::select! {
        conn = dial => match conn {
            Ok(conn) => conn,
            Err(e) => {
                debug!(peer = %endpoint, error = %e, "dial failed");
                return PeerOutcome::Unreachable;
            }
        },
        // Some other connection finished the torrent while we were dialing.
        _ = tracker.wait_done() => return PeerOutcome::Skipped,
    };

    if let Some(progress) = progress {
        conn = conn.with_progress(progress);
    }

    let result = conn.run().await;
    if let Err(e) = &result {
        debug!(peer = %endpoint, error = %e, "connection failed");
    }

    PeerOutcome::Finished {
        stats: conn.stats().clone(),
        result,
    }
}
