use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwarmError {
    /// Every connection closed while pieces were still missing.
    #[error("download stalled with {percent_done:.3} of the torrent durable")]
    DownloadStalled { percent_done: f64 },
}
