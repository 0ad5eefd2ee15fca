use super::*;
use crate::config::SwarmConfig;
use crate::metainfo::TorrentMetadata;
use crate::peer::{Frame, Handshake, Message, PeerError, PeerTransport};
use crate::storage::{FileSink, MemorySink};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

const INFO_HASH: [u8; 20] = [0x5a; 20];
const PIECE_LENGTH: u64 = 32 * 1024;

fn test_data() -> Vec<u8> {
    // Four full pieces and a short fifth one.
    (0..4 * PIECE_LENGTH as usize + 5000)
        .map(|i| (i * 31 % 253) as u8)
        .collect()
}

fn metadata(data: &[u8]) -> Arc<TorrentMetadata> {
    Arc::new(TorrentMetadata::from_data(INFO_HASH, PIECE_LENGTH, data).unwrap())
}

fn test_config() -> SwarmConfig {
    SwarmConfig::default()
        .with_connect_timeout(Duration::from_secs(2))
        .with_idle_timeout(Duration::from_secs(5))
}

/// Listens on loopback and serves every request for the pieces in `have`.
async fn spawn_seeder(data: Arc<Vec<u8>>, meta: Arc<TorrentMetadata>, have: Vec<u32>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let data = data.clone();
            let meta = meta.clone();
            let have = have.clone();
            tokio::spawn(async move {
                let _ = seed(stream, &data, &meta, &have).await;
            });
        }
    });

    addr
}

async fn seed(
    stream: TcpStream,
    data: &[u8],
    meta: &TorrentMetadata,
    have: &[u32],
) -> Result<(), PeerError> {
    let mut transport = PeerTransport::new(stream);

    let Frame::Handshake(bytes) = transport.receive_frame().await? else {
        return Err(PeerError::InvalidHandshake);
    };
    let theirs = Handshake::decode(&bytes)?;
    transport
        .send_handshake(&Handshake::new(theirs.info_hash, *b"-SD0001-seeder000001"))
        .await?;

    let mut bitfield = vec![0u8; meta.piece_count().div_ceil(8)];
    for &piece in have {
        bitfield[piece as usize / 8] |= 0x80 >> (piece % 8);
    }
    transport
        .send_message(&Message::Bitfield(Bytes::from(bitfield)))
        .await?;
    transport.send_message(&Message::Unchoke).await?;

    loop {
        let Frame::Message(bytes) = transport.receive_frame().await? else {
            continue;
        };
        if let Message::Request {
            index,
            begin,
            length,
        } = Message::decode(bytes)?
        {
            let start = (meta.piece_offset(index) + begin as u64) as usize;
            let block = Bytes::copy_from_slice(&data[start..start + length as usize]);
            transport
                .send_message(&Message::Piece {
                    index,
                    begin,
                    data: block,
                })
                .await?;
        }
    }
}

/// An address nothing listens on.
async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

#[test]
fn test_endpoint_display() {
    assert_eq!(PeerEndpoint::new("10.0.0.7", 6881).to_string(), "10.0.0.7:6881");
    assert_eq!(PeerEndpoint::new("::1", 6881).to_string(), "[::1]:6881");

    let addr: SocketAddr = "[::1]:51413".parse().unwrap();
    let endpoint = PeerEndpoint::from(addr);
    assert_eq!(endpoint.host, "::1");
    assert_eq!(endpoint.to_string(), "[::1]:51413");
}

#[tokio::test]
async fn test_download_across_partial_seeders() {
    let data = Arc::new(test_data());
    let meta = metadata(&data);
    assert_eq!(meta.piece_count(), 5);

    let first = spawn_seeder(data.clone(), meta.clone(), vec![0, 1, 2]).await;
    let second = spawn_seeder(data.clone(), meta.clone(), vec![2, 3, 4]).await;

    let sink = Arc::new(MemorySink::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let swarm = Swarm::new(meta.clone(), sink.clone(), test_config()).on_progress(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let summary = swarm
        .download(vec![first.into(), second.into()])
        .await
        .unwrap();

    assert!(swarm.tracker().is_done());
    assert_eq!(sink.assemble(meta.total_length()), *data);
    assert_eq!(sink.writes().len(), 5);
    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.pieces_verified, 5);
    assert_eq!(summary.bytes_downloaded, data.len() as u64);
    // One call per block: two blocks per full piece, one for the tail.
    assert_eq!(calls.load(Ordering::SeqCst), 9);
}

#[tokio::test]
async fn test_unreachable_peer_is_routed_around() {
    let data = Arc::new(test_data());
    let meta = metadata(&data);

    let dead = closed_port().await;
    let seeder = spawn_seeder(data.clone(), meta.clone(), (0..5).collect()).await;

    let sink = Arc::new(MemorySink::new());
    let swarm = Swarm::new(meta.clone(), sink.clone(), test_config());
    let summary = swarm
        .download(vec![dead.into(), seeder.into(), seeder.into()])
        .await
        .unwrap();

    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(sink.assemble(meta.total_length()), *data);
}

#[tokio::test]
async fn test_waiting_endpoints_skipped_once_complete() {
    let data = Arc::new(test_data());
    let meta = metadata(&data);

    let mut peers = Vec::new();
    for _ in 0..3 {
        let addr = spawn_seeder(data.clone(), meta.clone(), (0..5).collect()).await;
        peers.push(PeerEndpoint::from(addr));
    }

    let swarm = Swarm::new(
        meta.clone(),
        Arc::new(MemorySink::new()),
        test_config().with_max_connections(1),
    );
    let summary = swarm.download(peers).await.unwrap();

    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.skipped, 2);
}

#[tokio::test]
async fn test_download_to_file() {
    let data = Arc::new(test_data());
    let meta = metadata(&data);
    let seeder = spawn_seeder(data.clone(), meta.clone(), (0..5).collect()).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("payload.bin");
    let sink = Arc::new(FileSink::create(&path, meta.total_length()).unwrap());

    let swarm = Swarm::new(meta.clone(), sink.clone(), test_config());
    swarm.download(vec![seeder.into()]).await.unwrap();
    sink.sync().unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), *data);
}

#[tokio::test]
async fn test_no_reachable_peers_stalls() {
    let data = test_data();
    let meta = metadata(&data);
    let dead = closed_port().await;

    let swarm = Swarm::new(meta, Arc::new(MemorySink::new()), test_config());

    match swarm.download(vec![dead.into()]).await {
        Err(SwarmError::DownloadStalled { percent_done }) => assert_eq!(percent_done, 0.0),
        other => panic!("expected a stall, got {:?}", other),
    }
    assert!(matches!(
        swarm.download(Vec::new()).await,
        Err(SwarmError::DownloadStalled { .. })
    ));
}

#[tokio::test]
async fn test_missing_pieces_stall_after_idle_timeout() {
    let data = Arc::new(test_data());
    let meta = metadata(&data);
    let seeder = spawn_seeder(data.clone(), meta.clone(), vec![0, 1]).await;

    let swarm = Swarm::new(
        meta.clone(),
        Arc::new(MemorySink::new()),
        test_config().with_idle_timeout(Duration::from_millis(300)),
    );

    match swarm.download(vec![seeder.into()]).await {
        Err(SwarmError::DownloadStalled { percent_done }) => {
            let expected = 2.0 * PIECE_LENGTH as f64 / data.len() as f64;
            assert!((percent_done - expected).abs() < 1e-9);
        }
        other => panic!("expected a stall, got {:?}", other),
    }
    assert_eq!(swarm.tracker().remaining_pieces(), 3);
}
