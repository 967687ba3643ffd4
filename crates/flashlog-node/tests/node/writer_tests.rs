use std::sync::Arc;
use std::time::Duration;

use flashlog::config::DEFAULT_MAX_RECORD_SIZE;
use flashlog::group::shutdown_channel;
use flashlog::{IngestLog, NodeStats, RecordIdGenerator, SyncMode};
use flashlog_node::ingest::{IngestWriter, WriterConfig};
use test_log::test;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use crate::test_utilities::{body_payloads, create_test_dir, eventually};

struct TestWriter {
    addr: String,
    log: Arc<IngestLog>,
    stats: Arc<NodeStats>,
    _dir: tempfile::TempDir,
}

async fn start_writer(flush_size: u64, flush_age: Duration) -> TestWriter {
    start_writer_with(WriterConfig {
        flush_size,
        flush_age,
        max_record_size: DEFAULT_MAX_RECORD_SIZE,
    })
    .await
}

async fn start_writer_with(config: WriterConfig) -> TestWriter {
    let dir = create_test_dir("writer");
    let log = Arc::new(
        IngestLog::open(dir.path(), Duration::from_secs(60), SyncMode::OnFlush).unwrap(),
    );
    let stats = Arc::new(NodeStats::new());
    let writer = Arc::new(IngestWriter::new(
        Arc::clone(&log),
        Arc::new(RecordIdGenerator::new()),
        Arc::clone(&stats),
        config,
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        let _ = writer.serve(listener, shutdown).await;
        drop(trigger);
    });
    TestWriter {
        addr,
        log,
        stats,
        _dir: dir,
    }
}

fn flushed_payloads(log: &IngestLog) -> Vec<Vec<String>> {
    log.list_flushed()
        .unwrap()
        .into_iter()
        .map(|info| {
            let lease = log.claim(info.id).unwrap();
            let body = log.read(lease.lease_id).unwrap();
            log.release(lease.lease_id).unwrap();
            body_payloads(&body)
        })
        .collect()
}

#[test(tokio::test)]
async fn test_records_past_flush_age_land_in_one_segment() {
    let writer = start_writer(1024 * 1024, Duration::from_millis(200)).await;
    let mut stream = TcpStream::connect(&writer.addr).await.unwrap();
    stream.write_all(b"first\nsecond\n").await.unwrap();
    stream.write_all(b"third\n").await.unwrap();

    // the connection stays open; only the age trigger can flush
    let log = Arc::clone(&writer.log);
    assert!(eventually(Duration::from_secs(3), || log.list_flushed().unwrap().len() == 1).await);

    let segments = flushed_payloads(&writer.log);
    assert_eq!(segments, vec![vec!["first", "second", "third"]]);
    assert_eq!(writer.stats.snapshot().written_records, 3);
    drop(stream);
}

#[test(tokio::test)]
async fn test_incomplete_trailing_record_is_discarded() {
    let writer = start_writer(1024 * 1024, Duration::from_secs(30)).await;
    let mut stream = TcpStream::connect(&writer.addr).await.unwrap();
    stream.write_all(b"one\n\ntwo\npart").await.unwrap();
    stream.shutdown().await.unwrap();
    drop(stream);

    let log = Arc::clone(&writer.log);
    assert!(eventually(Duration::from_secs(3), || log.list_flushed().unwrap().len() == 1).await);
    assert_eq!(flushed_payloads(&writer.log), vec![vec!["one", "two"]]);
}

#[test(tokio::test)]
async fn test_size_threshold_rotates_segments() {
    // each record is 32 id chars, a space, 20 payload bytes and a newline
    let writer = start_writer(100, Duration::from_secs(30)).await;
    let mut stream = TcpStream::connect(&writer.addr).await.unwrap();
    for i in 0..5 {
        stream
            .write_all(format!("record-{i:02}-xxxxxxxxxx\n").as_bytes())
            .await
            .unwrap();
    }
    stream.shutdown().await.unwrap();
    drop(stream);

    let log = Arc::clone(&writer.log);
    assert!(eventually(Duration::from_secs(3), || log.list_flushed().unwrap().len() == 3).await);
    let segments = flushed_payloads(&writer.log);
    let sizes: Vec<usize> = segments.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    let all: Vec<String> = segments.into_iter().flatten().collect();
    assert_eq!(all[0], "record-00-xxxxxxxxxx");
    assert_eq!(all[4], "record-04-xxxxxxxxxx");
}

#[test(tokio::test)]
async fn test_connections_get_separate_segments() {
    let writer = start_writer(1024 * 1024, Duration::from_secs(30)).await;
    let mut a = TcpStream::connect(&writer.addr).await.unwrap();
    let mut b = TcpStream::connect(&writer.addr).await.unwrap();
    a.write_all(b"a1\n").await.unwrap();
    b.write_all(b"b1\n").await.unwrap();
    a.write_all(b"a2\n").await.unwrap();
    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
    drop((a, b));

    let log = Arc::clone(&writer.log);
    assert!(eventually(Duration::from_secs(3), || log.list_flushed().unwrap().len() == 2).await);
    let mut segments = flushed_payloads(&writer.log);
    segments.sort();
    assert_eq!(segments, vec![vec!["a1", "a2"], vec!["b1"]]);
}

#[test(tokio::test)]
async fn test_oversized_record_is_dropped_and_stream_continues() {
    let writer = start_writer_with(WriterConfig {
        flush_size: 1024 * 1024,
        flush_age: Duration::from_secs(30),
        max_record_size: 64,
    })
    .await;
    let mut stream = TcpStream::connect(&writer.addr).await.unwrap();
    stream.write_all(b"before\n").await.unwrap();
    stream.write_all(&vec![b'x'; 256 * 1024]).await.unwrap();
    stream.write_all(b"\nafter\n").await.unwrap();
    stream.shutdown().await.unwrap();
    drop(stream);

    let log = Arc::clone(&writer.log);
    assert!(eventually(Duration::from_secs(3), || log.list_flushed().unwrap().len() == 1).await);
    assert_eq!(flushed_payloads(&writer.log), vec![vec!["before", "after"]]);
    assert_eq!(writer.stats.snapshot().written_records, 2);
}
