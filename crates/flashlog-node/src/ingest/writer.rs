//! Fast-write listener: raw newline-delimited records over TCP.
//!
//! Each connection owns its own active segment, so records from one producer
//! are never interleaved with another's. A segment is flushed when it reaches
//! the size threshold or its age threshold, whichever comes first, and when
//! the connection ends. An unterminated trailing record is discarded, and so
//! is any record longer than the configured maximum.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use flashlog::{ActiveSegment, IngestLog, NodeStats, RecordIdGenerator, Shutdown};
use log::{debug, error, info, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::NodeError;

#[derive(Debug, Clone, Copy)]
pub struct WriterConfig {
    pub flush_size: u64,
    pub flush_age: Duration,
    /// Payload bytes allowed per record; longer lines are dropped.
    pub max_record_size: usize,
}

pub struct IngestWriter {
    log: Arc<IngestLog>,
    ids: Arc<RecordIdGenerator>,
    stats: Arc<NodeStats>,
    config: WriterConfig,
}

impl IngestWriter {
    pub fn new(
        log: Arc<IngestLog>,
        ids: Arc<RecordIdGenerator>,
        stats: Arc<NodeStats>,
        config: WriterConfig,
    ) -> Self {
        Self {
            log,
            ids,
            stats,
            config,
        }
    }

    /// Accept producer connections until shutdown, then wait for every
    /// connection to flush what it has.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: Shutdown,
    ) -> Result<(), NodeError> {
        if let Ok(addr) = listener.local_addr() {
            info!("Fast-write listener on {addr}");
        }
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let writer = Arc::clone(&self);
                        let shutdown = shutdown.clone();
                        connections.spawn(async move {
                            writer.stats.client_connected();
                            if let Err(e) = writer.handle_connection(stream, peer, shutdown).await {
                                error!("Connection from {peer} failed: {e}");
                            }
                            writer.stats.client_disconnected();
                        });
                    }
                    Err(e) => warn!("Accept failed: {e}"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
        while connections.join_next().await.is_some() {}
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, stream, shutdown), fields(peer = %peer))]
    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: Shutdown,
    ) -> Result<(), NodeError> {
        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();
        let mut oversized: Option<usize> = None;
        let mut active: Option<ActiveSegment> = None;

        loop {
            let deadline = active
                .as_ref()
                .map(|segment| Instant::from_std(segment.opened_at()) + self.config.flush_age);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep_until(deadline), if deadline.is_some() => {
                    if let Some(segment) = active.take() {
                        self.flush(segment)?;
                    }
                }
                read = read_line_step(&mut reader, &mut line, &mut oversized, self.config.max_record_size) => {
                    match read {
                        Ok(LineStep::Eof) => break,
                        Ok(LineStep::Dropped(len)) => {
                            warn!(
                                "Dropped a {len} byte record from {peer}, limit is {} bytes",
                                self.config.max_record_size
                            );
                        }
                        Ok(LineStep::Line) => {
                            let payload = &line[..line.len() - 1];
                            if !payload.is_empty() {
                                if active.is_none() {
                                    active = Some(self.log.create_segment()?);
                                }
                                if let Some(segment) = active.as_mut() {
                                    let written = segment.append(self.ids.next_id(), payload)?;
                                    self.stats.record_written(written);
                                }
                            }
                            line.clear();
                            if active.as_ref().is_some_and(|s| s.size() >= self.config.flush_size) {
                                if let Some(segment) = active.take() {
                                    self.flush(segment)?;
                                }
                            }
                        }
                        Ok(LineStep::Partial) => {}
                        Err(e) => {
                            warn!("Read from {peer} failed: {e}");
                            break;
                        }
                    }
                }
            }
        }

        let incomplete = line.len() + oversized.unwrap_or(0);
        if incomplete > 0 {
            debug!("Discarding {incomplete} bytes of incomplete record from {peer}");
        }
        if let Some(segment) = active.take() {
            self.flush(segment)?;
        }
        Ok(())
    }

    fn flush(&self, segment: ActiveSegment) -> Result<(), NodeError> {
        let records = segment.record_count();
        if let Some(info) = self.log.flush_segment(segment)? {
            self.stats.segment_flushed(info.size);
            debug!("Flushed segment {} ({records} records, {} bytes)", info.id, info.size);
        }
        Ok(())
    }
}

enum LineStep {
    Eof,
    /// `line` holds a complete record including its newline.
    Line,
    /// A record over the size limit ended; its bytes were thrown away.
    Dropped(usize),
    Partial,
}

/// Consume at most one buffer's worth of input toward the next newline.
///
/// Safe to cancel between calls: progress lives in `line`, and in `oversized`
/// once the record has outgrown `max_payload` and is being skipped.
async fn read_line_step<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    line: &mut Vec<u8>,
    oversized: &mut Option<usize>,
    max_payload: usize,
) -> std::io::Result<LineStep> {
    let available = reader.fill_buf().await?;
    if available.is_empty() {
        return Ok(LineStep::Eof);
    }
    let (chunk, complete) = match available.iter().position(|b| *b == b'\n') {
        Some(end) => (&available[..=end], true),
        None => (available, false),
    };
    let used = chunk.len();
    let payload_len = line.len() + used - usize::from(complete);

    let step = if let Some(skipped) = *oversized {
        let skipped = skipped + used;
        if complete {
            *oversized = None;
            LineStep::Dropped(skipped)
        } else {
            *oversized = Some(skipped);
            LineStep::Partial
        }
    } else if payload_len > max_payload {
        let skipped = line.len() + used;
        line.clear();
        if complete {
            LineStep::Dropped(skipped)
        } else {
            *oversized = Some(skipped);
            LineStep::Partial
        }
    } else {
        line.extend_from_slice(chunk);
        if complete {
            LineStep::Line
        } else {
            LineStep::Partial
        }
    };
    reader.consume(used);
    Ok(step)
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
