//! Process wiring: every long-running part of a node is a unit of one
//! [`Group`], so the first unit to exit stops the whole node.

use std::sync::Arc;
use std::time::Duration;

use flashlog::group::UnitResult;
use flashlog::{
    Compactor, CompactorConfig, Group, IngestConfig, IngestLog, NodeStats, RecordIdGenerator,
    Shutdown, StoreConfig, StoreLog,
};
use flashlog_cluster::{Membership, Role};
use log::{info, warn};
use tokio::net::TcpListener;

use crate::error::NodeError;
use crate::ingest::{self, IngestNode, IngestWriter, WriterConfig};
use crate::store::{self, Consumer, ConsumerConfig, StoreNode};
use crate::transport::{HttpPeerTransport, PeerTransport};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

async fn bind(addr: std::net::SocketAddr, what: &str) -> Result<TcpListener, NodeError> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| NodeError::from_io_error(e, &format!("bind {what} on {addr}")))
}

/// Add the gossip server, the prober and the departure announcement.
fn add_gossip_units(group: &mut Group, membership: &Arc<Membership>, listener: TcpListener) {
    let server = Arc::clone(membership);
    group.add("gossip-server", move |shutdown| async move {
        server.serve(listener, shutdown).await.map_err(Into::into)
    });

    let prober = Arc::clone(membership);
    group.add("gossip-prober", move |shutdown| async move {
        prober.probe_loop(shutdown).await.map_err(Into::into)
    });

    let leaver = Arc::clone(membership);
    group.add("gossip-leave", move |shutdown: Shutdown| async move {
        shutdown.cancelled().await;
        leaver.leave().await;
        Ok(())
    });
}

fn add_api_unit(group: &mut Group, listener: TcpListener, router: axum::Router) {
    group.add("api", move |shutdown: Shutdown| async move {
        if let Ok(addr) = listener.local_addr() {
            info!("HTTP API listening on http://{addr}");
        }
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| NodeError::from_io_error(e, "http api"))?;
        Ok(())
    });
}

fn add_signal_unit(group: &mut Group) {
    group.add("signals", |shutdown: Shutdown| async move {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            received = tokio::signal::ctrl_c() => {
                match received {
                    Ok(()) => info!("Interrupt received, shutting down"),
                    Err(e) => warn!("Could not listen for interrupts: {e}"),
                }
            }
        }
        Ok(())
    });
}

/// Run an ingest node until interrupted or until one of its units fails.
pub async fn run_ingest(config: IngestConfig) -> UnitResult {
    config.validate().map_err(NodeError::from)?;
    let stats = Arc::new(NodeStats::new());
    let log = Arc::new(
        IngestLog::open(
            &config.data_dir,
            config.segment_pending_timeout,
            config.sync_mode,
        )
        .map_err(NodeError::from)?
        .with_stats(Arc::clone(&stats)),
    );

    let api_listener = bind(config.api_addr, "ingest api").await?;
    let fast_listener = bind(config.fast_addr, "fast-write listener").await?;
    let api_addr = api_listener
        .local_addr()
        .map_err(|e| NodeError::from_io_error(e, "ingest api address"))?;
    let (membership, gossip_listener) =
        Membership::bind(Role::Ingest, api_addr, config.gossip.clone())
            .await
            .map_err(NodeError::from)?;

    let mut group = Group::new();
    add_gossip_units(&mut group, &membership, gossip_listener);

    let writer = Arc::new(IngestWriter::new(
        Arc::clone(&log),
        Arc::new(RecordIdGenerator::new()),
        Arc::clone(&stats),
        WriterConfig {
            flush_size: config.segment_flush_size,
            flush_age: config.segment_flush_age,
            max_record_size: config.max_record_size,
        },
    ));
    group.add("fast-writer", move |shutdown| async move {
        writer.serve(fast_listener, shutdown).await.map_err(Into::into)
    });

    let router = ingest::create_router(Arc::new(IngestNode {
        log: Arc::clone(&log),
        stats: Arc::clone(&stats),
        membership: membership.clone(),
    }));
    add_api_unit(&mut group, api_listener, router);

    let sweep_every = (config.segment_pending_timeout / 4).max(MIN_SWEEP_INTERVAL);
    group.add("lease-sweeper", move |shutdown: Shutdown| async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match log.fail_expired() {
                Ok(failed) if failed.is_empty() => {}
                Ok(failed) => warn!("Reclaimed {} segments whose lease expired", failed.len()),
                Err(e) => warn!("Lease sweep failed: {e}"),
            }
        }
        Ok(())
    });

    add_signal_unit(&mut group);
    info!("Ingest node {} starting", membership.local_id());
    group.run().await
}

/// Run a store node until interrupted or until one of its units fails.
pub async fn run_store(config: StoreConfig) -> UnitResult {
    config.validate().map_err(NodeError::from)?;
    let stats = Arc::new(NodeStats::new());
    let store_log = Arc::new(StoreLog::open(&config.data_dir).map_err(NodeError::from)?);
    let transport: Arc<dyn PeerTransport> =
        Arc::new(HttpPeerTransport::new(config.replication_timeout, config.query_timeout)?);

    let api_listener = bind(config.api_addr, "store api").await?;
    let api_addr = api_listener
        .local_addr()
        .map_err(|e| NodeError::from_io_error(e, "store api address"))?;
    let (membership, gossip_listener) =
        Membership::bind(Role::Store, api_addr, config.gossip.clone())
            .await
            .map_err(NodeError::from)?;

    let mut group = Group::new();
    add_gossip_units(&mut group, &membership, gossip_listener);

    let consumer_config = ConsumerConfig {
        target_size: config.segment_target_size,
        target_age: config.segment_target_age,
        replication_factor: config.segment_replication_factor,
        idle_backoff: config.idle_backoff,
    };
    for worker in 0..config.segment_consumers {
        let consumer = Consumer::new(
            worker,
            Arc::clone(&transport),
            membership.clone(),
            Arc::clone(&stats),
            consumer_config,
        );
        group.add(format!("consumer-{worker}"), move |shutdown| async move {
            consumer.run(shutdown).await.map_err(Into::into)
        });
    }

    let compactor = Arc::new(Compactor::new(
        Arc::clone(&store_log),
        CompactorConfig {
            segment_target_size: config.segment_target_size,
            segment_retain: config.segment_retain,
            segment_purge: config.segment_purge,
            compact_interval: config.compact_interval,
        },
        Arc::clone(&stats),
    ));
    group.add("compactor", move |shutdown| async move {
        compactor.run(shutdown).await.map_err(Into::into)
    });

    let router = store::create_router(Arc::new(StoreNode {
        store: store_log,
        stats,
        membership: membership.clone(),
        transport,
    }));
    add_api_unit(&mut group, api_listener, router);

    add_signal_unit(&mut group);
    info!("Store node {} starting", membership.local_id());
    group.run().await
}
