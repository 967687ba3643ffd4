//! Runs the long-lived units of a node together: when any one exits, all the
//! others are told to stop and are awaited.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinSet;

pub type UnitError = Box<dyn std::error::Error + Send + Sync>;
pub type UnitResult = Result<(), UnitError>;

type UnitFuture = Pin<Box<dyn Future<Output = UnitResult> + Send>>;

/// Receiving side of a shutdown broadcast. Cheap to clone.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested (or the trigger was dropped).
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

#[derive(Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx: Arc::new(tx) }, Shutdown { rx })
}

pub struct Group {
    units: Vec<(String, UnitFuture)>,
    trigger: ShutdownTrigger,
    shutdown: Shutdown,
}

impl Default for Group {
    fn default() -> Self {
        Self::new()
    }
}

impl Group {
    pub fn new() -> Self {
        let (trigger, shutdown) = shutdown_channel();
        Group {
            units: Vec::new(),
            trigger,
            shutdown,
        }
    }

    pub fn add<F, Fut>(&mut self, name: impl Into<String>, unit: F)
    where
        F: FnOnce(Shutdown) -> Fut,
        Fut: Future<Output = UnitResult> + Send + 'static,
    {
        let future = unit(self.shutdown.clone());
        self.units.push((name.into(), Box::pin(future)));
    }

    /// Handle that stops the whole group from outside.
    pub fn trigger(&self) -> ShutdownTrigger {
        self.trigger.clone()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Run every unit until the first one returns, then stop the rest. The
    /// first unit's result is the group's result.
    pub async fn run(self) -> UnitResult {
        let mut set = JoinSet::new();
        for (name, future) in self.units {
            set.spawn(async move { (name, future.await) });
        }

        let Some(first) = set.join_next().await else {
            return Ok(());
        };
        self.trigger.trigger();

        let result = match first {
            Ok((name, result)) => {
                match &result {
                    Ok(()) => info!("{name} finished, stopping remaining units"),
                    Err(e) => warn!("{name} failed, stopping remaining units: {e}"),
                }
                result
            }
            Err(join_error) => {
                warn!("Unit panicked, stopping remaining units: {join_error}");
                Err(Box::new(join_error) as UnitError)
            }
        };

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => debug!("{name} stopped"),
                Ok((name, Err(e))) => warn!("{name} stopped with error: {e}"),
                Err(join_error) => warn!("Unit panicked during shutdown: {join_error}"),
            }
        }
        result
    }
}
