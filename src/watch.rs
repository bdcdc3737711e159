//! Continuous folder watching
//!
//! `WatchDispatcher` is a two-state machine (stopped / watching). While
//! watching, filesystem notifications flow from a `notify` watcher into a
//! router task, which filters them down to stale convertible images and
//! submits conversion requests to a bounded worker pool. Stopping
//! unsubscribes and stops accepting notifications; queued and in-flight
//! conversions drain rather than being cancelled.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::{self, ConfigError, HandlerConfig, SharedConfig};
use crate::paths;
use crate::worker::{ConversionRequest, ConversionWorker};

/// Worker pool size while watching.
pub const DEFAULT_POOL_SIZE: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Watch is already running")]
    AlreadyWatching,

    #[error("Filesystem watch failed: {0}")]
    Notify(#[from] notify::Error),
}

/// Paths with a conversion currently queued or running. Guards against
/// bursts of notifications re-submitting the same file; the freshness
/// check still re-validates anything that slips past.
type InFlight = Arc<Mutex<HashSet<PathBuf>>>;

/// Dispatches filesystem change notifications onto the conversion pool.
pub struct WatchDispatcher {
    worker: Arc<ConversionWorker>,
    config: SharedConfig,
    pool_size: usize,
    session: Option<Session>,
}

/// Live resources of one watching session. Dropping the watcher is the
/// unsubscribe: it closes the event channel, which lets the router and
/// then the workers wind down in order.
struct Session {
    watcher: RecommendedWatcher,
    router: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl WatchDispatcher {
    pub fn new(worker: Arc<ConversionWorker>, config: SharedConfig) -> Self {
        WatchDispatcher {
            worker,
            config,
            pool_size: DEFAULT_POOL_SIZE,
            session: None,
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    pub fn is_watching(&self) -> bool {
        self.session.is_some()
    }

    /// Transition stopped -> watching.
    ///
    /// Subscribes to modify/create notifications under `root` (recursive
    /// per the config at start time) and spins up the worker pool.
    /// Settings changed while watching apply to subsequently dispatched
    /// requests; the recursive flag of the subscription itself is fixed
    /// until the next start.
    pub fn start(&mut self, root: &Path) -> Result<(), WatchError> {
        if self.session.is_some() {
            return Err(WatchError::AlreadyWatching);
        }
        config::validate_root(root)?;

        let recursive = config::snapshot(&self.config).recursive;
        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    let _ = event_tx.send(event);
                }
                Err(e) => error!("Watch error: {}", e),
            },
            notify::Config::default(),
        )?;
        watcher.watch(root, mode)?;

        let (submit_tx, submit_rx) = mpsc::unbounded_channel::<ConversionRequest>();
        let submit_rx = Arc::new(tokio::sync::Mutex::new(submit_rx));
        let in_flight: InFlight = Arc::new(Mutex::new(HashSet::new()));

        let workers = (0..self.pool_size)
            .map(|_| {
                let worker = Arc::clone(&self.worker);
                let submit_rx = Arc::clone(&submit_rx);
                let in_flight = Arc::clone(&in_flight);
                tokio::spawn(async move {
                    loop {
                        let request = { submit_rx.lock().await.recv().await };
                        let Some(request) = request else { break };

                        let source = request.source.clone();
                        let worker = Arc::clone(&worker);
                        if tokio::task::spawn_blocking(move || worker.convert_one(&request))
                            .await
                            .is_err()
                        {
                            error!("Conversion task panicked for {}", source.display());
                        }
                        lock_in_flight(&in_flight).remove(&source);
                    }
                })
            })
            .collect();

        let router_config = Arc::clone(&self.config);
        let router = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                route_event(&event, &router_config, &submit_tx, &in_flight);
            }
            // Event channel closed: the watcher was dropped. Dropping
            // submit_tx here lets the workers drain and exit.
        });

        info!(
            "Watching {} ({}, pool of {})",
            root.display(),
            if recursive { "recursive" } else { "top level only" },
            self.pool_size
        );
        self.session = Some(Session {
            watcher,
            router,
            workers,
        });
        Ok(())
    }

    /// Transition watching -> stopped. Unsubscribes, then waits for queued
    /// and in-flight conversions to drain. A no-op when already stopped.
    pub async fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        drop(session.watcher);
        if session.router.await.is_err() {
            error!("Watch router panicked");
        }
        for handle in session.workers {
            let _ = handle.await;
        }
        info!("Watch stopped");
    }
}

fn lock_in_flight(in_flight: &InFlight) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
    in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Filter one notification and submit whatever work it implies.
///
/// Settings are snapshotted per event, which is what makes config changes
/// take effect on the next dispatch rather than on in-flight work.
fn route_event(
    event: &Event,
    config: &SharedConfig,
    submit_tx: &UnboundedSender<ConversionRequest>,
    in_flight: &InFlight,
) {
    let created = matches!(event.kind, EventKind::Create(_));
    if !created && !matches!(event.kind, EventKind::Modify(_)) {
        return;
    }

    let snapshot = config::snapshot(config);
    for path in &event.paths {
        if path.is_dir() {
            if created && snapshot.recursive {
                rescan_subtree(path, &snapshot, submit_tx, in_flight);
            }
        } else {
            submit(path.clone(), &snapshot, submit_tx, in_flight);
        }
    }
}

/// Walk a newly created directory and submit every stale convertible file
/// in it. Freshness is re-validated per file, so already-converted files
/// in a moved-in directory are not resubmitted.
fn rescan_subtree(
    dir: &Path,
    config: &HandlerConfig,
    submit_tx: &UnboundedSender<ConversionRequest>,
    in_flight: &InFlight,
) {
    debug!("Rescanning new directory {}", dir.display());
    for entry in WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        submit(entry.into_path(), config, submit_tx, in_flight);
    }
}

/// Single submission site: extension filter, freshness check, dedup
/// against in-flight work, then hand off to the pool.
fn submit(
    source: PathBuf,
    config: &HandlerConfig,
    submit_tx: &UnboundedSender<ConversionRequest>,
    in_flight: &InFlight,
) {
    if !paths::is_convertible(&source) {
        return;
    }

    let request = ConversionRequest::new(source, config);
    if paths::is_fresh(&request.source, &request.dest) {
        return;
    }

    if !lock_in_flight(in_flight).insert(request.source.clone()) {
        debug!("Already queued: {}", request.source.display());
        return;
    }

    if submit_tx.send(request).is_err() {
        warn!("Worker pool is gone, dropping request");
    }
}
