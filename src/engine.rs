//! The capture engine: shards frames across a fixed worker pool, turns
//! memcache responses into [`Event`]s and feeds them to the stats
//! aggregator.
//!
//! ```text
//!   FrameSource ──enqueue──▶ shard[id % N] ──▶ worker N ──┐
//!                                                        ├──▶ Intake (one lock) ──▶ Stats ──▶ Report
//!                            shard[...]    ──▶ worker .. ──┘
//! ```
//!
//! Workers poll their shard without blocking and sleep on a per-worker
//! [`Backoff`] when it is empty. Shutdown is cooperative: the flag is checked
//! once per loop iteration, so a worker finishes the frame it holds before it
//! exits.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, Level};

use crate::backoff::Backoff;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::domain::{Event, Frame};
use crate::parser::Command;
use crate::report::Report;
use crate::stats::Stats;

/// Frames between debug summaries.
const SUMMARY_EVERY: u64 = 10_000;

/// Whether the frame bringing the engine total to `processed` triggers a
/// debug summary. Exactly one worker sees each multiple.
fn should_summarize(processed: u64) -> bool {
    processed != 0 && processed % SUMMARY_EVERY == 0
}

/// Shard owning frame `id` in a pool of `shards` workers.
pub fn shard_for(id: u64, shards: usize) -> usize {
    (id % shards as u64) as usize
}

/// The single hand-off point from workers to the aggregator.
///
/// Closing it drops the sender, after which submissions are refused.
pub struct Intake {
    tx: Mutex<Option<Sender<Event>>>,
}

impl Intake {
    pub fn new(tx: Sender<Event>) -> Self {
        Intake {
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Returns false when the intake is closed.
    pub fn submit(&self, event: Event) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn close(&self) {
        self.tx.lock().take();
    }
}

/// Engine-wide counters, updated by every worker.
#[derive(Debug, Default)]
pub struct Counters {
    processed: AtomicU64,
    responses: AtomicU64,
    submitted: AtomicU64,
}

impl Counters {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn responses(&self) -> u64 {
        self.responses.load(Ordering::SeqCst)
    }

    /// Events accepted by the intake.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::SeqCst)
    }
}

/// State shared by all workers.
struct Shared {
    config: Arc<Config>,
    local_address: Option<IpAddr>,
    shutdown: AtomicBool,
    intake: Intake,
    counters: Counters,
    per_shard: Vec<AtomicU64>,
}

pub struct CaptureEngine {
    shared: Arc<Shared>,
    shards: Vec<Sender<Frame>>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<Stats>,
    report: Box<dyn Report>,
}

impl CaptureEngine {
    /// Starts the aggregator, the reporter built by `make_report`, and one
    /// worker per shard.
    pub fn new<F>(config: Arc<Config>, local_address: Option<IpAddr>, make_report: F) -> Result<Self>
    where
        F: FnOnce(&Config, Arc<Stats>) -> Result<Box<dyn Report>>,
    {
        config.validate()?;

        let (event_tx, event_rx) = unbounded();
        let stats = Arc::new(Stats::new(&config, event_rx));
        let report = make_report(&config, Arc::clone(&stats))?;

        let workers_count = config.workers;
        let shared = Arc::new(Shared {
            config,
            local_address,
            shutdown: AtomicBool::new(false),
            intake: Intake::new(event_tx),
            counters: Counters::default(),
            per_shard: (0..workers_count).map(|_| AtomicU64::new(0)).collect(),
        });

        let mut engine = CaptureEngine {
            shared,
            shards: Vec::with_capacity(workers_count),
            workers: Vec::with_capacity(workers_count),
            stats,
            report,
        };

        // On any failure below, dropping `engine` shuts down and joins
        // whatever was already started.
        for worker_id in 0..workers_count {
            let (tx, rx) = unbounded();
            let shared = Arc::clone(&engine.shared);
            let handle = thread::Builder::new()
                .name(format!("mckeys-worker-{}", worker_id))
                .spawn(move || process_frames(worker_id, rx, shared))?;
            engine.shards.push(tx);
            engine.workers.push(handle);
        }
        engine.stats.start()?;

        Ok(engine)
    }

    pub fn workers(&self) -> usize {
        self.shards.len()
    }

    /// Routes `frame` to shard `frame.id % workers`.
    pub fn enqueue(&self, frame: Frame) -> Result<()> {
        if self.is_shutdown() {
            return Err(Error::ShutDown);
        }
        trace!(id = frame.id, "produced frame");
        let shard = shard_for(frame.id, self.shards.len());
        self.shards[shard].send(frame).map_err(|_| Error::ShutDown)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    /// Requests shutdown of workers, aggregator and reporter. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.intake.close();
        self.stats.shutdown();
        self.report.shutdown();
        info!("capture engine shutdown requested");
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    pub fn counters(&self) -> &Counters {
        &self.shared.counters
    }

    /// Frames processed by each shard's worker.
    pub fn processed_by_shard(&self) -> Vec<u64> {
        self.shared
            .per_shard
            .iter()
            .map(|c| c.load(Ordering::SeqCst))
            .collect()
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        if self.is_shutdown() {
            info!("capture engine successfully shut down");
        } else {
            error!("capture engine not successfully shut down, shutting down now");
            self.shutdown();
        }
        // No join timeout: a stuck worker blocks teardown.
        for (worker_id, handle) in self.workers.drain(..).enumerate() {
            if handle.join().is_err() {
                error!(worker = worker_id, "worker thread panicked");
            } else {
                info!(worker = worker_id, "worker thread dead");
            }
        }
    }
}

fn process_frames(worker_id: usize, queue: Receiver<Frame>, shared: Arc<Shared>) {
    let mut backoff = Backoff::new(shared.config.backoff.clone());
    let port = shared.config.port;
    let debug_enabled = tracing::enabled!(Level::DEBUG);

    info!(worker = worker_id, "worker starting capture processing");

    while !shared.shutdown.load(Ordering::SeqCst) {
        let frame = match queue.try_recv() {
            Ok(frame) => frame,
            Err(TryRecvError::Empty) => {
                let wait = backoff.next();
                trace!(worker = worker_id, ?wait, "no frame to consume");
                thread::sleep(wait);
                continue;
            }
            Err(TryRecvError::Disconnected) => break,
        };
        backoff.reset();
        shared.per_shard[worker_id].fetch_add(1, Ordering::SeqCst);
        trace!(worker = worker_id, id = frame.id, "consumed frame");

        let command = Command::create(&frame, shared.local_address, port);
        if let Some(event) = command.to_event() {
            shared.counters.responses.fetch_add(1, Ordering::SeqCst);
            trace!(worker = worker_id, id = frame.id, key = %event.key, "memcache response");
            if shared.intake.submit(event) {
                shared.counters.submitted.fetch_add(1, Ordering::SeqCst);
            }
        }

        let processed = shared.counters.processed.fetch_add(1, Ordering::SeqCst) + 1;
        if debug_enabled && should_summarize(processed) {
            let latency_ms = (Utc::now().timestamp_millis() as u64).saturating_sub(frame.timestamp);
            debug!(
                processed,
                responses = shared.counters.responses(),
                latency_ms,
                "capture summary"
            );
        }
    }

    info!(worker = worker_id, "worker stopped processing frames");
}
