//! Per-key request statistics.
//!
//! [`StatsTable`] is the plain data structure: it folds events into per-key
//! counters and evicts cold keys on [`StatsTable::sweep`]. [`Stats`] owns a
//! table behind a lock and runs the single consumer thread that drains the
//! shared event intake and sweeps on a ticker.
//!
//! Every key starts `Fresh`. Once its first measurement window has elapsed a
//! sweep computes a real rate and the key becomes `Tracked`; only tracked
//! keys are eligible for eviction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, tick, Receiver};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::error::Result;
use crate::models::domain::{Event, KeyStat};

/// Upper bound on how long the consumer waits before re-checking shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyState {
    /// First measurement window still open; never evicted.
    Fresh,
    Tracked,
}

#[derive(Debug)]
struct KeyEntry {
    state: KeyState,
    count: u64,
    size: u64,
    rate: f64,
    last_seen: Instant,
    window_start: Instant,
    window_count: u64,
}

impl KeyEntry {
    fn new(now: Instant) -> Self {
        KeyEntry {
            state: KeyState::Fresh,
            count: 0,
            size: 0,
            rate: 0.0,
            last_seen: now,
            window_start: now,
            window_count: 0,
        }
    }
}

#[derive(Debug)]
pub struct StatsTable {
    window: Duration,
    discard_threshold: f64,
    entries: HashMap<String, KeyEntry>,
}

impl StatsTable {
    pub fn new(window: Duration, discard_threshold: f64) -> Self {
        StatsTable {
            window,
            discard_threshold,
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn observe(&mut self, event: Event, now: Instant) {
        let window = self.window;
        let entry = self
            .entries
            .entry(event.key)
            .or_insert_with(|| KeyEntry::new(now));
        entry.count += 1;
        entry.window_count += 1;
        entry.size = event.size;
        entry.last_seen = entry.last_seen.max(now);
        if entry.state == KeyState::Fresh {
            entry.rate = entry.window_count as f64 / window.as_secs_f64();
        }
    }

    /// Closes every completed window and drops tracked keys whose rate is
    /// below the discard threshold. Returns the number of evicted keys.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let window = self.window;
        let threshold = self.discard_threshold;
        let before = self.entries.len();

        self.entries.retain(|_, entry| {
            let elapsed = now.saturating_duration_since(entry.window_start);
            if elapsed >= window {
                entry.rate = entry.window_count as f64 / elapsed.as_secs_f64();
                entry.window_count = 0;
                // advance by whole windows so late sweeps do not shift the grid
                let whole = (elapsed.as_nanos() / window.as_nanos()).min(u32::MAX as u128) as u32;
                entry.window_start += window * whole;
                entry.state = KeyState::Tracked;
            }
            entry.state == KeyState::Fresh || entry.rate >= threshold
        });

        before - self.entries.len()
    }

    /// Copies every entry, ordered by rate (highest first) then key.
    pub fn snapshot(&self, now: Instant) -> Vec<KeyStat> {
        let mut stats: Vec<KeyStat> = self
            .entries
            .iter()
            .map(|(key, entry)| KeyStat {
                key: key.clone(),
                count: entry.count,
                rate: entry.rate,
                size: entry.size,
                last_seen: now.saturating_duration_since(entry.last_seen),
            })
            .collect();
        stats.sort_by(|a, b| b.rate.total_cmp(&a.rate).then_with(|| a.key.cmp(&b.key)));
        stats
    }
}

/// The aggregator: single consumer of the event intake.
pub struct Stats {
    table: RwLock<StatsTable>,
    intake: Receiver<Event>,
    sweep_interval: Duration,
    received: AtomicU64,
    evicted: AtomicU64,
    shutdown: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Stats {
    pub fn new(config: &Config, intake: Receiver<Event>) -> Self {
        Stats {
            table: RwLock::new(StatsTable::new(
                config.stats_window,
                config.discard_threshold,
            )),
            intake,
            sweep_interval: config.sweep_interval,
            received: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    /// Spawns the consumer thread. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut handle = self.handle.lock();
        if handle.is_some() || self.is_shutdown() {
            return Ok(());
        }
        let stats = Arc::clone(self);
        *handle = Some(
            thread::Builder::new()
                .name("mckeys-stats".into())
                .spawn(move || stats.run())?,
        );
        Ok(())
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Stops the consumer thread and waits for it. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("stats thread panicked");
            }
        }
    }

    pub fn snapshot(&self) -> Vec<KeyStat> {
        self.table.read().snapshot(Instant::now())
    }

    /// Total events consumed from the intake.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::SeqCst)
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::SeqCst)
    }

    fn run(&self) {
        info!("stats aggregator started");
        let ticker = tick(self.sweep_interval);

        while !self.is_shutdown() {
            select! {
                recv(self.intake) -> msg => match msg {
                    Ok(event) => self.record(event),
                    // every producer is gone; only sweeps remain useful
                    Err(_) => thread::sleep(SHUTDOWN_POLL.min(self.sweep_interval)),
                },
                recv(ticker) -> _ => self.sweep(),
                default(SHUTDOWN_POLL) => {}
            }
        }

        for event in self.intake.try_iter() {
            self.record(event);
        }
        info!(received = self.received(), "stats aggregator stopped");
    }

    fn record(&self, event: Event) {
        trace!(key = %event.key, size = event.size, "stat");
        self.table.write().observe(event, Instant::now());
        self.received.fetch_add(1, Ordering::SeqCst);
    }

    fn sweep(&self) {
        let (evicted, remaining) = {
            let mut table = self.table.write();
            let evicted = table.sweep(Instant::now());
            (evicted, table.len())
        };
        if evicted > 0 {
            self.evicted.fetch_add(evicted as u64, Ordering::SeqCst);
            debug!(evicted, remaining, "discarded cold keys");
        }
    }
}
