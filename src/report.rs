//! Periodic rendering of the key statistics.

use std::io::{self, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Local;
use crossbeam_channel::{bounded, select, tick, Sender};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::{Config, ReportKind};
use crate::error::Result;
use crate::models::domain::KeyStat;
use crate::stats::Stats;

/// Rows shown by the terminal view.
const TOP_ROWS: usize = 40;
const KEY_WIDTH: usize = 48;

/// A running reporter. The capture engine stops it during teardown.
pub trait Report: Send + Sync {
    fn shutdown(&self);
}

/// Turns one snapshot into output.
pub trait Render: Send {
    fn render(&mut self, stats: &[KeyStat], out: &mut dyn Write) -> io::Result<()>;
}

impl ReportKind {
    /// Starts the reporter for this kind, rendering to stdout.
    pub fn make_report(self, config: &Config, stats: Arc<Stats>) -> Result<Box<dyn Report>> {
        let out = Box::new(io::stdout());
        let report: Box<dyn Report> = match self {
            ReportKind::Csv => Box::new(TimedReport::start(
                CsvRender::default(),
                stats,
                out,
                config.refresh_interval,
            )?),
            ReportKind::Curses => Box::new(TimedReport::start(
                CursesRender::default(),
                stats,
                out,
                config.refresh_interval,
            )?),
        };
        info!(kind = %self, "report started");
        Ok(report)
    }
}

/// Renders a [`Stats`] snapshot on a timer thread.
pub struct TimedReport {
    stop: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimedReport {
    pub fn start<R>(
        mut render: R,
        stats: Arc<Stats>,
        mut out: Box<dyn Write + Send>,
        refresh: Duration,
    ) -> Result<Self>
    where
        R: Render + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("mckeys-report".into())
            .spawn(move || {
                let ticker = tick(refresh);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            let snapshot = stats.snapshot();
                            if let Err(e) = render
                                .render(&snapshot, out.as_mut())
                                .and_then(|_| out.flush())
                            {
                                warn!(error = %e, "report render failed");
                            }
                        },
                        recv(stop_rx) -> _ => break,
                    }
                }
            })?;

        Ok(TimedReport {
            stop: Mutex::new(Some(stop_tx)),
            handle: Mutex::new(Some(handle)),
        })
    }
}

impl Report for TimedReport {
    fn shutdown(&self) {
        // dropping the sender disconnects the timer thread's stop channel
        drop(self.stop.lock().take());
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("report thread panicked");
            }
        }
    }
}

impl Drop for TimedReport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Debug, Default)]
pub struct CsvRender {
    header_written: bool,
}

impl Render for CsvRender {
    fn render(&mut self, stats: &[KeyStat], out: &mut dyn Write) -> io::Result<()> {
        if !self.header_written {
            writeln!(out, "time,key,count,rate,size,bandwidth,last_seen_ms")?;
            self.header_written = true;
        }
        let now = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f");
        for stat in stats {
            writeln!(
                out,
                "{},{},{},{:.2},{},{:.2},{}",
                now,
                csv_field(&stat.key),
                stat.count,
                stat.rate,
                stat.size,
                stat.bandwidth(),
                stat.last_seen.as_millis()
            )?;
        }
        Ok(())
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Full-screen table, redrawn in place with ANSI escapes.
#[derive(Debug, Default)]
pub struct CursesRender;

impl Render for CursesRender {
    fn render(&mut self, stats: &[KeyStat], out: &mut dyn Write) -> io::Result<()> {
        write!(out, "\x1b[2J\x1b[H")?;
        writeln!(
            out,
            "mckeys [{}]  keys: {}",
            Local::now().format("%H:%M:%S"),
            stats.len()
        )?;
        writeln!(
            out,
            "{:<width$} | {:>10} | {:>10} | {:>10} | {:>12} | {:>10}",
            "key",
            "calls",
            "req/s",
            "size",
            "bw (kbps)",
            "last (s)",
            width = KEY_WIDTH
        )?;
        writeln!(out, "{}", "-".repeat(KEY_WIDTH + 68))?;

        for stat in stats.iter().take(TOP_ROWS) {
            writeln!(
                out,
                "{:<width$} | {:>10} | {:>10.2} | {:>10} | {:>12.2} | {:>10.1}",
                truncate(&stat.key, KEY_WIDTH),
                stat.count,
                stat.rate,
                stat.size,
                stat.bandwidth() * 8.0 / 1_000.0,
                stat.last_seen.as_secs_f64(),
                width = KEY_WIDTH
            )?;
        }
        Ok(())
    }
}

fn truncate(key: &str, width: usize) -> &str {
    match key.char_indices().nth(width) {
        Some((idx, _)) => &key[..idx],
        None => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::time::Instant;

    use crate::models::domain::Event;

    fn stat(key: &str, count: u64, rate: f64, size: u64) -> KeyStat {
        KeyStat {
            key: key.into(),
            count,
            rate,
            size,
            last_seen: Duration::from_millis(1_400),
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_csv_render() {
        let mut render = CsvRender::default();
        let mut out = Vec::new();
        render
            .render(&[stat("foo", 4, 2.0, 100), stat("a,b", 1, 0.5, 3)], &mut out)
            .unwrap();
        render.render(&[stat("foo", 5, 2.5, 100)], &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "time,key,count,rate,size,bandwidth,last_seen_ms");
        assert!(lines[1].ends_with(",foo,4,2.00,100,200.00,1400"));
        assert!(lines[2].ends_with(",\"a,b\",1,0.50,3,1.50,1400"));
        assert!(lines[3].ends_with(",foo,5,2.50,100,250.00,1400"));
    }

    #[test]
    fn test_curses_render_limits_rows() {
        let stats: Vec<KeyStat> = (0..100)
            .map(|i| stat(&format!("key{:03}", i), 1, 1.0, 1))
            .collect();
        let mut out = Vec::new();
        CursesRender.render(&stats, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("\x1b[2J\x1b[H"));
        assert!(text.contains("keys: 100"));
        assert!(text.contains("last (s)"));
        let first_row = text.lines().nth(3).unwrap();
        assert_eq!(first_row.rsplit('|').next().unwrap().trim(), "1.4");
        assert!(text.contains("key000"));
        assert!(text.contains("key039"));
        assert!(!text.contains("key040"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc");
    }

    #[test]
    fn test_timed_report_renders_until_shutdown() {
        let (tx, rx) = unbounded();
        let stats = Arc::new(Stats::new(&Config::default(), rx));
        stats.start().unwrap();
        tx.send(Event::new("foo", 3)).unwrap();

        let buf = SharedBuf::default();
        let report = TimedReport::start(
            CsvRender::default(),
            Arc::clone(&stats),
            Box::new(buf.clone()),
            Duration::from_millis(10),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !String::from_utf8_lossy(&buf.0.lock()).contains(",foo,")
            && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(5));
        }
        report.shutdown();
        stats.shutdown();

        let rendered = buf.0.lock().len();
        assert!(String::from_utf8_lossy(&buf.0.lock()).contains(",foo,1,"));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(buf.0.lock().len(), rendered);

        // second shutdown is a no-op
        report.shutdown();
    }
}
