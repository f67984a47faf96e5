use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, EnvFilter};

use mckeys::cli::Cli;
use mckeys::config::Config;
use mckeys::engine::CaptureEngine;
use mckeys::sniff::{FrameSource, PcapSource};

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    let config = Config::from(cli);
    if let Err(e) = init_logging(&config) {
        eprintln!("mckeys: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(Arc::new(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("mckeys: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &Config) -> Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) => EnvFilter::try_new(&directives)
            .with_context(|| format!("invalid RUST_LOG: {}", directives))?,
        Err(_) => EnvFilter::new(config.log_level()),
    };

    let builder = fmt().with_env_filter(filter).with_target(true);
    match &config.logfile {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening logfile {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(BoxMakeWriter::new(std::sync::Mutex::new(file)))
                .init();
        }
        None => builder.with_writer(BoxMakeWriter::new(std::io::stderr)).init(),
    }
    Ok(())
}

fn run(config: Arc<Config>) -> Result<()> {
    config.validate().context("validating configuration")?;

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
    })
    .context("installing signal handler")?;

    let mut source = PcapSource::open(&config.interface, config.port)
        .with_context(|| format!("opening capture on {}", config.interface))?;
    let local_address = source.local_address();

    let report_kind = config.report;
    let engine = CaptureEngine::new(Arc::clone(&config), local_address, |cfg, stats| {
        report_kind.make_report(cfg, stats)
    })
    .context("starting capture engine")?;

    tracing::info!(
        interface = %config.interface,
        port = config.port,
        workers = engine.workers(),
        report = %config.report,
        "mckeys running"
    );

    let mut result = Ok(());
    while running.load(Ordering::SeqCst) {
        match source.next_frame() {
            Ok(Some(frame)) => {
                if let Err(e) = engine.enqueue(frame) {
                    result = Err(e).context("enqueueing frame");
                    break;
                }
            }
            Ok(None) => continue,
            Err(e) => {
                result = Err(e).context("reading from capture");
                break;
            }
        }
    }

    engine.shutdown();
    tracing::info!(
        processed = engine.counters().processed(),
        responses = engine.counters().responses(),
        keys = engine.stats().snapshot().len(),
        evicted = engine.stats().evicted(),
        "capture stopped"
    );
    drop(engine);
    result
}
