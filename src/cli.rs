use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::{Config, ReportKind, DEFAULT_PORT, DEFAULT_REFRESH_MS};

/// Live memcache key analyzer.
#[derive(Parser, Debug)]
#[command(
    name = "mckeys",
    version,
    long_version = long_version(),
    about,
    override_usage = "mckeys -i NIC [options]"
)]
pub struct Cli {
    /// Discard keys where req/s rate is below THRESH
    #[arg(short, long, value_name = "THRESH", default_value_t = 0.0)]
    pub discard: f64,

    /// Network interface to capture traffic on (required)
    #[arg(short, long, value_name = "NIC")]
    pub interface: String,

    /// Network port to capture memcache traffic on
    #[arg(short, long, value_name = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Refresh the stats display every INTERVAL ms
    #[arg(short, long, value_name = "INTERVAL", default_value_t = DEFAULT_REFRESH_MS)]
    pub refresh: u64,

    /// Output logs to FILE
    #[arg(short, long, value_name = "FILE")]
    pub logfile: Option<PathBuf>,

    /// Output data in REPORT format
    #[arg(
        short = 'R',
        long,
        value_name = "REPORT",
        value_enum,
        ignore_case = true,
        default_value_t = ReportKind::Curses
    )]
    pub report: ReportKind,

    /// Increase verbosity. May be used multiple times.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        "\nPackage: ",
        env!("CARGO_PKG_NAME"),
        " ",
        env!("CARGO_PKG_VERSION"),
        "\nAuthor : ",
        env!("CARGO_PKG_AUTHORS"),
        "\nLicense: ",
        env!("CARGO_PKG_LICENSE")
    )
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Config {
            interface: cli.interface,
            port: cli.port,
            discard_threshold: cli.discard,
            refresh_interval: Duration::from_millis(cli.refresh),
            report: cli.report,
            logfile: cli.logfile,
            verbosity: cli.verbose,
            ..Config::default()
        }
    }
}
