//! nscan — stateless TCP SYN scanner.
//!
//! Usage:
//!   nscan <IFACE> <BEGIN_IP> <END_IP> <PORT> <RESULTS_FILE> [--pacing <PRESET>] [--rate <PPS>]
//!         [--output pretty|json] [--quiet]

use clap::Parser;
use nscan::cli::{self, Cli, OutputFmt};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialise logging (RUST_LOG=debug etc.)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli::run_scan(&cli).await {
        Ok(summary) => {
            match cli.output {
                OutputFmt::Pretty => print!("{}", cli::format_pretty(&summary)),
                OutputFmt::Json => println!("{}", cli::format_json(&summary)),
            }
            if summary.has_error() {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Scan failed: {e}");
            std::process::exit(1);
        }
    }
}
