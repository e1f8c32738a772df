//! CLI entrypoint for nscan.
//!
//! Parses arguments, resolves the source address of the chosen interface,
//! opens the raw sockets and the results file, runs the scan and prints
//! progress lines while it goes.

pub mod output;

use std::ffi::CStr;
use std::io;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::engine::ScannerContext;
use crate::scanner::pacing::{Pacing, PacingProfile};
use crate::scanner::syn_sender::ScanError;
use crate::{AddressRange, ScanConfig, ScanSummary};

pub use output::{format_json, format_pretty};

// ─────────────────────────────────────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────────────────────────────────────

/// nscan — fast stateless TCP SYN scanner for IPv4 address ranges.
#[derive(Parser, Debug)]
#[command(name = "nscan", version, about)]
#[command(
    long_about = "nscan sends one forged TCP SYN to every address of an inclusive IPv4 \
    range and records each host that answers with SYN-ACK on the probed port, one address \
    per line. No connection state is kept. Requires CAP_NET_RAW (sudo) on Linux."
)]
pub struct Cli {
    /// Source network interface
    pub iface: String,

    /// Address range begin
    pub begin_ip: Ipv4Addr,

    /// Address range end (inclusive)
    pub end_ip: Ipv4Addr,

    /// Destination port number
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,

    /// Responsive peers list (created or truncated)
    pub results_file: PathBuf,

    /// Pacing preset
    #[arg(long, default_value = "normal", value_enum)]
    pub pacing: PacingArg,

    /// Probe rate in packets per second (overrides --pacing)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub rate: Option<u32>,

    /// Source address (skips the interface lookup)
    #[arg(long)]
    pub source_ip: Option<Ipv4Addr>,

    /// Source port (random ephemeral port if omitted)
    #[arg(long)]
    pub source_port: Option<u16>,

    /// Receive poll timeout in milliseconds
    #[arg(long, default_value = "200")]
    pub recv_timeout: u64,

    /// Time to keep collecting replies after the last probe, in milliseconds
    #[arg(long, default_value = "2000")]
    pub drain: u64,

    /// Output format
    #[arg(long, default_value = "pretty", value_enum)]
    pub output: OutputFmt,

    /// Suppress progress lines
    #[arg(long)]
    pub quiet: bool,
}

/// Pacing preset argument.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingArg {
    Aggressive,
    Normal,
    Polite,
    Paranoid,
}

impl From<PacingArg> for PacingProfile {
    fn from(p: PacingArg) -> Self {
        match p {
            PacingArg::Aggressive => PacingProfile::Aggressive,
            PacingArg::Normal => PacingProfile::Normal,
            PacingArg::Polite => PacingProfile::Polite,
            PacingArg::Paranoid => PacingProfile::Paranoid,
        }
    }
}

/// Output format argument.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFmt {
    Pretty,
    Json,
}

impl Cli {
    /// Whether operator report lines go to stdout during the scan.
    ///
    /// JSON output keeps stdout for the summary document only.
    pub fn chatty(&self) -> bool {
        !self.quiet && self.output == OutputFmt::Pretty
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Interface address
// ─────────────────────────────────────────────────────────────────────────────

/// First IPv4 address assigned to interface `name`.
///
/// # Errors
/// `ScanError::Interface` if the interface does not exist or carries no
/// IPv4 address.
pub fn interface_ipv4(name: &str) -> Result<Ipv4Addr, ScanError> {
    let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();
    if unsafe { libc::getifaddrs(&mut ifaddrs) } != 0 {
        return Err(ScanError::Interface(format!(
            "getifaddrs failed: {}",
            io::Error::last_os_error()
        )));
    }

    let mut found = None;
    let mut current = ifaddrs;
    while !current.is_null() {
        // SAFETY: `current` walks the list returned by getifaddrs, which
        // stays valid until freeifaddrs below.
        let entry = unsafe { &*current };
        current = entry.ifa_next;

        if entry.ifa_addr.is_null() || entry.ifa_name.is_null() {
            continue;
        }
        let ifname = unsafe { CStr::from_ptr(entry.ifa_name) };
        if ifname.to_bytes() != name.as_bytes() {
            continue;
        }
        if unsafe { (*entry.ifa_addr).sa_family } as i32 == libc::AF_INET {
            let sin = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in) };
            found = Some(Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes()));
            break;
        }
    }
    unsafe { libc::freeifaddrs(ifaddrs) };

    found.ok_or_else(|| ScanError::Interface(format!("no IPv4 address on interface '{name}'")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Scan
// ─────────────────────────────────────────────────────────────────────────────

/// Turn parsed arguments into a scan configuration.
///
/// Looks up the interface address unless `--source-ip` was given.
pub fn build_config(cli: &Cli) -> Result<ScanConfig, ScanError> {
    let range = AddressRange::new(cli.begin_ip, cli.end_ip)?;
    let source_ip = match cli.source_ip {
        Some(ip) => ip,
        None => interface_ipv4(&cli.iface)?,
    };
    let pacing = cli
        .rate
        .and_then(Pacing::from_rate)
        .unwrap_or_else(|| PacingProfile::from(cli.pacing).pacing());

    let mut config = ScanConfig::new(source_ip, cli.port, range)
        .with_pacing(pacing)
        .with_recv_timeout(Duration::from_millis(cli.recv_timeout))
        .with_drain_window(Duration::from_millis(cli.drain));
    if let Some(port) = cli.source_port {
        config = config.with_source_port(port);
    }
    Ok(config)
}

/// Run a scan as described by `cli`.
///
/// Setup failures (range, interface, sockets, results file) are returned
/// before any probe is sent. Anything that goes wrong later is carried in
/// the returned summary.
pub async fn run_scan(cli: &Cli) -> Result<ScanSummary, ScanError> {
    let config = build_config(cli)?;
    let chatty = cli.chatty();

    if chatty {
        println!("* Source address is {}", config.source_ip);
    }

    let ctx = ScannerContext::open(config)?;
    let mut file = tokio::fs::File::create(&cli.results_file)
        .await
        .map_err(|e| {
            ScanError::Results(format!("cannot create {}: {e}", cli.results_file.display()))
        })?;

    if chatty {
        println!("* Scanning {} IPs ...", ctx.config().range.len());
    }
    tracing::info!(
        interface = %cli.iface,
        results = %cli.results_file.display(),
        "scan configured"
    );

    let summary = ctx
        .run(&mut file, move |progress| {
            if chatty {
                println!("* {progress}");
            }
        })
        .await;
    Ok(summary)
}
