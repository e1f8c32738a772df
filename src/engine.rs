//! Scan engine: owns the per-scan context and runs the sender and the
//! reply collector concurrently.
//!
//! Both halves are blocking loops over raw sockets, so each runs on the
//! blocking pool via `spawn_blocking`; the results writer is an async task
//! on the runtime. Shared counters and the stop signal are atomics. Counter
//! values are diagnostic (progress display, summary) and tolerate relaxed
//! ordering; result records go through the single-writer channel and are
//! never lost or interleaved.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::io::AsyncWrite;
use uuid::Uuid;

use crate::scanner::collector::ReplyCollector;
use crate::scanner::forge::{build_template, PacketTemplate};
use crate::scanner::results::results_channel;
use crate::scanner::syn_sender::{Progress, ScanError, SynSweeper};
use crate::scanner::transport::{PacketRecv, PacketSend};
use crate::{ScanConfig, ScanSummary};

// ─────────────────────────────────────────────────────────────────────────────
// Shared state
// ─────────────────────────────────────────────────────────────────────────────

/// Running counters shared by the sender and the collector.
#[derive(Debug, Default)]
pub struct ScanCounters {
    sent: AtomicU64,
    received: AtomicU64,
    acks_since_report: AtomicU64,
}

impl ScanCounters {
    /// Count one transmitted probe.
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one matching reply (total and since-last-report).
    pub fn record_match(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.acks_since_report.fetch_add(1, Ordering::Relaxed);
    }

    /// Matches since the previous call; resets the periodic counter.
    pub fn take_acks(&self) -> u64 {
        self.acks_since_report.swap(0, Ordering::Relaxed)
    }

    /// Probes sent so far.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Matching replies so far.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

/// One-shot termination flag: false until the sweep ends, then true forever.
#[derive(Debug, Default)]
pub struct StopSignal(AtomicBool);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Returns `true` only for the call that raised it.
    pub fn trigger(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Raises the stop signal when dropped, so the collector is released on
/// every sender exit path, panics included.
struct StopGuard(Arc<StopSignal>);

impl Drop for StopGuard {
    fn drop(&mut self) {
        if self.0.trigger() {
            tracing::debug!("stop signal raised");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scanner context
// ─────────────────────────────────────────────────────────────────────────────

/// Everything one scan owns: configuration, template, both packet paths,
/// counters and the stop signal.
///
/// Sockets and template exist before either task starts; both are released
/// when [`ScannerContext::run`] returns.
pub struct ScannerContext {
    config: ScanConfig,
    template: PacketTemplate,
    sender: Box<dyn PacketSend>,
    receiver: Box<dyn PacketRecv>,
    counters: Arc<ScanCounters>,
    stop: Arc<StopSignal>,
}

impl ScannerContext {
    /// Open both raw sockets and build the template for `config`.
    ///
    /// # Errors
    /// Socket creation or option failures; nothing has been sent yet.
    #[cfg(target_os = "linux")]
    pub fn open(config: ScanConfig) -> Result<Self, ScanError> {
        use crate::scanner::raw_socket::{RawSocketReceiver, RawSocketSender};

        let sender = RawSocketSender::new()?;
        let receiver = RawSocketReceiver::new(config.recv_timeout)?;
        tracing::info!(
            recv_timeout_ms = config.recv_timeout.as_millis() as u64,
            "raw sockets ready"
        );
        Ok(Self::with_transport(config, Box::new(sender), Box::new(receiver)))
    }

    /// Raw sockets are Linux-only.
    #[cfg(not(target_os = "linux"))]
    pub fn open(config: ScanConfig) -> Result<Self, ScanError> {
        let _ = config;
        Err(ScanError::RawSocket(
            "raw IPv4 sockets with IP_HDRINCL are only supported on Linux".into(),
        ))
    }

    /// Build a context over caller-provided packet paths.
    pub fn with_transport(
        config: ScanConfig,
        sender: Box<dyn PacketSend>,
        receiver: Box<dyn PacketRecv>,
    ) -> Self {
        let (template, checksum) = build_template(&config);
        tracing::debug!(
            source_ip = %config.source_ip,
            source_port = config.source_port,
            dest_port = config.dest_port,
            checksum = %format!("{checksum:#06x}"),
            "packet template built"
        );
        Self {
            config,
            template,
            sender,
            receiver,
            counters: Arc::new(ScanCounters::default()),
            stop: Arc::new(StopSignal::new()),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn template(&self) -> &PacketTemplate {
        &self.template
    }

    /// Shared counters; stay readable while the scan runs.
    pub fn counters(&self) -> Arc<ScanCounters> {
        self.counters.clone()
    }

    /// Run the scan to completion.
    ///
    /// The collector starts first and runs until the sweep has ended and the
    /// drain window closes. Every matching peer is written to `results` as
    /// one line. `on_progress` runs on the sender thread at each sampling
    /// point.
    ///
    /// Failures after setup do not discard anything: the summary carries
    /// them in `error` / `receiver_error` next to the counters reached.
    pub async fn run<W, F>(self, results: &mut W, on_progress: F) -> ScanSummary
    where
        W: AsyncWrite + Unpin,
        F: FnMut(&Progress) + Send + 'static,
    {
        let Self {
            config,
            template,
            sender,
            mut receiver,
            counters,
            stop,
        } = self;

        let started_at = Utc::now();
        let start = Instant::now();
        let (sink, results_rx) = results_channel();

        tracing::info!(
            range = %config.range,
            addresses = config.range.len(),
            dest_port = config.dest_port,
            source_port = config.source_port,
            probe_delay_ms = config.pacing.probe_delay().as_millis() as u64,
            "scan starting"
        );

        let rx_task = {
            let collector = ReplyCollector::new(&config);
            let stop = stop.clone();
            let counters = counters.clone();
            tokio::task::spawn_blocking(move || {
                let result = collector.run(receiver.as_mut(), &stop, &counters, &sink);
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "collector stopped early");
                }
                result
            })
        };

        let tx_task = {
            let mut sweeper = SynSweeper::new(template, config.range, config.pacing, sender);
            let guard = StopGuard(stop.clone());
            let counters = counters.clone();
            tokio::task::spawn_blocking(move || {
                let _guard = guard;
                sweeper.run(&counters, on_progress)
            })
        };

        let (tx_res, rx_res, write_res) =
            tokio::join!(tx_task, rx_task, results_rx.write_to(results));

        let tx_res = tx_res
            .map_err(|e| ScanError::Task(format!("sender: {e}")))
            .and_then(|r| r);
        let rx_res = rx_res
            .map_err(|e| ScanError::Task(format!("collector: {e}")))
            .and_then(|r| r);

        // A panicked or cancelled sender never reached its guard's drop.
        stop.trigger();

        let mut errors = Vec::new();
        if let Err(e) = &tx_res {
            errors.push(e.to_string());
        }
        let written = match write_res {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(error = %e, "results writer failed");
                errors.push(e.to_string());
                0
            }
        };

        let summary = ScanSummary {
            scan_id: Uuid::new_v4(),
            source_ip: config.source_ip,
            source_port: config.source_port,
            dest_port: config.dest_port,
            range: config.range,
            pacing: config.pacing,
            addresses: config.range.len(),
            sent: counters.sent(),
            received: counters.received(),
            written,
            duration_ms: start.elapsed().as_millis() as u64,
            started_at,
            finished_at: Utc::now(),
            error: if errors.is_empty() {
                None
            } else {
                Some(errors.join("; "))
            },
            receiver_error: rx_res.err().map(|e| e.to_string()),
        };

        tracing::info!(
            sent = summary.sent,
            received = summary.received,
            written = summary.written,
            duration_ms = summary.duration_ms,
            "scan finished"
        );
        summary
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::scanner::pacing::Pacing;
    use crate::scanner::transport::{mock_link, open_hosts_responder, MockReceiver, MockSender};
    use crate::AddressRange;

    const SRC_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 100);

    fn make_config(begin: Ipv4Addr, end: Ipv4Addr) -> ScanConfig {
        ScanConfig::new(SRC_IP, 80, AddressRange::new(begin, end).unwrap())
            .with_source_port(50000)
            .with_pacing(Pacing::unpaced())
    }

    #[test]
    fn test_counters() {
        let c = ScanCounters::default();
        c.record_sent();
        c.record_sent();
        c.record_match();
        assert_eq!(c.sent(), 2);
        assert_eq!(c.received(), 1);
        assert_eq!(c.take_acks(), 1);
        assert_eq!(c.take_acks(), 0, "take_acks must reset");
        assert_eq!(c.received(), 1);
    }

    #[test]
    fn test_stop_signal_triggers_once() {
        let stop = StopSignal::new();
        assert!(!stop.is_set());
        assert!(stop.trigger(), "first trigger raises the flag");
        assert!(!stop.trigger(), "later triggers are no-ops");
        assert!(stop.is_set());
    }

    #[test]
    fn test_stop_guard_raises_on_drop() {
        let stop = Arc::new(StopSignal::new());
        {
            let _guard = StopGuard(stop.clone());
            assert!(!stop.is_set());
        }
        assert!(stop.is_set());
    }

    #[test]
    fn test_context_builds_template_from_config() {
        let config = make_config(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 4));
        let ctx = ScannerContext::with_transport(
            config,
            Box::new(MockSender::new()),
            Box::new(MockReceiver::new()),
        );
        assert_eq!(ctx.template(), &PacketTemplate::new(SRC_IP, 50000, 80));
        assert_eq!(ctx.config().range.len(), 4);
        assert_eq!(ctx.counters().sent(), 0);
    }

    #[tokio::test]
    async fn test_scan_records_only_responsive_host() {
        let config = make_config(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 4));
        let (tx, rx) = mock_link(open_hosts_responder(vec![Ipv4Addr::new(10, 0, 0, 3)]));
        let log = tx.sent_log();
        let ctx = ScannerContext::with_transport(config, Box::new(tx), Box::new(rx));

        let mut out = Vec::new();
        let summary = ctx.run(&mut out, |_| {}).await;

        assert_eq!(String::from_utf8(out).unwrap(), "10.0.0.3\n");
        assert_eq!(summary.sent, 4, "inclusive range sends one probe per address");
        assert_eq!(summary.received, 1);
        assert_eq!(summary.written, 1);
        assert!(summary.is_complete(), "unexpected failure: {summary:?}");
        assert_eq!(summary.pacing, Pacing::unpaced());
        assert_eq!(log.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_scan_writes_results_file() {
        let path = std::env::temp_dir().join(format!("nscan-results-{}.txt", Uuid::new_v4()));
        tokio::fs::write(&path, "stale line from an earlier run\n")
            .await
            .unwrap();

        let config = make_config(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 4));
        let (tx, rx) = mock_link(open_hosts_responder(vec![Ipv4Addr::new(10, 0, 0, 3)]));
        let ctx = ScannerContext::with_transport(config, Box::new(tx), Box::new(rx));

        let mut file = tokio::fs::File::create(&path).await.unwrap();
        let summary = ctx.run(&mut file, |_| {}).await;
        drop(file);

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        tokio::fs::remove_file(&path).await.unwrap();
        assert_eq!(
            contents, "10.0.0.3\n",
            "results file must be truncated and hold exactly the responsive host"
        );
        assert_eq!(summary.written, 1);
        assert!(summary.is_complete(), "unexpected failure: {summary:?}");
    }

    #[tokio::test]
    async fn test_progress_is_reported_through_callback() {
        let config = make_config(Ipv4Addr::new(10, 0, 0, 0), Ipv4Addr::new(10, 0, 2, 87));
        let ctx = ScannerContext::with_transport(
            config,
            Box::new(MockSender::new()),
            Box::new(MockReceiver::new()),
        );
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();

        let mut out = Vec::new();
        let summary = ctx
            .run(&mut out, move |p| sink.lock().unwrap().push(p.done))
            .await;

        assert_eq!(summary.sent, 600);
        assert_eq!(*reports.lock().unwrap(), vec![1, 257, 513, 600]);
    }

    #[tokio::test]
    async fn test_send_failure_keeps_partial_results() {
        let config = make_config(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 8));
        let (mut tx, rx) = mock_link(open_hosts_responder(vec![
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 6),
        ]));
        tx.fail_after = Some(3);
        let ctx = ScannerContext::with_transport(config, Box::new(tx), Box::new(rx));

        let mut out = Vec::new();
        let summary = ctx.run(&mut out, |_| {}).await;

        assert_eq!(summary.sent, 3);
        assert!(
            summary.error.as_deref().unwrap_or_default().contains("send failed"),
            "sender failure must be reported, got {:?}",
            summary.error
        );
        assert!(summary.receiver_error.is_none());
        assert_eq!(out, b"10.0.0.1\n", "replies before the failure are kept");
        assert!(!summary.is_complete());
    }

    #[tokio::test]
    async fn test_receiver_failure_does_not_stop_sweep() {
        let config = make_config(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 5));
        let (tx, mut rx) = mock_link(open_hosts_responder(vec![Ipv4Addr::new(10, 0, 0, 2)]));
        rx.fail_after = Some(0);
        let ctx = ScannerContext::with_transport(config, Box::new(tx), Box::new(rx));

        let mut out = Vec::new();
        let summary = ctx.run(&mut out, |_| {}).await;

        assert_eq!(summary.sent, 5, "sweep must finish despite receiver failure");
        assert!(summary.error.is_none());
        assert!(summary.receiver_error.is_some());
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_silent_network_shuts_down_promptly() {
        let config = make_config(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 16))
            .with_drain_window(Duration::from_secs(60));
        let ctx = ScannerContext::with_transport(
            config,
            Box::new(MockSender::new()),
            Box::new(MockReceiver::new()),
        );

        let start = Instant::now();
        let mut out = Vec::new();
        let summary = ctx.run(&mut out, |_| {}).await;

        assert_eq!(summary.received, 0);
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "no replies must not hold the scan for the full drain window"
        );
    }

    #[tokio::test]
    async fn test_sender_panic_releases_collector() {
        let config = make_config(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2));
        let ctx = ScannerContext::with_transport(
            config,
            Box::new(MockSender::new()),
            Box::new(MockReceiver::new()),
        );

        let mut out = Vec::new();
        let summary = ctx
            .run(&mut out, |_| panic!("progress callback failed"))
            .await;

        assert_eq!(summary.sent, 0);
        assert!(
            summary.error.as_deref().unwrap_or_default().contains("scan task failed"),
            "panic must surface as a task error, got {:?}",
            summary.error
        );
        assert!(summary.receiver_error.is_none());
    }
}
