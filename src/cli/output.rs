//! Output formatters for the scan summary.
//!
//! Supports pretty (operator report lines) and JSON output formats.

use crate::ScanSummary;

/// Format a scan summary as operator-facing report lines.
pub fn format_pretty(summary: &ScanSummary) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "* Scanned {} ({} IPs) port {}/tcp from {}:{} in {}\n",
        summary.range,
        summary.addresses,
        summary.dest_port,
        summary.source_ip,
        summary.source_port,
        format_duration_ms(summary.duration_ms)
    ));
    match summary.pacing.rate_pps() {
        Some(pps) => out.push_str(&format!("* Probe rate ~{pps:.0} pkt/s\n")),
        None => out.push_str("* Probe rate unpaced\n"),
    }
    out.push_str(&format!(
        "* Sent {} pkts, received {} pkts\n",
        summary.sent, summary.received
    ));
    if summary.written != summary.received {
        out.push_str(&format!("* Wrote {} of {} results\n", summary.written, summary.received));
    }

    if let Some(err) = &summary.error {
        out.push_str(&format!("* Scan error: {err}\n"));
    }
    if let Some(err) = &summary.receiver_error {
        out.push_str(&format!("* Receiver error: {err}\n"));
    }

    if summary.is_complete() {
        out.push_str("* Network scan complete!\n");
    } else {
        out.push_str(&format!(
            "* Network scan incomplete ({}/{} probes sent)\n",
            summary.sent, summary.addresses
        ));
    }

    out
}

/// Format a scan summary as pretty-printed JSON.
pub fn format_json(summary: &ScanSummary) -> String {
    serde_json::to_string_pretty(summary)
        .unwrap_or_else(|e| format!("{{\"error\": \"serialization failed: {e}\"}}"))
}

/// Format a millisecond duration as a human-readable string.
pub fn format_duration_ms(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AddressRange, Pacing};
    use chrono::Utc;
    use std::net::Ipv4Addr;
    use uuid::Uuid;

    fn make_summary() -> ScanSummary {
        ScanSummary {
            scan_id: Uuid::new_v4(),
            source_ip: Ipv4Addr::new(192, 168, 1, 100),
            source_port: 50000,
            dest_port: 80,
            range: AddressRange::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 4))
                .unwrap(),
            pacing: Pacing::default(),
            addresses: 4,
            sent: 4,
            received: 1,
            written: 1,
            duration_ms: 2_400,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            error: None,
            receiver_error: None,
        }
    }

    #[test]
    fn test_format_duration_ms() {
        assert_eq!(format_duration_ms(350), "350ms");
        assert_eq!(format_duration_ms(2_400), "2.4s");
        assert_eq!(format_duration_ms(125_000), "2m05s");
    }

    #[test]
    fn test_format_pretty_complete_scan() {
        let output = format_pretty(&make_summary());
        assert!(output.contains("* Scanned 10.0.0.1-10.0.0.4 (4 IPs) port 80/tcp"));
        assert!(output.contains("* Probe rate ~100 pkt/s\n"));
        assert!(output.contains("* Sent 4 pkts, received 1 pkts\n"));
        assert!(output.ends_with("* Network scan complete!\n"));
        assert!(!output.contains("error"), "clean scan must not mention errors");
    }

    #[test]
    fn test_format_pretty_reports_errors() {
        let mut summary = make_summary();
        summary.sent = 2;
        summary.error = Some("packet send failed: ENOBUFS".into());
        summary.receiver_error = Some("packet receive failed: EBADF".into());
        let output = format_pretty(&summary);
        assert!(output.contains("* Scan error: packet send failed: ENOBUFS"));
        assert!(output.contains("* Receiver error: packet receive failed: EBADF"));
        assert!(output.contains("* Network scan incomplete (2/4 probes sent)"));
        assert!(!output.contains("complete!"));
    }

    #[test]
    fn test_format_pretty_unpaced_rate() {
        let mut summary = make_summary();
        summary.pacing = Pacing::unpaced();
        assert!(format_pretty(&summary).contains("* Probe rate unpaced\n"));
    }

    #[test]
    fn test_format_pretty_unwritten_results() {
        let mut summary = make_summary();
        summary.received = 3;
        let output = format_pretty(&summary);
        assert!(output.contains("* Wrote 1 of 3 results"));
    }

    #[test]
    fn test_format_json_fields() {
        let summary = make_summary();
        let json: serde_json::Value = serde_json::from_str(&format_json(&summary)).unwrap();
        assert_eq!(json["scan_id"], summary.scan_id.to_string());
        assert_eq!(json["source_ip"], "192.168.1.100");
        assert_eq!(json["range"]["begin"], "10.0.0.1");
        assert_eq!(json["range"]["end"], "10.0.0.4");
        assert_eq!(json["sent"], 4);
        assert_eq!(json["received"], 1);
        assert_eq!(json["pacing"]["probe_delay"]["secs"], 0);
        assert_eq!(json["pacing"]["probe_delay"]["nanos"], 10_000_000);
        assert!(json["error"].is_null());
    }

    #[test]
    fn test_format_json_round_trips() {
        let summary = make_summary();
        let parsed: ScanSummary = serde_json::from_str(&format_json(&summary)).unwrap();
        assert_eq!(parsed.scan_id, summary.scan_id);
        assert_eq!(parsed.range, summary.range);
        assert_eq!(parsed.pacing, summary.pacing);
    }
}
