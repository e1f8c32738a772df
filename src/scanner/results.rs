//! Results sink.
//!
//! The collector runs on a blocking thread and records each responsive
//! address through an unbounded channel; a single async writer drains the
//! channel into the results file, one dotted-quad address per line, in
//! arrival order. The writer finishes once every sink handle is dropped.

use std::net::Ipv4Addr;

use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;

use super::syn_sender::ScanError;

/// Format one result record.
pub fn format_record(peer: Ipv4Addr) -> String {
    format!("{peer}\n")
}

/// Create a connected sink/receiver pair.
pub fn results_channel() -> (ResultsSink, ResultsReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ResultsSink { tx }, ResultsReceiver { rx })
}

/// Producer handle; callable from synchronous code.
#[derive(Debug, Clone)]
pub struct ResultsSink {
    tx: mpsc::UnboundedSender<Ipv4Addr>,
}

impl ResultsSink {
    /// Queue one responsive address for writing.
    ///
    /// # Errors
    /// `ScanError::Results` if the writer has gone away.
    pub fn record(&self, peer: Ipv4Addr) -> Result<(), ScanError> {
        self.tx
            .send(peer)
            .map_err(|e| ScanError::Results(format!("results writer closed, dropped {}", e.0)))
    }
}

/// Consumer half: owned by the single writer task.
#[derive(Debug)]
pub struct ResultsReceiver {
    rx: mpsc::UnboundedReceiver<Ipv4Addr>,
}

impl ResultsReceiver {
    /// Write every recorded address to `writer` until all sinks are dropped.
    ///
    /// Returns the number of records written.
    pub async fn write_to<W>(mut self, writer: &mut W) -> Result<u64, ScanError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut out = BufWriter::new(writer);
        let mut written = 0u64;
        while let Some(peer) = self.rx.recv().await {
            out.write_all(format_record(peer).as_bytes())
                .await
                .map_err(|e| ScanError::Results(format!("write failed: {e}")))?;
            written += 1;
        }
        out.flush()
            .await
            .map_err(|e| ScanError::Results(format!("flush failed: {e}")))?;
        tracing::debug!(written, "results writer finished");
        Ok(written)
    }
}
