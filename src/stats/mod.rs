// Statistics collector module

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Run-wide counters, owned by the probe loop and read back through
/// [`StatsCollector::snapshot`].
#[derive(Default)]
pub struct StatsCollector {
    sent: AtomicU64,
    received: AtomicU64,
    send_failures: AtomicU64,
    timeouts: AtomicU64,
    unparsable: AtomicU64,
    status_codes: DashMap<u16, AtomicU64>,
}

/// A point-in-time snapshot of collected statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    pub sent: u64,
    pub received: u64,
    pub send_failures: u64,
    pub timeouts: u64,
    pub unparsable: u64,
    pub status_codes: HashMap<u16, u64>,
}

impl StatsSnapshot {
    /// Packet loss in percent, `None` when nothing was sent.
    pub fn loss_percent(&self) -> Option<f64> {
        if self.sent == 0 {
            return None;
        }
        Some(self.sent.saturating_sub(self.received) as f64 / self.sent as f64 * 100.0)
    }

    /// The summary line printed at the end of a run.
    pub fn summary_line(&self) -> String {
        match self.loss_percent() {
            Some(loss) => format!(
                "{} packets transmitted, {} packets received, {:.1}% packet loss",
                self.sent, self.received, loss
            ),
            None => format!(
                "{} packets transmitted, {} packets received",
                self.sent, self.received
            ),
        }
    }
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a datagram handed to the socket.
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a send that the socket rejected.
    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a reply datagram.
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the status code of a reply that parsed as a response.
    pub fn record_status(&self, status_code: u16) {
        self.status_codes
            .entry(status_code)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a reply that parsed as neither response nor request.
    pub fn record_unparsable(&self) {
        self.unparsable.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a wait that ended without a reply.
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let status_codes = self
            .status_codes
            .iter()
            .map(|entry| (*entry.key(), entry.value().load(Ordering::Relaxed)))
            .collect();

        StatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            unparsable: self.unparsable.load(Ordering::Relaxed),
            status_codes,
        }
    }

    /// Display the final statistics block on stderr.
    pub fn display_final_summary(snapshot: &StatsSnapshot) {
        eprintln!("\n--- statistics ---");
        eprintln!("{}", snapshot.summary_line());
    }

    /// Display per-status-code and failure counts on stderr (verbose runs).
    pub fn display_details(snapshot: &StatsSnapshot) {
        if !snapshot.status_codes.is_empty() {
            let mut codes: Vec<_> = snapshot.status_codes.iter().collect();
            codes.sort_by_key(|(k, _)| *k);
            let code_strs: Vec<String> = codes.iter().map(|(k, v)| format!("{}:{}", k, v)).collect();
            eprintln!("status codes: {}", code_strs.join(" | "));
        }
        eprintln!(
            "send failures: {} | timeouts: {} | unparsable replies: {}",
            snapshot.send_failures, snapshot.timeouts, snapshot.unparsable
        );
    }
}
