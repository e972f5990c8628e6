//! Election metrics
//!
//! Atomic counters updated by the reactor, supervisor and alerter, exported in
//! Prometheus text format by the status endpoint.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counter for tracking event counts
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge for tracking current values
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Per-node election metrics
#[derive(Debug)]
pub struct ElectionMetrics {
    pub sessions_opened: Counter,
    pub session_open_failures: Counter,
    pub sessions_expired: Counter,
    pub elections_won: Counter,
    pub elections_lost: Counter,
    pub watch_fires: Counter,
    pub forced_takeovers: Counter,
    pub forced_demotions: Counter,
    pub stale_events_dropped: Counter,
    pub consistency_violations: Counter,
    pub coordination_errors: Counter,
    pub alerts_sent: Counter,
    pub alerts_failed: Counter,
    pub is_leader: Gauge,

    start_time: Instant,
}

impl ElectionMetrics {
    pub fn new() -> Self {
        Self {
            sessions_opened: Counter::new(),
            session_open_failures: Counter::new(),
            sessions_expired: Counter::new(),
            elections_won: Counter::new(),
            elections_lost: Counter::new(),
            watch_fires: Counter::new(),
            forced_takeovers: Counter::new(),
            forced_demotions: Counter::new(),
            stale_events_dropped: Counter::new(),
            consistency_violations: Counter::new(),
            coordination_errors: Counter::new(),
            alerts_sent: Counter::new(),
            alerts_failed: Counter::new(),
            is_leader: Gauge::new(),
            start_time: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Render in Prometheus text exposition format
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let counters: [(&str, &str, &Counter); 13] = [
            ("sessions_opened_total", "Coordination sessions opened", &self.sessions_opened),
            ("session_open_failures_total", "Failed attempts to open a session", &self.session_open_failures),
            ("sessions_expired_total", "Sessions ended by expiry", &self.sessions_expired),
            ("elections_won_total", "Transitions to elected", &self.elections_won),
            ("elections_lost_total", "Transitions to not elected", &self.elections_lost),
            ("watch_fires_total", "Election node deletion notifications", &self.watch_fires),
            ("forced_takeovers_total", "Deletes of a foreign claim by the primary", &self.forced_takeovers),
            ("forced_demotions_total", "Claims deleted while held by this node", &self.forced_demotions),
            ("stale_events_dropped_total", "Callbacks discarded for a dead session", &self.stale_events_dropped),
            ("consistency_violations_total", "Election node payload mismatches", &self.consistency_violations),
            ("coordination_errors_total", "Unexpected coordination result codes", &self.coordination_errors),
            ("alerts_sent_total", "Outage notifications delivered", &self.alerts_sent),
            ("alerts_failed_total", "Outage notifications that failed to send", &self.alerts_failed),
        ];

        for (name, help, counter) in counters {
            let _ = writeln!(out, "# HELP warden_{} {}", name, help);
            let _ = writeln!(out, "# TYPE warden_{} counter", name);
            let _ = writeln!(out, "warden_{} {}", name, counter.get());
        }

        out.push_str("# HELP warden_is_leader Whether this node holds the election node\n");
        out.push_str("# TYPE warden_is_leader gauge\n");
        let _ = writeln!(out, "warden_is_leader {}", self.is_leader.get());

        out.push_str("# HELP warden_uptime_seconds Process uptime\n");
        out.push_str("# TYPE warden_uptime_seconds gauge\n");
        let _ = writeln!(out, "warden_uptime_seconds {}", self.uptime_secs());

        out
    }
}

impl Default for ElectionMetrics {
    fn default() -> Self {
        Self::new()
    }
}
