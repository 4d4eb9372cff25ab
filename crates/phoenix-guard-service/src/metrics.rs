//! Lightweight Prometheus-compatible metrics using atomic counters.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::bucket::{ALL_BUCKETS, Bucket};

/// Per-bucket decision counts.
struct BucketMetrics {
    allowed_total: AtomicU64,
    denied_total: AtomicU64,
    pass_through_total: AtomicU64,
}

impl BucketMetrics {
    const fn new() -> Self {
        Self {
            allowed_total: AtomicU64::new(0),
            denied_total: AtomicU64::new(0),
            pass_through_total: AtomicU64::new(0),
        }
    }
}

/// Decision outcome for metrics labelling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Allowed,
    Denied,
    PassThrough,
}

/// Application-wide metrics collected via atomic counters.
pub struct Metrics {
    contact: BucketMetrics,
    api: BucketMetrics,
    analytics: BucketMetrics,
    strict: BucketMetrics,
    attacks_flagged_total: AtomicU64,
    blocks_total: AtomicU64,
    blocked_requests_total: AtomicU64,
    store_errors_total: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            contact: BucketMetrics::new(),
            api: BucketMetrics::new(),
            analytics: BucketMetrics::new(),
            strict: BucketMetrics::new(),
            attacks_flagged_total: AtomicU64::new(0),
            blocks_total: AtomicU64::new(0),
            blocked_requests_total: AtomicU64::new(0),
            store_errors_total: AtomicU64::new(0),
        }
    }

    fn bucket(&self, bucket: Bucket) -> &BucketMetrics {
        match bucket {
            Bucket::Contact => &self.contact,
            Bucket::Api => &self.api,
            Bucket::Analytics => &self.analytics,
            Bucket::Strict => &self.strict,
        }
    }

    /// Record a rate-limit decision.
    pub fn record_decision(&self, bucket: Bucket, outcome: Outcome) {
        let m = self.bucket(bucket);
        let counter = match outcome {
            Outcome::Allowed => &m.allowed_total,
            Outcome::Denied => &m.denied_total,
            Outcome::PassThrough => &m.pass_through_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attack_flag(&self) {
        self.attacks_flagged_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block(&self) {
        self.blocks_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blocked_request(&self) {
        self.blocked_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn attacks_flagged(&self) -> u64 {
        self.attacks_flagged_total.load(Ordering::Relaxed)
    }

    pub fn store_errors(&self) -> u64 {
        self.store_errors_total.load(Ordering::Relaxed)
    }

    /// Total decisions with the given outcome for a bucket.
    pub fn decisions(&self, bucket: Bucket, outcome: Outcome) -> u64 {
        let m = self.bucket(bucket);
        match outcome {
            Outcome::Allowed => m.allowed_total.load(Ordering::Relaxed),
            Outcome::Denied => m.denied_total.load(Ordering::Relaxed),
            Outcome::PassThrough => m.pass_through_total.load(Ordering::Relaxed),
        }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self, store_backend: &str, uptime_seconds: u64) -> String {
        let mut out = String::with_capacity(2048);

        gauge(
            &mut out,
            "phoenix_guard_uptime_seconds",
            "Server uptime in seconds",
            uptime_seconds,
        );
        writeln!(
            out,
            "# HELP phoenix_guard_store_info Counter store backend in use."
        )
        .unwrap();
        writeln!(out, "# TYPE phoenix_guard_store_info gauge").unwrap();
        writeln!(
            out,
            "phoenix_guard_store_info{{backend=\"{store_backend}\"}} 1"
        )
        .unwrap();

        writeln!(
            out,
            "# HELP phoenix_guard_decisions_total Rate-limit decisions by bucket and outcome."
        )
        .unwrap();
        writeln!(out, "# TYPE phoenix_guard_decisions_total counter").unwrap();
        for bucket in ALL_BUCKETS {
            let label = bucket.label();
            for (outcome, name) in [
                (Outcome::Allowed, "allowed"),
                (Outcome::Denied, "denied"),
                (Outcome::PassThrough, "pass_through"),
            ] {
                let n = self.decisions(bucket, outcome);
                writeln!(
                    out,
                    "phoenix_guard_decisions_total{{bucket=\"{label}\",outcome=\"{name}\"}} {n}"
                )
                .unwrap();
            }
        }

        counter(
            &mut out,
            "phoenix_guard_attacks_flagged_total",
            "Requests that pushed a client over the attack threshold",
            self.attacks_flagged_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "phoenix_guard_blocks_total",
            "Block records created",
            self.blocks_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "phoenix_guard_blocked_requests_total",
            "Requests rejected because the client was blocked",
            self.blocked_requests_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "phoenix_guard_store_errors_total",
            "Counter store failures",
            self.store_errors_total.load(Ordering::Relaxed),
        );

        out
    }
}

fn gauge(out: &mut String, name: &str, help: &str, value: impl std::fmt::Display) {
    writeln!(out, "# HELP {name} {help}").unwrap();
    writeln!(out, "# TYPE {name} gauge").unwrap();
    writeln!(out, "{name} {value}").unwrap();
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    writeln!(out, "# HELP {name} {help}.").unwrap();
    writeln!(out, "# TYPE {name} counter").unwrap();
    writeln!(out, "{name} {value}").unwrap();
}
