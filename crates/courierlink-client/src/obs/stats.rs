//! Per-manager counters.
//!
//! Plain atomics with relaxed ordering; values are for logs and the
//! Prometheus-style text dump, not for synchronization.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct LinkStats {
    frames_in: AtomicU64,
    decode_drops: AtomicU64,
    unknown_types: AtomicU64,
    unhandled: AtomicU64,
    envelopes_sent: AtomicU64,
    envelopes_dropped: AtomicU64,
    connects: AtomicU64,
    reconnects_scheduled: AtomicU64,
    auth_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_in: u64,
    pub decode_drops: u64,
    pub unknown_types: u64,
    /// Known event types with no registered callback.
    pub unhandled: u64,
    pub envelopes_sent: u64,
    /// Direct sends dropped because the link was down.
    pub envelopes_dropped: u64,
    pub connects: u64,
    pub reconnects_scheduled: u64,
    pub auth_failures: u64,
}

impl LinkStats {
    pub fn frame_in(&self) {
        self.frames_in.fetch_add(1, Ordering::Relaxed);
    }
    pub fn decode_drop(&self) {
        self.decode_drops.fetch_add(1, Ordering::Relaxed);
    }
    pub fn unknown_type(&self) {
        self.unknown_types.fetch_add(1, Ordering::Relaxed);
    }
    pub fn unhandled(&self) {
        self.unhandled.fetch_add(1, Ordering::Relaxed);
    }
    pub fn envelope_sent(&self) {
        self.envelopes_sent.fetch_add(1, Ordering::Relaxed);
    }
    pub fn envelope_dropped(&self) {
        self.envelopes_dropped.fetch_add(1, Ordering::Relaxed);
    }
    pub fn connected(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }
    pub fn reconnect_scheduled(&self) {
        self.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
    }
    pub fn auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            decode_drops: self.decode_drops.load(Ordering::Relaxed),
            unknown_types: self.unknown_types.load(Ordering::Relaxed),
            unhandled: self.unhandled.load(Ordering::Relaxed),
            envelopes_sent: self.envelopes_sent.load(Ordering::Relaxed),
            envelopes_dropped: self.envelopes_dropped.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            reconnects_scheduled: self.reconnects_scheduled.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
        }
    }

    /// Render in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let s = self.snapshot();
        let mut out = String::new();
        for (name, v) in [
            ("courierlink_frames_in_total", s.frames_in),
            ("courierlink_decode_drops_total", s.decode_drops),
            ("courierlink_unknown_types_total", s.unknown_types),
            ("courierlink_unhandled_events_total", s.unhandled),
            ("courierlink_envelopes_sent_total", s.envelopes_sent),
            ("courierlink_envelopes_dropped_total", s.envelopes_dropped),
            ("courierlink_connects_total", s.connects),
            ("courierlink_reconnects_scheduled_total", s.reconnects_scheduled),
            ("courierlink_auth_failures_total", s.auth_failures),
        ] {
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name} {v}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_lists_every_counter() {
        let stats = LinkStats::default();
        stats.unknown_type();
        stats.unknown_type();
        let text = stats.render();
        assert!(text.contains("courierlink_unknown_types_total 2"));
        assert_eq!(text.matches("# TYPE").count(), 9);
    }
}
