//! Outstanding lookup slots: one single-name resolution, one service
//! enumeration. All timing is wrapping `millis()` difference math.

use crate::ServiceProtocol;

use super::{NAME_QUERY_RESEND_MS, SERVICE_QUERY_RESEND_MS};

pub(crate) const NAME_SLOT: usize = 0;
pub(crate) const SERVICE_SLOT: usize = 1;

#[derive(Debug)]
pub(crate) struct PendingQuery {
    /// Fully qualified query name ("peer.local", "_ipp._tcp.local").
    pub name: String,
    /// Absolute deadline in engine millis; 0 means never.
    deadline: u32,
    last_send: u32,
}

pub(crate) struct Resolver {
    slots: [Option<PendingQuery>; 2],
    /// Protocol tag of the running enumeration, for callback formatting.
    pub service_proto: ServiceProtocol,
}

impl Resolver {
    pub fn new() -> Self {
        Resolver {
            slots: [None, None],
            service_proto: ServiceProtocol::Tcp,
        }
    }

    pub fn begin(&mut self, slot: usize, name: String, timeout_ms: u32, now: u32) {
        let deadline = if timeout_ms == 0 {
            0
        } else {
            // A deadline that lands exactly on 0 would read as "never".
            now.wrapping_add(timeout_ms).max(1)
        };
        self.slots[slot] = Some(PendingQuery {
            name,
            deadline,
            last_send: now,
        });
    }

    pub fn cancel(&mut self, slot: usize) {
        self.slots[slot] = None;
    }

    pub fn take(&mut self, slot: usize) -> Option<PendingQuery> {
        self.slots[slot].take()
    }

    pub fn get(&self, slot: usize) -> Option<&PendingQuery> {
        self.slots[slot].as_ref()
    }

    pub fn is_active(&self, slot: usize) -> bool {
        self.slots[slot].is_some()
    }

    pub fn mark_sent(&mut self, slot: usize, now: u32) {
        if let Some(q) = self.slots[slot].as_mut() {
            q.last_send = now;
        }
    }

    pub fn resend_due(&self, slot: usize, now: u32) -> bool {
        let interval = if slot == NAME_SLOT {
            NAME_QUERY_RESEND_MS
        } else {
            SERVICE_QUERY_RESEND_MS
        };
        self.slots[slot]
            .as_ref()
            .is_some_and(|q| now.wrapping_sub(q.last_send) > interval)
    }

    pub fn timed_out(&self, slot: usize, now: u32) -> bool {
        self.slots[slot].as_ref().is_some_and(|q| {
            if q.deadline == 0 {
                return false;
            }
            let past = now.wrapping_sub(q.deadline);
            past > 0 && past < 0x8000_0000
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resend_intervals_differ_per_slot() {
        let mut r = Resolver::new();
        r.begin(NAME_SLOT, "peer.local".into(), 0, 1_000);
        r.begin(SERVICE_SLOT, "_ipp._tcp.local".into(), 0, 1_000);

        assert!(!r.resend_due(NAME_SLOT, 1_900));
        assert!(r.resend_due(NAME_SLOT, 2_100));
        assert!(!r.resend_due(SERVICE_SLOT, 2_100));
        assert!(r.resend_due(SERVICE_SLOT, 11_100));
    }

    #[test]
    fn zero_timeout_never_expires() {
        let mut r = Resolver::new();
        r.begin(NAME_SLOT, "peer.local".into(), 0, 5);
        assert!(!r.timed_out(NAME_SLOT, u32::MAX));
    }

    #[test]
    fn deadline_fires_after_not_at() {
        let mut r = Resolver::new();
        r.begin(NAME_SLOT, "peer.local".into(), 5_000, 1_000);
        assert!(!r.timed_out(NAME_SLOT, 6_000));
        assert!(r.timed_out(NAME_SLOT, 6_001));
    }

    #[test]
    fn timing_survives_millis_wraparound() {
        let mut r = Resolver::new();
        let near_wrap = u32::MAX - 100;
        r.begin(NAME_SLOT, "peer.local".into(), 5_000, near_wrap);
        // Deadline wrapped past zero; 2s after start is still in budget.
        assert!(!r.timed_out(NAME_SLOT, near_wrap.wrapping_add(2_000)));
        assert!(r.timed_out(NAME_SLOT, near_wrap.wrapping_add(5_001)));
        assert!(r.resend_due(NAME_SLOT, near_wrap.wrapping_add(1_001)));
    }
}
