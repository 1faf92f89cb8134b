// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scheduler counters.
//!
//! A routine blocked forever looks exactly like one still waiting; these
//! counters (and the stalled list in `RunReport`) are how that becomes
//! visible without changing scheduling behaviour.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub spawned: u64,
    pub completed: u64,
    pub failed: u64,
    /// Spawned and not yet finished.
    pub live: u64,
    /// Waiting on a channel waiter list.
    pub parked: u64,
    /// Waiting on a timer.
    pub sleeping: u64,
    /// Operation probes evaluated.
    pub probes: u64,
    /// Probes that reported `Pause`.
    pub pauses: u64,
    /// Re-probes after a pause (wakeups and polls).
    pub retries: u64,
    /// Bursts cut short by the time slice.
    pub forced_yields: u64,
    #[serde(with = "micros")]
    pub longest_burst: Duration,
    pub ticks: u64,
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "spawned={} completed={} failed={} live={} parked={} sleeping={} \
             probes={} pauses={} retries={} forced_yields={} longest_burst={:?} ticks={}",
            self.spawned,
            self.completed,
            self.failed,
            self.live,
            self.parked,
            self.sleeping,
            self.probes,
            self.pauses,
            self.retries,
            self.forced_yields,
            self.longest_burst,
            self.ticks,
        )
    }
}

mod micros {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_burst_as_micros() {
        let diag = Diagnostics {
            spawned: 2,
            longest_burst: Duration::from_millis(3),
            ..Diagnostics::default()
        };
        let json = serde_json::to_value(diag).unwrap();
        assert_eq!(json["spawned"], 2);
        assert_eq!(json["longest_burst"], 3_000);
    }

    #[test]
    fn oversized_burst_saturates() {
        let diag = Diagnostics {
            longest_burst: Duration::MAX,
            ..Diagnostics::default()
        };
        let json = serde_json::to_value(diag).unwrap();
        assert_eq!(json["longest_burst"], u64::MAX);
    }

    #[test]
    fn display_lists_every_counter() {
        let text = Diagnostics::default().to_string();
        for key in ["spawned=", "parked=", "forced_yields=", "ticks="] {
            assert!(text.contains(key), "missing {key} in {text}");
        }
    }
}
