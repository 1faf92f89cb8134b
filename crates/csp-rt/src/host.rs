// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Host loop: the deferral queues the scheduler parks work on.
//!
//! Three kinds of deferral:
//! - macrotask (`defer`): FIFO, one per tick
//! - microtask (`defer_micro`): runs at the next checkpoint, before any
//!   further macrotask
//! - timer (`defer_at`): promoted to the macrotask queue once due
//!
//! A checkpoint only runs the microtasks queued before it began, so a job
//! that keeps re-deferring itself as a microtask cannot starve timers.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::time::Instant;

/// What the loop wants the caller to do next.
#[derive(Debug, PartialEq, Eq)]
pub enum Next<J> {
    Run(J),
    /// Nothing runnable before this deadline.
    Wait(Instant),
    /// No pending work at all.
    Idle,
}

struct Timer<J> {
    deadline: Instant,
    seq: u64,
    job: J,
}

impl<J> PartialEq for Timer<J> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<J> Eq for Timer<J> {}

impl<J> PartialOrd for Timer<J> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<J> Ord for Timer<J> {
    // Reversed: BinaryHeap is a max-heap, earliest deadline must surface.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub struct HostLoop<J> {
    macrotasks: VecDeque<J>,
    microtasks: VecDeque<J>,
    timers: BinaryHeap<Timer<J>>,
    /// Microtasks left in the current checkpoint.
    checkpoint_quota: usize,
    /// A macrotask ran since the last checkpoint.
    checkpoint_due: bool,
    timer_seq: u64,
    ticks: u64,
}

impl<J> HostLoop<J> {
    pub fn new() -> Self {
        Self {
            macrotasks: VecDeque::new(),
            microtasks: VecDeque::new(),
            timers: BinaryHeap::new(),
            checkpoint_quota: 0,
            checkpoint_due: true,
            timer_seq: 0,
            ticks: 0,
        }
    }

    /// Run on a later tick.
    pub fn defer(&mut self, job: J) {
        self.macrotasks.push_back(job);
    }

    /// Run at the next microtask checkpoint.
    pub fn defer_micro(&mut self, job: J) {
        self.microtasks.push_back(job);
    }

    /// Run on the first tick at or after `deadline`.
    pub fn defer_at(&mut self, deadline: Instant, job: J) {
        self.timer_seq += 1;
        self.timers.push(Timer {
            deadline,
            seq: self.timer_seq,
            job,
        });
    }

    pub fn next(&mut self, now: Instant) -> Next<J> {
        if self.checkpoint_due && self.checkpoint_quota == 0 {
            self.checkpoint_quota = self.microtasks.len();
            self.checkpoint_due = false;
        }
        if self.checkpoint_quota > 0 {
            if let Some(job) = self.microtasks.pop_front() {
                self.checkpoint_quota -= 1;
                return Next::Run(job);
            }
            self.checkpoint_quota = 0;
        }

        self.promote_due(now);
        if let Some(job) = self.macrotasks.pop_front() {
            self.ticks += 1;
            self.checkpoint_due = true;
            return Next::Run(job);
        }

        // Only microtasks queued during the last checkpoint remain: they get
        // a tick of their own.
        if !self.microtasks.is_empty() {
            self.ticks += 1;
            self.checkpoint_quota = self.microtasks.len();
            return self.next(now);
        }

        match self.timers.peek() {
            Some(timer) => Next::Wait(timer.deadline),
            None => Next::Idle,
        }
    }

    fn promote_due(&mut self, now: Instant) {
        while let Some(timer) = self.timers.peek() {
            if timer.deadline > now {
                break;
            }
            if let Some(timer) = self.timers.pop() {
                self.macrotasks.push_back(timer.job);
            }
        }
    }

    /// Jobs runnable without waiting on a timer.
    pub fn runnable(&self) -> usize {
        self.macrotasks.len() + self.microtasks.len()
    }

    pub fn timers(&self) -> usize {
        self.timers.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.peek().map(|t| t.deadline)
    }

    pub fn is_idle(&self) -> bool {
        self.runnable() == 0 && self.timers.is_empty()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

impl<J> Default for HostLoop<J> {
    fn default() -> Self {
        Self::new()
    }
}
