// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Operations: non-blocking probes a routine suspends on.
//!
//! Constructors return a probe, not a result. The scheduler invokes
//! `probe` and decides from the reported [`Step`] whether the routine
//! advances, retries later, sleeps, or forks. A probe never waits.

use std::future::IntoFuture;
use std::task::Waker;
use std::time::Duration;

use crate::channel::Chan;
use crate::routine::{suspend, Routine, Suspend};

/// Outcome of a single probe.
#[derive(Debug)]
pub enum Step<T> {
    /// Completed; the routine resumes with the payload.
    Continue(T),
    /// Not satisfiable right now; retry the same operation later.
    Pause,
    /// Resume after at least this long.
    Sleep(Duration),
    /// Spawn this routine, then continue.
    Fork(Routine),
    /// Can never complete. Fails the routine.
    Invalid(String),
}

/// A probe the scheduler can drive.
pub trait Operation {
    type Output;

    /// One atomic attempt.
    fn probe(&mut self) -> Step<Self::Output>;

    /// Register `waker` on everything this operation waits for. Returns
    /// false when there is nothing to register on; the scheduler then falls
    /// back to polling.
    fn park(&self, _waker: &Waker) -> bool {
        false
    }

    /// Undo [`park`](Self::park) on whatever still holds `waker`.
    fn unpark(&self, _waker: &Waker) {}

    /// Output after the scheduler acted on a `Sleep` or `Fork` step.
    fn resume(&mut self) -> Option<Self::Output> {
        None
    }

    fn name(&self) -> &'static str;
}

// === put / take ===

/// Store a value in a channel once it is empty.
#[derive(Debug)]
pub struct Put<T> {
    chan: Chan<T>,
    value: Option<T>,
}

pub fn put<T>(chan: &Chan<T>, value: T) -> Put<T> {
    Put {
        chan: chan.clone(),
        value: Some(value),
    }
}

impl<T> Operation for Put<T> {
    type Output = ();

    fn probe(&mut self) -> Step<()> {
        let Some(value) = self.value.take() else {
            return Step::Invalid("value was already delivered".to_string());
        };
        match self.chan.try_put(value) {
            Ok(()) => Step::Continue(()),
            Err(value) => {
                self.value = Some(value);
                Step::Pause
            }
        }
    }

    fn park(&self, waker: &Waker) -> bool {
        self.chan.register(waker);
        true
    }

    fn unpark(&self, waker: &Waker) {
        self.chan.deregister(waker);
    }

    fn name(&self) -> &'static str {
        "put"
    }
}

/// Take the value out of a channel once one is present.
#[derive(Debug, Clone)]
pub struct Take<T> {
    chan: Chan<T>,
}

pub fn take<T>(chan: &Chan<T>) -> Take<T> {
    Take { chan: chan.clone() }
}

impl<T> Operation for Take<T> {
    type Output = T;

    fn probe(&mut self) -> Step<T> {
        match self.chan.try_take() {
            Some(value) => Step::Continue(value),
            None => Step::Pause,
        }
    }

    fn park(&self, waker: &Waker) -> bool {
        self.chan.register(waker);
        true
    }

    fn unpark(&self, waker: &Waker) {
        self.chan.deregister(waker);
    }

    fn name(&self) -> &'static str {
        "take"
    }
}

// === alts ===

/// Take from the first non-empty channel, in argument order.
#[derive(Debug, Clone)]
pub struct Alts<T> {
    chans: Vec<Chan<T>>,
}

/// Race `chans`. Output is `(index, value)` of the channel that won.
///
/// Priority order: when several channels hold a value, the earliest one in
/// `chans` wins and the rest are left untouched.
pub fn alts<T>(chans: &[&Chan<T>]) -> Alts<T> {
    Alts {
        chans: chans.iter().map(|c| (*c).clone()).collect(),
    }
}

impl<T> Operation for Alts<T> {
    type Output = (usize, T);

    fn probe(&mut self) -> Step<(usize, T)> {
        if self.chans.is_empty() {
            return Step::Invalid("alts over zero channels can never complete".to_string());
        }
        for (idx, chan) in self.chans.iter().enumerate() {
            if let Some(value) = chan.try_take() {
                return Step::Continue((idx, value));
            }
        }
        Step::Pause
    }

    fn park(&self, waker: &Waker) -> bool {
        for chan in &self.chans {
            chan.register(waker);
        }
        !self.chans.is_empty()
    }

    fn unpark(&self, waker: &Waker) {
        for chan in &self.chans {
            chan.deregister(waker);
        }
    }

    fn name(&self) -> &'static str {
        "alts"
    }
}

// === sleep ===

/// Timed delay. Carries no value.
#[derive(Debug, Clone, Copy)]
pub struct Sleep {
    duration: Duration,
}

pub fn sleep(duration: Duration) -> Sleep {
    Sleep { duration }
}

impl Operation for Sleep {
    type Output = ();

    fn probe(&mut self) -> Step<()> {
        Step::Sleep(self.duration)
    }

    fn resume(&mut self) -> Option<()> {
        Some(())
    }

    fn name(&self) -> &'static str {
        "sleep"
    }
}

// === fork ===

/// Spawn an independently scheduled routine from inside a running one.
#[derive(Debug)]
pub struct Fork {
    routine: Option<Routine>,
}

pub fn fork(routine: Routine) -> Fork {
    Fork {
        routine: Some(routine),
    }
}

impl Operation for Fork {
    type Output = ();

    fn probe(&mut self) -> Step<()> {
        match self.routine.take() {
            Some(routine) => Step::Fork(routine),
            None => Step::Invalid("routine was already forked".to_string()),
        }
    }

    fn resume(&mut self) -> Option<()> {
        Some(())
    }

    fn name(&self) -> &'static str {
        "fork"
    }
}

// === pure steps ===

/// A step that completes immediately with `value`.
#[derive(Debug, Clone)]
pub struct Ready<T> {
    value: Option<T>,
}

pub fn ready<T>(value: T) -> Ready<T> {
    Ready { value: Some(value) }
}

impl<T> Operation for Ready<T> {
    type Output = T;

    fn probe(&mut self) -> Step<T> {
        match self.value.take() {
            Some(value) => Step::Continue(value),
            None => Step::Invalid("value was already delivered".to_string()),
        }
    }

    fn name(&self) -> &'static str {
        "ready"
    }
}

/// Pause once, then continue.
#[derive(Debug, Clone, Default)]
pub struct YieldNow {
    yielded: bool,
}

pub fn yield_now() -> YieldNow {
    YieldNow::default()
}

impl Operation for YieldNow {
    type Output = ();

    fn probe(&mut self) -> Step<()> {
        if self.yielded {
            Step::Continue(())
        } else {
            self.yielded = true;
            Step::Pause
        }
    }

    fn name(&self) -> &'static str {
        "yield"
    }
}

// === awaiting ===

macro_rules! awaitable {
    ($($ty:ty => [$($gen:tt)*]),* $(,)?) => {
        $(
            impl<$($gen)*> IntoFuture for $ty {
                type Output = <$ty as Operation>::Output;
                type IntoFuture = Suspend<$ty>;

                fn into_future(self) -> Self::IntoFuture {
                    suspend(self)
                }
            }
        )*
    };
}

awaitable! {
    Put<T> => [T: 'static],
    Take<T> => [T: 'static],
    Alts<T> => [T: 'static],
    Ready<T> => [T: 'static],
    Sleep => [],
    Fork => [],
    YieldNow => [],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::chan;
    use std::sync::Arc;
    use std::task::Wake;

    #[test]
    fn put_continues_on_empty_channel() {
        let ch = chan();
        let mut op = put(&ch, 1);
        assert!(matches!(op.probe(), Step::Continue(())));
        assert_eq!(ch.try_take(), Some(1));
    }

    #[test]
    fn put_pauses_and_keeps_value_when_full() {
        let ch = chan();
        ch.try_put(1).unwrap();
        let mut op = put(&ch, 2);
        assert!(matches!(op.probe(), Step::Pause));
        assert!(matches!(op.probe(), Step::Pause));

        // Drained: the retried probe delivers the retained value.
        assert_eq!(ch.try_take(), Some(1));
        assert!(matches!(op.probe(), Step::Continue(())));
        assert_eq!(ch.try_take(), Some(2));
    }

    #[test]
    fn take_pauses_until_value_arrives() {
        let ch = chan();
        let mut op = take(&ch);
        assert!(matches!(op.probe(), Step::Pause));
        ch.try_put("x").unwrap();
        assert!(matches!(op.probe(), Step::Continue("x")));
        assert!(ch.is_empty());
    }

    #[test]
    fn alts_prefers_first_ready_channel() {
        let a = chan();
        let b = chan();
        a.try_put(1).unwrap();
        b.try_put(2).unwrap();
        let mut op = alts(&[&a, &b]);
        match op.probe() {
            Step::Continue((0, 1)) => {}
            other => panic!("expected Continue((0, 1)), got {:?}", other),
        }
        // b untouched
        assert_eq!(b.try_take(), Some(2));
    }

    #[test]
    fn alts_falls_through_to_later_channel() {
        let a = chan::<i32>();
        let b = chan();
        b.try_put(9).unwrap();
        let mut op = alts(&[&a, &b]);
        assert!(matches!(op.probe(), Step::Continue((1, 9))));
        assert!(matches!(op.probe(), Step::Pause));
    }

    #[test]
    fn alts_without_channels_is_invalid() {
        let mut op = alts::<i32>(&[]);
        assert!(matches!(op.probe(), Step::Invalid(_)));
    }

    #[test]
    fn sleep_reports_duration_without_side_effect() {
        let mut op = sleep(Duration::from_millis(25));
        assert!(matches!(op.probe(), Step::Sleep(d) if d == Duration::from_millis(25)));
        assert_eq!(op.resume(), Some(()));
    }

    #[test]
    fn yield_now_pauses_exactly_once() {
        let mut op = yield_now();
        assert!(matches!(op.probe(), Step::Pause));
        assert!(matches!(op.probe(), Step::Continue(())));
    }

    #[test]
    fn ready_delivers_once() {
        let mut op = ready(5);
        assert!(matches!(op.probe(), Step::Continue(5)));
        assert!(matches!(op.probe(), Step::Invalid(_)));
    }

    #[test]
    fn fork_hands_over_routine_once() {
        let mut op = fork(Routine::new("child", async { Ok(()) }));
        match op.probe() {
            Step::Fork(r) => assert_eq!(r.name(), "child"),
            other => panic!("expected Fork, got {:?}", other),
        }
        assert!(matches!(op.probe(), Step::Invalid(_)));
    }

    struct NoopWake;

    impl Wake for NoopWake {
        fn wake(self: Arc<Self>) {}
    }

    #[test]
    fn only_channel_operations_park() {
        let ch = chan::<i32>();
        let waker = Waker::from(Arc::new(NoopWake));
        assert!(take(&ch).park(&waker));
        assert_eq!(ch.waiter_count(), 1);
        assert!(!sleep(Duration::ZERO).park(&waker));
        assert!(!yield_now().park(&waker));
        assert!(!alts::<i32>(&[]).park(&waker));
    }
}
