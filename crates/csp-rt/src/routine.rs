// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Routines: suspendable step sequences.
//!
//! A routine is an `async` block. Every `.await` on an operation is a
//! suspension point: the operation is handed to the scheduler through the
//! yield frame installed around each poll, and the routine resumes only once
//! the scheduler has completed it. Nothing else may be awaited.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use crate::op::{Operation, Step};

/// Scheduler-assigned routine identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutineId(pub(crate) u64);

impl RoutineId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RoutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a routine body evaluates to.
pub type RoutineResult = anyhow::Result<()>;

pub(crate) type RoutineFuture = Pin<Box<dyn Future<Output = RoutineResult>>>;

/// A named routine body, not yet spawned.
pub struct Routine {
    name: String,
    pub(crate) future: RoutineFuture,
}

impl Routine {
    pub fn new<F>(name: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = RoutineResult> + 'static,
    {
        Self {
            name: name.into(),
            future: Box::pin(future),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_parts(self) -> (String, RoutineFuture) {
        (self.name, self.future)
    }
}

impl fmt::Debug for Routine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Routine").field("name", &self.name).finish()
    }
}

// === Type-erased pending operation ===

/// Probe result with the payload already stored in the operation's slot.
pub(crate) enum Signal {
    Continue,
    Pause,
    Sleep(Duration),
    Fork(Routine),
    Invalid(String),
}

/// The scheduler's view of an awaited operation.
pub(crate) trait PendingOp {
    fn probe(&mut self) -> Signal;
    fn park(&self, waker: &Waker) -> bool;
    fn unpark(&self, waker: &Waker);
    fn resume(&mut self);
    fn name(&self) -> &'static str;
}

pub(crate) type SharedOp = Rc<RefCell<dyn PendingOp>>;

struct OpSlot<O: Operation> {
    op: O,
    output: Option<O::Output>,
}

impl<O: Operation> PendingOp for OpSlot<O> {
    fn probe(&mut self) -> Signal {
        match self.op.probe() {
            Step::Continue(value) => {
                self.output = Some(value);
                Signal::Continue
            }
            Step::Pause => Signal::Pause,
            Step::Sleep(d) => Signal::Sleep(d),
            Step::Fork(routine) => Signal::Fork(routine),
            Step::Invalid(reason) => Signal::Invalid(reason),
        }
    }

    fn park(&self, waker: &Waker) -> bool {
        self.op.park(waker)
    }

    fn unpark(&self, waker: &Waker) {
        self.op.unpark(waker);
    }

    fn resume(&mut self) {
        self.output = self.op.resume();
    }

    fn name(&self) -> &'static str {
        self.op.name()
    }
}

// === Yield frame ===

/// What a routine handed over during one poll.
pub(crate) enum Yielded {
    Nothing,
    One(SharedOp),
    Many(usize),
}

thread_local! {
    static FRAME: RefCell<Option<Yielded>> = const { RefCell::new(None) };
}

/// Installs a fresh yield frame for one poll; restores the enclosing frame
/// (if a drive is nested) on drop.
pub(crate) struct YieldFrame {
    saved: Option<Yielded>,
    finished: bool,
}

impl YieldFrame {
    pub(crate) fn enter() -> Self {
        let saved = FRAME.with(|f| f.borrow_mut().replace(Yielded::Nothing));
        Self {
            saved,
            finished: false,
        }
    }

    /// Collect what was yielded during the poll.
    pub(crate) fn finish(mut self) -> Yielded {
        self.finished = true;
        let saved = self.saved.take();
        FRAME
            .with(|f| std::mem::replace(&mut *f.borrow_mut(), saved))
            .unwrap_or(Yielded::Nothing)
    }
}

impl Drop for YieldFrame {
    fn drop(&mut self) {
        if !self.finished {
            let saved = self.saved.take();
            FRAME.with(|f| *f.borrow_mut() = saved);
        }
    }
}

fn yield_op(op: SharedOp) {
    let rejected = FRAME.with(|f| {
        let mut frame = f.borrow_mut();
        match frame.take() {
            None => Some(op),
            Some(Yielded::Nothing) => {
                *frame = Some(Yielded::One(op));
                None
            }
            Some(Yielded::One(_)) => {
                *frame = Some(Yielded::Many(2));
                None
            }
            Some(Yielded::Many(n)) => {
                *frame = Some(Yielded::Many(n + 1));
                None
            }
        }
    });
    if let Some(op) = rejected {
        panic!(
            "csp operation `{}` awaited outside a routine; spawn the future with Scheduler::go",
            op.borrow().name()
        );
    }
}

// === Awaiting ===

/// Future returned by awaiting an operation.
///
/// First poll hands the operation to the scheduler; the next poll after the
/// scheduler completed it returns the output.
pub struct Suspend<O: Operation> {
    op: Option<O>,
    slot: Option<Rc<RefCell<OpSlot<O>>>>,
}

/// Make any operation awaitable inside a routine.
pub fn suspend<O: Operation>(op: O) -> Suspend<O> {
    Suspend {
        op: Some(op),
        slot: None,
    }
}

// No structural pinning: the operation lives behind an Rc once yielded.
impl<O: Operation> Unpin for Suspend<O> {}

impl<O> Future for Suspend<O>
where
    O: Operation + 'static,
    O::Output: 'static,
{
    type Output = O::Output;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<O::Output> {
        let this = self.get_mut();
        if let Some(slot) = &this.slot {
            if let Some(output) = slot.borrow_mut().output.take() {
                return Poll::Ready(output);
            }
            // Polled again before completion: hand it over again.
            yield_op(slot.clone());
            return Poll::Pending;
        }

        let Some(op) = this.op.take() else {
            return Poll::Pending;
        };
        let slot = Rc::new(RefCell::new(OpSlot { op, output: None }));
        yield_op(slot.clone());
        this.slot = Some(slot);
        Poll::Pending
    }
}

impl<O: Operation> fmt::Debug for Suspend<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspend")
            .field("yielded", &self.slot.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::chan;
    use crate::op::{put, take};
    use std::future::IntoFuture;
    use std::sync::Arc;
    use std::task::Wake;

    struct NoopWake;

    impl Wake for NoopWake {
        fn wake(self: Arc<Self>) {}
    }

    fn poll_once(fut: &mut RoutineFuture) -> (Poll<RoutineResult>, Yielded) {
        let waker = Waker::from(Arc::new(NoopWake));
        let mut cx = Context::from_waker(&waker);
        let frame = YieldFrame::enter();
        let poll = fut.as_mut().poll(&mut cx);
        (poll, frame.finish())
    }

    #[test]
    fn await_hands_operation_to_frame() {
        let ch = chan();
        let inner = ch.clone();
        let mut routine = Routine::new("taker", async move {
            let v: i32 = take(&inner).await;
            assert_eq!(v, 3);
            Ok(())
        });
        assert_eq!(routine.name(), "taker");

        let (poll, yielded) = poll_once(&mut routine.future);
        assert!(poll.is_pending());
        let Yielded::One(op) = yielded else {
            panic!("expected exactly one operation");
        };
        assert_eq!(op.borrow().name(), "take");
        assert!(matches!(op.borrow_mut().probe(), Signal::Pause));

        ch.try_put(3).unwrap();
        assert!(matches!(op.borrow_mut().probe(), Signal::Continue));
        let (poll, _) = poll_once(&mut routine.future);
        assert!(matches!(poll, Poll::Ready(Ok(()))));
    }

    #[test]
    fn joining_two_operations_is_counted() {
        let ch = chan();
        let mut routine = Routine::new("joined", async move {
            let mut a = std::pin::pin!(put(&ch, 1).into_future());
            let mut b = std::pin::pin!(put(&ch, 2).into_future());
            std::future::poll_fn(|cx| {
                let _ = a.as_mut().poll(cx);
                let _ = b.as_mut().poll(cx);
                Poll::<()>::Pending
            })
            .await;
            Ok(())
        });
        let (_, yielded) = poll_once(&mut routine.future);
        assert!(matches!(yielded, Yielded::Many(2)));
    }

    #[test]
    fn frames_nest_and_restore() {
        let outer = YieldFrame::enter();
        {
            let inner = YieldFrame::enter();
            assert!(matches!(inner.finish(), Yielded::Nothing));
        }
        // The outer frame is still installed.
        yield_op(Rc::new(RefCell::new(OpSlot {
            op: take(&chan::<u8>()),
            output: None,
        })));
        assert!(matches!(outer.finish(), Yielded::One(_)));
    }

    #[test]
    #[should_panic(expected = "awaited outside a routine")]
    fn awaiting_outside_a_routine_panics() {
        let waker = Waker::from(Arc::new(NoopWake));
        let mut cx = Context::from_waker(&waker);
        let mut fut = take(&chan::<u8>()).into_future();
        let _ = Pin::new(&mut fut).poll(&mut cx);
    }
}
