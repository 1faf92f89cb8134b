// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative scheduler.
//!
//! Drives routines on the calling thread. A drive-burst keeps resuming a
//! routine for as long as its operations complete immediately; a `Pause`
//! parks it (or queues a retry under the poll policy), a `Sleep` arms a
//! timer. With a time-slice budget a burst is also cut short, at an
//! operation boundary, once it has run longer than the budget.
//!
//! Routine failures (error, panic, malformed suspension) end that routine
//! only and are reported once to the failure observer.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, Wake, Waker};
use std::time::{Duration, Instant};

use tracing::{debug, error, trace, warn};

use crate::config::{PausePolicy, SchedulerConfig};
use crate::diagnostics::Diagnostics;
use crate::error::{RoutineError, RoutineFailure, RuntimeError};
use crate::host::{HostLoop, Next};
use crate::routine::{
    Routine, RoutineFuture, RoutineId, RoutineResult, SharedOp, Signal, YieldFrame, Yielded,
};

const INITIAL_BACKOFF: Duration = Duration::from_nanos(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    /// Inside a drive-burst.
    Running,
    /// Has exactly one job in the host loop.
    Queued,
    /// Registered on channel waiter lists, no job.
    Parked,
    /// Has a timer in the host loop.
    Sleeping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    /// First poll of a fresh routine.
    Start(RoutineId),
    /// Re-probe after a pause.
    Retry(RoutineId),
    /// Re-probe after a forced yield.
    Continue(RoutineId),
    /// Sleep elapsed.
    Wake(RoutineId),
}

impl Job {
    fn id(self) -> RoutineId {
        match self {
            Job::Start(id) | Job::Retry(id) | Job::Continue(id) | Job::Wake(id) => id,
        }
    }
}

struct Task {
    id: RoutineId,
    name: String,
    future: RoutineFuture,
    pending: Option<SharedOp>,
    state: TaskState,
    waker: Waker,
}

/// Ids of parked routines whose channels changed. Filled by wakers,
/// drained by the scheduler between jobs.
#[derive(Default)]
struct WakeQueue {
    ids: Mutex<Vec<RoutineId>>,
}

impl WakeQueue {
    fn push(&self, id: RoutineId) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
    }

    fn take(&self) -> Vec<RoutineId> {
        std::mem::take(&mut *self.ids.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

struct TaskWaker {
    id: RoutineId,
    queue: Arc<WakeQueue>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.queue.push(self.id);
    }
}

type FailureObserver = Box<dyn FnMut(&RoutineFailure)>;

struct Core {
    tasks: HashMap<RoutineId, Task>,
    host: HostLoop<Job>,
    next_id: u64,
    stats: Diagnostics,
}

struct Shared {
    config: SchedulerConfig,
    core: RefCell<Core>,
    /// Drive-bursts in progress on this thread (> 1 when `go` nests).
    depth: Cell<usize>,
    running: Cell<bool>,
    wakes: Arc<WakeQueue>,
    observer: RefCell<Option<FailureObserver>>,
}

/// A routine left parked when the host loop ran out of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledRoutine {
    pub id: RoutineId,
    pub name: String,
    /// Name of the operation it is blocked on.
    pub waiting_on: &'static str,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub diagnostics: Diagnostics,
    /// Routines nothing left in the loop can wake: parked with no channel
    /// activity pending, or sleeping past the end of representable time.
    /// Empty when the run ended on its time limit.
    pub stalled: Vec<StalledRoutine>,
    /// The run hit its time limit with work still pending.
    pub timed_out: bool,
}

impl RunReport {
    /// Every spawned routine finished and none failed.
    pub fn is_clean(&self) -> bool {
        !self.timed_out && self.diagnostics.live == 0 && self.diagnostics.failed == 0
    }
}

enum Burst {
    Progress,
    /// A retry that paused again straight away.
    Stalled,
}

enum BurstEnd {
    Suspended(Burst),
    Finished(Result<(), RoutineError>),
}

enum Polled {
    Yielded(SharedOp),
    Finished(Result<(), RoutineError>),
}

/// Single-threaded cooperative scheduler. Cloning shares the scheduler.
#[derive(Clone)]
pub struct Scheduler {
    shared: Rc<Shared>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            shared: Rc::new(Shared {
                config,
                core: RefCell::new(Core {
                    tasks: HashMap::new(),
                    host: HostLoop::new(),
                    next_id: 0,
                    stats: Diagnostics::default(),
                }),
                depth: Cell::new(0),
                running: Cell::new(false),
                wakes: Arc::new(WakeQueue::default()),
                observer: RefCell::new(None),
            }),
        }
    }

    /// Unbounded drive-bursts.
    pub fn basic() -> Self {
        Self::new(SchedulerConfig::basic())
    }

    /// Bursts are cut after `budget` of wall-clock time.
    pub fn time_sliced(budget: Duration) -> Self {
        Self::new(SchedulerConfig::time_sliced(budget))
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Receive every routine failure, once each. Replaces the default
    /// observer, which logs at error level.
    pub fn on_failure<F>(&self, observer: F)
    where
        F: FnMut(&RoutineFailure) + 'static,
    {
        *self.shared.observer.borrow_mut() = Some(Box::new(observer));
    }

    /// Spawn the routine built by `factory` and start driving it.
    ///
    /// Fire-and-forget: the id is for diagnostics only.
    pub fn go<F, Fut>(&self, name: impl Into<String>, factory: F) -> RoutineId
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RoutineResult> + 'static,
    {
        self.spawn(Routine::new(name, factory()))
    }

    /// Spawn an already-built routine.
    ///
    /// The basic variant runs the first drive-burst right here. The
    /// time-sliced variant, and any spawn issued from inside a running
    /// routine, defers it to the next microtask checkpoint.
    pub fn spawn(&self, routine: Routine) -> RoutineId {
        let id = self.register(routine);
        if self.shared.depth.get() > 0 || self.time_slice().is_some() {
            self.shared
                .core
                .borrow_mut()
                .host
                .defer_micro(Job::Start(id));
        } else {
            self.drive(Job::Start(id));
            self.flush_wakes();
        }
        id
    }

    /// Drive the host loop until nothing is runnable and no timer is armed.
    pub fn run(&self) -> Result<RunReport, RuntimeError> {
        self.run_until(None)
    }

    /// Like [`run`](Self::run), but stop after `limit` of wall-clock time.
    /// A limit past the end of representable time is no limit.
    pub fn run_for(&self, limit: Duration) -> Result<RunReport, RuntimeError> {
        self.run_until(Instant::now().checked_add(limit))
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let core = self.shared.core.borrow();
        let mut diagnostics = core.stats;
        diagnostics.ticks = core.host.ticks();
        diagnostics
    }

    fn time_slice(&self) -> Option<Duration> {
        self.shared.config.time_slice()
    }

    fn register(&self, routine: Routine) -> RoutineId {
        let (name, future) = routine.into_parts();
        let mut core = self.shared.core.borrow_mut();
        core.next_id += 1;
        let id = RoutineId(core.next_id);
        debug!(routine = id.0, name = %name, "routine spawned");
        let waker = Waker::from(Arc::new(TaskWaker {
            id,
            queue: self.shared.wakes.clone(),
        }));
        core.tasks.insert(
            id,
            Task {
                id,
                name,
                future,
                pending: None,
                state: TaskState::Queued,
                waker,
            },
        );
        core.stats.spawned += 1;
        core.stats.live += 1;
        id
    }

    fn run_until(&self, deadline: Option<Instant>) -> Result<RunReport, RuntimeError> {
        if self.shared.running.get() || self.shared.depth.get() > 0 {
            return Err(RuntimeError::NestedRun);
        }
        self.shared.running.set(true);
        let _running = RunningGuard(&self.shared.running);

        let polling = self.shared.config.pause == PausePolicy::Poll;
        let mut backoff = INITIAL_BACKOFF;
        let mut fruitless = 0usize;
        let mut timed_out = false;

        loop {
            self.flush_wakes();
            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                timed_out = !self.shared.core.borrow().host.is_idle();
                break;
            }

            let next = self.shared.core.borrow_mut().host.next(now);
            match next {
                Next::Run(job) => match self.drive(job) {
                    Burst::Progress => {
                        fruitless = 0;
                        backoff = INITIAL_BACKOFF;
                    }
                    Burst::Stalled => {
                        fruitless += 1;
                        // Every job run since the last progress was a failed
                        // retry: back off instead of spinning.
                        if polling && fruitless >= self.shared.core.borrow().host.runnable() {
                            self.backoff(backoff, deadline);
                            backoff = (backoff * 2).min(self.shared.config.poll_backoff_max());
                            fruitless = 0;
                        }
                    }
                },
                Next::Wait(at) => {
                    let until = deadline.map_or(at, |d| d.min(at));
                    std::thread::sleep(until.saturating_duration_since(now));
                }
                Next::Idle => break,
            }
        }

        Ok(self.report(timed_out))
    }

    fn backoff(&self, backoff: Duration, deadline: Option<Instant>) {
        let now = Instant::now();
        let mut pause = backoff;
        let next_timer = self.shared.core.borrow().host.next_deadline();
        for bound in [next_timer, deadline].into_iter().flatten() {
            pause = pause.min(bound.saturating_duration_since(now));
        }
        trace!(?pause, "all retries fruitless, backing off");
        std::thread::sleep(pause);
    }

    fn report(&self, timed_out: bool) -> RunReport {
        let diagnostics = self.diagnostics();
        let core = self.shared.core.borrow();
        let mut stalled: Vec<StalledRoutine> = if core.host.is_idle() {
            core.tasks
                .values()
                // At idle no timer is armed, so a sleeper here never wakes.
                .filter(|t| matches!(t.state, TaskState::Parked | TaskState::Sleeping))
                .map(|t| StalledRoutine {
                    id: t.id,
                    name: t.name.clone(),
                    waiting_on: t.pending.as_ref().map_or("?", |op| op.borrow().name()),
                })
                .collect()
        } else {
            Vec::new()
        };
        stalled.sort_by_key(|s| s.id);
        if !stalled.is_empty() {
            warn!(
                count = stalled.len(),
                routines = ?stalled.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
                "host loop idle with routines blocked forever"
            );
        }
        RunReport {
            diagnostics,
            stalled,
            timed_out,
        }
    }

    /// Queue retries for parked routines whose channels changed.
    fn flush_wakes(&self) {
        let ids = self.shared.wakes.take();
        if ids.is_empty() {
            return;
        }
        let sliced = self.time_slice().is_some();
        let mut core = self.shared.core.borrow_mut();
        let Core {
            tasks, host, stats, ..
        } = &mut *core;
        for id in ids {
            let Some(task) = tasks.get_mut(&id) else {
                continue;
            };
            // Spurious or stale wakeup.
            if task.state != TaskState::Parked {
                continue;
            }
            task.state = TaskState::Queued;
            stats.parked -= 1;
            if sliced {
                host.defer_micro(Job::Retry(id));
            } else {
                host.defer(Job::Retry(id));
            }
        }
    }

    fn drive(&self, job: Job) -> Burst {
        let id = job.id();
        let Some(mut task) = self.shared.core.borrow_mut().tasks.remove(&id) else {
            return Burst::Progress;
        };
        if task.state == TaskState::Sleeping {
            self.shared.core.borrow_mut().stats.sleeping -= 1;
        }
        task.state = TaskState::Running;

        let depth = self.shared.depth.get();
        self.shared.depth.set(depth + 1);
        let started = Instant::now();
        let end = self.burst(&mut task, job, started);
        {
            let mut core = self.shared.core.borrow_mut();
            let elapsed = started.elapsed();
            if elapsed > core.stats.longest_burst {
                core.stats.longest_burst = elapsed;
            }
        }

        let burst = match end {
            BurstEnd::Suspended(burst) => {
                self.shared.core.borrow_mut().tasks.insert(id, task);
                burst
            }
            BurstEnd::Finished(result) => {
                self.finish(task, result);
                Burst::Progress
            }
        };
        self.shared.depth.set(depth);
        burst
    }

    fn burst(&self, task: &mut Task, job: Job, started: Instant) -> BurstEnd {
        let budget = self.time_slice();
        let (mut need_poll, mut progressed) = match job {
            Job::Start(_) => (true, true),
            Job::Retry(_) => {
                // Registrations on channels that did not change would
                // otherwise outlive this wait.
                if let Some(op) = &task.pending {
                    op.borrow().unpark(&task.waker);
                }
                self.shared.core.borrow_mut().stats.retries += 1;
                (false, false)
            }
            Job::Continue(_) => (false, true),
            Job::Wake(_) => {
                if let Some(op) = &task.pending {
                    op.borrow_mut().resume();
                }
                (true, true)
            }
        };

        loop {
            if need_poll {
                match poll_routine(task) {
                    Polled::Yielded(op) => task.pending = Some(op),
                    Polled::Finished(result) => return BurstEnd::Finished(result),
                }
                if budget.is_some_and(|b| started.elapsed() > b) {
                    trace!(routine = task.id.0, elapsed = ?started.elapsed(), "time slice exhausted");
                    task.state = TaskState::Queued;
                    let mut core = self.shared.core.borrow_mut();
                    core.stats.forced_yields += 1;
                    core.host.defer(Job::Continue(task.id));
                    return BurstEnd::Suspended(Burst::Progress);
                }
            }

            let Some(op) = task.pending.clone() else {
                return BurstEnd::Finished(Err(RoutineError::NoOperation));
            };
            let signal = match panic::catch_unwind(AssertUnwindSafe(|| op.borrow_mut().probe())) {
                Ok(signal) => signal,
                Err(payload) => {
                    return BurstEnd::Finished(Err(RoutineError::Panicked(panic_message(
                        payload.as_ref(),
                    ))))
                }
            };
            self.shared.core.borrow_mut().stats.probes += 1;

            match signal {
                Signal::Continue => {
                    need_poll = true;
                    progressed = true;
                }
                Signal::Pause => {
                    self.pause(task, &op);
                    let burst = if progressed {
                        Burst::Progress
                    } else {
                        Burst::Stalled
                    };
                    return BurstEnd::Suspended(burst);
                }
                Signal::Sleep(duration) => {
                    trace!(routine = task.id.0, ?duration, "routine sleeping");
                    task.state = TaskState::Sleeping;
                    let mut core = self.shared.core.borrow_mut();
                    core.stats.sleeping += 1;
                    match Instant::now().checked_add(duration) {
                        Some(deadline) => core.host.defer_at(deadline, Job::Wake(task.id)),
                        None => debug!(routine = task.id.0, "sleep never elapses"),
                    }
                    return BurstEnd::Suspended(Burst::Progress);
                }
                Signal::Fork(routine) => {
                    let child = self.register(routine);
                    trace!(routine = task.id.0, child = child.0, "routine forked");
                    self.shared
                        .core
                        .borrow_mut()
                        .host
                        .defer_micro(Job::Start(child));
                    op.borrow_mut().resume();
                    need_poll = true;
                    progressed = true;
                }
                Signal::Invalid(reason) => {
                    let name = op.borrow().name();
                    return BurstEnd::Finished(Err(RoutineError::MalformedOperation {
                        op: name,
                        reason,
                    }));
                }
            }
        }
    }

    fn pause(&self, task: &mut Task, op: &SharedOp) {
        let config = &self.shared.config;
        let mut core = self.shared.core.borrow_mut();
        core.stats.pauses += 1;
        if config.pause == PausePolicy::Park && op.borrow().park(&task.waker) {
            trace!(routine = task.id.0, op = op.borrow().name(), "routine parked");
            task.state = TaskState::Parked;
            core.stats.parked += 1;
            return;
        }
        task.state = TaskState::Queued;
        if config.time_slice().is_some() {
            core.host.defer_micro(Job::Retry(task.id));
        } else {
            core.host.defer(Job::Retry(task.id));
        }
    }

    fn finish(&self, task: Task, result: Result<(), RoutineError>) {
        {
            let mut core = self.shared.core.borrow_mut();
            core.stats.live -= 1;
            match result {
                Ok(()) => core.stats.completed += 1,
                Err(_) => core.stats.failed += 1,
            }
        }
        let Task { id, name, .. } = task;
        match result {
            Ok(()) => debug!(routine = id.0, name = %name, "routine concluded"),
            Err(error) => self.notify_failure(RoutineFailure { id, name, error }),
        }
    }

    fn notify_failure(&self, failure: RoutineFailure) {
        // Taken out for the call so the observer may use the scheduler.
        let observer = self.shared.observer.borrow_mut().take();
        match observer {
            Some(mut observer) => {
                debug!(routine = failure.id.0, error = %failure.error, "routine failed");
                observer(&failure);
                let mut slot = self.shared.observer.borrow_mut();
                if slot.is_none() {
                    *slot = Some(observer);
                }
            }
            None => error!(
                routine = failure.id.0,
                name = %failure.name,
                error = %failure.error,
                "routine failed"
            ),
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.shared.config)
            .field("diagnostics", &self.diagnostics())
            .finish()
    }
}

struct RunningGuard<'a>(&'a Cell<bool>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

fn poll_routine(task: &mut Task) -> Polled {
    let mut cx = Context::from_waker(&task.waker);
    let frame = YieldFrame::enter();
    let result = panic::catch_unwind(AssertUnwindSafe(|| task.future.as_mut().poll(&mut cx)));
    let yielded = frame.finish();
    match result {
        Err(payload) => Polled::Finished(Err(RoutineError::Panicked(panic_message(
            payload.as_ref(),
        )))),
        Ok(Poll::Ready(Ok(()))) => Polled::Finished(Ok(())),
        Ok(Poll::Ready(Err(e))) => Polled::Finished(Err(RoutineError::Failed(e))),
        Ok(Poll::Pending) => match yielded {
            Yielded::One(op) => Polled::Yielded(op),
            Yielded::Nothing => Polled::Finished(Err(RoutineError::NoOperation)),
            Yielded::Many(n) => Polled::Finished(Err(RoutineError::ConcurrentOperations(n))),
        },
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
