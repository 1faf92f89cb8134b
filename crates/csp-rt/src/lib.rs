// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! CSP runtime: cooperative routines over rendezvous channels.
//!
//! Routines run on one thread and interleave only at operation
//! boundaries. Channels hold at most one value, so a `put` and the `take`
//! that empties it form a rendezvous.
//!
//! Components:
//! - channel: capacity-1 slot with waiter list
//! - op: put/take/alts/sleep/fork probes
//! - routine: async routine bodies and the yield frame
//! - scheduler: drive-bursts, pause policies, time slicing
//! - host: macrotask/microtask/timer queues
//! - config: TOML + env scheduler settings
//!
//! ```no_run
//! use csp_rt::{chan, put, take, Scheduler};
//!
//! let sched = Scheduler::basic();
//! let ch = chan();
//! let tx = ch.clone();
//! sched.go("producer", move || async move {
//!     put(&tx, "hello").await;
//!     Ok(())
//! });
//! sched.go("consumer", move || async move {
//!     println!("{}", take(&ch).await);
//!     Ok(())
//! });
//! sched.run().unwrap();
//! ```

pub mod channel;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod host;
pub mod op;
pub mod routine;
pub mod scheduler;

pub use channel::{chan, Chan, ChannelId};
pub use config::{PausePolicy, SchedulerConfig, DEFAULT_TIME_SLICE};
pub use diagnostics::Diagnostics;
pub use error::{ConfigError, RoutineError, RoutineFailure, RuntimeError};
pub use op::{alts, fork, put, ready, sleep, take, yield_now, Operation, Step};
pub use routine::{suspend, Routine, RoutineId, RoutineResult, Suspend};
pub use scheduler::{RunReport, Scheduler, StalledRoutine};
