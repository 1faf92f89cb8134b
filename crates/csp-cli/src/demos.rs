// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Demo routines. Each demo builds its own channels and spawns onto the
//! scheduler it is given.

use std::time::Duration;

use colored::Color;
use csp_rt::{alts, chan, put, ready, sleep, take, yield_now, Scheduler};

use crate::output;

/// Two puts, a sleep, a third put; three takes on the other side.
pub fn basic(sched: &Scheduler, interval: Duration) {
    let ch = chan();

    let tx = ch.clone();
    sched.go("basic-producer", move || async move {
        put(&tx, 1).await;
        put(&tx, 2).await;
        sleep(interval).await;
        put(&tx, 3).await;
        Ok(())
    });

    sched.go("basic-consumer", move || async move {
        for label in ["First", "Second", "Third"] {
            let v: i32 = take(&ch).await;
            output::value(&format!("{label} value is"), v);
        }
        Ok(())
    });
}

/// One value on each of two channels; a selector picks them up in order.
pub fn alts_race(sched: &Scheduler) {
    let chan1 = chan();
    let chan2 = chan();

    let (a, b) = (chan1.clone(), chan2.clone());
    sched.go("alts-producer", move || async move {
        put(&a, "Value on chan 1").await;
        put(&b, "Value on chan 2").await;
        Ok(())
    });

    sched.go("alts-selector", move || async move {
        for _ in 0..2 {
            let (_, v) = alts(&[&chan1, &chan2]).await;
            output::value("alts:", v);
        }
        Ok(())
    });
}

/// Two routines passing ping and pong over one channel. `cycles` of `None`
/// runs forever.
pub fn ping_pong(sched: &Scheduler, interval: Duration, cycles: Option<u64>) {
    let ch = chan::<&'static str>();
    let rounds = move || (0..).take_while(move |i| cycles.map_or(true, |n| *i < n));

    let c = ch.clone();
    sched.go("ping", move || async move {
        for _ in rounds() {
            put(&c, "ping").await;
            output::log(Color::Cyan, "PING", "Sent ping");
            sleep(interval).await;
            let res = take(&c).await;
            output::log(Color::Cyan, "PING", &format!("Received {res}"));
            sleep(interval).await;
        }
        Ok(())
    });

    sched.go("pong", move || async move {
        for _ in rounds() {
            let val = take(&ch).await;
            output::log(Color::Magenta, "PONG", &format!("Received {val}"));
            sleep(interval).await;
            put(&ch, "pong").await;
            output::log(Color::Magenta, "PONG", "Sent pong");
            sleep(interval).await;
        }
        Ok(())
    });
}

/// A long computation made of immediate steps, pausing every thousandth.
/// Under a time slice it is also cut at slice boundaries.
pub fn mixed(sched: &Scheduler, iterations: u64) {
    sched.go("mixed", move || async move {
        for i in 0..iterations {
            if i % 1000 == 0 {
                output::log(Color::White, "MIXED", &format!("Long operation at iteration {i}"));
                yield_now().await;
            } else {
                ready(()).await;
            }
        }
        Ok(())
    });
}
