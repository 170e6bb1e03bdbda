// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! End-to-end scenarios: long channel chains must run in constant stack,
//! and coroutine pipelines must move every value exactly once.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use strand::alts::{alts, AltResult, AltsOptions};
use strand::channel::{self, Channel, Op};
use strand::dispatch::Dispatcher;
use strand::process::{Coroutine, Process, Resume, Step};

/// A value put into the head of a long chain of unbuffered channels is
/// relayed hop by hop through the dispatcher; direct invocation would
/// need one stack frame per hop.
#[test]
fn value_propagates_through_deep_chain() {
    const HOPS: usize = 20_000;
    let d = Dispatcher::new();
    let channels: Vec<Channel<u64>> = (0..HOPS).map(|_| channel::unbuffered(&d)).collect();
    let result = Rc::new(Cell::new(None));

    for i in 0..HOPS - 1 {
        let next = channels[i + 1].clone();
        channels[i].take(move |v| {
            if let Some(v) = v {
                next.put(v + 1, |_| {});
            }
        });
    }
    {
        let result = result.clone();
        channels[HOPS - 1].take(move |v| result.set(v));
    }

    channels[0].put(0, |_| {});
    assert_eq!(result.get(), Some((HOPS - 1) as u64));
}

/// Closing the head of a long chain cascades the sentinel to the tail
/// without growing the stack.
#[test]
fn close_cascades_through_deep_chain() {
    const HOPS: usize = 20_000;
    let d = Dispatcher::new();
    let channels: Vec<Channel<u8>> = (0..HOPS).map(|_| channel::unbuffered(&d)).collect();
    let closed_tail = Rc::new(Cell::new(false));

    for i in 0..HOPS - 1 {
        let next = channels[i + 1].clone();
        channels[i].take(move |v| {
            if v.is_none() {
                next.close();
            }
        });
    }
    {
        let closed_tail = closed_tail.clone();
        channels[HOPS - 1].take(move |v| closed_tail.set(v.is_none()));
    }

    channels[0].close();
    assert!(closed_tail.get());
}

struct Producer {
    out: Channel<i64>,
    next: i64,
    limit: i64,
}

impl Coroutine<i64> for Producer {
    fn resume(&mut self, input: Resume<i64>) -> Step<i64> {
        if let Resume::Ack(false) = input {
            return Step::Done(None);
        }
        if self.next == self.limit {
            return Step::Done(None);
        }
        let value = self.next;
        self.next += 1;
        Step::Suspend(Op::Put(self.out.clone(), value))
    }
}

/// Takes from `input`, puts each value doubled onto `output`, closes the
/// output when the input is exhausted.
struct Doubler {
    input: Channel<i64>,
    output: Channel<i64>,
    carried: Option<i64>,
}

impl Coroutine<i64> for Doubler {
    fn resume(&mut self, input: Resume<i64>) -> Step<i64> {
        match input {
            Resume::Start | Resume::Ack(true) => Step::Suspend(Op::Take(self.input.clone())),
            Resume::Ack(false) => Step::Done(None),
            Resume::Value(Some(v)) => {
                self.carried = Some(v);
                Step::Suspend(Op::Put(self.output.clone(), v * 2))
            }
            Resume::Value(None) => Step::Done(self.carried.take()),
        }
    }
}

struct Collector {
    input: Channel<i64>,
    seen: Rc<RefCell<Vec<i64>>>,
}

impl Coroutine<i64> for Collector {
    fn resume(&mut self, input: Resume<i64>) -> Step<i64> {
        match input {
            Resume::Start | Resume::Ack(_) => Step::Suspend(Op::Take(self.input.clone())),
            Resume::Value(Some(v)) => {
                self.seen.borrow_mut().push(v);
                Step::Suspend(Op::Take(self.input.clone()))
            }
            Resume::Value(None) => Step::Done(None),
        }
    }
}

/// Races takes across the remaining open channels until all are closed,
/// dropping a channel once it delivers the sentinel.
fn merge(channels: Vec<Channel<i32>>, seen: Rc<RefCell<Vec<i32>>>) {
    if channels.is_empty() {
        return;
    }
    let ops = channels.iter().cloned().map(Op::Take).collect();
    alts(ops, AltsOptions::default(), move |result| match result {
        AltResult::Take {
            value: Some(v), ..
        } => {
            seen.borrow_mut().push(v);
            merge(channels, seen);
        }
        AltResult::Take {
            value: None,
            channel,
        } => {
            let rest = channels.into_iter().filter(|c| *c != channel).collect();
            merge(rest, seen);
        }
        other => panic!("merge only races takes, got {:?}", other),
    });
}

/// Fan-in over alts: both sources drain completely and every value
/// arrives exactly once, whichever channel happens to win each round.
#[test]
fn alts_merge_drains_both_sources_exactly_once() {
    let d = Dispatcher::new();
    let a = channel::buffered(&d, 8).unwrap();
    let b = channel::buffered(&d, 8).unwrap();
    for i in 0..8 {
        a.put(i, |_| {});
        b.put(100 + i, |_| {});
    }
    a.close();
    b.close();

    let seen = Rc::new(RefCell::new(Vec::new()));
    merge(vec![a, b], seen.clone());

    let mut seen = seen.borrow().clone();
    seen.sort_unstable();
    let expected: Vec<i32> = (0..8).chain(100..108).collect();
    assert_eq!(seen, expected);
}

#[test]
fn three_stage_pipeline_moves_every_value_once() {
    let d = Dispatcher::new();
    let upstream = channel::buffered(&d, 4).unwrap();
    let downstream = channel::unbuffered(&d);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let producer_done = Rc::new(Cell::new(false));
    let collector_done = Rc::new(Cell::new(false));

    let producer = Process::new(
        Producer {
            out: upstream.clone(),
            next: 0,
            limit: 50,
        },
        {
            let upstream = upstream.clone();
            let producer_done = producer_done.clone();
            move |_| {
                upstream.close();
                producer_done.set(true);
            }
        },
    );
    let doubler = Process::new(
        Doubler {
            input: upstream,
            output: downstream.clone(),
            carried: None,
        },
        {
            let downstream = downstream.clone();
            move |_| downstream.close()
        },
    );
    let collector = Process::new(
        Collector {
            input: downstream,
            seen: seen.clone(),
        },
        {
            let collector_done = collector_done.clone();
            move |_| collector_done.set(true)
        },
    );

    producer.run();
    doubler.run();
    collector.run();

    assert!(producer_done.get());
    assert!(collector_done.get());
    let seen = seen.borrow();
    assert_eq!(seen.len(), 50);
    for (i, v) in seen.iter().enumerate() {
        assert_eq!(*v, (i as i64) * 2);
    }
}
