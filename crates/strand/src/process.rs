// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coroutine driver.
//!
//! A [`Coroutine`] is a suspendable computation written as an explicit
//! state machine: each resumption returns either a final value or the
//! channel operation it wants to block on. [`Process`] issues those
//! operations and feeds the results back, looping instead of recursing
//! when an operation completes synchronously.

use std::cell::RefCell;
use std::rc::Rc;

use crate::channel::Op;

/// Input fed into a coroutine on resumption.
#[derive(Debug)]
pub enum Resume<T> {
    /// First resumption; no operation preceded it.
    Start,
    /// Result of the take the coroutine suspended on.
    Value(Option<T>),
    /// Ack of the put the coroutine suspended on (`false`: channel closed).
    Ack(bool),
}

/// What a coroutine does with a resumption.
#[derive(Debug)]
pub enum Step<T> {
    /// The computation finished.
    Done(Option<T>),
    /// Suspend on a channel operation; its result feeds the next resume.
    Suspend(Op<T>),
}

/// A suspendable computation. Implementations only ever interact with
/// channels through the operations they return; the driver owns the
/// callbacks.
pub trait Coroutine<T> {
    fn resume(&mut self, input: Resume<T>) -> Step<T>;
}

struct Driver<T> {
    coroutine: Option<Box<dyn Coroutine<T>>>,
    on_complete: Option<Box<dyn FnOnce(Option<T>)>>,
    /// Resumption waiting to be consumed by the active drive loop.
    pending: Option<Resume<T>>,
    /// Re-entrancy guard: true while a drive loop is on the stack.
    running: bool,
    finished: bool,
}

/// Drives one coroutine against its channels until completion.
pub struct Process<T> {
    inner: Rc<RefCell<Driver<T>>>,
}

impl<T> Clone for Process<T> {
    fn clone(&self) -> Self {
        Process {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Process<T> {
    pub fn new(
        coroutine: impl Coroutine<T> + 'static,
        on_complete: impl FnOnce(Option<T>) + 'static,
    ) -> Self {
        Process {
            inner: Rc::new(RefCell::new(Driver {
                coroutine: Some(Box::new(coroutine)),
                on_complete: Some(Box::new(on_complete)),
                pending: None,
                running: false,
                finished: false,
            })),
        }
    }

    /// Start driving the computation.
    pub fn run(&self) {
        self.step(Resume::Start);
    }

    fn step(&self, input: Resume<T>) {
        {
            let mut driver = self.inner.borrow_mut();
            if driver.finished {
                return;
            }
            driver.pending = Some(input);
            if driver.running {
                // The loop below is already on the stack; it consumes
                // `pending` on its next turn.
                return;
            }
            driver.running = true;
        }
        loop {
            let input = {
                let mut driver = self.inner.borrow_mut();
                match driver.pending.take() {
                    Some(input) => input,
                    None => {
                        driver.running = false;
                        return;
                    }
                }
            };
            // The coroutine leaves the driver while it runs so a channel
            // callback re-entering `step` never hits the borrow.
            let mut coroutine = self.inner.borrow_mut().coroutine.take();
            let step = match coroutine.as_mut() {
                Some(coroutine) => coroutine.resume(input),
                None => {
                    self.inner.borrow_mut().running = false;
                    return;
                }
            };
            self.inner.borrow_mut().coroutine = coroutine;
            match step {
                Step::Done(value) => {
                    let on_complete = {
                        let mut driver = self.inner.borrow_mut();
                        driver.finished = true;
                        driver.running = false;
                        driver.coroutine = None;
                        driver.on_complete.take()
                    };
                    if let Some(on_complete) = on_complete {
                        on_complete(value);
                    }
                    return;
                }
                Step::Suspend(Op::Take(channel)) => {
                    let process = self.clone();
                    channel.take(move |value| process.step(Resume::Value(value)));
                }
                Step::Suspend(Op::Put(channel, value)) => {
                    let process = self.clone();
                    channel.put(value, move |accepted| process.step(Resume::Ack(accepted)));
                }
            }
            // A synchronous completion already stored the next resumption
            // in `pending`; otherwise the loop releases the guard and the
            // parked callback drives the next step.
        }
    }
}
