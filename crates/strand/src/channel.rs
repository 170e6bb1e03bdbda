// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! CSP channel: a rendezvous queue with optional buffering, backpressure,
//! and one-way close.
//!
//! A `Channel<T>` is a cheap handle; clones share one queue. Values move
//! from producers to consumers through three stations: a waiting taker
//! (direct rendezvous), the buffer, or a parked put. Delivery always
//! prefers a waiting taker, so a channel never holds a buffered value
//! while a taker is queued. Closing is one-way and idempotent: buffered
//! values still drain, then every waiting and future taker receives the
//! closed sentinel (`None`).
//!
//! Callbacks of the operation being issued run on the caller's stack;
//! callbacks of *other* parked operations woken as a side effect are
//! handed to the [`Dispatcher`] so cascades stay flat.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::buffer::{Buffer, BufferError, FixedBuffer, PromiseBuffer};
use crate::dispatch::Dispatcher;
use crate::transform::{Admission, ErrorHook, Recovery, Transform, TransformError};

/// Dead queue entries tolerated before a park sweeps the queue.
const MAX_DIRTY: usize = 64;
/// Hard cap on pending operations per queue. Exceeding it means a
/// producer or consumer is ignoring backpressure; that is a programming
/// error and fails fast.
const MAX_QUEUE_SIZE: usize = 1024;

/// How a channel operation completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    /// The callback already ran on the caller's stack.
    Completed,
    /// The operation parked; its callback fires when a counterpart
    /// arrives or the channel closes.
    Parked,
}

/// A channel operation descriptor, used by coroutine suspensions and by
/// [`alts`](crate::alts::alts) candidates.
#[derive(Debug)]
pub enum Op<T> {
    Take(Channel<T>),
    Put(Channel<T>, T),
}

/// One-shot liveness token. Every registration of a single race shares
/// one; spending it invalidates the siblings in place, so channels skip
/// dead queue entries instead of searching for them.
#[derive(Clone)]
pub(crate) struct Flag(Rc<Cell<bool>>);

impl Flag {
    pub(crate) fn new() -> Self {
        Flag(Rc::new(Cell::new(true)))
    }

    pub(crate) fn is_active(&self) -> bool {
        self.0.get()
    }

    /// Spend the token. Returns false if it was already spent.
    pub(crate) fn commit(&self) -> bool {
        let was_active = self.0.get();
        self.0.set(false);
        was_active
    }
}

/// How a registration against a channel resolved.
pub(crate) enum Registration {
    /// The callback already ran.
    Completed,
    /// Queued; the callback fires later.
    Parked,
    /// The shared token was spent before this registration was attempted.
    Dead,
}

struct PendingTake<T> {
    flag: Flag,
    callback: Box<dyn FnOnce(Option<T>)>,
}

struct PendingPut<T> {
    flag: Flag,
    /// Set once the first item is consumed. The put commits and acks at
    /// that moment; an uncommitted put whose token dies was never
    /// observed and is dropped whole, while a committed one keeps its
    /// remaining items deliverable.
    committed: bool,
    /// Admitted items not yet delivered. The transform already ran.
    items: VecDeque<T>,
    /// Taken when the ack fires.
    callback: Option<Box<dyn FnOnce(bool)>>,
}

struct State<T> {
    buf: Option<Box<dyn Buffer<T>>>,
    takes: VecDeque<PendingTake<T>>,
    puts: VecDeque<PendingPut<T>>,
    xform: Option<Box<dyn Transform<T>>>,
    hook: Option<ErrorHook<T>>,
    closed: bool,
    dirty_takes: usize,
    dirty_puts: usize,
}

/// Rendezvous-only channel: every put waits for a taker.
pub fn unbuffered<T: 'static>(dispatcher: &Dispatcher) -> Channel<T> {
    Channel::build(dispatcher, None, None, None)
}

/// Channel backed by a fixed buffer of capacity `n`.
pub fn buffered<T: 'static>(dispatcher: &Dispatcher, n: usize) -> Result<Channel<T>, BufferError> {
    Ok(Channel::build(
        dispatcher,
        Some(Box::new(FixedBuffer::new(n)?)),
        None,
        None,
    ))
}

/// Channel over a caller-chosen buffer strategy.
pub fn with_buffer<T: 'static>(dispatcher: &Dispatcher, buf: Box<dyn Buffer<T>>) -> Channel<T> {
    Channel::build(dispatcher, Some(buf), None, None)
}

/// Channel that latches its first value and hands it to every taker,
/// past and future, forever.
pub fn promise_chan<T: Clone + 'static>(dispatcher: &Dispatcher) -> Channel<T> {
    Channel::build(dispatcher, Some(Box::new(PromiseBuffer::new())), None, None)
}

/// Channel whose puts run through an admission transform. A failing step
/// is routed to `hook`; without one the offending input is discarded.
pub fn transduced<T: 'static>(
    dispatcher: &Dispatcher,
    buf: Option<Box<dyn Buffer<T>>>,
    xform: Box<dyn Transform<T>>,
    hook: Option<ErrorHook<T>>,
) -> Channel<T> {
    Channel::build(dispatcher, buf, Some(xform), hook)
}

/// Error from [`Channel::try_take`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryTakeError {
    /// No value available right now.
    Empty,
    /// Closed and fully drained.
    Closed,
}

/// Error from [`Channel::try_put`]. Carries the value back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryPutError<T> {
    /// No waiting taker and no buffer room; the put would park.
    WouldBlock(T),
    /// The channel is closed.
    Closed(T),
}

enum PutFlow<T> {
    /// Every admitted item was placed; ack now.
    Done { close_after: bool },
    /// The channel is closed; the value comes back untouched.
    Rejected(T),
    /// Nothing can be placed; the value comes back untouched.
    Blocked(T),
    /// Some admitted items reached takers; the rest must park.
    Leftover { items: VecDeque<T>, close_after: bool },
}

pub struct Channel<T> {
    state: Rc<RefCell<State<T>>>,
    dispatcher: Dispatcher,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel {
            state: Rc::clone(&self.state),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<T> PartialEq for Channel<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl<T> Eq for Channel<T> {}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Channel({:p})", Rc::as_ptr(&self.state))
    }
}

impl<T: 'static> Channel<T> {
    fn build(
        dispatcher: &Dispatcher,
        buf: Option<Box<dyn Buffer<T>>>,
        xform: Option<Box<dyn Transform<T>>>,
        hook: Option<ErrorHook<T>>,
    ) -> Self {
        Channel {
            state: Rc::new(RefCell::new(State {
                buf,
                takes: VecDeque::new(),
                puts: VecDeque::new(),
                xform,
                hook,
                closed: false,
                dirty_takes: 0,
                dirty_puts: 0,
            })),
            dispatcher: dispatcher.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// Take the next value. The callback receives `Some(value)`, or `None`
    /// once the channel is closed and drained. It runs synchronously when
    /// a value or the sentinel is already available.
    pub fn take(&self, callback: impl FnOnce(Option<T>) + 'static) -> OpStatus {
        match self.take_with(Flag::new(), Box::new(callback)) {
            Registration::Completed => OpStatus::Completed,
            Registration::Parked => OpStatus::Parked,
            Registration::Dead => unreachable!("fresh token cannot be spent"),
        }
    }

    /// Put a value. The callback receives `true` when the value is
    /// admitted and `false` when the channel is closed. It runs
    /// synchronously unless the put parks.
    pub fn put(&self, value: T, callback: impl FnOnce(bool) + 'static) -> OpStatus {
        match self.put_with(value, Flag::new(), Box::new(callback)) {
            Registration::Completed => OpStatus::Completed,
            Registration::Parked => OpStatus::Parked,
            Registration::Dead => unreachable!("fresh token cannot be spent"),
        }
    }

    /// Non-blocking take.
    pub fn try_take(&self) -> Result<T, TryTakeError> {
        let ready = self.poll_take();
        self.dispatcher.flush();
        match ready {
            Some(Some(value)) => Ok(value),
            Some(None) => Err(TryTakeError::Closed),
            None => Err(TryTakeError::Empty),
        }
    }

    /// Non-blocking put. The admission transform only runs once the
    /// channel can actually accept, so a rejected value comes back intact.
    pub fn try_put(&self, value: T) -> Result<(), TryPutError<T>> {
        match self.poll_put(value) {
            PutFlow::Done { close_after } => {
                if close_after {
                    self.close_inner();
                }
                self.dispatcher.flush();
                Ok(())
            }
            PutFlow::Leftover { items, close_after } => {
                // Items already handed to takers can't be recalled; the
                // remainder stays queued as a committed put.
                self.park_committed_remainder(items);
                if close_after {
                    self.close_inner();
                }
                self.dispatcher.flush();
                Ok(())
            }
            PutFlow::Rejected(value) => {
                self.dispatcher.flush();
                Err(TryPutError::Closed(value))
            }
            PutFlow::Blocked(value) => {
                self.dispatcher.flush();
                Err(TryPutError::WouldBlock(value))
            }
        }
    }

    /// Close the channel. Idempotent. No new puts are admitted; buffered
    /// values keep draining to takers; once the buffer is empty every
    /// waiting and future taker receives the sentinel.
    pub fn close(&self) {
        self.close_inner();
        self.dispatcher.flush();
    }

    pub(crate) fn take_with(
        &self,
        flag: Flag,
        callback: Box<dyn FnOnce(Option<T>)>,
    ) -> Registration {
        if !flag.is_active() {
            return Registration::Dead;
        }
        let registration = match self.poll_take() {
            Some(value) => {
                flag.commit();
                callback(value);
                Registration::Completed
            }
            None => {
                self.park_take(flag, callback);
                Registration::Parked
            }
        };
        self.dispatcher.flush();
        registration
    }

    pub(crate) fn put_with(
        &self,
        value: T,
        flag: Flag,
        callback: Box<dyn FnOnce(bool)>,
    ) -> Registration {
        if !flag.is_active() {
            return Registration::Dead;
        }
        let registration = match self.poll_put(value) {
            PutFlow::Done { close_after } => {
                flag.commit();
                if close_after {
                    self.close_inner();
                }
                callback(true);
                Registration::Completed
            }
            PutFlow::Rejected(_value) => {
                flag.commit();
                callback(false);
                Registration::Completed
            }
            PutFlow::Blocked(value) => {
                // The transform runs at admission time even for a put that
                // parks, so the parked request holds admitted items.
                let (items, close_after) = self.admit(value);
                if items.is_empty() {
                    flag.commit();
                    if close_after {
                        self.close_inner();
                    }
                    callback(true);
                    Registration::Completed
                } else {
                    self.park_put(flag, items, Some(callback));
                    if close_after {
                        self.close_inner();
                    }
                    Registration::Parked
                }
            }
            PutFlow::Leftover { items, close_after } => {
                // The leading items already reached takers, so the race
                // is decided: commit and ack now, leave the remainder
                // queued as a committed put.
                flag.commit();
                self.park_committed_remainder(items);
                if close_after {
                    self.close_inner();
                }
                callback(true);
                Registration::Completed
            }
        };
        self.dispatcher.flush();
        registration
    }

    /// Resolve a take immediately if possible. `Some(Some(v))` is a value,
    /// `Some(None)` the closed sentinel, `None` means the take must park.
    /// Woken counterparts are enqueued on the dispatcher, never invoked.
    fn poll_take(&self) -> Option<Option<T>> {
        let mut borrow = self.state.borrow_mut();
        let state = &mut *borrow;

        if let Some(buf) = state.buf.as_mut() {
            if buf.count() > 0 {
                let value = buf.remove();
                // Move admitted items from parked puts into the freed
                // space.
                while !buf.is_full() {
                    match next_put_item(&mut state.puts, &self.dispatcher) {
                        Some(item) => buf.add(item),
                        None => break,
                    }
                }
                return Some(value);
            }
        }

        // Rendezvous directly with a parked put.
        if let Some(item) = next_put_item(&mut state.puts, &self.dispatcher) {
            return Some(Some(item));
        }

        if state.closed {
            return Some(None);
        }
        None
    }

    /// Resolve a put immediately if possible. The transform runs only when
    /// the channel can accept, so `Blocked`/`Rejected` return the value
    /// untouched.
    fn poll_put(&self, value: T) -> PutFlow<T> {
        {
            let state = self.state.borrow();
            if state.closed {
                return PutFlow::Rejected(value);
            }
            let has_live_taker = state.takes.iter().any(|t| t.flag.is_active());
            let has_room = state.buf.as_ref().map_or(false, |b| !b.is_full());
            if !has_live_taker && !has_room {
                return PutFlow::Blocked(value);
            }
        }

        let (mut items, close_after) = self.admit(value);

        let mut borrow = self.state.borrow_mut();
        let state = &mut *borrow;
        match state.buf.as_mut() {
            Some(buf) => {
                // Buffer-then-flush keeps latching buffers correct: the
                // buffer observes every admitted item before takers do.
                for item in items.drain(..) {
                    buf.add(item);
                }
                while buf.count() > 0 {
                    match next_live_taker(&mut state.takes) {
                        Some(callback) => {
                            let value = buf.remove();
                            self.dispatcher.enqueue(Box::new(move || callback(value)));
                        }
                        None => break,
                    }
                }
                PutFlow::Done { close_after }
            }
            None => {
                while let Some(item) = items.pop_front() {
                    match next_live_taker(&mut state.takes) {
                        Some(callback) => {
                            self.dispatcher
                                .enqueue(Box::new(move || callback(Some(item))));
                        }
                        None => {
                            items.push_front(item);
                            return PutFlow::Leftover { items, close_after };
                        }
                    }
                }
                PutFlow::Done { close_after }
            }
        }
    }

    /// Run the admission transform (or the identity) over one input.
    /// Returns the admitted items and whether the channel must close
    /// after. The step and the error hook run with the state released,
    /// so either may consult its own channel.
    fn admit(&self, value: T) -> (VecDeque<T>, bool) {
        let Some(mut xform) = self.state.borrow_mut().xform.take() else {
            let mut items = VecDeque::with_capacity(1);
            items.push_back(value);
            return (items, false);
        };
        let outcome = match xform.step(value) {
            Ok(Admission::Continue(items)) => (items.into(), false),
            Ok(Admission::Terminate(items)) => (items.into(), true),
            Err(error) => self.recover(error),
        };
        self.state.borrow_mut().xform = Some(xform);
        outcome
    }

    /// Hand a failed step to the error hook and translate its verdict.
    fn recover(&self, error: TransformError) -> (VecDeque<T>, bool) {
        let Some(mut hook) = self.state.borrow_mut().hook.take() else {
            return (VecDeque::new(), false);
        };
        let verdict = hook(error);
        self.state.borrow_mut().hook = Some(hook);
        match verdict {
            Recovery::Admit(item) => {
                let mut items = VecDeque::with_capacity(1);
                items.push_back(item);
                (items, false)
            }
            Recovery::Discard => (VecDeque::new(), false),
            Recovery::Close => (VecDeque::new(), true),
        }
    }

    fn park_take(&self, flag: Flag, callback: Box<dyn FnOnce(Option<T>)>) {
        let mut state = self.state.borrow_mut();
        if state.dirty_takes > MAX_DIRTY {
            state.dirty_takes = 0;
            state.takes.retain(|t| t.flag.is_active());
        } else {
            state.dirty_takes += 1;
        }
        assert!(
            state.takes.len() < MAX_QUEUE_SIZE,
            "no more than {} pending takes are allowed on a single channel",
            MAX_QUEUE_SIZE
        );
        state.takes.push_back(PendingTake { flag, callback });
    }

    fn park_put(&self, flag: Flag, items: VecDeque<T>, callback: Option<Box<dyn FnOnce(bool)>>) {
        self.push_put(PendingPut {
            flag,
            committed: false,
            items,
            callback,
        });
    }

    /// Queue items whose put already committed; they deliver in order but
    /// nobody is waiting on an ack.
    fn park_committed_remainder(&self, items: VecDeque<T>) {
        self.push_put(PendingPut {
            flag: Flag::new(),
            committed: true,
            items,
            callback: None,
        });
    }

    fn push_put(&self, put: PendingPut<T>) {
        let mut state = self.state.borrow_mut();
        if state.dirty_puts > MAX_DIRTY {
            state.dirty_puts = 0;
            state.puts.retain(|p| p.committed || p.flag.is_active());
        } else {
            state.dirty_puts += 1;
        }
        assert!(
            state.puts.len() < MAX_QUEUE_SIZE,
            "no more than {} pending puts are allowed on a single channel",
            MAX_QUEUE_SIZE
        );
        state.puts.push_back(put);
    }

    fn close_inner(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.closed {
                return;
            }
            state.closed = true;
        }

        // The transform's completion step may emit trailing items. Like
        // every step it runs with the state released.
        let xform = self.state.borrow_mut().xform.take();
        let trailing = match xform {
            Some(mut xform) => {
                let trailing = xform.finish();
                self.state.borrow_mut().xform = Some(xform);
                trailing
            }
            None => Vec::new(),
        };

        let mut borrow = self.state.borrow_mut();
        let state = &mut *borrow;
        match state.buf.as_mut() {
            Some(buf) => {
                for item in trailing {
                    buf.add(item);
                }
            }
            None => {
                for item in trailing {
                    match next_live_taker(&mut state.takes) {
                        Some(callback) => {
                            self.dispatcher
                                .enqueue(Box::new(move || callback(Some(item))));
                        }
                        // Nobody will ever consume it; the channel is
                        // closing and holds no storage.
                        None => break,
                    }
                }
            }
        }

        if let Some(buf) = state.buf.as_mut() {
            buf.close();
            // Values buffered before close still belong to takers.
            while buf.count() > 0 {
                match next_live_taker(&mut state.takes) {
                    Some(callback) => {
                        let value = buf.remove();
                        self.dispatcher.enqueue(Box::new(move || callback(value)));
                    }
                    None => break,
                }
            }
        }

        // Everyone still waiting gets the sentinel. Parked puts are left
        // alone: their items stay drainable, and no put is ever handed the
        // sentinel.
        while let Some(callback) = next_live_taker(&mut state.takes) {
            self.dispatcher.enqueue(Box::new(move || callback(None)));
        }
    }
}

/// Pop takers until a live one commits; returns its callback.
fn next_live_taker<T>(
    takes: &mut VecDeque<PendingTake<T>>,
) -> Option<Box<dyn FnOnce(Option<T>)>> {
    while let Some(taker) = takes.pop_front() {
        if taker.flag.commit() {
            return Some(taker.callback);
        }
    }
    None
}

/// Pop the next deliverable item from the parked puts. The owning put
/// commits on its first delivery: the token is spent and the ack is
/// enqueued then, so a racing registration can never hand out items from
/// two channels.
fn next_put_item<T: 'static>(
    puts: &mut VecDeque<PendingPut<T>>,
    dispatcher: &Dispatcher,
) -> Option<T> {
    loop {
        let front = puts.front_mut()?;
        if !front.committed && !front.flag.is_active() {
            // Lost its race before anything was delivered.
            puts.pop_front();
            continue;
        }
        match front.items.pop_front() {
            Some(item) => {
                if !front.committed {
                    front.committed = true;
                    front.flag.commit();
                    if let Some(ack) = front.callback.take() {
                        dispatcher.enqueue(Box::new(move || ack(true)));
                    }
                }
                if front.items.is_empty() {
                    puts.pop_front();
                }
                return Some(item);
            }
            None => {
                puts.pop_front();
            }
        }
    }
}
