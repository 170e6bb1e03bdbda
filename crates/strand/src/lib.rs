// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative CSP channels for single-threaded programs.
//!
//! Rendezvous channels with pluggable buffering and one-way close, a
//! trampolined dispatch queue, a coroutine driver, and a multi-channel
//! select. Everything runs inside one thread of control: operations
//! either complete synchronously or park a callback, and all callback
//! fan-out flows through a flat run loop. Concurrency, not parallelism —
//! the types are deliberately `!Send`, and porting them onto a parallel
//! executor would require real synchronization around the queues.
//!
//! Components:
//! - buffer    — fixed/dropping/sliding/promise admission policies
//! - channel   — rendezvous queue, backpressure, close protocol
//! - dispatch  — flat run loop for continuation cascades
//! - transform — per-channel admission step contract
//! - process   — drives a suspendable computation against channels
//! - alts      — races operations across channels, commits to one

pub mod alts;
pub mod buffer;
pub mod channel;
pub mod dispatch;
pub mod process;
pub mod transform;
