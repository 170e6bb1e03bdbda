// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Non-deterministic choice over channel operations.
//!
//! `alts` races takes and puts across any number of channels and commits
//! to exactly one. Candidates are tried immediately first; if none is
//! ready they all register one shared one-shot token, and whichever
//! channel fires first spends it. Losing registrations die in place and
//! are skipped or swept by their channels later — no value is ever
//! delivered twice.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::channel::{Channel, Flag, Op, OpStatus, Registration, TryPutError, TryTakeError};

/// Options for [`alts`].
pub struct AltsOptions<T> {
    /// Evaluate operations left to right instead of in random order.
    pub priority: bool,
    /// Value to deliver immediately when no operation is ready.
    pub default: Option<T>,
}

impl<T> Default for AltsOptions<T> {
    fn default() -> Self {
        Self {
            priority: false,
            default: None,
        }
    }
}

/// Outcome of an [`alts`] race, tagged with the winning channel.
#[derive(Debug)]
pub enum AltResult<T> {
    /// A take committed: the value, or the sentinel if that channel is
    /// closed and drained.
    Take {
        value: Option<T>,
        channel: Channel<T>,
    },
    /// A put committed: `accepted` is false if that channel was closed.
    Put {
        accepted: bool,
        channel: Channel<T>,
    },
    /// No operation was ready and a default was configured.
    Default(T),
}

/// Race the given operations; exactly one commits. The callback runs
/// synchronously when some candidate (or the default) completes
/// immediately, and from the dispatcher otherwise.
///
/// Calling this with no operations and no default is a programming error
/// and panics.
pub fn alts<T: 'static>(
    ops: Vec<Op<T>>,
    options: AltsOptions<T>,
    callback: impl FnOnce(AltResult<T>) + 'static,
) -> OpStatus {
    if ops.is_empty() {
        match options.default {
            Some(value) => {
                callback(AltResult::Default(value));
                return OpStatus::Completed;
            }
            None => panic!("alts requires at least one operation"),
        }
    }
    let order = if options.priority {
        (0..ops.len()).collect()
    } else {
        shuffled(ops.len())
    };
    let mut slots: Vec<Option<Op<T>>> = ops.into_iter().map(Some).collect();

    // First pass: try every candidate without registering. Any synchronous
    // completion — including a closed-channel result — wins outright.
    for &i in &order {
        match slots[i].take().expect("candidate tried twice") {
            Op::Take(channel) => match channel.try_take() {
                Ok(value) => {
                    callback(AltResult::Take {
                        value: Some(value),
                        channel,
                    });
                    return OpStatus::Completed;
                }
                Err(TryTakeError::Closed) => {
                    callback(AltResult::Take {
                        value: None,
                        channel,
                    });
                    return OpStatus::Completed;
                }
                Err(TryTakeError::Empty) => slots[i] = Some(Op::Take(channel)),
            },
            Op::Put(channel, value) => match channel.try_put(value) {
                Ok(()) => {
                    callback(AltResult::Put {
                        accepted: true,
                        channel,
                    });
                    return OpStatus::Completed;
                }
                Err(TryPutError::Closed(_)) => {
                    callback(AltResult::Put {
                        accepted: false,
                        channel,
                    });
                    return OpStatus::Completed;
                }
                Err(TryPutError::WouldBlock(value)) => slots[i] = Some(Op::Put(channel, value)),
            },
        }
    }

    if let Some(value) = options.default {
        callback(AltResult::Default(value));
        return OpStatus::Completed;
    }

    // Second pass: park every candidate around one shared token. The
    // first channel to fire spends it; the rest become dead entries their
    // channels skip over.
    let flag = Flag::new();
    let shared: Rc<RefCell<Option<Box<dyn FnOnce(AltResult<T>)>>>> =
        Rc::new(RefCell::new(Some(Box::new(callback))));
    for &i in &order {
        let registration = match slots[i].take().expect("candidate registered twice") {
            Op::Take(channel) => {
                let shared = Rc::clone(&shared);
                let winner = channel.clone();
                channel.take_with(
                    flag.clone(),
                    Box::new(move |value| {
                        if let Some(callback) = shared.borrow_mut().take() {
                            callback(AltResult::Take {
                                value,
                                channel: winner,
                            });
                        }
                    }),
                )
            }
            Op::Put(channel, value) => {
                let shared = Rc::clone(&shared);
                let winner = channel.clone();
                channel.put_with(
                    value,
                    flag.clone(),
                    Box::new(move |accepted| {
                        if let Some(callback) = shared.borrow_mut().take() {
                            callback(AltResult::Put {
                                accepted,
                                channel: winner,
                            });
                        }
                    }),
                )
            }
        };
        match registration {
            // A registration can complete on the spot when an earlier
            // one's side effects made this channel ready, and the token
            // can already be spent by a cascade; either way the race is
            // decided.
            Registration::Completed | Registration::Dead => return OpStatus::Completed,
            Registration::Parked => {}
        }
    }
    OpStatus::Parked
}

thread_local! {
    static RNG: Cell<u64> = Cell::new(seed());
}

/// Clock-derived seed; the low bit is forced so the xorshift state is
/// never zero.
fn seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 ^ d.as_secs())
        .unwrap_or(0x9E37_79B9);
    nanos
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407)
        | 1
}

fn next_rand() -> u64 {
    RNG.with(|cell| {
        let mut x = cell.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        cell.set(x);
        x
    })
}

/// Fisher–Yates permutation of `0..n`.
fn shuffled(n: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    for i in (1..n).rev() {
        let j = (next_rand() as usize) % (i + 1);
        order.swap(i, j);
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel;
    use crate::dispatch::Dispatcher;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn ready_take_wins_immediately() {
        let d = Dispatcher::new();
        let a = channel::buffered(&d, 1).unwrap();
        let b = channel::buffered(&d, 1).unwrap();
        a.put(10, |_| {});
        let result = Rc::new(RefCell::new(None));
        let result2 = result.clone();
        let status = alts(
            vec![Op::Take(a.clone()), Op::Take(b)],
            AltsOptions::default(),
            move |r| *result2.borrow_mut() = Some(r),
        );
        assert_eq!(status, OpStatus::Completed);
        match result.borrow_mut().take() {
            Some(AltResult::Take { value, channel }) => {
                assert_eq!(value, Some(10));
                assert_eq!(channel, a);
            }
            other => panic!("expected take from a, got {:?}", other),
        };
    }

    #[test]
    fn ready_put_wins_immediately() {
        let d = Dispatcher::new();
        let a = channel::unbuffered::<i32>(&d);
        let b = channel::buffered(&d, 1).unwrap();
        let result = Rc::new(RefCell::new(None));
        let result2 = result.clone();
        let status = alts(
            vec![Op::Take(a), Op::Put(b.clone(), 5)],
            AltsOptions::default(),
            move |r| *result2.borrow_mut() = Some(r),
        );
        assert_eq!(status, OpStatus::Completed);
        match result.borrow_mut().take() {
            Some(AltResult::Put { accepted, channel }) => {
                assert!(accepted);
                assert_eq!(channel, b);
            }
            other => panic!("expected put to b, got {:?}", other),
        }
        assert_eq!(b.try_take(), Ok(5));
    }

    #[test]
    fn default_fires_when_nothing_is_ready() {
        let d = Dispatcher::new();
        let a = channel::unbuffered::<i32>(&d);
        let result = Rc::new(RefCell::new(None));
        let result2 = result.clone();
        let status = alts(
            vec![Op::Take(a.clone())],
            AltsOptions {
                priority: false,
                default: Some(-1),
            },
            move |r| *result2.borrow_mut() = Some(r),
        );
        assert_eq!(status, OpStatus::Completed);
        assert!(matches!(
            result.borrow_mut().take(),
            Some(AltResult::Default(-1))
        ));
        // The default path leaves nothing registered behind.
        assert_eq!(a.put(1, |_| {}), OpStatus::Parked);
    }

    #[test]
    fn closed_channel_counts_as_immediate_completion() {
        let d = Dispatcher::new();
        let a = channel::unbuffered::<i32>(&d);
        let b = channel::unbuffered::<i32>(&d);
        b.close();
        let result = Rc::new(RefCell::new(None));
        let result2 = result.clone();
        alts(
            vec![Op::Take(a), Op::Take(b.clone())],
            AltsOptions {
                priority: true,
                default: None,
            },
            move |r| *result2.borrow_mut() = Some(r),
        );
        match result.borrow_mut().take() {
            Some(AltResult::Take { value, channel }) => {
                assert_eq!(value, None);
                assert_eq!(channel, b);
            }
            other => panic!("expected closed take from b, got {:?}", other),
        };
    }

    #[test]
    fn parked_race_commits_exactly_once() {
        let d = Dispatcher::new();
        let a = channel::unbuffered::<&str>(&d);
        let b = channel::unbuffered::<&str>(&d);
        let results = Rc::new(RefCell::new(Vec::new()));
        let results2 = results.clone();
        let status = alts(
            vec![Op::Take(a.clone()), Op::Take(b.clone())],
            AltsOptions::default(),
            move |r| results2.borrow_mut().push(r),
        );
        assert_eq!(status, OpStatus::Parked);
        assert!(results.borrow().is_empty());

        a.put("first", |ok| assert!(ok));
        assert_eq!(results.borrow().len(), 1);
        match &results.borrow()[0] {
            AltResult::Take { value, channel } => {
                assert_eq!(*value, Some("first"));
                assert_eq!(*channel, a);
            }
            other => panic!("expected take from a, got {:?}", other),
        }

        // The losing registration is dead: this put parks, and its value
        // is still there for a later take.
        assert_eq!(b.put("second", |_| {}), OpStatus::Parked);
        assert_eq!(results.borrow().len(), 1);
        assert_eq!(b.try_take(), Ok("second"));
    }

    #[test]
    fn priority_checks_candidates_in_order() {
        let d = Dispatcher::new();
        let a = channel::buffered(&d, 1).unwrap();
        let b = channel::buffered(&d, 1).unwrap();
        a.put(1, |_| {});
        b.put(2, |_| {});
        for _ in 0..20 {
            let result = Rc::new(RefCell::new(None));
            let result2 = result.clone();
            alts(
                vec![Op::Take(a.clone()), Op::Take(b.clone())],
                AltsOptions {
                    priority: true,
                    default: None,
                },
                move |r| *result2.borrow_mut() = Some(r),
            );
            match result.borrow_mut().take() {
                Some(AltResult::Take { value, channel }) => {
                    assert_eq!(value, Some(1));
                    assert_eq!(channel, a);
                }
                other => panic!("expected take from a, got {:?}", other),
            }
            a.put(1, |_| {});
        }
    }

    #[test]
    fn racing_puts_commit_exactly_one_per_trial() {
        let d = Dispatcher::new();
        for _ in 0..100 {
            let ch = channel::unbuffered::<i32>(&d);
            let got = Rc::new(RefCell::new(Vec::new()));
            let got2 = got.clone();
            ch.take(move |v| got2.borrow_mut().push(v));
            let commits = Rc::new(RefCell::new(Vec::new()));
            let commits2 = commits.clone();
            let status = alts(
                vec![
                    Op::Put(ch.clone(), 1),
                    Op::Put(ch.clone(), 2),
                    Op::Put(ch.clone(), 3),
                ],
                AltsOptions::default(),
                move |r| commits2.borrow_mut().push(r),
            );
            assert_eq!(status, OpStatus::Completed);
            assert_eq!(commits.borrow().len(), 1, "exactly one put commits");
            assert_eq!(got.borrow().len(), 1, "taker sees exactly one value");
            let delivered = got.borrow()[0];
            match &commits.borrow()[0] {
                AltResult::Put { accepted, .. } => assert!(*accepted),
                other => panic!("expected put commit, got {:?}", other),
            }
            assert!(matches!(delivered, Some(1) | Some(2) | Some(3)));
        }
    }

    #[test]
    fn random_order_is_roughly_fair() {
        let d = Dispatcher::new();
        let mut wins = [0usize; 2];
        for _ in 0..400 {
            let a = channel::buffered(&d, 1).unwrap();
            let b = channel::buffered(&d, 1).unwrap();
            a.put(0, |_| {});
            b.put(1, |_| {});
            let winner = Rc::new(Cell::new(usize::MAX));
            let winner2 = winner.clone();
            alts(
                vec![Op::Take(a), Op::Take(b)],
                AltsOptions::default(),
                move |r| {
                    if let AltResult::Take {
                        value: Some(v), ..
                    } = r
                    {
                        winner2.set(v as usize);
                    }
                },
            );
            wins[winner.get()] += 1;
        }
        assert!(
            wins[0] > 100 && wins[1] > 100,
            "each ready candidate should win often, got {:?}",
            wins
        );
    }

    #[test]
    #[should_panic(expected = "at least one operation")]
    fn empty_alts_without_default_panics() {
        let d = Dispatcher::new();
        let _ = d;
        alts::<i32>(Vec::new(), AltsOptions::default(), |_| {});
    }
}
