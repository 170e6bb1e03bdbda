// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Admission transform contract.
//!
//! A channel can run every value a producer offers through a reducing
//! step before anything is delivered or buffered. One input may admit
//! zero, one, or several items, and the step can cut the channel off
//! (a take-n style limit). Map/filter/partition steps from any outside
//! transducer layer plug in through this trait; the channel only ever
//! sees the contract below.

/// Error raised by a transform step. Channels route it to their error
/// hook instead of letting one bad input poison the queue.
pub type TransformError = Box<dyn std::error::Error>;

/// Items admitted by one transform step.
#[derive(Debug, PartialEq, Eq)]
pub enum Admission<T> {
    /// Admit these items and keep the channel open.
    Continue(Vec<T>),
    /// Admit these items, then close the channel.
    Terminate(Vec<T>),
}

/// Verdict of an error hook for a failed transform step.
pub enum Recovery<T> {
    /// Admit this item in place of the offending input.
    Admit(T),
    /// Admit nothing for this input.
    Discard,
    /// Admit nothing and close the channel.
    Close,
}

/// Hook receiving transform errors. Without one the offending input is
/// discarded and the channel stays open.
pub type ErrorHook<T> = Box<dyn FnMut(TransformError) -> Recovery<T>>;

/// Reducing step applied to every value a channel admits.
pub trait Transform<T> {
    /// Process one input into its admitted items.
    fn step(&mut self, input: T) -> Result<Admission<T>, TransformError>;

    /// Trailing items to emit when the channel closes.
    fn finish(&mut self) -> Vec<T> {
        Vec::new()
    }
}

impl<T, F> Transform<T> for F
where
    F: FnMut(T) -> Result<Admission<T>, TransformError>,
{
    fn step(&mut self, input: T) -> Result<Admission<T>, TransformError> {
        self(input)
    }
}
