use std::error::Error;
use std::fmt::{self, Debug, Display};

use super::tap::DelayTap;
use crate::engine::Sample;

/// The maximum number of taps a registry will hold.
pub const MAX_TAPS: usize = 32;

/// Ordered collection of the engine's taps.
///
/// Taps are kept sorted by ascending delay-time target so the processing
/// loop visits them in a deterministic order regardless of insertion order.
/// Equal targets preserve insertion order.
#[derive(Debug)]
pub struct TapRegistry<S: Sample> {
    taps: Vec<DelayTap<S>>,
}
impl<S: Sample> TapRegistry<S> {
    pub fn new() -> Self {
        Self {
            taps: Vec::with_capacity(MAX_TAPS),
        }
    }

    /// Inserts a tap at its sorted position and returns the index it landed
    /// at. Fails when the registry already holds [`MAX_TAPS`] taps.
    pub fn add(&mut self, tap: DelayTap<S>) -> Result<usize, TapOverflowError> {
        if self.taps.len() >= MAX_TAPS {
            return Err(TapOverflowError);
        }

        let key = tap.target_time_ms();
        let index = self
            .taps
            .partition_point(|existing| existing.target_time_ms().total_cmp(&key).is_le());
        self.taps.insert(index, tap);
        Ok(index)
    }

    /// Removes and returns the tap at `index`, or [`None`] when the index is
    /// out of bounds.
    pub fn remove(&mut self, index: usize) -> Option<DelayTap<S>> {
        if index < self.taps.len() {
            Some(self.taps.remove(index))
        } else {
            None
        }
    }

    pub fn get(&self, index: usize) -> Option<&DelayTap<S>> {
        self.taps.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut DelayTap<S>> {
        self.taps.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DelayTap<S>> {
        self.taps.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DelayTap<S>> {
        self.taps.iter_mut()
    }

    /// Re-establishes the sort order after tap delay-time targets have been
    /// edited in place. Stable, so taps with equal targets keep their
    /// relative order.
    pub fn resort(&mut self) {
        self.taps
            .sort_by(|a, b| a.target_time_ms().total_cmp(&b.target_time_ms()));
    }
}
impl<S: Sample> Default for TapRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct TapOverflowError;
impl Display for TapOverflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "The maximum number of taps has been exceeded: {MAX_TAPS}")
    }
}
impl Error for TapOverflowError {}
