use std::fmt::Debug;
use std::ops::AddAssign;

use num_traits::Float;

pub mod components;
pub mod utils;

use components::{DelayBuffer, DelayTap, TapOverflowError, TapRegistry, TapState};

/// Longest delay time a tap can be set to, in seconds.
pub const MAX_DELAY_TIME_SECONDS: f64 = 20.0;

/// Ramp length used to smooth delay-time changes.
pub const DEFAULT_SMOOTHING_RAMP_SECONDS: f64 = 0.1;

/// Scalar sample type processed by the engine. Blanket-implemented, so `f32`
/// and `f64` qualify out of the box.
pub trait Sample: Float + AddAssign + Send + Sync + Debug + 'static {}
impl<T> Sample for T where T: Float + AddAssign + Send + Sync + Debug + 'static {}

/// The multi-tap delay core: one shared circular buffer and up to
/// [`components::MAX_TAPS`] taps reading from it at independent offsets.
///
/// [`Self::process_block`] is the audio-context entry point and is
/// allocation-free and non-blocking. Everything else is control-context and
/// requires `&mut self`, which serializes structural changes against
/// processing. The one exception is [`components::TapFlags`], whose handle
/// ([`DelayTap::flags`]) may be toggled from another thread mid-block.
#[derive(Debug)]
pub struct DelayEngine<S: Sample> {
    buffer: DelayBuffer<S>,
    registry: TapRegistry<S>,

    // Scratch space preallocated so the audio path never touches the heap.
    frame_dry: Vec<S>,
    block_scratch: Vec<S>,

    sample_rate: f64,
    block_size: usize,
    channels: usize,
    smoothing_ramp_seconds: f64,
}
impl<S: Sample> DelayEngine<S> {
    /// Creates an engine with no taps. `block_size` is the largest frame
    /// count a single [`Self::process_block`] call will be given.
    pub fn new(sample_rate: f64, block_size: usize, channels: usize) -> Self {
        debug_assert!(sample_rate > 0.0);
        debug_assert!(block_size > 0);
        debug_assert!(channels > 0);

        let capacity = (MAX_DELAY_TIME_SECONDS * sample_rate).ceil() as usize;
        debug_assert!(block_size < capacity);
        Self {
            buffer: DelayBuffer::new(channels, capacity),
            registry: TapRegistry::new(),

            frame_dry: vec![S::zero(); channels],
            block_scratch: vec![S::zero(); block_size],

            sample_rate,
            block_size,
            channels,
            smoothing_ramp_seconds: DEFAULT_SMOOTHING_RAMP_SECONDS,
        }
    }

    /// Largest read offset a tap may address. Kept one block short of the
    /// buffer capacity so the incoming block can never overwrite a sample
    /// some tap still has in reach.
    fn max_write_index_offset(&self) -> usize {
        self.buffer.capacity().saturating_sub(self.block_size)
    }

    /// Processes one interleaved block in place. `io.len()` must be a
    /// multiple of the channel count, at most `block_size` frames.
    ///
    /// Incoming samples are written to the buffer at the cursor, then each
    /// sample is visited per tap in ascending-delay order: the delayed sample
    /// runs the tap's effect chain, the chain's feedback value (scaled by the
    /// tap's feedback gain) is accumulated back into the buffer at the write
    /// position, and the output mixes in as `out = in + Σ mix·(processed − in)`.
    /// The cursor advances once, by the block length, at the end.
    pub fn process_block(&mut self, io: &mut [S]) {
        no_heap! {{
            debug_assert_eq!(io.len() % self.channels, 0);
            let frames = io.len() / self.channels;
            debug_assert!(frames <= self.block_size);

            for channel in 0..self.channels {
                for frame in 0..frames {
                    self.block_scratch[frame] = io[frame * self.channels + channel];
                }
                self.buffer.write(channel, 0, &self.block_scratch[..frames]);
            }

            let capacity = self.buffer.capacity();
            for frame in 0..frames {
                let io_frame = &mut io[frame * self.channels..(frame + 1) * self.channels];
                self.frame_dry.copy_from_slice(io_frame);

                let write_index = (self.buffer.cursor() + frame) % capacity;
                for tap in self.registry.iter_mut() {
                    let (offset, routing) = tap.begin_sample();
                    let read_index = (write_index + capacity - offset) % capacity;
                    let feedback_gain = tap.feedback_gain();
                    let mix = tap.mix_gain();

                    for channel in 0..self.channels {
                        let delayed = self.buffer.read(channel, read_index);
                        let (out, fdbk) = tap.process_sample(&routing, channel, delayed);
                        self.buffer
                            .accumulate(channel, write_index, fdbk * feedback_gain);
                        io_frame[channel] += mix * (out - self.frame_dry[channel]);
                    }
                }
            }

            self.buffer.advance_cursor(frames);
        }}
    }

    /// Produces a tap wired to this engine's sample rate, ramp length,
    /// channel count, and maximum delay offset, ready for [`Self::add_tap`].
    pub fn create_tap(&self) -> DelayTap<S> {
        DelayTap::new(
            self.sample_rate,
            self.smoothing_ramp_seconds,
            self.channels,
            self.max_write_index_offset(),
        )
    }

    /// Inserts a tap at its position in the ascending-delay order and returns
    /// the index it landed at. The tap is re-initialized to this engine's
    /// configuration first, so taps created for another engine are safe to
    /// add. Fails when the engine already holds [`components::MAX_TAPS`]
    /// taps, leaving it unchanged.
    pub fn add_tap(&mut self, mut tap: DelayTap<S>) -> Result<usize, TapOverflowError> {
        if tap.sample_rate() != self.sample_rate
            || tap.channels() != self.channels
            || tap.max_write_index_offset() != self.max_write_index_offset()
        {
            tap.init(
                self.sample_rate,
                self.smoothing_ramp_seconds,
                self.channels,
                self.max_write_index_offset(),
            );
        }
        self.registry.add(tap)
    }

    /// Builds a tap from a state snapshot and inserts it, returning its
    /// post-sort index.
    pub fn create_and_add_tap(&mut self, state: &TapState) -> Result<usize, TapOverflowError> {
        let tap = DelayTap::from_state(
            state,
            self.sample_rate,
            self.smoothing_ramp_seconds,
            self.channels,
            self.max_write_index_offset(),
        );
        self.registry.add(tap)
    }

    /// Removes and returns the tap at `index`. An out-of-range index is
    /// ignored.
    pub fn remove_tap(&mut self, index: usize) -> Option<DelayTap<S>> {
        self.registry.remove(index)
    }

    pub fn tap(&self, index: usize) -> Option<&DelayTap<S>> {
        self.registry.get(index)
    }

    /// Mutable tap access for parameter edits. Changing the delay time
    /// through this handle does not re-sort the taps; use
    /// [`Self::set_tap_time_ms`] for that.
    pub fn tap_mut(&mut self, index: usize) -> Option<&mut DelayTap<S>> {
        self.registry.get_mut(index)
    }

    pub fn num_taps(&self) -> usize {
        self.registry.len()
    }

    pub fn taps(&self) -> impl Iterator<Item = &DelayTap<S>> {
        self.registry.iter()
    }

    /// Sets a tap's delay-time target and moves it to its new position in
    /// the ascending-delay order, returning the new index.
    pub fn set_tap_time_ms(&mut self, index: usize, time_ms: f64) -> Option<usize> {
        let mut tap = self.registry.remove(index)?;
        tap.set_time_ms(time_ms);
        // A slot just opened up, so re-adding cannot overflow.
        let new_index = self.registry.add(tap).unwrap();
        Some(new_index)
    }

    /// Like [`Self::set_tap_time_ms`], with the target given as a sample
    /// count at the engine's sample rate.
    pub fn set_tap_time_samples(&mut self, index: usize, samples: usize) -> Option<usize> {
        self.set_tap_time_ms(index, samples as f64 * 1000.0 / self.sample_rate)
    }

    /// Reconfigures the engine for a new sample rate: the delay buffer is
    /// reallocated (and cleared) and every tap is re-initialized. Allocates,
    /// so control context only, with playback stopped.
    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        debug_assert!(sample_rate > 0.0);
        self.sample_rate = sample_rate;
        let capacity = (MAX_DELAY_TIME_SECONDS * sample_rate).ceil() as usize;
        self.buffer = DelayBuffer::new(self.channels, capacity);
        self.reinit_taps();
    }

    /// Sets the largest frame count future [`Self::process_block`] calls may
    /// pass. Control context only; resizes scratch space and re-initializes
    /// the taps (their maximum delay offset depends on the block size).
    pub fn set_block_size(&mut self, block_size: usize) {
        debug_assert!(block_size > 0);
        debug_assert!(block_size < self.buffer.capacity());
        self.block_size = block_size;
        self.block_scratch.resize(block_size, S::zero());
        self.reinit_taps();
    }

    fn reinit_taps(&mut self) {
        let max_offset = self.max_write_index_offset();
        for tap in self.registry.iter_mut() {
            tap.init(
                self.sample_rate,
                self.smoothing_ramp_seconds,
                self.channels,
                max_offset,
            );
        }
        // Clamping against the new maximum offset may have reordered targets.
        self.registry.resort();
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn smoothing_ramp_seconds(&self) -> f64 {
        self.smoothing_ramp_seconds
    }
}
