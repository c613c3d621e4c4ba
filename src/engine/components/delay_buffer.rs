use crate::engine::Sample;

/// Fixed-capacity multichannel circular sample store with a monotonic write
/// cursor.
///
/// The buffer knows nothing about taps. Indices passed to [`Self::read`] and
/// [`Self::accumulate`] must already be reduced modulo the capacity by the
/// caller; this is a caller contract, checked only in debug builds, matching
/// the no-allocation/no-panic discipline of the audio path.
#[derive(Debug)]
pub struct DelayBuffer<S> {
    channels: Vec<Vec<S>>,
    capacity: usize,
    cursor: usize,
}
impl<S: Sample> DelayBuffer<S> {
    /// Allocates a buffer of `capacity` samples for each of `num_channels`
    /// channels. Only called at engine construction and on sample-rate
    /// changes, never from the audio context.
    pub fn new(num_channels: usize, capacity: usize) -> Self {
        Self {
            channels: vec![vec![S::zero(); capacity]; num_channels],
            capacity,
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Current write cursor, always in `[0, capacity)`.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Stores `samples` into one channel starting at
    /// `(cursor + offset_from_cursor) % capacity`, splitting the copy in two
    /// when it crosses the capacity boundary.
    ///
    /// Overwrites whatever the cursor last passed a full capacity ago.
    /// Caller contract: `samples.len() <= capacity`.
    pub fn write(&mut self, channel: usize, offset_from_cursor: usize, samples: &[S]) {
        debug_assert!(samples.len() <= self.capacity);

        let data = &mut self.channels[channel];
        let start = (self.cursor + offset_from_cursor) % self.capacity;

        let first_len = samples.len().min(self.capacity - start);
        data[start..start + first_len].copy_from_slice(&samples[..first_len]);

        let remainder = samples.len() - first_len;
        if remainder != 0 {
            data[..remainder].copy_from_slice(&samples[first_len..]);
        }
    }

    /// Direct indexed read. `index` must already be in `[0, capacity)`.
    pub fn read(&self, channel: usize, index: usize) -> S {
        self.channels[channel][index]
    }

    /// Adds `value` on top of the stored sample, used for feedback injection.
    /// `index` must already be in `[0, capacity)`.
    pub fn accumulate(&mut self, channel: usize, index: usize, value: S) {
        let slot = &mut self.channels[channel][index];
        *slot = *slot + value;
    }

    /// Moves the write cursor forward by `n` samples, wrapping modulo the
    /// capacity. Called once per processed block, never by taps.
    pub fn advance_cursor(&mut self, n: usize) {
        self.cursor = (self.cursor + n) % self.capacity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read() {
        let mut buffer = DelayBuffer::<f32>::new(1, 8);

        buffer.write(0, 0, &[1.0, 2.0, 3.0]);

        assert_eq!(buffer.read(0, 0), 1.0);
        assert_eq!(buffer.read(0, 1), 2.0);
        assert_eq!(buffer.read(0, 2), 3.0);
        assert_eq!(buffer.read(0, 3), 0.0);
    }

    #[test]
    fn write_wraps_around_capacity() {
        let mut buffer = DelayBuffer::<f32>::new(1, 8);
        buffer.advance_cursor(6);

        buffer.write(0, 0, &[1.0, 2.0, 3.0, 4.0]);

        // Two samples at the tail, two wrapped to the front.
        assert_eq!(buffer.read(0, 6), 1.0);
        assert_eq!(buffer.read(0, 7), 2.0);
        assert_eq!(buffer.read(0, 0), 3.0);
        assert_eq!(buffer.read(0, 1), 4.0);
    }

    #[test]
    fn write_overwrites_stale_samples() {
        let mut buffer = DelayBuffer::<f32>::new(1, 4);

        buffer.write(0, 0, &[1.0, 1.0, 1.0, 1.0]);
        buffer.write(0, 0, &[2.0, 2.0]);

        assert_eq!(buffer.read(0, 0), 2.0);
        assert_eq!(buffer.read(0, 1), 2.0);
        assert_eq!(buffer.read(0, 2), 1.0);
    }

    #[test]
    fn accumulate_adds_to_stored_sample() {
        let mut buffer = DelayBuffer::<f32>::new(1, 4);

        buffer.write(0, 0, &[1.0]);
        buffer.accumulate(0, 0, 0.5);

        assert_eq!(buffer.read(0, 0), 1.5);
    }

    #[test]
    fn cursor_wraps() {
        let mut buffer = DelayBuffer::<f32>::new(2, 5);

        buffer.advance_cursor(3);
        assert_eq!(buffer.cursor(), 3);
        buffer.advance_cursor(4);
        assert_eq!(buffer.cursor(), 2);
    }

    #[test]
    fn channels_are_independent() {
        let mut buffer = DelayBuffer::<f32>::new(2, 4);

        buffer.write(0, 0, &[1.0, 2.0]);
        buffer.write(1, 0, &[3.0, 4.0]);

        assert_eq!(buffer.read(0, 0), 1.0);
        assert_eq!(buffer.read(1, 0), 3.0);
    }
}
