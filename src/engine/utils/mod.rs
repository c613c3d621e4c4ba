use std::fmt::Debug;

use num_traits::Float;

/// Linearly ramps a value towards a target over a fixed number of samples.
///
/// Stepping a delay time directly causes an audible jump in the read offset,
/// so time changes are always smoothed. Only the target is set from the
/// control context; [`LinearSmoothed::next`] is called once per sample from
/// the audio context.
#[derive(Debug, Clone)]
pub struct LinearSmoothed {
    current: f64,
    target: f64,
    step: f64,
    steps_remaining: u32,
    ramp_samples: u32,
}
impl LinearSmoothed {
    pub fn new(initial: f64) -> Self {
        Self {
            current: initial,
            target: initial,
            step: 0.0,
            steps_remaining: 0,
            ramp_samples: 0,
        }
    }

    /// Reconfigures the ramp length, snapping the current value to the target
    /// and cancelling any ramp in progress.
    pub fn reset(&mut self, sample_rate: f64, ramp_seconds: f64) {
        self.ramp_samples = (sample_rate * ramp_seconds).round() as u32;
        self.current = self.target;
        self.step = 0.0;
        self.steps_remaining = 0;
    }

    /// Starts a ramp from the current value towards `target`.
    pub fn set_target(&mut self, target: f64) {
        self.target = target;
        if self.ramp_samples == 0 || target == self.current {
            self.current = target;
            self.step = 0.0;
            self.steps_remaining = 0;
            return;
        }
        self.step = (target - self.current) / f64::from(self.ramp_samples);
        self.steps_remaining = self.ramp_samples;
    }

    /// Advances the ramp by one sample and returns the new value.
    pub fn next(&mut self) -> f64 {
        if self.steps_remaining > 0 {
            self.steps_remaining -= 1;
            if self.steps_remaining == 0 {
                self.current = self.target;
            } else {
                self.current += self.step;
            }
        }
        self.current
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn is_smoothing(&self) -> bool {
        self.steps_remaining > 0
    }
}

/// Casts an `f64` configuration value into the engine's sample type.
pub fn from_f64<S: Float>(value: f64) -> S {
    num_traits::cast(value).expect("Configuration value representable in sample type")
}

/// Casts a sample value back into the `f64` configuration domain.
pub fn to_f64<S: Float>(value: S) -> f64 {
    value.to_f64().expect("Sample value representable as f64")
}

/// `10^(db / 20)`
pub fn db_to_linear<S: Float>(db: S) -> S {
    from_f64::<S>(10.0).powf(db / from_f64(20.0))
}

/// `20 · log10(linear)`, floored at -120 dB for non-positive input.
pub fn linear_to_db<S: Float>(linear: S) -> S {
    let floor = from_f64(-120.0);
    if linear <= S::zero() {
        return floor;
    }
    (from_f64::<S>(20.0) * linear.log10()).max(floor)
}

/// Flushes denormal-range values to zero so filter and envelope state don't
/// decay into subnormal arithmetic.
pub fn flush_denormal<S: Float>(x: S) -> S {
    if x.abs() < from_f64(1e-20) {
        S::zero()
    } else {
        x
    }
}
