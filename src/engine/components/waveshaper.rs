use serde::{Deserialize, Serialize};

use crate::engine::utils::from_f64;
use crate::engine::Sample;

/// Transfer function selection for the waveshaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaveshaperFunction {
    /// Boosts the middle of the range while compressing the edges.
    Sine,
    /// Light overdrive.
    Tanh,
    /// Sign of the input, a very harsh distortion.
    Signum,
}

/// Memoryless waveshaper with pre- and post-gain.
///
/// Stateless per sample, so one instance can be shared by every lane of a
/// tap: main and feedback paths route through it independently.
#[derive(Debug, Clone)]
pub struct Waveshaper<S> {
    function: WaveshaperFunction,
    pre_gain_value: f64,
    post_gain_value: f64,
    pre_gain: S,
    post_gain: S,
}
impl<S: Sample> Waveshaper<S> {
    pub fn new() -> Self {
        Self {
            function: WaveshaperFunction::Tanh,
            pre_gain_value: 1.0,
            post_gain_value: 1.0,
            pre_gain: S::one(),
            post_gain: S::one(),
        }
    }

    pub fn set_function(&mut self, function: WaveshaperFunction) {
        self.function = function;
    }

    pub fn function(&self) -> WaveshaperFunction {
        self.function
    }

    /// Linear gain applied before the transfer function.
    pub fn set_pre_gain(&mut self, pre_gain: f64) {
        self.pre_gain_value = pre_gain;
        self.pre_gain = from_f64(pre_gain);
    }

    pub fn pre_gain(&self) -> f64 {
        self.pre_gain_value
    }

    /// Linear gain applied after the transfer function.
    pub fn set_post_gain(&mut self, post_gain: f64) {
        self.post_gain_value = post_gain;
        self.post_gain = from_f64(post_gain);
    }

    pub fn post_gain(&self) -> f64 {
        self.post_gain_value
    }

    pub fn process(&self, input: S) -> S {
        let x = input * self.pre_gain;
        let shaped = match self.function {
            WaveshaperFunction::Sine => x.sin(),
            WaveshaperFunction::Tanh => x.tanh(),
            WaveshaperFunction::Signum => x.signum() * sign_magnitude(x),
        };
        shaped * self.post_gain
    }
}
impl<S: Sample> Default for Waveshaper<S> {
    fn default() -> Self {
        Self::new()
    }
}

// signum() of a float maps 0.0 to 1.0; the shaper should pass silence through.
fn sign_magnitude<S: Sample>(x: S) -> S {
    if x == S::zero() {
        S::zero()
    } else {
        S::one()
    }
}
