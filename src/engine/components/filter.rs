use std::f64::consts::PI;

use crate::engine::utils::{flush_denormal, from_f64};
use crate::engine::Sample;

const MIN_CUTOFF_HZ: f64 = 20.0;
const MIN_RESONANCE: f64 = 0.1;
const MAX_RESONANCE: f64 = 20.0;

/// Which output of the state-variable topology the filter produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Lowpass,
    Highpass,
}

/// Topology-preserving-transform state-variable filter (Zavalishin).
///
/// One instance filters several independent signal lanes with shared
/// coefficients: a tap prepares `2 × channels` lanes so the feedback path can
/// be filtered separately from the main path without the two interfering.
#[derive(Debug, Clone)]
pub struct StateVariableFilter<S> {
    mode: FilterMode,
    cutoff_hz: f64,
    resonance: f64,
    sample_rate: f64,

    g: S,
    k: S,
    // Integrator state (ic1eq, ic2eq) per lane.
    state: Vec<(S, S)>,
}
impl<S: Sample> StateVariableFilter<S> {
    pub fn new(mode: FilterMode, sample_rate: f64, lanes: usize) -> Self {
        let default_cutoff = match mode {
            FilterMode::Lowpass => 20_000.0,
            FilterMode::Highpass => 20.0,
        };
        let mut filter = Self {
            mode,
            cutoff_hz: default_cutoff,
            resonance: std::f64::consts::FRAC_1_SQRT_2,
            sample_rate,
            g: S::zero(),
            k: S::zero(),
            state: vec![(S::zero(), S::zero()); lanes],
        };
        filter.update_coefficients();
        filter
    }

    /// Reallocates lane state and rebinds the coefficients to a new sample
    /// rate. Control-context only.
    pub fn prepare(&mut self, sample_rate: f64, lanes: usize) {
        self.sample_rate = sample_rate;
        self.state = vec![(S::zero(), S::zero()); lanes];
        self.update_coefficients();
    }

    pub fn set_cutoff(&mut self, cutoff_hz: f64) {
        self.cutoff_hz = cutoff_hz.clamp(MIN_CUTOFF_HZ, self.sample_rate * 0.49);
        self.update_coefficients();
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff_hz
    }

    pub fn set_resonance(&mut self, resonance: f64) {
        self.resonance = resonance.clamp(MIN_RESONANCE, MAX_RESONANCE);
        self.update_coefficients();
    }

    pub fn resonance(&self) -> f64 {
        self.resonance
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    fn update_coefficients(&mut self) {
        // The stored cutoff may exceed Nyquist after a sample-rate drop.
        let cutoff = self.cutoff_hz.min(self.sample_rate * 0.49);
        self.g = from_f64((PI * cutoff / self.sample_rate).tan());
        self.k = from_f64(1.0 / self.resonance);
    }

    /// Zeroes the integrator state of every lane.
    pub fn reset(&mut self) {
        for lane in &mut self.state {
            *lane = (S::zero(), S::zero());
        }
    }

    /// Processes one sample on the given lane.
    pub fn process(&mut self, lane: usize, input: S) -> S {
        let (ic1eq, ic2eq) = self.state[lane];
        let one = S::one();
        let two = one + one;

        let v3 = input - ic2eq;
        let v1 = (self.g * v3 + ic1eq) / (one + self.g * (self.g + self.k));
        let v2 = ic2eq + self.g * v1;

        self.state[lane] = (
            flush_denormal(two * v1 - ic1eq),
            flush_denormal(two * v2 - ic2eq),
        );

        match self.mode {
            FilterMode::Lowpass => v2,
            FilterMode::Highpass => input - self.k * v1 - v2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settle(filter: &mut StateVariableFilter<f64>, input: f64, samples: usize) -> f64 {
        let mut out = 0.0;
        for _ in 0..samples {
            out = filter.process(0, input);
        }
        out
    }

    #[test]
    fn lowpass_passes_dc() {
        let mut filter = StateVariableFilter::<f64>::new(FilterMode::Lowpass, 48_000.0, 1);
        filter.set_cutoff(1000.0);

        let out = settle(&mut filter, 1.0, 10_000);

        assert!((out - 1.0).abs() < 1e-3, "DC should pass lowpass: {out}");
    }

    #[test]
    fn highpass_blocks_dc() {
        let mut filter = StateVariableFilter::<f64>::new(FilterMode::Highpass, 48_000.0, 1);
        filter.set_cutoff(1000.0);

        let out = settle(&mut filter, 1.0, 10_000);

        assert!(out.abs() < 1e-3, "DC should be rejected by highpass: {out}");
    }

    #[test]
    fn cutoff_is_clamped() {
        let mut filter = StateVariableFilter::<f32>::new(FilterMode::Lowpass, 48_000.0, 1);

        filter.set_cutoff(1.0);
        assert_eq!(filter.cutoff(), 20.0);

        filter.set_cutoff(1.0e6);
        assert_eq!(filter.cutoff(), 48_000.0 * 0.49);
    }

    #[test]
    fn lanes_do_not_interfere() {
        let mut filter = StateVariableFilter::<f64>::new(FilterMode::Lowpass, 48_000.0, 2);
        filter.set_cutoff(500.0);

        for _ in 0..1000 {
            filter.process(0, 1.0);
        }
        // Lane 1 never saw input, so its first output is from zero state.
        let out = filter.process(1, 0.0);

        assert_eq!(out, 0.0);
    }

    #[test]
    fn output_stays_finite() {
        let mut filter = StateVariableFilter::<f32>::new(FilterMode::Lowpass, 48_000.0, 1);
        filter.set_cutoff(18_000.0);
        filter.set_resonance(20.0);

        for i in 0..4096 {
            let noise = ((i * 2654435761_u64 as usize) % 1000) as f32 / 500.0 - 1.0;
            let out = filter.process(0, noise);
            assert!(out.is_finite());
        }
    }

    #[test]
    fn prepare_reallocates_lanes() {
        let mut filter = StateVariableFilter::<f32>::new(FilterMode::Highpass, 44_100.0, 2);

        filter.prepare(96_000.0, 4);
        // All four lanes are usable after prepare.
        for lane in 0..4 {
            filter.process(lane, 0.5);
        }
    }
}
