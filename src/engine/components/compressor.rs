use crate::engine::utils::{db_to_linear, flush_denormal, from_f64, linear_to_db};
use crate::engine::Sample;

/// Feed-forward dynamics compressor: peak envelope follower into a hard-knee
/// gain computer.
///
/// Like the filters, one instance serves `2 × channels` lanes with shared
/// parameters, so a tap's feedback path keeps its own envelope state.
#[derive(Debug, Clone)]
pub struct Compressor<S> {
    ratio: f64,
    threshold_db: f64,
    attack_ms: f64,
    release_ms: f64,
    sample_rate: f64,

    threshold: S,
    inv_ratio_complement: S,
    attack_coeff: S,
    release_coeff: S,
    // Envelope level per lane, linear domain.
    envelopes: Vec<S>,
}
impl<S: Sample> Compressor<S> {
    pub fn new(sample_rate: f64, lanes: usize) -> Self {
        let mut compressor = Self {
            ratio: 4.0,
            threshold_db: -18.0,
            attack_ms: 10.0,
            release_ms: 100.0,
            sample_rate,
            threshold: S::zero(),
            inv_ratio_complement: S::zero(),
            attack_coeff: S::zero(),
            release_coeff: S::zero(),
            envelopes: vec![S::zero(); lanes],
        };
        compressor.update_coefficients();
        compressor
    }

    /// Reallocates lane state for a new sample rate. Control-context only.
    pub fn prepare(&mut self, sample_rate: f64, lanes: usize) {
        self.sample_rate = sample_rate;
        self.envelopes = vec![S::zero(); lanes];
        self.update_coefficients();
    }

    /// Ratio is floored at 1:1; below that the gain computer would expand.
    pub fn set_ratio(&mut self, ratio: f64) {
        self.ratio = ratio.max(1.0);
        self.update_coefficients();
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn set_threshold_db(&mut self, threshold_db: f64) {
        self.threshold_db = threshold_db;
        self.update_coefficients();
    }

    pub fn threshold_db(&self) -> f64 {
        self.threshold_db
    }

    pub fn set_attack_ms(&mut self, attack_ms: f64) {
        self.attack_ms = attack_ms.max(0.01);
        self.update_coefficients();
    }

    pub fn attack_ms(&self) -> f64 {
        self.attack_ms
    }

    pub fn set_release_ms(&mut self, release_ms: f64) {
        self.release_ms = release_ms.max(1.0);
        self.update_coefficients();
    }

    pub fn release_ms(&self) -> f64 {
        self.release_ms
    }

    fn update_coefficients(&mut self) {
        self.threshold = from_f64(self.threshold_db);
        self.inv_ratio_complement = from_f64(1.0 - 1.0 / self.ratio);
        self.attack_coeff = from_f64((-1.0 / (self.attack_ms * 0.001 * self.sample_rate)).exp());
        self.release_coeff = from_f64((-1.0 / (self.release_ms * 0.001 * self.sample_rate)).exp());
    }

    pub fn reset(&mut self) {
        for envelope in &mut self.envelopes {
            *envelope = S::zero();
        }
    }

    /// Processes one sample on the given lane.
    pub fn process(&mut self, lane: usize, input: S) -> S {
        let rectified = input.abs();
        let envelope = self.envelopes[lane];

        let coeff = if rectified > envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        let envelope = rectified + coeff * (envelope - rectified);
        self.envelopes[lane] = flush_denormal(envelope);

        let envelope_db = linear_to_db(envelope);
        let overshoot = envelope_db - self.threshold;
        if overshoot <= S::zero() {
            return input;
        }

        let gain_reduction_db = -(overshoot * self.inv_ratio_complement);
        input * db_to_linear(gain_reduction_db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settle(compressor: &mut Compressor<f64>, input: f64, samples: usize) -> f64 {
        let mut out = 0.0;
        for _ in 0..samples {
            out = compressor.process(0, input);
        }
        out
    }

    #[test]
    fn below_threshold_is_untouched() {
        let mut compressor = Compressor::<f64>::new(48_000.0, 1);
        compressor.set_threshold_db(-6.0);
        compressor.set_ratio(4.0);

        // -20 dB input, well below threshold.
        let out = settle(&mut compressor, 0.1, 10_000);

        assert_eq!(out, 0.1);
    }

    #[test]
    fn above_threshold_is_attenuated() {
        let mut compressor = Compressor::<f64>::new(48_000.0, 1);
        compressor.set_threshold_db(-20.0);
        compressor.set_ratio(4.0);
        compressor.set_attack_ms(0.1);

        let out = settle(&mut compressor, 1.0, 48_000);

        // 20 dB overshoot at 4:1 leaves 5 dB: expect 15 dB reduction.
        let expected = 10.0f64.powf(-15.0 / 20.0);
        assert!(
            (out - expected).abs() < 0.01,
            "expected ≈{expected}, got {out}"
        );
    }

    #[test]
    fn unity_ratio_never_compresses() {
        let mut compressor = Compressor::<f64>::new(48_000.0, 1);
        compressor.set_threshold_db(-40.0);
        compressor.set_ratio(1.0);

        let out = settle(&mut compressor, 0.9, 10_000);

        assert_eq!(out, 0.9);
    }

    #[test]
    fn ratio_is_floored_at_unity() {
        let mut compressor = Compressor::<f32>::new(48_000.0, 1);

        compressor.set_ratio(0.25);

        assert_eq!(compressor.ratio(), 1.0);
    }

    #[test]
    fn lanes_keep_independent_envelopes() {
        let mut compressor = Compressor::<f64>::new(48_000.0, 2);
        compressor.set_threshold_db(-20.0);
        compressor.set_ratio(10.0);
        compressor.set_attack_ms(0.1);

        // Drive lane 0 hard; lane 1 stays quiet.
        for _ in 0..10_000 {
            compressor.process(0, 1.0);
        }
        let quiet = compressor.process(1, 0.01);

        assert_eq!(quiet, 0.01);
    }

    #[test]
    fn attack_is_gradual() {
        let mut compressor = Compressor::<f64>::new(48_000.0, 1);
        compressor.set_threshold_db(-20.0);
        compressor.set_ratio(4.0);
        compressor.set_attack_ms(50.0);

        // First sample after silence is barely attenuated; deep into the
        // attack the gain reduction has built up.
        let first = compressor.process(0, 1.0);
        let late = settle(&mut compressor, 1.0, 48_000);

        assert!(first > late);
    }
}
