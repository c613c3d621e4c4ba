use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::compressor::Compressor;
use super::filter::{FilterMode, StateVariableFilter};
use super::waveshaper::{Waveshaper, WaveshaperFunction};
use crate::engine::utils::{from_f64, LinearSmoothed};
use crate::engine::Sample;

/// Routing and enable flags shared between the audio and control contexts.
///
/// These are the only tap fields mutated concurrently while a block is being
/// processed, so they are grouped here behind an [`Arc`] instead of living
/// implicitly among the cold configuration fields. Loads and stores are
/// `Relaxed`: a flag flipped mid-block becomes visible "eventually", and the
/// processing loop tolerates reading different values for the same flag
/// within one sample.
#[derive(Debug, Default)]
pub struct TapFlags {
    comp_in: AtomicBool,
    ws_in: AtomicBool,
    comp_fdbk: AtomicBool,
    ws_fdbk: AtomicBool,
    filt_pre: AtomicBool,
}
impl TapFlags {
    pub fn set_comp_in(&self, enabled: bool) {
        self.comp_in.store(enabled, Ordering::Relaxed);
    }
    pub fn comp_in(&self) -> bool {
        self.comp_in.load(Ordering::Relaxed)
    }

    pub fn set_ws_in(&self, enabled: bool) {
        self.ws_in.store(enabled, Ordering::Relaxed);
    }
    pub fn ws_in(&self) -> bool {
        self.ws_in.load(Ordering::Relaxed)
    }

    pub fn set_comp_fdbk(&self, enabled: bool) {
        self.comp_fdbk.store(enabled, Ordering::Relaxed);
    }
    pub fn comp_fdbk(&self) -> bool {
        self.comp_fdbk.load(Ordering::Relaxed)
    }

    pub fn set_ws_fdbk(&self, enabled: bool) {
        self.ws_fdbk.store(enabled, Ordering::Relaxed);
    }
    pub fn ws_fdbk(&self) -> bool {
        self.ws_fdbk.load(Ordering::Relaxed)
    }

    pub fn set_filt_pre(&self, enabled: bool) {
        self.filt_pre.store(enabled, Ordering::Relaxed);
    }
    pub fn filt_pre(&self) -> bool {
        self.filt_pre.load(Ordering::Relaxed)
    }
}

/// Per-sample snapshot of [`TapFlags`], taken once per tap per sample so the
/// pre- and post-filter branches can never disagree within one evaluation.
pub(crate) struct TapRouting {
    pub filt_pre: bool,
    pub ws_in: bool,
    pub ws_fdbk: bool,
    pub comp_in: bool,
    pub comp_fdbk: bool,
}

/// One tap of the multi-tap delay: a smoothed delay time, feedback and mix
/// gains, and an effect chain (low/highpass filter pair, waveshaper,
/// compressor) with independent main/feedback routing.
///
/// A tap is owned by its engine's registry and carries its own copies of the
/// engine's sample rate and smoothing ramp length; it holds no reference back
/// to the engine.
#[derive(Debug)]
pub struct DelayTap<S: Sample> {
    time_ms: LinearSmoothed,
    feedback_value: f64,
    feedback: S,
    mix_value: f64,
    mix: S,

    flags: Arc<TapFlags>,

    lp_filter: StateVariableFilter<S>,
    hp_filter: StateVariableFilter<S>,
    compressor: Compressor<S>,
    waveshaper: Waveshaper<S>,

    sample_rate: f64,
    ramp_seconds: f64,
    channels: usize,
    max_write_index_offset: usize,
}
impl<S: Sample> DelayTap<S> {
    /// Creates a tap with default parameters, prepared for the given sample
    /// rate and channel count. `max_write_index_offset` is the largest delay
    /// in samples the tap may address and is derived from the owning engine's
    /// buffer capacity.
    pub fn new(
        sample_rate: f64,
        ramp_seconds: f64,
        channels: usize,
        max_write_index_offset: usize,
    ) -> Self {
        // Effect chains are prepared for twice the channel count: lanes
        // [0, channels) process the main path, [channels, 2×channels) the
        // feedback path.
        let lanes = channels * 2;
        let mut tap = Self {
            time_ms: LinearSmoothed::new(0.0),
            feedback_value: 0.0,
            feedback: S::zero(),
            mix_value: 0.5,
            mix: from_f64(0.5),

            flags: Arc::new(TapFlags::default()),

            lp_filter: StateVariableFilter::new(FilterMode::Lowpass, sample_rate, lanes),
            hp_filter: StateVariableFilter::new(FilterMode::Highpass, sample_rate, lanes),
            compressor: Compressor::new(sample_rate, lanes),
            waveshaper: Waveshaper::new(),

            sample_rate,
            ramp_seconds,
            channels,
            max_write_index_offset,
        };
        tap.init(sample_rate, ramp_seconds, channels, max_write_index_offset);
        tap
    }

    /// Creates a tap and restores the full parameter set from `state`, like
    /// [`Self::apply_state`] on a freshly initialized tap.
    pub fn from_state(
        state: &TapState,
        sample_rate: f64,
        ramp_seconds: f64,
        channels: usize,
        max_write_index_offset: usize,
    ) -> Self {
        let mut tap = Self::new(sample_rate, ramp_seconds, channels, max_write_index_offset);
        tap.apply_state(state);
        tap
    }

    /// (Re)prepares the effect chain and smoothing for a sample rate and
    /// channel count. Must be called whenever the owning engine's sample rate
    /// changes; not glitch-free, so only invoke while playback is stopped.
    ///
    /// The delay-time target survives re-initialization; any ramp in progress
    /// snaps to its target.
    pub fn init(
        &mut self,
        sample_rate: f64,
        ramp_seconds: f64,
        channels: usize,
        max_write_index_offset: usize,
    ) {
        self.sample_rate = sample_rate;
        self.ramp_seconds = ramp_seconds;
        self.channels = channels;
        self.max_write_index_offset = max_write_index_offset;

        let lanes = channels * 2;
        self.lp_filter.prepare(sample_rate, lanes);
        self.hp_filter.prepare(sample_rate, lanes);
        self.compressor.prepare(sample_rate, lanes);

        self.time_ms.reset(sample_rate, ramp_seconds);
        // The old target may exceed the new range.
        self.set_time_ms(self.time_ms.target());
    }

    fn max_time_ms(&self) -> f64 {
        self.max_write_index_offset as f64 * 1000.0 / self.sample_rate
    }

    /// Sets the *target* delay time in milliseconds; the live value ramps
    /// there over the smoothing ramp length. Targets are clamped so the read
    /// offset can never exceed `max_write_index_offset`.
    pub fn set_time_ms(&mut self, time_ms: f64) {
        self.time_ms.set_target(time_ms.clamp(0.0, self.max_time_ms()));
    }

    /// Sets the target delay time as a sample count at the tap's sample rate.
    pub fn set_time_samples(&mut self, samples: usize) {
        self.set_time_ms(samples as f64 * 1000.0 / self.sample_rate);
    }

    /// The delay-time target, also the registry's ordering key.
    pub fn target_time_ms(&self) -> f64 {
        self.time_ms.target()
    }

    /// The instantaneous smoothed delay time.
    pub fn current_time_ms(&self) -> f64 {
        self.time_ms.current()
    }

    pub fn is_smoothing(&self) -> bool {
        self.time_ms.is_smoothing()
    }

    pub fn set_feedback(&mut self, feedback: f64) {
        self.feedback_value = feedback.max(0.0);
        self.feedback = from_f64(self.feedback_value);
    }

    pub fn feedback(&self) -> f64 {
        self.feedback_value
    }

    /// Mix between dry input (0.0) and processed delay signal (1.0). Values
    /// outside `[0, 1]` are clamped.
    pub fn set_mix(&mut self, mix: f64) {
        self.mix_value = mix.clamp(0.0, 1.0);
        self.mix = from_f64(self.mix_value);
    }

    pub fn mix(&self) -> f64 {
        self.mix_value
    }

    /// Shared flag handle. Clones of this may be kept by a control thread and
    /// toggled while the audio thread is inside a block.
    pub fn flags(&self) -> Arc<TapFlags> {
        Arc::clone(&self.flags)
    }

    pub fn set_comp_in(&self, enabled: bool) {
        self.flags.set_comp_in(enabled);
    }
    pub fn comp_in(&self) -> bool {
        self.flags.comp_in()
    }
    pub fn set_ws_in(&self, enabled: bool) {
        self.flags.set_ws_in(enabled);
    }
    pub fn ws_in(&self) -> bool {
        self.flags.ws_in()
    }
    pub fn set_comp_fdbk(&self, enabled: bool) {
        self.flags.set_comp_fdbk(enabled);
    }
    pub fn comp_fdbk(&self) -> bool {
        self.flags.comp_fdbk()
    }
    pub fn set_ws_fdbk(&self, enabled: bool) {
        self.flags.set_ws_fdbk(enabled);
    }
    pub fn ws_fdbk(&self) -> bool {
        self.flags.ws_fdbk()
    }
    pub fn set_filt_pre(&self, enabled: bool) {
        self.flags.set_filt_pre(enabled);
    }
    pub fn filt_pre(&self) -> bool {
        self.flags.filt_pre()
    }

    pub fn set_lp_cutoff(&mut self, cutoff_hz: f64) {
        self.lp_filter.set_cutoff(cutoff_hz);
    }
    pub fn lp_cutoff(&self) -> f64 {
        self.lp_filter.cutoff()
    }
    pub fn set_lp_resonance(&mut self, resonance: f64) {
        self.lp_filter.set_resonance(resonance);
    }
    pub fn lp_resonance(&self) -> f64 {
        self.lp_filter.resonance()
    }
    pub fn set_hp_cutoff(&mut self, cutoff_hz: f64) {
        self.hp_filter.set_cutoff(cutoff_hz);
    }
    pub fn hp_cutoff(&self) -> f64 {
        self.hp_filter.cutoff()
    }
    pub fn set_hp_resonance(&mut self, resonance: f64) {
        self.hp_filter.set_resonance(resonance);
    }
    pub fn hp_resonance(&self) -> f64 {
        self.hp_filter.resonance()
    }

    pub fn set_comp_ratio(&mut self, ratio: f64) {
        self.compressor.set_ratio(ratio);
    }
    pub fn comp_ratio(&self) -> f64 {
        self.compressor.ratio()
    }
    pub fn set_comp_thresh(&mut self, threshold_db: f64) {
        self.compressor.set_threshold_db(threshold_db);
    }
    pub fn comp_thresh(&self) -> f64 {
        self.compressor.threshold_db()
    }
    pub fn set_comp_atk(&mut self, attack_ms: f64) {
        self.compressor.set_attack_ms(attack_ms);
    }
    pub fn comp_atk(&self) -> f64 {
        self.compressor.attack_ms()
    }
    pub fn set_comp_rel(&mut self, release_ms: f64) {
        self.compressor.set_release_ms(release_ms);
    }
    pub fn comp_rel(&self) -> f64 {
        self.compressor.release_ms()
    }

    pub fn set_ws_function(&mut self, function: WaveshaperFunction) {
        self.waveshaper.set_function(function);
    }
    pub fn ws_function(&self) -> WaveshaperFunction {
        self.waveshaper.function()
    }
    pub fn set_ws_pre_gain(&mut self, pre_gain: f64) {
        self.waveshaper.set_pre_gain(pre_gain);
    }
    pub fn ws_pre_gain(&self) -> f64 {
        self.waveshaper.pre_gain()
    }
    pub fn set_ws_post_gain(&mut self, post_gain: f64) {
        self.waveshaper.set_post_gain(post_gain);
    }
    pub fn ws_post_gain(&self) -> f64 {
        self.waveshaper.post_gain()
    }

    pub(crate) fn feedback_gain(&self) -> S {
        self.feedback
    }

    pub(crate) fn mix_gain(&self) -> S {
        self.mix
    }

    /// Advances the time ramp by one sample and snapshots the routing flags.
    /// Called exactly once per sample by the engine, before the per-channel
    /// pass, so every channel of a sample sees the same offset and routing.
    pub(crate) fn begin_sample(&mut self) -> (usize, TapRouting) {
        let time_ms = self.time_ms.next();
        let offset = (time_ms * self.sample_rate / 1000.0).round() as usize;
        let offset = offset.min(self.max_write_index_offset);

        let routing = TapRouting {
            filt_pre: self.flags.filt_pre(),
            ws_in: self.flags.ws_in(),
            ws_fdbk: self.flags.ws_fdbk(),
            comp_in: self.flags.comp_in(),
            comp_fdbk: self.flags.comp_fdbk(),
        };
        (offset, routing)
    }

    /// Runs the effect chain for one channel of one sample, producing the
    /// main output value and the (pre-gain) feedback value.
    ///
    /// The feedback value follows the main path through the pre-filter, then
    /// diverges: waveshaper and compressor only touch it when their feedback
    /// routing is enabled, each on a dedicated state lane so the two paths
    /// never share filter or envelope memory.
    pub(crate) fn process_sample(
        &mut self,
        routing: &TapRouting,
        channel: usize,
        input: S,
    ) -> (S, S) {
        let fdbk_lane = self.channels + channel;

        let mut out = input;
        if routing.filt_pre {
            out = self.lp_filter.process(channel, out);
            out = self.hp_filter.process(channel, out);
        }

        let mut fdbk = out;

        if routing.ws_in {
            out = self.waveshaper.process(out);
            if routing.ws_fdbk {
                fdbk = self.waveshaper.process(fdbk);
            }
        }

        if routing.comp_in {
            out = self.compressor.process(channel, out);
            if routing.comp_fdbk {
                fdbk = self.compressor.process(fdbk_lane, fdbk);
            }
        }

        if !routing.filt_pre {
            out = self.lp_filter.process(channel, out);
            out = self.hp_filter.process(channel, out);
            fdbk = self.lp_filter.process(fdbk_lane, fdbk);
            fdbk = self.hp_filter.process(fdbk_lane, fdbk);
        }

        (out, fdbk)
    }

    /// Takes a snapshot of the tap's full parameter set.
    pub fn to_state(&self) -> TapState {
        TapState {
            hp_filter_freq: self.hp_filter.cutoff(),
            lp_filter_freq: self.lp_filter.cutoff(),
            hp_filter_res: self.hp_filter.resonance(),
            lp_filter_res: self.lp_filter.resonance(),
            filt_pre: self.flags.filt_pre(),

            comp_ratio: self.compressor.ratio(),
            comp_thresh: self.compressor.threshold_db(),
            comp_atk: self.compressor.attack_ms(),
            comp_rel: self.compressor.release_ms(),
            comp_in: self.flags.comp_in(),
            comp_fdbk: self.flags.comp_fdbk(),

            ws_type: self.waveshaper.function(),
            ws_pre_gain: self.waveshaper.pre_gain(),
            ws_post_gain: self.waveshaper.post_gain(),
            ws_in: self.flags.ws_in(),
            ws_fdbk: self.flags.ws_fdbk(),

            mix: self.mix_value,
            feedback: self.feedback_value,
            time_ms: self.time_ms.target(),
        }
    }

    /// Restores the full parameter set from a snapshot, leaving the tap's
    /// sample rate, smoothing ramp, and effect-chain runtime state untouched.
    /// The delay time ramps from its current value to the restored target.
    pub fn apply_state(&mut self, state: &TapState) {
        self.set_hp_cutoff(state.hp_filter_freq);
        self.set_lp_cutoff(state.lp_filter_freq);
        self.set_hp_resonance(state.hp_filter_res);
        self.set_lp_resonance(state.lp_filter_res);
        self.set_filt_pre(state.filt_pre);

        self.set_comp_ratio(state.comp_ratio);
        self.set_comp_atk(state.comp_atk);
        self.set_comp_thresh(state.comp_thresh);
        self.set_comp_rel(state.comp_rel);
        self.set_comp_in(state.comp_in);
        self.set_comp_fdbk(state.comp_fdbk);

        self.set_ws_in(state.ws_in);
        self.set_ws_fdbk(state.ws_fdbk);
        self.set_ws_function(state.ws_type);
        self.set_ws_pre_gain(state.ws_pre_gain);
        self.set_ws_post_gain(state.ws_post_gain);

        self.set_mix(state.mix);
        self.set_feedback(state.feedback);
        self.set_time_ms(state.time_ms);
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn max_write_index_offset(&self) -> usize {
        self.max_write_index_offset
    }
}

/// Flat snapshot of one tap's parameter set, the only supported interchange
/// format for tap configuration (persistence and duplication).
///
/// Every field is mandatory; deserializing a snapshot with missing fields
/// fails instead of filling in defaults.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TapState {
    pub hp_filter_freq: f64,
    pub lp_filter_freq: f64,
    pub hp_filter_res: f64,
    pub lp_filter_res: f64,
    pub filt_pre: bool,

    pub comp_ratio: f64,
    pub comp_thresh: f64,
    pub comp_atk: f64,
    pub comp_rel: f64,
    pub comp_in: bool,
    pub comp_fdbk: bool,

    pub ws_type: WaveshaperFunction,
    pub ws_pre_gain: f64,
    pub ws_post_gain: f64,
    pub ws_in: bool,
    pub ws_fdbk: bool,

    pub mix: f64,
    pub feedback: f64,
    pub time_ms: f64,
}
impl Default for TapState {
    fn default() -> Self {
        Self {
            hp_filter_freq: 20.0,
            lp_filter_freq: 20_000.0,
            hp_filter_res: std::f64::consts::FRAC_1_SQRT_2,
            lp_filter_res: std::f64::consts::FRAC_1_SQRT_2,
            filt_pre: false,

            comp_ratio: 4.0,
            comp_thresh: -18.0,
            comp_atk: 10.0,
            comp_rel: 100.0,
            comp_in: false,
            comp_fdbk: false,

            ws_type: WaveshaperFunction::Tanh,
            ws_pre_gain: 1.0,
            ws_post_gain: 1.0,
            ws_in: false,
            ws_fdbk: false,

            mix: 0.5,
            feedback: 0.0,
            time_ms: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tap() -> DelayTap<f64> {
        DelayTap::new(48_000.0, 0.1, 2, 960_000 - 1)
    }

    #[test]
    fn time_target_ramps() {
        let mut t = tap();

        t.set_time_ms(100.0);

        assert_eq!(t.target_time_ms(), 100.0);
        assert!(t.current_time_ms() < 100.0);

        // Ramp is 0.1 s = 4800 samples.
        for _ in 0..4800 {
            t.begin_sample();
        }
        assert_eq!(t.current_time_ms(), 100.0);
        assert!(!t.is_smoothing());
    }

    #[test]
    fn settled_offset_matches_time() {
        let mut t = tap();
        t.set_time_ms(250.0);
        for _ in 0..4800 {
            t.begin_sample();
        }

        let (offset, _) = t.begin_sample();

        assert_eq!(offset, 12_000); // 250 ms at 48 kHz
    }

    #[test]
    fn time_is_clamped_to_max_offset() {
        let mut t = DelayTap::<f64>::new(48_000.0, 0.0, 1, 4800);

        t.set_time_ms(1.0e9);

        assert_eq!(t.target_time_ms(), 4800.0 / 48_000.0 * 1000.0);
        let (offset, _) = t.begin_sample();
        assert_eq!(offset, 4800);
    }

    #[test]
    fn set_time_samples_converts() {
        let mut t = tap();

        t.set_time_samples(24_000);

        assert_eq!(t.target_time_ms(), 500.0);
    }

    #[test]
    fn mix_and_feedback_are_clamped() {
        let mut t = tap();

        t.set_mix(1.5);
        assert_eq!(t.mix(), 1.0);
        t.set_mix(-0.5);
        assert_eq!(t.mix(), 0.0);

        t.set_feedback(-1.0);
        assert_eq!(t.feedback(), 0.0);
    }

    #[test]
    fn flags_are_shared_with_handle() {
        let t = tap();
        let flags = t.flags();

        flags.set_ws_in(true);
        assert!(t.ws_in());

        t.set_comp_fdbk(true);
        assert!(flags.comp_fdbk());
    }

    #[test]
    fn state_round_trip_is_exact() {
        let mut t = tap();
        t.set_time_ms(123.5);
        t.set_feedback(0.6);
        t.set_mix(0.25);
        t.set_lp_cutoff(2_000.0);
        t.set_hp_cutoff(150.0);
        t.set_lp_resonance(1.2);
        t.set_hp_resonance(2.5);
        t.set_comp_ratio(8.0);
        t.set_comp_thresh(-24.0);
        t.set_comp_atk(5.0);
        t.set_comp_rel(250.0);
        t.set_ws_function(WaveshaperFunction::Sine);
        t.set_ws_pre_gain(3.0);
        t.set_ws_post_gain(0.5);
        t.set_ws_in(true);
        t.set_comp_in(true);
        t.set_filt_pre(true);

        let state = t.to_state();
        let mut restored = DelayTap::<f64>::new(48_000.0, 0.1, 2, 960_000 - 1);
        restored.apply_state(&state);

        assert_eq!(restored.to_state(), state);
    }

    #[test]
    fn apply_state_keeps_sample_rate() {
        let mut t = DelayTap::<f64>::new(96_000.0, 0.05, 2, 960_000);

        t.apply_state(&TapState::default());

        assert_eq!(t.sample_rate(), 96_000.0);
    }

    #[test]
    fn snapshot_serializes_with_serde() {
        let state = TapState {
            time_ms: 42.0,
            ..TapState::default()
        };

        let json = serde_json::to_string(&state).unwrap();
        let back: TapState = serde_json::from_str(&json).unwrap();

        assert_eq!(back, state);
    }

    #[test]
    fn partial_snapshot_is_rejected() {
        // A snapshot missing fields must fail closed instead of defaulting.
        let result = serde_json::from_str::<TapState>(r#"{"mix": 0.5}"#);

        assert!(result.is_err());
    }

    #[test]
    fn feedback_path_diverges_with_routing() {
        let mut t = DelayTap::<f64>::new(48_000.0, 0.0, 1, 4800);
        t.set_ws_in(true);
        t.set_ws_function(WaveshaperFunction::Signum);

        let (_, routing) = t.begin_sample();
        let (out, fdbk) = t.process_sample(&routing, 0, 0.25);

        // Main path is shaped, feedback path is not.
        assert_eq!(out, 1.0);
        assert_eq!(fdbk, 0.25);
    }

    #[test]
    fn feedback_path_follows_when_routed() {
        let mut t = DelayTap::<f64>::new(48_000.0, 0.0, 1, 4800);
        t.set_ws_in(true);
        t.set_ws_fdbk(true);
        t.set_ws_function(WaveshaperFunction::Signum);

        let (_, routing) = t.begin_sample();
        let (out, fdbk) = t.process_sample(&routing, 0, 0.25);

        assert_eq!(out, 1.0);
        assert_eq!(fdbk, 1.0);
    }

    #[test]
    fn init_preserves_time_target() {
        let mut t = tap();
        t.set_time_ms(300.0);

        t.init(44_100.0, 0.1, 2, 882_000 - 1);

        assert_eq!(t.target_time_ms(), 300.0);
        assert_eq!(t.current_time_ms(), 300.0);
    }
}
