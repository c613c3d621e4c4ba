#[cfg(any(feature = "test_alloc", test))]
#[macro_use]
mod test_alloc;
#[cfg(not(any(feature = "test_alloc", test)))]
macro_rules! no_heap {
    ($body:block) => {
        $body
    };
}

mod engine;
pub use engine::{
    components::{
        DelayBuffer, DelayTap, FilterMode, TapFlags, TapOverflowError, TapRegistry, TapState,
        WaveshaperFunction, MAX_TAPS,
    },
    DelayEngine, Sample, DEFAULT_SMOOTHING_RAMP_SECONDS, MAX_DELAY_TIME_SECONDS,
};
