mod delay_buffer;
pub use delay_buffer::DelayBuffer;

mod tap;
pub use tap::{DelayTap, TapFlags, TapState};

mod registry;
pub use registry::{TapOverflowError, TapRegistry, MAX_TAPS};

mod filter;
pub use filter::{FilterMode, StateVariableFilter};

mod compressor;
pub use compressor::Compressor;

mod waveshaper;
pub use waveshaper::{Waveshaper, WaveshaperFunction};
