//! Audio capture: device selection, frame queueing, and the capture engine.

pub mod device;
pub mod queue;

#[cfg(feature = "cpal-audio")]
pub mod capture;

pub use device::DeviceSelector;
pub use queue::{AudioFrame, FrameQueue};

#[cfg(feature = "cpal-audio")]
pub use capture::{CaptureEngine, FrameSource};
