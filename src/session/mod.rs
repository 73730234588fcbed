//! Realtime streaming session: wire protocol, emission policies, and the
//! session runner.

pub mod backoff;
pub mod protocol;
pub mod stream;
pub mod throttle;

pub use backoff::Backoff;
pub use stream::StreamSession;
