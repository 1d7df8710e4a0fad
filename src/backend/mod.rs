use std::os::fd::RawFd;
use std::time::Duration;

use crate::error::GpioError;

#[cfg(all(feature = "hardware-gpio", target_os = "linux"))]
pub mod epoll;
pub mod mock;

#[cfg(all(feature = "hardware-gpio", target_os = "linux"))]
pub use epoll::EpollMultiplexer;
pub use mock::MockMultiplexer;

/// Edge-triggered readiness wait over pin value descriptors.
///
/// `add_interest`/`remove_interest` are called from whichever task
/// configures pins while `wait` runs on the router thread, so every method
/// takes `&self`.
pub trait Multiplexer: Send + Sync {
    fn add_interest(&self, fd: RawFd) -> Result<(), GpioError>;
    fn remove_interest(&self, fd: RawFd) -> Result<(), GpioError>;
    /// Blocks until at least one registered descriptor is ready or `timeout`
    /// elapses (`None` waits forever). `ready` is cleared and refilled with
    /// at most `capacity()` descriptors in the order they were reported.
    fn wait(&self, ready: &mut Vec<RawFd>, timeout: Option<Duration>) -> Result<usize, GpioError>;
    /// Makes a blocked `wait` return early with zero descriptors.
    fn wake(&self) -> Result<(), GpioError>;
    fn capacity(&self) -> usize;
}
