mod backend;
mod config;
mod error;
mod gpio;
mod pin;
mod registry;
mod router;
mod shutdown;
mod sysfs;

pub use backend::{MockMultiplexer, Multiplexer};
pub use config::{AppConfig, DEFAULT_SYSFS_ROOT, Direction, Edge, Level, PinConfig};
pub use error::GpioError;
pub use gpio::{EventStream, GpioContext};
pub use pin::{Pin, WriteOutcome};
pub use registry::PinRegistry;
pub use router::{InterruptEvent, RouterState, RouterStats};
pub use shutdown::{ShutdownHandler, ShutdownReport, TERMINATION_SIGNALS};
pub use sysfs::SysfsControl;

#[cfg(all(feature = "hardware-gpio", target_os = "linux"))]
pub use backend::EpollMultiplexer;
