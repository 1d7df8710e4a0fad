use std::os::raw::c_int;
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{error, info, warn};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};

use crate::backend::Multiplexer;
use crate::error::GpioError;
use crate::gpio::GpioContext;

pub const TERMINATION_SIGNALS: [c_int; 3] = [SIGINT, SIGTERM, SIGHUP];

#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub released: Vec<u32>,
    pub failed: Vec<(u32, GpioError)>,
    pub router_fault: Option<GpioError>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.router_fault.is_none()
    }

    pub fn log(&self) {
        info!("released {} pin(s): {:?}", self.released.len(), self.released);
        for (number, e) in &self.failed {
            error!("gpio{number} was not released cleanly: {e}");
        }
        if let Some(fault) = &self.router_fault {
            error!("{fault}");
        }
    }
}

/// Releases every pin when the process is asked to terminate.
///
/// The first SIGINT/SIGTERM/SIGHUP runs [`GpioContext::shutdown`] on a
/// dedicated thread and then calls `exit` with `128 + signal`.
pub struct ShutdownHandler {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl ShutdownHandler {
    pub fn install<M, F>(ctx: Arc<GpioContext<M>>, exit: F) -> Result<Self, GpioError>
    where
        M: Multiplexer + 'static,
        F: FnOnce(i32) + Send + 'static,
    {
        Self::install_for(ctx, &TERMINATION_SIGNALS, exit)
    }

    pub(crate) fn install_for<M, F>(
        ctx: Arc<GpioContext<M>>,
        signals: &[c_int],
        exit: F,
    ) -> Result<Self, GpioError>
    where
        M: Multiplexer + 'static,
        F: FnOnce(i32) + Send + 'static,
    {
        let mut signals = Signals::new(signals).map_err(GpioError::Signal)?;
        let handle = signals.handle();

        let thread = std::thread::Builder::new()
            .name("gpio-shutdown".into())
            .spawn(move || {
                let Some(signal) = signals.forever().next() else {
                    return;
                };
                warn!("received signal {signal}, releasing pins");
                let report = ctx.shutdown();
                report.log();
                exit(128 + signal);
            })
            .map_err(GpioError::Signal)?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    /// Unregisters the signal handlers without running shutdown.
    pub fn uninstall(mut self) {
        self.close();
    }

    fn close(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ShutdownHandler {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockMultiplexer;
    use crate::config::{AppConfig, Direction, Edge};
    use crate::sysfs::SysfsControl;
    use signal_hook::consts::{SIGUSR1, SIGUSR2};
    use std::fs;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn signal_releases_pins_then_exits() {
        let dir = tempfile::tempdir().unwrap();
        let control = SysfsControl::new(dir.path());
        for number in [20, 21] {
            fs::create_dir(control.pin_dir(number)).unwrap();
            fs::write(control.value_path(number), "0").unwrap();
        }
        let config = AppConfig {
            sysfs_root: dir.path().to_path_buf(),
            ..AppConfig::default()
        };
        let ctx: Arc<GpioContext<MockMultiplexer>> =
            Arc::new(GpioContext::new(Arc::new(config)).unwrap());
        ctx.init_multiplexer(MockMultiplexer::default()).unwrap();
        let a = ctx.acquire_pin(20, Direction::In, Edge::Rising).unwrap();
        let b = ctx.acquire_pin(21, Direction::Out, Edge::None).unwrap();
        ctx.add_interrupt(&a).unwrap();

        let (tx, rx) = mpsc::channel();
        let _handler = ShutdownHandler::install_for(ctx.clone(), &[SIGUSR2], move |code| {
            tx.send(code).unwrap();
        })
        .unwrap();

        signal_hook::low_level::raise(SIGUSR2).unwrap();
        let code = rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(code, 128 + SIGUSR2);
        assert!(!a.is_enabled());
        assert!(!b.is_enabled());
        assert!(ctx.registry().is_empty());
        assert!(!ctx.multiplexer().unwrap().is_registered(a.fd()));
    }

    #[test]
    fn uninstall_without_signal_does_not_shut_down() {
        let ctx: Arc<GpioContext<MockMultiplexer>> =
            Arc::new(GpioContext::new(Arc::new(AppConfig::default())).unwrap());
        let (tx, rx) = mpsc::channel::<i32>();

        let handler = ShutdownHandler::install_for(ctx, &[SIGUSR1], move |code| {
            let _ = tx.send(code);
        })
        .unwrap();
        handler.uninstall();

        assert!(rx.try_recv().is_err());
    }
}
