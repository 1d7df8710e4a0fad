use std::sync::{Arc, OnceLock};

use log::{info, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::backend::Multiplexer;
use crate::config::{AppConfig, Direction, Edge};
use crate::error::GpioError;
use crate::pin::Pin;
use crate::registry::PinRegistry;
use crate::router::{
    EventDispatcher, InterruptEvent, InterruptRouter, RouterSettings, RouterState, RouterStats,
    RouterStatus,
};
use crate::shutdown::ShutdownReport;
use crate::sysfs::SysfsControl;

pub type EventStream = ReceiverStream<InterruptEvent>;

/// Owns everything interrupt routing shares between tasks: the pin registry,
/// the multiplexer, the router thread and the event stream.
pub struct GpioContext<M: Multiplexer + 'static> {
    config: Arc<AppConfig>,
    control: SysfsControl,
    registry: Arc<PinRegistry>,
    multiplexer: OnceLock<Arc<M>>,
    event_tx: Mutex<Option<mpsc::Sender<InterruptEvent>>>,
    event_rx: Mutex<Option<mpsc::Receiver<InterruptEvent>>>,
    router: Mutex<Option<InterruptRouter>>,
    status: Arc<RouterStatus>,
}

impl<M: Multiplexer + 'static> GpioContext<M> {
    pub fn new(config: Arc<AppConfig>) -> Result<Self, GpioError> {
        config.validate()?;
        let (event_tx, event_rx) = mpsc::channel(config.max_burst);

        Ok(Self {
            control: SysfsControl::new(&config.sysfs_root),
            registry: Arc::new(PinRegistry::new(config.max_pins)),
            multiplexer: OnceLock::new(),
            event_tx: Mutex::new(Some(event_tx)),
            event_rx: Mutex::new(Some(event_rx)),
            router: Mutex::new(None),
            status: Arc::new(RouterStatus::default()),
            config,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &PinRegistry {
        &self.registry
    }

    /// Installs the multiplexer. Only the first call succeeds.
    pub fn init_multiplexer(&self, mux: M) -> Result<(), GpioError> {
        self.multiplexer
            .set(Arc::new(mux))
            .map_err(|_| GpioError::AlreadyInitialized("event multiplexer"))
    }

    pub fn multiplexer(&self) -> Result<&Arc<M>, GpioError> {
        self.multiplexer
            .get()
            .ok_or(GpioError::NotInitialized("event multiplexer"))
    }

    fn mux_dyn(&self) -> Option<&dyn Multiplexer> {
        self.multiplexer.get().map(|m| &**m as &dyn Multiplexer)
    }

    pub fn acquire_pin(
        &self,
        number: u32,
        direction: Direction,
        edge: Edge,
    ) -> Result<Arc<Pin>, GpioError> {
        // one write guard across check, open and insert keeps numbers unique
        let mut pins = self.registry.write();
        if pins.values().any(|pin| pin.number() == number) {
            return Err(GpioError::Configuration(format!(
                "gpio{number} is already acquired"
            )));
        }
        if pins.len() >= self.registry.capacity() {
            return Err(GpioError::RegistryFull(self.registry.capacity()));
        }

        let pin = Arc::new(Pin::open(self.control.clone(), number, direction, edge)?);
        pins.insert(pin.fd(), pin.clone());
        drop(pins);

        info!("gpio{number} acquired ({direction}, edge {edge})");
        Ok(pin)
    }

    /// Parses string settings before any sysfs access.
    pub fn acquire_pin_str(
        &self,
        number: u32,
        direction: &str,
        edge: &str,
    ) -> Result<Arc<Pin>, GpioError> {
        let direction = direction.parse()?;
        let edge = edge.parse()?;
        self.acquire_pin(number, direction, edge)
    }

    pub fn add_interrupt(&self, pin: &Pin) -> Result<(), GpioError> {
        let mux = self.multiplexer()?;
        pin.register_interrupt(&**mux)
    }

    pub fn remove_interrupt(&self, pin: &Pin) -> Result<(), GpioError> {
        let mux = self.multiplexer()?;
        pin.unregister_interrupt(&**mux)
    }

    /// Starts the router thread. Requires an installed multiplexer; a second
    /// call fails with `AlreadyInitialized`.
    pub fn spawn_router(&self) -> Result<(), GpioError> {
        let mux = self.multiplexer()?.clone();
        let event_tx = self
            .event_tx
            .lock()
            .take()
            .ok_or(GpioError::AlreadyInitialized("interrupt router"))?;

        let router = InterruptRouter::spawn(
            self.registry.clone(),
            mux,
            EventDispatcher::new(event_tx, self.status.clone()),
            self.status.clone(),
            RouterSettings::from(&*self.config),
        )?;
        *self.router.lock() = Some(router);
        Ok(())
    }

    /// Hands out the event stream. There is a single consumer; later calls
    /// return `None`.
    pub fn events(&self) -> Option<EventStream> {
        self.event_rx.lock().take().map(ReceiverStream::new)
    }

    pub fn router_state(&self) -> RouterState {
        self.status.state()
    }

    pub fn router_stats(&self) -> RouterStats {
        self.status.stats()
    }

    pub fn router_fault(&self) -> Option<GpioError> {
        self.status.fault().map(GpioError::RouterTerminated)
    }

    /// Removes the pin from the registry and tears it down while holding the
    /// registry write lock, so the router never sees a half-released pin.
    pub fn release_pin(&self, pin: &Pin) -> Result<(), GpioError> {
        let mut pins = self.registry.write();
        if pins
            .get(&pin.fd())
            .is_some_and(|owned| std::ptr::eq(Arc::as_ptr(owned), pin))
        {
            pins.remove(&pin.fd());
        }
        let result = pin.teardown(self.mux_dyn());
        drop(pins);

        if result.is_ok() {
            info!("gpio{} released", pin.number());
        }
        result
    }

    /// Disables and releases every registered pin, then stops the router.
    /// A failing pin is logged and reported but does not stop the walk.
    pub fn shutdown(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        {
            let mut pins = self.registry.write();
            let mut drained: Vec<Arc<Pin>> = pins.drain().map(|(_, pin)| pin).collect();
            drained.sort_by_key(|pin| pin.number());

            for pin in drained {
                match pin.teardown(self.mux_dyn()) {
                    Ok(()) => report.released.push(pin.number()),
                    Err(e) => {
                        warn!("gpio{}: release during shutdown failed: {e}", pin.number());
                        report.failed.push((pin.number(), e));
                    }
                }
            }
        }

        if let Some(router) = self.router.lock().take() {
            router.stop();
        }
        report.router_fault = self.router_fault();
        report
    }
}
