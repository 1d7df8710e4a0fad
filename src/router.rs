use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::backend::Multiplexer;
use crate::config::{AppConfig, Edge, Level};
use crate::error::GpioError;
use crate::pin::Pin;
use crate::registry::PinRegistry;

#[derive(Debug, Clone, Serialize)]
pub struct InterruptEvent {
    #[serde(skip)]
    pub pin: Arc<Pin>,
    pub pin_id: u32,
    pub edge: Edge,
    pub state: Level,
    pub state_int: u8,
    pub timestamp_ms: u64,
}

impl InterruptEvent {
    fn new(pin: Arc<Pin>, edge: Edge, state: Level) -> Self {
        Self {
            pin_id: pin.number(),
            pin,
            edge,
            state,
            state_int: state.as_int(),
            timestamp_ms: epoch_millis(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouterState {
    WaitingForEvents,
    Dispatching,
    Terminated,
}

impl RouterState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => RouterState::WaitingForEvents,
            1 => RouterState::Dispatching,
            _ => RouterState::Terminated,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub cycles: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub skipped: u64,
}

/// Router progress shared with the owning context.
#[derive(Debug, Default)]
pub struct RouterStatus {
    state: AtomicU8,
    cycles: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    skipped: AtomicU64,
    fault: Mutex<Option<String>>,
}

impl RouterStatus {
    pub fn state(&self) -> RouterState {
        RouterState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            cycles: self.cycles.load(Ordering::Acquire),
            delivered: self.delivered.load(Ordering::Acquire),
            dropped: self.dropped.load(Ordering::Acquire),
            skipped: self.skipped.load(Ordering::Acquire),
        }
    }

    pub fn fault(&self) -> Option<String> {
        self.fault.lock().clone()
    }

    fn set_state(&self, state: RouterState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn terminate(&self, reason: String) {
        *self.fault.lock() = Some(reason);
        self.set_state(RouterState::Terminated);
    }
}

/// Non-blocking publisher onto the bounded event stream. Events that do not
/// fit are dropped and counted.
pub struct EventDispatcher {
    event_tx: mpsc::Sender<InterruptEvent>,
    status: Arc<RouterStatus>,
}

impl EventDispatcher {
    pub fn new(event_tx: mpsc::Sender<InterruptEvent>, status: Arc<RouterStatus>) -> Self {
        Self { event_tx, status }
    }

    pub fn dispatch(&self, event: InterruptEvent) -> bool {
        match self.event_tx.try_send(event) {
            Ok(()) => {
                self.status.delivered.fetch_add(1, Ordering::AcqRel);
                true
            }
            Err(TrySendError::Full(event)) => {
                self.status.dropped.fetch_add(1, Ordering::AcqRel);
                debug!("event stream full, dropping event for gpio{}", event.pin_id);
                false
            }
            Err(TrySendError::Closed(event)) => {
                self.status.dropped.fetch_add(1, Ordering::AcqRel);
                debug!("event stream closed, dropping event for gpio{}", event.pin_id);
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RouterSettings {
    pub wait_timeout: Option<Duration>,
    pub max_wait_failures: u32,
    pub retry_backoff: Duration,
}

impl From<&AppConfig> for RouterSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            wait_timeout: config.wait_timeout_ms.map(Duration::from_millis),
            max_wait_failures: config.max_wait_failures.max(1),
            retry_backoff: Duration::from_millis(config.wait_retry_backoff_ms),
        }
    }
}

/// Builds the event for a ready pin. Rising and falling edges report the
/// configured level without touching the value file; `both` samples it.
/// Returns `None` for `none` edges and for pins released mid-batch.
pub(crate) fn derive_event(pin: &Arc<Pin>) -> Result<Option<InterruptEvent>, GpioError> {
    let mut state = pin.lock();
    if !state.is_enabled() {
        return Ok(None);
    }

    let edge = state.edge();
    let level = match edge {
        Edge::None => return Ok(None),
        Edge::Rising => Level::High,
        Edge::Falling => Level::Low,
        Edge::Both => match state.read_level(pin.control(), pin.number())? {
            Some(level) => level,
            None => return Ok(None),
        },
    };

    Ok(Some(InterruptEvent::new(pin.clone(), edge, level)))
}

struct RouterLoop<M: Multiplexer> {
    registry: Arc<PinRegistry>,
    mux: Arc<M>,
    dispatcher: EventDispatcher,
    status: Arc<RouterStatus>,
    cancel: Arc<AtomicBool>,
    settings: RouterSettings,
}

impl<M: Multiplexer> RouterLoop<M> {
    fn run(self) {
        let mut ready: Vec<RawFd> = Vec::with_capacity(self.mux.capacity());
        let mut failures = 0u32;

        while !self.cancel.load(Ordering::Acquire) {
            self.status.set_state(RouterState::WaitingForEvents);

            match self.mux.wait(&mut ready, self.settings.wait_timeout) {
                Ok(0) => failures = 0,
                Ok(_) => {
                    failures = 0;
                    self.status.set_state(RouterState::Dispatching);
                    self.dispatch_batch(&ready);
                    self.status.cycles.fetch_add(1, Ordering::AcqRel);
                }
                Err(GpioError::WaitFailed(e)) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    failures += 1;
                    if failures >= self.settings.max_wait_failures {
                        error!("interrupt router giving up after {failures} consecutive failures: {e}");
                        self.status
                            .terminate(format!("{failures} consecutive wait failures, last: {e}"));
                        return;
                    }
                    warn!(
                        "interrupt router wait failed ({failures}/{}): {e}",
                        self.settings.max_wait_failures
                    );
                    std::thread::sleep(self.settings.retry_backoff);
                }
            }
        }

        debug!("interrupt router stopped");
    }

    fn dispatch_batch(&self, ready: &[RawFd]) {
        // held across the batch so release cannot interleave with derivation
        let registry = self.registry.read();

        for &fd in ready {
            let pin = match registry.resolve(fd) {
                Ok(pin) => pin,
                Err(e) => {
                    self.status.skipped.fetch_add(1, Ordering::AcqRel);
                    warn!("skipping ready descriptor: {e}");
                    continue;
                }
            };

            match derive_event(pin) {
                Ok(Some(event)) => {
                    self.dispatcher.dispatch(event);
                }
                Ok(None) => {}
                Err(e) => {
                    self.status.skipped.fetch_add(1, Ordering::AcqRel);
                    warn!("gpio{}: failed to derive event: {e}", pin.number());
                }
            }
        }
    }
}

/// Handle to the background router thread. Dropping it stops the thread.
pub struct InterruptRouter {
    cancel: Arc<AtomicBool>,
    waker: Arc<dyn Multiplexer>,
    handle: Option<JoinHandle<()>>,
}

impl InterruptRouter {
    pub fn spawn<M: Multiplexer + 'static>(
        registry: Arc<PinRegistry>,
        mux: Arc<M>,
        dispatcher: EventDispatcher,
        status: Arc<RouterStatus>,
        settings: RouterSettings,
    ) -> Result<Self, GpioError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let waker: Arc<dyn Multiplexer> = mux.clone();
        let router = RouterLoop {
            registry,
            mux,
            dispatcher,
            status,
            cancel: cancel.clone(),
            settings,
        };

        let handle = std::thread::Builder::new()
            .name("gpio-interrupts".into())
            .spawn(move || router.run())
            .map_err(|e| GpioError::RouterTerminated(format!("failed to spawn router: {e}")))?;
        info!("interrupt router started");

        Ok(Self {
            cancel,
            waker,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel.store(true, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            warn!("failed to wake interrupt router: {e}");
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for InterruptRouter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
