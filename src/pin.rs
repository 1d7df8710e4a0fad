use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::fd::{AsRawFd, RawFd};

use log::{debug, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::backend::Multiplexer;
use crate::config::{Direction, Edge, Level};
use crate::error::GpioError;
use crate::sysfs::SysfsControl;

const VALUE_READ_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum WriteOutcome {
    Written,
    Disabled,
}

/// An exported GPIO pin with its `value` file held open.
///
/// The pin is enabled exactly while the value handle is open; release takes
/// the handle out of the per-pin lock so nothing can touch a closed file.
#[derive(Debug)]
pub struct Pin {
    number: u32,
    direction: Direction,
    fd: RawFd,
    control: SysfsControl,
    state: Mutex<PinState>,
}

#[derive(Debug)]
pub(crate) struct PinState {
    edge: Edge,
    value: Option<File>,
    interrupt: bool,
}

impl PinState {
    pub(crate) fn edge(&self) -> Edge {
        self.edge
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.value.is_some()
    }

    /// Rewinds and samples the value file. `Ok(None)` once released.
    pub(crate) fn read_level(
        &mut self,
        control: &SysfsControl,
        number: u32,
    ) -> Result<Option<Level>, GpioError> {
        let Some(file) = self.value.as_mut() else {
            return Ok(None);
        };
        let path = control.value_path(number);

        let mut buf = [0u8; VALUE_READ_BUFFER];
        file.seek(SeekFrom::Start(0))
            .map_err(|e| GpioError::resource(&path, e))?;
        let n = file.read(&mut buf).map_err(|e| GpioError::resource(&path, e))?;

        match buf[..n].first() {
            Some(b'1') => Ok(Some(Level::High)),
            Some(b'0') => Ok(Some(Level::Low)),
            _ => Err(GpioError::resource(
                path,
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unexpected value contents {:?}", &buf[..n]),
                ),
            )),
        }
    }
}

impl Pin {
    /// Exports the pin, writes direction (and edge for inputs), and opens the
    /// value file.
    pub(crate) fn open(
        control: SysfsControl,
        number: u32,
        direction: Direction,
        edge: Edge,
    ) -> Result<Self, GpioError> {
        control.export(number)?;
        let configured = control
            .set_direction(number, direction)
            .and_then(|()| match direction {
                Direction::In => control.set_edge(number, edge),
                Direction::Out => Ok(()),
            })
            .and_then(|()| control.open_value(number, direction));
        let value = match configured {
            Ok(value) => value,
            Err(e) => {
                if let Err(unexport_err) = control.unexport(number) {
                    warn!("gpio{number}: unexport after failed setup: {unexport_err}");
                }
                return Err(e);
            }
        };
        let fd = value.as_raw_fd();
        debug!("gpio{number} opened as {direction} (fd {fd}, edge {edge})");

        Ok(Self {
            number,
            direction,
            fd,
            control,
            state: Mutex::new(PinState {
                edge,
                value: Some(value),
                interrupt: false,
            }),
        })
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Descriptor of the value file as opened at acquisition. Stays the
    /// registry key after release even though the descriptor is closed.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn edge(&self) -> Edge {
        self.state.lock().edge
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().is_enabled()
    }

    pub fn has_interrupt(&self) -> bool {
        self.state.lock().interrupt
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, PinState> {
        self.state.lock()
    }

    pub(crate) fn control(&self) -> &SysfsControl {
        &self.control
    }

    pub fn read(&self) -> Result<Option<Level>, GpioError> {
        self.state.lock().read_level(&self.control, self.number)
    }

    pub fn set_high(&self) -> Result<WriteOutcome, GpioError> {
        self.write_level(Level::High)
    }

    pub fn set_low(&self) -> Result<WriteOutcome, GpioError> {
        self.write_level(Level::Low)
    }

    fn write_level(&self, level: Level) -> Result<WriteOutcome, GpioError> {
        let mut state = self.state.lock();
        let Some(file) = state.value.as_mut() else {
            return Ok(WriteOutcome::Disabled);
        };
        if self.direction != Direction::Out {
            return Err(GpioError::Configuration(format!(
                "gpio{} is an input and cannot be driven",
                self.number
            )));
        }

        let path = self.control.value_path(self.number);
        let byte = if level == Level::High { b"1" } else { b"0" };
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.write_all(byte))
            .map_err(|e| GpioError::resource(path, e))?;
        Ok(WriteOutcome::Written)
    }

    /// Writes the edge file, then updates the edge used for event derivation.
    pub fn set_trigger_edge(&self, edge: Edge) -> Result<(), GpioError> {
        let mut state = self.state.lock();
        self.control.set_edge(self.number, edge)?;
        state.edge = edge;
        Ok(())
    }

    pub fn set_trigger_edge_str(&self, edge: &str) -> Result<(), GpioError> {
        self.set_trigger_edge(edge.parse()?)
    }

    pub(crate) fn register_interrupt(&self, mux: &dyn Multiplexer) -> Result<(), GpioError> {
        let mut state = self.state.lock();
        if !state.is_enabled() {
            return Err(GpioError::RegistrationFailed {
                fd: self.fd,
                source: io::Error::new(io::ErrorKind::NotConnected, "pin released"),
            });
        }
        mux.add_interest(self.fd)?;
        state.interrupt = true;
        Ok(())
    }

    pub(crate) fn unregister_interrupt(&self, mux: &dyn Multiplexer) -> Result<(), GpioError> {
        let mut state = self.state.lock();
        // after release the descriptor number may belong to another pin
        if !state.is_enabled() || !state.interrupt {
            return Err(GpioError::RegistrationFailed {
                fd: self.fd,
                source: io::Error::new(io::ErrorKind::NotFound, "no interrupt registered"),
            });
        }
        mux.remove_interest(self.fd)?;
        state.interrupt = false;
        Ok(())
    }

    /// Disables the pin and returns it to a safe state: interest dropped,
    /// direction forced to `in`, value file closed, pin un-exported. Every
    /// step runs even if an earlier one fails; the first failure is returned.
    pub(crate) fn teardown(&self, mux: Option<&dyn Multiplexer>) -> Result<(), GpioError> {
        let mut state = self.state.lock();
        let Some(value) = state.value.take() else {
            return Ok(());
        };
        let mut first_err = None;

        if std::mem::take(&mut state.interrupt)
            && let Some(mux) = mux
            && let Err(e) = mux.remove_interest(self.fd)
        {
            warn!("gpio{}: failed to drop interrupt interest: {e}", self.number);
            first_err = first_err.or(Some(e));
        }

        if let Err(e) = self.control.set_direction(self.number, Direction::In) {
            warn!("gpio{}: failed to reset direction: {e}", self.number);
            first_err = first_err.or(Some(e));
        }

        drop(value);

        if let Err(e) = self.control.unexport(self.number) {
            warn!("gpio{}: failed to unexport: {e}", self.number);
            first_err = first_err.or(Some(e));
        }

        debug!("gpio{} released", self.number);
        first_err.map_or(Ok(()), Err)
    }
}
