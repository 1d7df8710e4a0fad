use std::os::fd::RawFd;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rustc_hash::FxHashMap;

use crate::error::GpioError;
use crate::pin::Pin;

/// Maps open value descriptors back to the pin that owns them.
///
/// The router resolves a whole batch under one read guard, and release
/// removes entries under the write guard, so a pin can never be torn down
/// between resolution and event derivation.
#[derive(Debug)]
pub struct PinRegistry {
    pins: RwLock<FxHashMap<RawFd, Arc<Pin>>>,
    capacity: usize,
}

impl PinRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            pins: RwLock::new(FxHashMap::default()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn register(&self, fd: RawFd, pin: Arc<Pin>) -> Result<(), GpioError> {
        let mut pins = self.pins.write();
        if pins.len() >= self.capacity && !pins.contains_key(&fd) {
            return Err(GpioError::RegistryFull(self.capacity));
        }
        pins.insert(fd, pin);
        Ok(())
    }

    pub fn resolve(&self, fd: RawFd) -> Result<Arc<Pin>, GpioError> {
        self.pins
            .read()
            .get(&fd)
            .cloned()
            .ok_or(GpioError::NotFound(fd))
    }

    pub fn remove(&self, fd: RawFd) -> Option<Arc<Pin>> {
        self.pins.write().remove(&fd)
    }

    pub fn find_number(&self, number: u32) -> Option<Arc<Pin>> {
        self.pins
            .read()
            .values()
            .find(|pin| pin.number() == number)
            .cloned()
    }

    pub fn for_each(&self, mut visitor: impl FnMut(RawFd, &Arc<Pin>)) {
        for (fd, pin) in self.pins.read().iter() {
            visitor(*fd, pin);
        }
    }

    pub fn len(&self) -> usize {
        self.pins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.read().is_empty()
    }

    pub(crate) fn read(&self) -> RegistryView<'_> {
        RegistryView(self.pins.read())
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, FxHashMap<RawFd, Arc<Pin>>> {
        self.pins.write()
    }
}

pub(crate) struct RegistryView<'a>(RwLockReadGuard<'a, FxHashMap<RawFd, Arc<Pin>>>);

impl RegistryView<'_> {
    pub(crate) fn resolve(&self, fd: RawFd) -> Result<&Arc<Pin>, GpioError> {
        self.0.get(&fd).ok_or(GpioError::NotFound(fd))
    }
}
