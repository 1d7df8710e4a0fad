use std::os::fd::RawFd;
use std::time::Duration;

use log::debug;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use parking_lot::Mutex;

use crate::backend::Multiplexer;
use crate::error::GpioError;

// sysfs value files signal edges with POLLPRI | POLLERR; mio always
// registers with EPOLLET so each transition is reported once.
const PIN_INTEREST: Interest = Interest::READABLE.add(Interest::PRIORITY);
// descriptors are never negative, so this token cannot collide with a pin
const WAKE_TOKEN: Token = Token(usize::MAX);

struct Poller {
    poll: Poll,
    events: Events,
}

pub struct EpollMultiplexer {
    poller: Mutex<Poller>,
    // cloned handle so registration never waits behind a blocked `poll`
    registry: Registry,
    waker: Waker,
    capacity: usize,
}

impl EpollMultiplexer {
    pub fn new(max_burst: usize) -> Result<Self, GpioError> {
        let poll = Poll::new().map_err(GpioError::Multiplexer)?;
        let registry = poll.registry().try_clone().map_err(GpioError::Multiplexer)?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN).map_err(GpioError::Multiplexer)?;
        let capacity = max_burst.max(1);

        Ok(Self {
            poller: Mutex::new(Poller {
                poll,
                events: Events::with_capacity(capacity),
            }),
            registry,
            waker,
            capacity,
        })
    }
}

impl Multiplexer for EpollMultiplexer {
    fn add_interest(&self, fd: RawFd) -> Result<(), GpioError> {
        self.registry
            .register(&mut SourceFd(&fd), Token(fd as usize), PIN_INTEREST)
            .map_err(|source| GpioError::RegistrationFailed { fd, source })?;
        debug!("epoll: watching fd {fd}");
        Ok(())
    }

    fn remove_interest(&self, fd: RawFd) -> Result<(), GpioError> {
        self.registry
            .deregister(&mut SourceFd(&fd))
            .map_err(|source| GpioError::RegistrationFailed { fd, source })?;
        debug!("epoll: stopped watching fd {fd}");
        Ok(())
    }

    fn wait(&self, ready: &mut Vec<RawFd>, timeout: Option<Duration>) -> Result<usize, GpioError> {
        let mut poller = self.poller.lock();
        let Poller { poll, events } = &mut *poller;

        ready.clear();
        poll.poll(events, timeout).map_err(GpioError::WaitFailed)?;
        ready.extend(
            events
                .iter()
                .map(|event| event.token())
                .filter(|token| *token != WAKE_TOKEN)
                .map(|token| token.0 as RawFd),
        );
        Ok(ready.len())
    }

    fn wake(&self) -> Result<(), GpioError> {
        self.waker.wake().map_err(GpioError::Multiplexer)
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
