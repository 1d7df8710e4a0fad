#![allow(dead_code)]

use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sysgpio::{AppConfig, EventStream, GpioContext, InterruptEvent, MockMultiplexer, SysfsControl};
use tempfile::TempDir;
use tokio_stream::StreamExt;

pub struct Fixture {
    pub dir: TempDir,
    pub ctx: Arc<GpioContext<MockMultiplexer>>,
}

impl Fixture {
    pub fn new(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = AppConfig {
            sysfs_root: dir.path().to_path_buf(),
            wait_retry_backoff_ms: 1,
            ..AppConfig::default()
        };
        tweak(&mut config);

        let ctx = Arc::new(GpioContext::new(Arc::new(config.clone())).expect("context"));
        ctx.init_multiplexer(MockMultiplexer::new(config.max_burst))
            .expect("multiplexer");
        Self { dir, ctx }
    }

    pub fn control(&self) -> SysfsControl {
        SysfsControl::new(self.dir.path())
    }

    /// Lays out `gpioN/value` the way the kernel does after an export.
    pub fn add_pin_files(&self, number: u32, level: &str) {
        let control = self.control();
        fs::create_dir_all(control.pin_dir(number)).expect("pin dir");
        fs::write(control.value_path(number), level).expect("value file");
    }

    pub fn mux(&self) -> &MockMultiplexer {
        self.ctx.multiplexer().expect("multiplexer")
    }
}

pub async fn next_event(events: &mut EventStream) -> InterruptEvent {
    tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .expect("timed out waiting for event")
        .expect("event stream ended")
}

pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
