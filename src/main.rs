use log::{error, info, warn};
use std::sync::Arc;

use tokio_stream::StreamExt;

use sysgpio::{AppConfig, Direction, Edge, GpioContext, GpioError, ShutdownHandler};

#[cfg(all(feature = "hardware-gpio", not(feature = "mock-gpio"), target_os = "linux"))]
type Backend = sysgpio::EpollMultiplexer;
#[cfg(not(all(feature = "hardware-gpio", not(feature = "mock-gpio"), target_os = "linux")))]
type Backend = sysgpio::MockMultiplexer;

fn make_backend(config: &AppConfig) -> Result<Backend, GpioError> {
    #[cfg(all(feature = "hardware-gpio", not(feature = "mock-gpio"), target_os = "linux"))]
    {
        Backend::new(config.max_burst)
    }
    #[cfg(not(all(feature = "hardware-gpio", not(feature = "mock-gpio"), target_os = "linux")))]
    {
        Ok(Backend::new(config.max_burst))
    }
}

fn setup(ctx: &GpioContext<Backend>) -> Result<(), GpioError> {
    let mut numbers: Vec<u32> = ctx.config().pins.keys().copied().collect();
    numbers.sort_unstable();

    for number in numbers {
        let pin_cfg = ctx.config().pins[&number];
        let pin = ctx.acquire_pin(number, pin_cfg.direction, pin_cfg.edge)?;
        if pin_cfg.direction == Direction::In && pin_cfg.edge != Edge::None {
            ctx.add_interrupt(&pin)?;
        }
    }

    ctx.spawn_router()
}

#[tokio::main]
async fn main() -> Result<(), GpioError> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SYSGPIO_CONFIG").ok())
        .unwrap_or_else(|| "config.json".to_string());
    let config = Arc::new(AppConfig::load_from_file(&config_path)?);

    let ctx = Arc::new(GpioContext::<Backend>::new(config.clone())?);
    ctx.init_multiplexer(make_backend(&config)?)?;

    if let Err(e) = setup(&ctx) {
        error!("setup failed: {e}");
        ctx.shutdown().log();
        return Err(e);
    }

    let _shutdown = ShutdownHandler::install(ctx.clone(), |code| {
        std::process::exit(code);
    })?;

    let Some(mut events) = ctx.events() else {
        return Err(GpioError::AlreadyInitialized("event stream"));
    };
    info!(
        "watching {} pin(s) under {}",
        ctx.registry().len(),
        config.sysfs_root.display()
    );

    while let Some(event) = events.next().await {
        match serde_json::to_string(&event) {
            Ok(text) => info!("{text}"),
            Err(e) => warn!("failed to encode event for gpio{}: {e}", event.pin_id),
        }
    }

    // The router only drops the stream when it has terminated.
    let fault = ctx
        .router_fault()
        .unwrap_or_else(|| GpioError::RouterTerminated("event stream closed".into()));
    error!("{fault}");
    ctx.shutdown().log();
    std::process::exit(1);
}
