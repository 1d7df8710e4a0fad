mod common;

use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;

use common::{Fixture, next_event, wait_for};
use sysgpio::{Direction, Edge, GpioError, Level, WriteOutcome};

#[test]
fn acquire_configures_sysfs_files() {
    let fx = Fixture::new(|_| {});
    fx.add_pin_files(26, "0");
    let pin = fx.ctx.acquire_pin(26, Direction::In, Edge::Both).unwrap();

    let pin_dir = fx.control().pin_dir(26);
    assert_eq!(fs::read_to_string(pin_dir.join("direction")).unwrap(), "in");
    assert_eq!(fs::read_to_string(pin_dir.join("edge")).unwrap(), "both");
    assert!(pin.is_enabled());
    assert_eq!(fx.ctx.registry().resolve(pin.fd()).unwrap().number(), 26);
}

#[test]
fn output_pins_skip_edge_configuration() {
    let fx = Fixture::new(|_| {});
    fx.add_pin_files(2, "0");
    let pin = fx.ctx.acquire_pin(2, Direction::Out, Edge::Rising).unwrap();

    assert!(!fx.control().pin_dir(2).join("edge").exists());
    assert_eq!(pin.set_high().unwrap(), WriteOutcome::Written);
    assert_eq!(pin.read().unwrap(), Some(Level::High));
}

#[test]
fn same_pin_cannot_be_acquired_twice() {
    let fx = Fixture::new(|_| {});
    fx.add_pin_files(3, "0");
    let _pin = fx.ctx.acquire_pin(3, Direction::In, Edge::Rising).unwrap();

    assert!(matches!(
        fx.ctx.acquire_pin(3, Direction::In, Edge::Falling),
        Err(GpioError::Configuration(_))
    ));
    assert_eq!(fx.ctx.registry().len(), 1);
}

#[test]
fn registry_capacity_limits_acquisition() {
    let fx = Fixture::new(|cfg| cfg.max_pins = 1);
    fx.add_pin_files(3, "0");
    fx.add_pin_files(4, "0");
    let _pin = fx.ctx.acquire_pin(3, Direction::In, Edge::Rising).unwrap();

    assert!(matches!(
        fx.ctx.acquire_pin(4, Direction::In, Edge::Rising),
        Err(GpioError::RegistryFull(1))
    ));
}

#[test]
fn missing_value_file_is_a_resource_error() {
    let fx = Fixture::new(|_| {});
    fs::create_dir(fx.control().pin_dir(12)).unwrap();

    assert!(matches!(
        fx.ctx.acquire_pin(12, Direction::In, Edge::Rising),
        Err(GpioError::Resource { .. })
    ));
    assert!(fx.ctx.registry().is_empty());
    assert_eq!(fs::read_to_string(fx.dir.path().join("unexport")).unwrap(), "12");
}

#[test]
fn release_removes_mapping_and_disables_pin() {
    let fx = Fixture::new(|_| {});
    fx.add_pin_files(5, "1");
    let pin = fx.ctx.acquire_pin(5, Direction::Out, Edge::None).unwrap();
    fx.ctx.add_interrupt(&pin).unwrap();

    fx.ctx.release_pin(&pin).unwrap();

    assert!(!pin.is_enabled());
    assert!(!pin.has_interrupt());
    assert!(!fx.mux().is_registered(pin.fd()));
    assert!(matches!(
        fx.ctx.registry().resolve(pin.fd()),
        Err(GpioError::NotFound(_))
    ));
    assert_eq!(
        fs::read_to_string(fx.control().pin_dir(5).join("direction")).unwrap(),
        "in"
    );
    assert_eq!(fs::read_to_string(fx.dir.path().join("unexport")).unwrap(), "5");

    assert_eq!(pin.read().unwrap(), None);
    assert_eq!(pin.set_high().unwrap(), WriteOutcome::Disabled);
    assert_eq!(pin.set_low().unwrap(), WriteOutcome::Disabled);
    assert!(matches!(
        fx.ctx.add_interrupt(&pin),
        Err(GpioError::RegistrationFailed { .. })
    ));
}

#[tokio::test]
async fn released_pin_reported_late_is_skipped() {
    let fx = Fixture::new(|_| {});
    fx.add_pin_files(6, "0");
    fx.add_pin_files(7, "0");
    let gone = fx.ctx.acquire_pin(6, Direction::In, Edge::Rising).unwrap();
    let live = fx.ctx.acquire_pin(7, Direction::In, Edge::Rising).unwrap();
    let mut events = fx.ctx.events().unwrap();
    fx.ctx.spawn_router().unwrap();

    fx.ctx.release_pin(&gone).unwrap();
    fx.mux().push_batch([gone.fd(), live.fd()]);

    assert_eq!(next_event(&mut events).await.pin_id, 7);
    let ctx = fx.ctx.clone();
    wait_for(|| ctx.router_stats().cycles == 1).await;
    assert_eq!(fx.ctx.router_stats().delivered, 1);
    assert_eq!(fx.ctx.router_stats().skipped, 1);
}

#[test]
fn shutdown_releases_every_pin_even_after_a_failure() {
    let fx = Fixture::new(|_| {});
    fx.add_pin_files(1, "0");
    fx.add_pin_files(2, "0");
    let first = fx.ctx.acquire_pin(1, Direction::In, Edge::Rising).unwrap();
    let second = fx.ctx.acquire_pin(2, Direction::Out, Edge::None).unwrap();
    fx.ctx.add_interrupt(&first).unwrap();

    // a directory in place of the direction file makes the reset write fail
    let direction = fx.control().pin_dir(1).join("direction");
    fs::remove_file(&direction).unwrap();
    fs::create_dir(&direction).unwrap();

    let report = fx.ctx.shutdown();

    assert!(!first.is_enabled());
    assert!(!second.is_enabled());
    assert_eq!(report.released, vec![2]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, 1);
    assert!(matches!(report.failed[0].1, GpioError::Resource { .. }));
    assert!(!report.is_clean());
    assert!(fx.ctx.registry().is_empty());
    assert!(!fx.mux().is_registered(first.fd()));
}

#[test]
fn shutdown_is_idempotent() {
    let fx = Fixture::new(|_| {});
    fx.add_pin_files(4, "0");
    let pin = fx.ctx.acquire_pin(4, Direction::In, Edge::Falling).unwrap();
    fx.ctx.spawn_router().unwrap();

    let report = fx.ctx.shutdown();
    assert_eq!(report.released, vec![4]);
    assert!(report.is_clean());

    let report = fx.ctx.shutdown();
    assert!(report.released.is_empty());
    assert!(!pin.is_enabled());
}

#[test]
fn stale_interrupt_removal_leaves_next_pin_registered() {
    let fx = Fixture::new(|_| {});
    fx.add_pin_files(4, "0");
    fx.add_pin_files(5, "0");
    let a = fx.ctx.acquire_pin(4, Direction::In, Edge::Rising).unwrap();
    fx.ctx.add_interrupt(&a).unwrap();
    fx.ctx.release_pin(&a).unwrap();

    // usually lands on the descriptor number `a` just closed
    let b = fx.ctx.acquire_pin(5, Direction::In, Edge::Rising).unwrap();
    fx.ctx.add_interrupt(&b).unwrap();

    assert!(matches!(
        fx.ctx.remove_interrupt(&a),
        Err(GpioError::RegistrationFailed { .. })
    ));
    assert!(fx.mux().is_registered(b.fd()));
    assert!(b.has_interrupt());
}

#[test]
fn concurrent_acquisition_of_one_number_yields_one_pin() {
    let fx = Fixture::new(|_| {});
    fx.add_pin_files(7, "0");

    for _ in 0..50 {
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let ctx = fx.ctx.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    ctx.acquire_pin(7, Direction::In, Edge::Rising)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let acquired: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(acquired.len(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(GpioError::Configuration(_))))
        );
        assert_eq!(fx.ctx.registry().len(), 1);

        fx.ctx.release_pin(acquired[0]).unwrap();
        assert!(fx.ctx.registry().is_empty());
    }
}
