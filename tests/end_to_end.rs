//! End-to-end scenarios (spec §8) that exercise the object model and
//! the kernel together rather than one module in isolation.

use std::time::Duration;

use traintastic_kernel::decoder::{Decoder, Protocol};
use traintastic_kernel::ids::ThrottleId;
use traintastic_kernel::interface::TransportConfig;
use traintastic_kernel::kernel::KernelEvent;
use traintastic_kernel::train::Train;
use traintastic_kernel::vehicle::{RailVehicle, SpeedCurve};
use traintastic_kernel::zone::Zone;
use traintastic_kernel::{Interface, World};

/// Scenario 1: acquire-and-release.
#[test]
fn acquire_and_release() {
    let mut world = World::new();
    let vehicle_id = world.add_vehicle(RailVehicle::new("V", 0.2, 80.0, 10.0));
    let train_id = world.add_train(Train::new("T", vec![vehicle_id], 1.0, -2.0));

    let throttle1 = ThrottleId::new();
    let throttle2 = ThrottleId::new();

    world.acquire_train(train_id, throttle1, false).unwrap();
    assert!(world.trains.get(&train_id).unwrap().is_active());

    assert!(world.acquire_train(train_id, throttle2, false).is_err());

    world.acquire_train(train_id, throttle2, true).unwrap();
    assert_eq!(world.trains.get(&train_id).unwrap().holder(), Some(throttle2));

    world.release_train(train_id, throttle2);
    assert!(!world.trains.get(&train_id).unwrap().is_active());
}

/// Scenario 3: LNCV round-trip against the simulated kernel.
#[tokio::test]
async fn lncv_round_trip() {
    let mut interface = Interface::new("sim", TransportConfig::Simulator);
    assert!(interface.set_online(true, true).await);
    assert!(matches!(interface.next_event().await, Some(KernelEvent::Started)));

    interface.lncv_start(6312, 65535).await;

    let mut saw_read_response = false;
    for _ in 0..8 {
        if let Some(KernelEvent::LncvReadResponse { .. }) = interface.next_event().await {
            saw_read_response = true;
            break;
        }
    }
    assert!(saw_read_response, "expected a read response while starting the session");

    interface.lncv_write(6312, 2, 7).await;
    interface.lncv_read(6312, 2).await;
    interface.lncv_stop().await;

    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Scenario 6: zone policy propagation.
#[test]
fn zone_policy_propagation() {
    use traintastic_kernel::block::Block;

    let mut world = World::new();
    let iface_id = world.add_interface(Interface::new("sim", TransportConfig::Simulator));
    let decoder_id = world.add_decoder(Decoder::new(Protocol::LocoNet, 3, false, 29), iface_id);
    let vehicle = RailVehicle::new("V", 0.2, 80.0, 10.0).with_power(decoder_id, SpeedCurve::linear(10.0));
    let vehicle_id = world.add_vehicle(vehicle);
    let train_id = world.add_train(Train::new("T", vec![vehicle_id], 1.0, -2.0));

    let mut zone = Zone::new("Z");
    zone.mute = true;
    zone.no_smoke = true;
    zone.speed_limit = 27.78; // 100 km/h
    let zone_id = world.add_zone(zone);

    let mut block = Block::new("B");
    block.zones.push(zone_id);
    let block_id = world.add_block(block);
    world.block_set_free(block_id);

    world.block_assign_train(block_id, train_id).unwrap();
    let train = world.trains.get(&train_id).unwrap();
    assert!(train.mute);
    assert!(train.no_smoke);
    assert!((train.speed_limit - 27.78).abs() < 1e-9);

    world.block_remove_train(block_id, train_id);
    let train = world.trains.get(&train_id).unwrap();
    assert!(!train.mute);
    assert!(!train.no_smoke);
}

/// Invariant 7: setting throttleSpeed to its current value is a no-op.
#[test]
fn idempotent_throttle_produces_no_change() {
    let mut world = World::new();
    let decoder_id = {
        let iface = world.add_interface(Interface::new("sim", TransportConfig::Simulator));
        world.add_decoder(Decoder::new(Protocol::LocoNet, 3, false, 29), iface)
    };
    world.decoder_set_throttle(decoder_id, 0.5).unwrap();
    world.decoder_set_throttle(decoder_id, 0.5).unwrap();
    assert_eq!(world.decoders.get(&decoder_id).unwrap().throttle(), 0.5);
}

/// Invariant 4: speed-table entries keep every locomotive within the
/// agreement band of each other.
#[test]
fn speed_table_entries_stay_within_agreement_band() {
    use traintastic_kernel::train::speed_table::{SpeedTable, AGREEMENT_BAND};

    let a = SpeedCurve::linear(10.0);
    let b = SpeedCurve::linear(9.5);
    let table = SpeedTable::build(&[a.clone(), b.clone()]);
    for i in 1..table.len() {
        let e = table.entry(i).unwrap();
        let sa = a.at(e.steps[0]);
        let sb = b.at(e.steps[1]);
        assert!((sa - sb).abs() <= AGREEMENT_BAND + 1e-9);
    }
}

/// Invariant 3: emergency stop zeroes every powered decoder's throttle.
#[test]
fn emergency_stop_zeroes_powered_decoders() {
    let mut world = World::new();
    let iface = world.add_interface(Interface::new("sim", TransportConfig::Simulator));
    let decoder_id = world.add_decoder(Decoder::new(Protocol::LocoNet, 3, false, 29), iface);
    let vehicle_id = world.add_vehicle(RailVehicle::new("V", 0.2, 80.0, 10.0).with_power(decoder_id, SpeedCurve::linear(10.0)));
    let train_id = world.add_train(Train::new("T", vec![vehicle_id], 1.0, -2.0));
    world.rebuild_train_speed_table(train_id);

    let throttle = ThrottleId::new();
    world.acquire_train(train_id, throttle, false).unwrap();
    world.trains.get_mut(&train_id).unwrap().set_target_speed(8.0);
    while world.trains.get(&train_id).unwrap().last_set_speed_point() != world.trains.get(&train_id).unwrap().target_table_idx() {
        world.advance_train_ramp(train_id);
    }
    assert!(world.decoders.get(&decoder_id).unwrap().throttle() > 0.0);

    world.train_set_emergency_stop(train_id, true);
    assert_eq!(world.decoders.get(&decoder_id).unwrap().throttle(), 0.0);
}
