use std::time::Duration;

use traintastic_kernel::decoder::{Decoder, Protocol};
use traintastic_kernel::interface::TransportConfig;
use traintastic_kernel::train::Train;
use traintastic_kernel::vehicle::{RailVehicle, SpeedCurve};
use traintastic_kernel::{Interface, World};

#[tokio::main]
async fn main() {
    let mut world = World::new();

    let mut interface = Interface::new("simulator", TransportConfig::Simulator);
    interface.set_online(true, true).await;
    let interface_id = world.add_interface(interface);

    let decoder = Decoder::new(Protocol::LocoNet, 3, false, 29);
    let decoder_id = world.add_decoder(decoder, interface_id);

    let vehicle = RailVehicle::new("BR 101", 19.5, 84_000.0, 48.6).with_power(decoder_id, SpeedCurve::linear(48.6));
    let vehicle_id = world.add_vehicle(vehicle);

    let train = Train::new("IC 2019", vec![vehicle_id], 1.2, -2.0);
    let train_id = world.add_train(train);
    world.rebuild_train_speed_table(train_id);

    let throttle = traintastic_kernel::ids::ThrottleId::new();
    world.acquire_train(train_id, throttle, false).expect("train is free");

    world.trains.get_mut(&train_id).unwrap().set_target_speed(20.0);

    loop {
        let train = world.trains.get(&train_id).unwrap();
        if train.last_set_speed_point() == train.target_table_idx() {
            break;
        }
        world.advance_train_ramp(train_id);
        let throttle = world.decoders.get(&decoder_id).unwrap().throttle();
        println!("decoder throttle now {:.2}", throttle);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    world.train_set_emergency_stop(train_id, true);
    println!("emergency stop applied");

    world.release_train(train_id, throttle);
}
