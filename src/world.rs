//! The object arena (spec §9 "Cyclic reference graphs"): owns every
//! `Interface`/`Decoder`/`RailVehicle`/`Train`/`Block`/`Zone`/`Input`/
//! `Output`/`Identification` and mediates the cross-object operations
//! the data model's invariants require (decoder fan-out, zone policy
//! propagation, train/vehicle assignment) so no object holds a strong
//! reference to another.

use std::collections::HashMap;

use crate::block::{Block, BlockError};
use crate::decoder::{Decoder, DecoderChanges, DecoderController, Direction as DecoderDirection};
use crate::error::TrainError;
use crate::identification::{Identification, IdentificationCategory, IdentificationDirection, IdentificationEvent};
use crate::ids::{BlockId, DecoderId, IdentificationId, InputId, InterfaceId, OutputId, ThrottleId, TrainId, VehicleId, ZoneId};
use crate::input::{Input, TriState};
use crate::interface::Interface;
use crate::message::loconet::Direction as LnDirection;
use crate::output::{Output, OutputController, OutputValue};
use crate::train::coordinator::HandheldOutcome;
use crate::train::speed_table::SpeedTable;
use crate::train::{Train, TrainDirection};
use crate::vehicle::RailVehicle;
use crate::zone::{effective_policy, Zone};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldError {
    UnknownDecoder,
    UnknownTrain,
    UnknownBlock,
    UnknownOutput,
    Block(BlockError),
}

#[derive(Default)]
pub struct World {
    pub interfaces: HashMap<InterfaceId, Interface>,
    pub decoders: HashMap<DecoderId, Decoder>,
    pub vehicles: HashMap<VehicleId, RailVehicle>,
    pub trains: HashMap<TrainId, Train>,
    pub blocks: HashMap<BlockId, Block>,
    pub zones: HashMap<ZoneId, Zone>,
    pub inputs: HashMap<InputId, Input>,
    pub outputs: HashMap<OutputId, Output>,
    pub identifications: HashMap<IdentificationId, Identification>,

    pub mute: bool,
    pub no_smoke: bool,
    pub speed_limit: f64,
}

impl World {
    pub fn new() -> Self {
        Self { speed_limit: f64::INFINITY, ..Default::default() }
    }

    pub fn add_interface(&mut self, interface: Interface) -> InterfaceId {
        let id = interface.id;
        self.interfaces.insert(id, interface);
        id
    }

    pub fn add_decoder(&mut self, mut decoder: Decoder, interface: InterfaceId) -> DecoderId {
        decoder.interface = Some(interface);
        let id = decoder.id;
        if let Some(iface) = self.interfaces.get_mut(&interface) {
            iface.register_decoder(&decoder);
        }
        self.decoders.insert(id, decoder);
        id
    }

    pub fn add_vehicle(&mut self, vehicle: RailVehicle) -> VehicleId {
        let id = vehicle.id;
        self.vehicles.insert(id, vehicle);
        id
    }

    pub fn add_train(&mut self, train: Train) -> TrainId {
        let id = train.id;
        self.trains.insert(id, train);
        id
    }

    pub fn add_block(&mut self, block: Block) -> BlockId {
        let id = block.id;
        self.blocks.insert(id, block);
        id
    }

    pub fn add_zone(&mut self, zone: Zone) -> ZoneId {
        let id = zone.id;
        self.zones.insert(id, zone);
        id
    }

    pub fn add_input(&mut self, mut input: Input, interface: InterfaceId) -> InputId {
        input.interface = Some(interface);
        let id = input.id;
        if let Some(iface) = self.interfaces.get_mut(&interface) {
            iface.register_input(&input);
        }
        self.inputs.insert(id, input);
        id
    }

    pub fn add_output(&mut self, mut output: Output, interface: InterfaceId) -> OutputId {
        output.interface = Some(interface);
        let id = output.id;
        if let Some(iface) = self.interfaces.get_mut(&interface) {
            iface.register_output(&output);
        }
        self.outputs.insert(id, output);
        id
    }

    pub fn add_identification(&mut self, mut identification: Identification, interface: InterfaceId) -> IdentificationId {
        identification.interface = Some(interface);
        let id = identification.id;
        if let Some(iface) = self.interfaces.get_mut(&interface) {
            iface.register_identification(&identification);
        }
        self.identifications.insert(id, identification);
        id
    }

    /// Applies a kernel-reported input level to the logical Input bound
    /// to `(interface, address)` (spec §4.4: inbound sensor events are
    /// applied by the caller, mirroring `train_decoder_throttle_report`'s
    /// explicit-dispatch style rather than an automatic subscriber).
    pub fn input_report(&mut self, interface: InterfaceId, address: u16, value: bool) {
        let Some(iface) = self.interfaces.get(&interface) else { return };
        let Some(id) = iface.input_for_address(address) else { return };
        if let Some(input) = self.inputs.get_mut(&id) {
            input.set_value(TriState::from(value));
        }
    }

    /// Applies a kernel-reported RFID/LISSY event to the logical
    /// Identification bound to `(interface, address)` (spec §4.4/§6).
    pub fn identification_report(
        &mut self,
        interface: InterfaceId,
        address: u16,
        category: IdentificationCategory,
        identifier: u32,
        direction: Option<LnDirection>,
    ) {
        let Some(iface) = self.interfaces.get(&interface) else { return };
        let Some(id) = iface.identification_for_address(address) else { return };
        let Some(identification) = self.identifications.get_mut(&id) else { return };
        let direction = direction.map(|d| match d {
            LnDirection::Forward => IdentificationDirection::Forward,
            LnDirection::Reverse => IdentificationDirection::Reverse,
        });
        identification.record(IdentificationEvent { category, identifier, direction });
    }

    /// `output.setValue(value)` (spec §4.3.6): stores the new value and
    /// forwards it to the owning interface's kernel.
    pub fn output_set_value(&mut self, id: OutputId, value: OutputValue) -> Result<(), WorldError> {
        let output = self.outputs.get_mut(&id).ok_or(WorldError::UnknownOutput)?;
        output.set_value(value);
        if let Some(iface_id) = output.interface {
            if let Some(iface) = self.interfaces.get(&iface_id) {
                iface.output_changed(output);
            }
        }
        Ok(())
    }

    fn forward_decoder_change(&self, decoder_id: DecoderId, changes: DecoderChanges, function_number: Option<u8>) {
        if changes.is_empty() && function_number.is_none() {
            return;
        }
        let Some(decoder) = self.decoders.get(&decoder_id) else { return };
        let Some(iface_id) = decoder.interface else { return };
        let Some(iface) = self.interfaces.get(&iface_id) else { return };
        iface.decoder_changed(decoder, changes, function_number);
    }

    pub fn decoder_set_throttle(&mut self, id: DecoderId, throttle: f64) -> Result<(), TrainError> {
        let decoder = self.decoders.get_mut(&id).ok_or(TrainError::UnknownDecoderAddress)?;
        let changes = decoder.set_throttle(throttle)?;
        self.forward_decoder_change(id, changes, None);
        Ok(())
    }

    pub fn decoder_set_direction(&mut self, id: DecoderId, direction: DecoderDirection) -> Result<(), TrainError> {
        let decoder = self.decoders.get_mut(&id).ok_or(TrainError::UnknownDecoderAddress)?;
        let changes = decoder.set_direction(direction);
        self.forward_decoder_change(id, changes, None);
        Ok(())
    }

    pub fn decoder_set_emergency_stop(&mut self, id: DecoderId, stop: bool) -> Result<(), TrainError> {
        let decoder = self.decoders.get_mut(&id).ok_or(TrainError::UnknownDecoderAddress)?;
        let changes = decoder.set_emergency_stop(stop);
        self.forward_decoder_change(id, changes, None);
        Ok(())
    }

    pub fn decoder_set_function(&mut self, id: DecoderId, number: u8, value: bool) -> Result<(), TrainError> {
        let decoder = self.decoders.get_mut(&id).ok_or(TrainError::UnknownDecoderAddress)?;
        let (changes, function_number) = decoder.set_function(number, value);
        self.forward_decoder_change(id, changes, function_number);
        Ok(())
    }

    /// Rebuilds a train's speed table from its powered vehicles' speed
    /// curves, in train order (spec §4.6.1). A no-op for trains with no
    /// powered vehicles or that aren't in the arena.
    pub fn rebuild_train_speed_table(&mut self, train_id: TrainId) {
        let Some(train) = self.trains.get(&train_id) else { return };
        let curves: Vec<_> = train
            .vehicles
            .iter()
            .filter_map(|v| self.vehicles.get(v))
            .filter_map(|rv| rv.powered.as_ref())
            .map(|p| p.speed_curve.clone())
            .collect();
        let table = SpeedTable::build(&curves);
        if let Some(train) = self.trains.get_mut(&train_id) {
            train.set_speed_table(table);
        }
    }

    /// `acquire(throttle, steal)` (spec §4.6.5), with the
    /// vehicle-availability check the arena alone can answer.
    pub fn acquire_train(&mut self, train_id: TrainId, throttle: ThrottleId, steal: bool) -> Result<(), TrainError> {
        let vehicles = self.trains.get(&train_id).expect("unknown train").vehicles.clone();
        let available = vehicles.iter().all(|v| {
            self.vehicles
                .get(v)
                .map(|rv| rv.train.is_none() || rv.train == Some(train_id))
                .unwrap_or(false)
        });
        let train = self.trains.get_mut(&train_id).expect("unknown train");
        train.acquire(throttle, steal, available)?;
        for v in vehicles {
            if let Some(rv) = self.vehicles.get_mut(&v) {
                rv.train = Some(train_id);
            }
        }
        Ok(())
    }

    pub fn release_train(&mut self, train_id: TrainId, throttle: ThrottleId) {
        let Some(train) = self.trains.get_mut(&train_id) else { return };
        train.release(throttle);
        if !train.is_active() {
            let vehicles = train.vehicles.clone();
            for v in vehicles {
                if let Some(rv) = self.vehicles.get_mut(&v) {
                    if rv.train == Some(train_id) {
                        rv.train = None;
                    }
                }
            }
        }
    }

    pub fn set_train_direction(&mut self, train_id: TrainId, direction: TrainDirection) -> Result<(), TrainError> {
        self.trains.get_mut(&train_id).expect("unknown train").set_direction(direction)
    }

    pub fn block_set_free(&mut self, block_id: BlockId) {
        if let Some(block) = self.blocks.get_mut(&block_id) {
            block.set_state_free();
        }
    }

    pub fn block_assign_train(&mut self, block_id: BlockId, train_id: TrainId) -> Result<(), WorldError> {
        let block = self.blocks.get_mut(&block_id).ok_or(WorldError::UnknownBlock)?;
        block.assign_train(train_id).map_err(WorldError::Block)?;
        if let Some(train) = self.trains.get_mut(&train_id) {
            train.add_block(block_id);
        }
        self.recompute_train_policy(train_id);
        Ok(())
    }

    pub fn block_train_entered(&mut self, block_id: BlockId, train_id: TrainId) -> Result<(), WorldError> {
        let block = self.blocks.get_mut(&block_id).ok_or(WorldError::UnknownBlock)?;
        block.train_entered(train_id).map_err(WorldError::Block)?;
        Ok(())
    }

    pub fn block_train_left(&mut self, block_id: BlockId, train_id: TrainId) -> Result<(), WorldError> {
        let block = self.blocks.get_mut(&block_id).ok_or(WorldError::UnknownBlock)?;
        block.train_left(train_id).map_err(WorldError::Block)?;
        if let Some(train) = self.trains.get_mut(&train_id) {
            train.remove_block(block_id);
        }
        self.recompute_train_policy(train_id);
        Ok(())
    }

    pub fn block_remove_train(&mut self, block_id: BlockId, train_id: TrainId) {
        if let Some(block) = self.blocks.get_mut(&block_id) {
            if block.remove_train(train_id).is_some() {
                if let Some(train) = self.trains.get_mut(&train_id) {
                    train.remove_block(block_id);
                }
                self.recompute_train_policy(train_id);
            }
        }
    }

    /// Recomputes `mute`/`noSmoke`/`speedLimit` for a train from every
    /// zone of every block it currently occupies, and propagates the
    /// result to each powered vehicle's decoder (spec §4.7, §8
    /// invariant 5).
    fn recompute_train_policy(&mut self, train_id: TrainId) {
        let Some(train) = self.trains.get(&train_id) else { return };
        let zone_ids: Vec<ZoneId> = train
            .blocks()
            .iter()
            .filter_map(|b| self.blocks.get(b))
            .flat_map(|b| b.zones.iter().copied())
            .collect();
        let zones: Vec<&Zone> = zone_ids.iter().filter_map(|z| self.zones.get(z)).collect();
        let (mute, no_smoke, speed_limit) = effective_policy(&zones, self.mute, self.no_smoke, self.speed_limit);

        let vehicle_ids = train.vehicles.clone();
        if let Some(train) = self.trains.get_mut(&train_id) {
            train.mute = mute;
            train.no_smoke = no_smoke;
            train.speed_limit = speed_limit;
        }
        for vehicle_id in vehicle_ids {
            let Some(vehicle) = self.vehicles.get(&vehicle_id) else { continue };
            let Some(powered) = &vehicle.powered else { continue };
            if let Some(decoder) = self.decoders.get_mut(&powered.decoder) {
                decoder.mute = mute;
                decoder.no_smoke = no_smoke;
                decoder.speed_limit = speed_limit;
            }
        }
    }

    /// Powered vehicles of a train in train order, the same order
    /// [`Self::rebuild_train_speed_table`] gathers speed curves in —
    /// `SpeedTableEntry::steps[i]` refers to the `i`-th entry here.
    fn powered_decoders(&self, train_id: TrainId) -> Vec<DecoderId> {
        let Some(train) = self.trains.get(&train_id) else { return Vec::new() };
        train
            .vehicles
            .iter()
            .filter_map(|v| self.vehicles.get(v))
            .filter_map(|rv| rv.powered.as_ref())
            .map(|p| p.decoder)
            .collect()
    }

    /// Commits a speed-table entry's per-loco steps to every powered
    /// decoder of a train (spec §4.6.3 "commits the new entry's per-loco
    /// steps to every powered decoder").
    fn commit_train_steps(&mut self, train_id: TrainId, steps: &[u8]) {
        for (decoder_id, &step) in self.powered_decoders(train_id).iter().zip(steps) {
            let throttle = crate::decoder::speed_step_to_throttle(step);
            let _ = self.decoder_set_throttle(*decoder_id, throttle);
        }
    }

    /// Advances a train's acceleration/braking ramp by one table entry
    /// and commits it, if the ramp isn't already at its target (spec
    /// §4.6.3).
    pub fn advance_train_ramp(&mut self, train_id: TrainId) {
        let Some(train) = self.trains.get_mut(&train_id) else { return };
        let Some(entry) = train.advance_ramp() else { return };
        let steps = entry.steps.clone();
        self.commit_train_steps(train_id, &steps);
    }

    /// `emergencyStop` (spec §4.6.3): cancels the ramp and, when turning
    /// the stop on, commits zero to every powered decoder.
    pub fn train_set_emergency_stop(&mut self, train_id: TrainId, stop: bool) {
        let Some(train) = self.trains.get_mut(&train_id) else { return };
        if let Some(entry) = train.set_emergency_stop(stop) {
            let steps = entry.steps.clone();
            self.commit_train_steps(train_id, &steps);
        }
    }

    /// Inbound decoder-originating throttle change (spec §4.6.4),
    /// `loco_idx` being the position of the reporting decoder among the
    /// train's powered vehicles. A `Commit`/`ClampToMax` outcome
    /// rewrites every other locomotive's steps to match.
    pub fn train_decoder_throttle_report(&mut self, train_id: TrainId, loco_idx: usize, step: u8, now: std::time::Instant) {
        let Some(train) = self.trains.get_mut(&train_id) else { return };
        let outcome = train.handle_decoder_throttle(loco_idx, step, now);
        self.apply_handheld_outcome(train_id, outcome);
    }

    /// Call periodically per train to resolve a held handheld change
    /// once its hold window has elapsed (spec §4.6.4 point 3).
    pub fn train_expire_handheld_hold(&mut self, train_id: TrainId, now: std::time::Instant) {
        let Some(train) = self.trains.get_mut(&train_id) else { return };
        let Some(outcome) = train.expire_handheld_hold(now) else { return };
        self.apply_handheld_outcome(train_id, outcome);
    }

    fn apply_handheld_outcome(&mut self, train_id: TrainId, outcome: HandheldOutcome) {
        match outcome {
            HandheldOutcome::Commit(idx) | HandheldOutcome::ClampToMax(idx) => {
                let Some(train) = self.trains.get(&train_id) else { return };
                let Some(entry) = train.speed_table().entry(idx) else { return };
                let steps = entry.steps.clone();
                self.commit_train_steps(train_id, &steps);
            }
            HandheldOutcome::Echo | HandheldOutcome::Hold => {}
        }
    }

    pub async fn set_power_on(&mut self, on: bool) {
        for iface in self.interfaces.values() {
            iface.set_power_on(on).await;
        }
    }

    pub async fn emergency_stop_all(&mut self) {
        for iface in self.interfaces.values() {
            iface.emergency_stop().await;
        }
        for train in self.trains.values_mut() {
            train.set_emergency_stop(true);
        }
    }

    pub async fn resume_all(&mut self) {
        for iface in self.interfaces.values() {
            iface.resume().await;
        }
        for train in self.trains.values_mut() {
            train.set_emergency_stop(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::TransportConfig;

    #[test]
    fn zone_policy_propagates_to_train_and_powered_decoder() {
        let mut world = World::new();
        let iface = world.add_interface(Interface::new("sim", TransportConfig::Simulator));
        let decoder = crate::decoder::Decoder::new(crate::decoder::Protocol::LocoNet, 3, false, 29);
        let decoder_id = world.add_decoder(decoder, iface);

        let vehicle = RailVehicle::new("loco", 0.2, 80.0, 10.0).with_power(decoder_id, crate::vehicle::SpeedCurve::linear(10.0));
        let vehicle_id = world.add_vehicle(vehicle);

        let train = Train::new("T1", vec![vehicle_id], 1.0, -2.0);
        let train_id = world.add_train(train);

        let mut zone = Zone::new("Z");
        zone.mute = true;
        zone.no_smoke = true;
        zone.speed_limit = 27.78;
        let block = Block::new("B1");
        let block_id = world.add_block(block);
        let zone_id = world.add_zone(zone);
        world.blocks.get_mut(&block_id).unwrap().zones.push(zone_id);
        world.blocks.get_mut(&block_id).unwrap().set_state_free();

        world.block_assign_train(block_id, train_id).unwrap();

        let train = world.trains.get(&train_id).unwrap();
        assert!(train.mute);
        assert!(train.no_smoke);
        assert!((train.speed_limit - 27.78).abs() < 1e-9);

        let decoder = world.decoders.get(&decoder_id).unwrap();
        assert!(decoder.mute);

        world.block_remove_train(block_id, train_id);
        let train = world.trains.get(&train_id).unwrap();
        assert!(!train.mute);
    }

    #[test]
    fn acquiring_a_held_train_without_steal_fails() {
        let mut world = World::new();
        let train = Train::new("T1", vec![], 1.0, -2.0);
        let train_id = world.add_train(train);
        let t1 = ThrottleId::new();
        let t2 = ThrottleId::new();

        world.acquire_train(train_id, t1, false).unwrap();
        assert_eq!(world.acquire_train(train_id, t2, false), Err(TrainError::AlreadyAcquired));
        world.acquire_train(train_id, t2, true).unwrap();
        world.release_train(train_id, t2);
        assert!(!world.trains.get(&train_id).unwrap().is_active());
    }

    #[test]
    fn input_report_updates_the_bound_input() {
        let mut world = World::new();
        let iface_id = world.add_interface(Interface::new("sim", TransportConfig::Simulator));
        let input_id = world.add_input(Input::new("track sensor", 12), iface_id);

        assert_eq!(world.inputs.get(&input_id).unwrap().value(), TriState::Undefined);
        world.input_report(iface_id, 12, true);
        assert_eq!(world.inputs.get(&input_id).unwrap().value(), TriState::True);
    }

    #[test]
    fn identification_report_records_the_event() {
        let mut world = World::new();
        let iface_id = world.add_interface(Interface::new("sim", TransportConfig::Simulator));
        let ident_id = world.add_identification(Identification::new("rfid gate", 3), iface_id);

        world.identification_report(iface_id, 3, IdentificationCategory::Rfid, 0xABCD, Some(LnDirection::Forward));

        let event = world.identifications.get(&ident_id).unwrap().last_event().unwrap();
        assert_eq!(event.category, IdentificationCategory::Rfid);
        assert_eq!(event.identifier, 0xABCD);
        assert_eq!(event.direction, Some(IdentificationDirection::Forward));
    }

    #[test]
    fn output_set_value_rejects_unknown_id() {
        let mut world = World::new();
        assert_eq!(world.output_set_value(crate::ids::OutputId::new(), OutputValue::OnOff(true)), Err(WorldError::UnknownOutput));
    }
}
