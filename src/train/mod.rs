//! Multi-locomotive train coordination (spec §3 "Train", §4.6),
//! grounded in `original_source/server/src/train/train.cpp` for
//! acquisition/direction/ramp semantics and in
//! `original_source/server/src/train/trainspeedtable.cpp` for the
//! speed table this module drives decoders through.

pub mod coordinator;
pub mod speed_table;

use crate::error::TrainError;
use crate::ids::{BlockId, ThrottleId, TrainId, VehicleId};
use speed_table::SpeedTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainDirection {
    Forward,
    Reverse,
}

#[derive(Debug, Clone)]
pub struct Train {
    pub id: TrainId,
    pub name: String,
    /// Index 0 = head (spec §3).
    pub vehicles: Vec<VehicleId>,
    pub direction: TrainDirection,
    active: bool,
    throttle_holder: Option<ThrottleId>,
    blocks: Vec<BlockId>,

    speed_table: SpeedTable,
    /// `tableIdx` of the last entry actually committed to decoders.
    last_set_speed_point: usize,
    /// `tableIdx` the ramp is advancing toward.
    target_table_idx: usize,
    throttle_speed: f64,
    emergency_stop: bool,

    /// m/s^2 at world scale; `braking_rate` is negative.
    pub acceleration_rate: f64,
    pub braking_rate: f64,

    pub mute: bool,
    pub no_smoke: bool,
    pub speed_limit: f64,

    coordinator: coordinator::DecoderThrottleCoordinator,
}

impl Train {
    pub fn new(name: impl Into<String>, vehicles: Vec<VehicleId>, acceleration_rate: f64, braking_rate: f64) -> Self {
        Self {
            id: TrainId::new(),
            name: name.into(),
            vehicles,
            direction: TrainDirection::Forward,
            active: false,
            throttle_holder: None,
            blocks: Vec::new(),
            speed_table: SpeedTable::default(),
            last_set_speed_point: 0,
            target_table_idx: 0,
            throttle_speed: 0.0,
            emergency_stop: false,
            acceleration_rate,
            braking_rate,
            mute: false,
            no_smoke: false,
            speed_limit: f64::INFINITY,
            coordinator: coordinator::DecoderThrottleCoordinator::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_stopped(&self) -> bool {
        self.last_set_speed_point == 0 && self.target_table_idx == 0
    }

    pub fn holder(&self) -> Option<ThrottleId> {
        self.throttle_holder
    }

    pub fn set_speed_table(&mut self, table: SpeedTable) {
        self.speed_table = table;
        self.last_set_speed_point = 0;
        self.target_table_idx = 0;
    }

    pub fn speed_table(&self) -> &SpeedTable {
        &self.speed_table
    }

    /// `acquire(throttle, steal)` (spec §4.6.5). `vehicles_available`
    /// is computed by the caller (the arena owns vehicle assignment):
    /// every vehicle of this train must be unassigned or already
    /// assigned to it.
    pub fn acquire(&mut self, throttle: ThrottleId, steal: bool, vehicles_available: bool) -> Result<(), TrainError> {
        if let Some(holder) = self.throttle_holder {
            if holder == throttle {
                return Ok(());
            }
            if !steal {
                return Err(TrainError::AlreadyAcquired);
            }
        }
        if !vehicles_available {
            return Err(TrainError::CanNotActivateTrain);
        }
        self.throttle_holder = Some(throttle);
        self.active = true;
        Ok(())
    }

    /// `release(throttle)` (spec §4.6.5). Deactivates the train only if
    /// it is stopped and owns no blocks (spec §8 invariant 8).
    pub fn release(&mut self, throttle: ThrottleId) {
        if self.throttle_holder != Some(throttle) {
            return;
        }
        self.throttle_holder = None;
        if self.is_stopped() && self.blocks.is_empty() {
            self.active = false;
        }
    }

    /// `setDirection` (spec §4.6.5): requires `isStopped`, then reverses
    /// vehicle order. Per-vehicle `invertDirection` and the reversal of
    /// the block-status list are the caller's responsibility (they
    /// require the vehicle/block arena).
    pub fn set_direction(&mut self, direction: TrainDirection) -> Result<(), TrainError> {
        if !self.is_stopped() {
            return Err(TrainError::TrainMustBeStoppedToChangeDirection);
        }
        if direction != self.direction {
            self.vehicles.reverse();
            self.direction = direction;
        }
        Ok(())
    }

    pub fn add_block(&mut self, block: BlockId) {
        if !self.blocks.contains(&block) {
            self.blocks.push(block);
        }
    }

    pub fn remove_block(&mut self, block: BlockId) {
        self.blocks.retain(|b| *b != block);
    }

    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    /// `setTargetSpeed` (spec §4.6.2/§4.6.3): looks up the closest table
    /// entry and arms the ramp toward it.
    pub fn set_target_speed(&mut self, speed: f64) {
        self.throttle_speed = speed.max(0.0);
        self.target_table_idx = self.speed_table.closest_match(self.throttle_speed);
    }

    pub fn target_table_idx(&self) -> usize {
        self.target_table_idx
    }

    pub fn last_set_speed_point(&self) -> usize {
        self.last_set_speed_point
    }

    /// Time until the ramp should advance one table entry toward the
    /// target, or `None` if it's already there (spec §4.6.3).
    pub fn ramp_delay(&self) -> Option<std::time::Duration> {
        if self.last_set_speed_point == self.target_table_idx {
            return None;
        }
        let current = self.speed_table.entry(self.last_set_speed_point)?.avg_speed;
        let next_idx = step_toward(self.last_set_speed_point, self.target_table_idx);
        let next = self.speed_table.entry(next_idx)?.avg_speed;
        let delta = (next - current).abs();
        let accelerating = next_idx > self.last_set_speed_point;
        let rate = if accelerating { self.acceleration_rate } else { self.braking_rate.abs() };
        if rate <= 0.0 {
            return Some(std::time::Duration::ZERO);
        }
        Some(std::time::Duration::from_secs_f64((delta / rate).max(0.0)))
    }

    /// Advances the ramp by one table entry toward the target and
    /// returns the entry now in effect, for the caller to commit to
    /// every powered decoder (spec §4.6.3).
    pub fn advance_ramp(&mut self) -> Option<&speed_table::SpeedTableEntry> {
        if self.last_set_speed_point == self.target_table_idx {
            return None;
        }
        self.last_set_speed_point = step_toward(self.last_set_speed_point, self.target_table_idx);
        let entry = self.speed_table.entry(self.last_set_speed_point)?;
        for (idx, &step) in entry.steps.iter().enumerate() {
            self.coordinator.note_commanded_step(idx, step);
        }
        Some(entry)
    }

    /// `emergencyStop=true` (spec §4.6.3): cancels the ramp, zeroes the
    /// target, and returns the stop entry (all steps 0) to commit.
    pub fn set_emergency_stop(&mut self, stop: bool) -> Option<&speed_table::SpeedTableEntry> {
        if stop {
            self.emergency_stop = true;
            self.throttle_speed = 0.0;
            self.target_table_idx = 0;
            self.last_set_speed_point = 0;
            self.speed_table.entry(0)
        } else {
            self.emergency_stop = false;
            None
        }
    }

    pub fn emergency_stop_active(&self) -> bool {
        self.emergency_stop
    }

    /// Inbound decoder-originating throttle change (spec §4.6.4),
    /// `loco_idx` being this vehicle's position among powered vehicles.
    /// A `Commit`/`ClampToMax` outcome also updates this train's ramp
    /// state so the caller can read the new entry off `speed_table()`.
    pub fn handle_decoder_throttle(&mut self, loco_idx: usize, step: u8, now: std::time::Instant) -> coordinator::HandheldOutcome {
        let outcome = coordinator::handle(&mut self.coordinator, &self.speed_table, self.last_set_speed_point, loco_idx, step, now);
        self.apply_handheld_outcome(outcome);
        outcome
    }

    /// Call periodically; resolves a held handheld change once 700 ms
    /// has elapsed without further input (spec §4.6.4 point 3).
    pub fn expire_handheld_hold(&mut self, now: std::time::Instant) -> Option<coordinator::HandheldOutcome> {
        let outcome = coordinator::expire(&mut self.coordinator, &self.speed_table, now)?;
        self.apply_handheld_outcome(outcome);
        Some(outcome)
    }

    fn apply_handheld_outcome(&mut self, outcome: coordinator::HandheldOutcome) {
        match outcome {
            coordinator::HandheldOutcome::Commit(idx) | coordinator::HandheldOutcome::ClampToMax(idx) => {
                self.last_set_speed_point = idx;
                self.target_table_idx = idx;
                if let Some(entry) = self.speed_table.entry(idx) {
                    for (i, &step) in entry.steps.iter().enumerate() {
                        self.coordinator.note_commanded_step(i, step);
                    }
                }
            }
            coordinator::HandheldOutcome::Echo | coordinator::HandheldOutcome::Hold => {}
        }
    }
}

fn step_toward(from: usize, to: usize) -> usize {
    if from < to {
        from + 1
    } else {
        from - 1
    }
}
