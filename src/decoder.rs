//! Logical locomotive controller (spec §3 "Decoder", §4.5), grounded in
//! the teacher's `Loco` (`src/station/loco.rs`): a thin, address-keyed
//! handle whose setters translate into wire commands through a
//! controller, rather than touching the wire directly.

use std::collections::HashMap;

use crate::ids::{DecoderId, InterfaceId, VehicleId};

/// Wire protocol a decoder is addressed under (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    LocoNet,
    XpressNet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    Forward,
    Reverse,
    #[default]
    Unknown,
}

bitflags::bitflags! {
    /// What changed on a [`Decoder`], so a controller can send only the
    /// wire message families that need it (spec §4.3.5).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DecoderChanges: u16 {
        const THROTTLE        = 1 << 0;
        const DIRECTION       = 1 << 1;
        const EMERGENCY_STOP  = 1 << 2;
        const FUNCTIONS       = 1 << 3;
    }
}

/// Binds a [`Decoder`] to the interface that drives it (spec §4.5).
/// Implemented by [`crate::interface::Interface`].
pub trait DecoderController {
    fn decoder_protocols(&self) -> &[Protocol];
    fn decoder_address_min_max(&self, protocol: Protocol) -> (u16, u16);
    /// `changes` records which groups of fields moved; `function_number`
    /// is set only when a single function bit triggered the call.
    fn decoder_changed(&self, decoder: &Decoder, changes: DecoderChanges, function_number: Option<u8>);
}

/// Logical locomotive controller: protocol tag, address, throttle,
/// direction, and function bits (spec §3 "Decoder").
#[derive(Debug, Clone)]
pub struct Decoder {
    pub id: DecoderId,
    pub interface: Option<InterfaceId>,
    pub vehicle: Option<VehicleId>,
    pub protocol: Protocol,
    pub address: u16,
    pub long_address: bool,
    pub function_count: u8,
    throttle: f64,
    direction: Direction,
    emergency_stop: bool,
    /// Absent key = undefined (spec §3: "function value of unassigned
    /// functions is `undefined`").
    functions: HashMap<u8, bool>,

    /// Zone-policy pass-through (spec §4.7: "propagated to the decoder
    /// of every powered vehicle"). Not wire-visible on its own; a sound
    /// decoder's function mapping for mute/no-smoke is a configuration
    /// concern outside this core.
    pub mute: bool,
    pub no_smoke: bool,
    pub speed_limit: f64,
}

impl Decoder {
    pub fn new(protocol: Protocol, address: u16, long_address: bool, function_count: u8) -> Self {
        Self {
            id: DecoderId::new(),
            interface: None,
            vehicle: None,
            protocol,
            address,
            long_address,
            function_count,
            throttle: 0.0,
            direction: Direction::Unknown,
            emergency_stop: false,
            functions: HashMap::new(),
            mute: false,
            no_smoke: false,
            speed_limit: f64::INFINITY,
        }
    }

    pub fn throttle(&self) -> f64 {
        self.throttle
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn emergency_stop(&self) -> bool {
        self.emergency_stop
    }

    pub fn function(&self, number: u8) -> Option<bool> {
        self.functions.get(&number).copied()
    }

    /// Sets throttle in `[0, 1]`. Setting the current value is a no-op
    /// (spec §8 invariant 7: "idempotence ... produces zero outbound
    /// wire messages").
    pub fn set_throttle(&mut self, throttle: f64) -> Result<DecoderChanges, crate::error::TrainError> {
        if !(0.0..=1.0).contains(&throttle) {
            return Err(crate::error::TrainError::InvalidThrottle);
        }
        if throttle == self.throttle {
            return Ok(DecoderChanges::empty());
        }
        self.throttle = throttle;
        Ok(DecoderChanges::THROTTLE)
    }

    pub fn set_direction(&mut self, direction: Direction) -> DecoderChanges {
        if direction == self.direction {
            return DecoderChanges::empty();
        }
        self.direction = direction;
        DecoderChanges::DIRECTION
    }

    pub fn set_emergency_stop(&mut self, stop: bool) -> DecoderChanges {
        if stop == self.emergency_stop {
            return DecoderChanges::empty();
        }
        self.emergency_stop = stop;
        DecoderChanges::EMERGENCY_STOP
    }

    /// `number` beyond `function_count` is accepted and recorded; it is
    /// a modeling precondition, not a wire error (spec §7: "unchecked
    /// preconditions ... are asserts, not errors").
    pub fn set_function(&mut self, number: u8, value: bool) -> (DecoderChanges, Option<u8>) {
        if self.functions.get(&number) == Some(&value) {
            return (DecoderChanges::empty(), None);
        }
        self.functions.insert(number, value);
        (DecoderChanges::FUNCTIONS, Some(number))
    }

    /// Applies an inbound report from the kernel (spec §4.3.5 inbound
    /// direction), overwriting throttle/direction/functions without
    /// going through the idempotence guard — the wire is authoritative
    /// here, not this object.
    pub fn apply_throttle_report(&mut self, speed: u8, direction: crate::message::loconet::Direction) {
        self.throttle = speed_step_to_throttle(speed);
        self.direction = match direction {
            crate::message::loconet::Direction::Forward => Direction::Forward,
            crate::message::loconet::Direction::Reverse => Direction::Reverse,
        };
    }

    pub fn apply_function_report(&mut self, bits: u16) {
        for n in 0..13 {
            self.functions.insert(n, bits & (1 << n) != 0);
        }
    }
}

/// LocoNet 126-step encoding: 0 = stop, 1 = emergency stop, 2..127 map
/// to speed steps 1..126 (spec §6).
pub fn throttle_to_speed_step(throttle: f64, emergency_stop: bool) -> u8 {
    if emergency_stop {
        return 1;
    }
    if throttle <= 0.0 {
        return 0;
    }
    let step = (throttle * 126.0).round().clamp(1.0, 126.0) as u8;
    step + 1
}

pub fn speed_step_to_throttle(step: u8) -> f64 {
    if step < 2 {
        0.0
    } else {
        (step - 1) as f64 / 126.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_round_trips_through_speed_step() {
        let step = throttle_to_speed_step(0.5, false);
        let back = speed_step_to_throttle(step);
        assert!((back - 0.5).abs() < 0.01);
    }

    #[test]
    fn setting_same_throttle_is_a_no_op() {
        let mut d = Decoder::new(Protocol::LocoNet, 3, false, 29);
        assert_eq!(d.set_throttle(0.5).unwrap(), DecoderChanges::THROTTLE);
        assert_eq!(d.set_throttle(0.5).unwrap(), DecoderChanges::empty());
    }

    #[test]
    fn out_of_range_throttle_is_rejected() {
        let mut d = Decoder::new(Protocol::LocoNet, 3, false, 29);
        assert!(d.set_throttle(1.5).is_err());
    }
}
