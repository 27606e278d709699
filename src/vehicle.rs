//! Physical rolling stock (spec §3 "Rail vehicle"), grounded in the
//! teacher's `Loco` as "the thing a throttle acts on", generalized from
//! one address-bound locomotive to a train-ordered mix of powered and
//! unpowered vehicles.

use crate::ids::{DecoderId, VehicleId};

/// A 126-sample monotone mapping from decoder speed step to physical
/// m/s for one powered vehicle (spec §3, §4.6.1, GLOSSARY "Speed curve").
#[derive(Debug, Clone)]
pub struct SpeedCurve {
    /// Index 0 unused; `samples[1..=126]` are steps 1..126 in m/s.
    samples: [f64; 127],
}

impl SpeedCurve {
    /// `steps[i]` is the speed at step `i+1`. Must be non-decreasing
    /// and finite (spec §3 invariant); panics otherwise since a curve
    /// is built once from configuration, not from untrusted wire data.
    pub fn new(steps: [f64; 126]) -> Self {
        let mut samples = [0.0; 127];
        let mut prev = 0.0;
        for (i, &v) in steps.iter().enumerate() {
            assert!(v.is_finite() && v >= prev, "speed curve must be non-decreasing and finite");
            samples[i + 1] = v;
            prev = v;
        }
        Self { samples }
    }

    /// Linear curve from 0 to `top_speed` at step 126, useful for tests
    /// and default configuration.
    pub fn linear(top_speed: f64) -> Self {
        let mut steps = [0.0; 126];
        for (i, s) in steps.iter_mut().enumerate() {
            *s = top_speed * (i + 1) as f64 / 126.0;
        }
        Self::new(steps)
    }

    pub fn at(&self, step: u8) -> f64 {
        self.samples[step as usize]
    }

    pub fn max_speed(&self) -> f64 {
        self.samples[126]
    }

    /// Smallest step whose speed is `>= target`, or `None` if even step
    /// 126 falls short (spec §4.6.1 step 1/2).
    pub fn step_lower_bound(&self, target: f64) -> Option<u8> {
        (1..=126u8).find(|&s| self.samples[s as usize] >= target)
    }

    /// Largest step whose speed is `<= target`, or `None` if even step 1
    /// exceeds it.
    pub fn step_upper_bound(&self, target: f64) -> Option<u8> {
        (1..=126u8).rev().find(|&s| self.samples[s as usize] <= target)
    }
}

/// A powered vehicle's decoder binding and physical speed curve.
#[derive(Debug, Clone)]
pub struct PoweredUnit {
    pub decoder: DecoderId,
    pub speed_curve: SpeedCurve,
}

#[derive(Debug, Clone)]
pub struct RailVehicle {
    pub id: VehicleId,
    pub name: String,
    /// meters
    pub length: f64,
    /// kilograms
    pub mass: f64,
    /// m/s, independent of any speed curve (mechanical/coupler limit)
    pub max_speed: f64,
    /// Reverses this vehicle's effective direction within its train
    /// (spec §3: "respecting per-vehicle invertDirection").
    pub invert_direction: bool,
    pub powered: Option<PoweredUnit>,
    /// Set while a [`crate::train::Train`] holds this vehicle (spec §3:
    /// "may own at most one Decoder").
    pub train: Option<crate::ids::TrainId>,
}

impl RailVehicle {
    pub fn new(name: impl Into<String>, length: f64, mass: f64, max_speed: f64) -> Self {
        Self {
            id: VehicleId::new(),
            name: name.into(),
            length,
            mass,
            max_speed,
            invert_direction: false,
            powered: None,
            train: None,
        }
    }

    pub fn with_power(mut self, decoder: DecoderId, speed_curve: SpeedCurve) -> Self {
        self.powered = Some(PoweredUnit { decoder, speed_curve });
        self
    }

    pub fn is_powered(&self) -> bool {
        self.powered.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_curve_is_monotone_and_bounded() {
        let curve = SpeedCurve::linear(10.0);
        assert_eq!(curve.at(0), 0.0);
        assert!((curve.max_speed() - 10.0).abs() < 1e-9);
        assert!(curve.at(126) >= curve.at(63));
    }

    #[test]
    fn step_bounds_match_monotone_search() {
        let curve = SpeedCurve::linear(12.6);
        // step s has speed s * 0.1
        assert_eq!(curve.step_lower_bound(5.0), Some(50));
        assert_eq!(curve.step_upper_bound(5.05), Some(50));
    }
}
