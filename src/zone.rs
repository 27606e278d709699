//! Policy-bearing block groups (spec §3 "Zone", §4.7, §8 invariant 5),
//! grounded in `original_source/server/test/zone.cpp`'s mute/no-smoke/
//! speed-limit aggregation test, generalized to a free function over
//! borrowed zones rather than a method tied to a specific arena layout.

use crate::ids::{BlockId, ZoneId};

#[derive(Debug, Clone)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
    pub mute: bool,
    pub no_smoke: bool,
    pub speed_limit: f64,
    pub blocks: Vec<BlockId>,
}

impl Zone {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ZoneId::new(),
            name: name.into(),
            mute: false,
            no_smoke: false,
            speed_limit: f64::INFINITY,
            blocks: Vec::new(),
        }
    }
}

/// `mute = ORᵢ zoneᵢ.mute ∨ world.mute`, `noSmoke` likewise,
/// `speedLimit = min(zoneᵢ.speedLimit, world.speedLimit)` (spec §3,
/// §8 invariant 5).
pub fn effective_policy(zones: &[&Zone], world_mute: bool, world_no_smoke: bool, world_speed_limit: f64) -> (bool, bool, f64) {
    let mute = world_mute || zones.iter().any(|z| z.mute);
    let no_smoke = world_no_smoke || zones.iter().any(|z| z.no_smoke);
    let speed_limit = zones.iter().map(|z| z.speed_limit).fold(world_speed_limit, f64::min);
    (mute, no_smoke, speed_limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_combines_or_or_min() {
        let mut z1 = Zone::new("Z1");
        z1.mute = true;
        z1.speed_limit = 27.78; // 100 km/h in m/s

        let (mute, no_smoke, limit) = effective_policy(&[&z1], false, false, f64::INFINITY);
        assert!(mute);
        assert!(!no_smoke);
        assert!((limit - 27.78).abs() < 1e-9);
    }

    #[test]
    fn world_flags_participate_in_the_or() {
        let z1 = Zone::new("Z1");
        let (mute, _, _) = effective_policy(&[&z1], true, false, f64::INFINITY);
        assert!(mute);
    }
}
