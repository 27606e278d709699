//! Multi-locomotive speed table construction (spec §4.6.1), grounded
//! in `original_source/server/src/train/trainspeedtable.cpp`. Keeps
//! every powered vehicle in a train within ±0.005 m/s of each other at
//! every selectable throttle point.

use crate::vehicle::SpeedCurve;

/// Physically-agreed speeds differ by at most this much (spec §3, §8
/// invariant 4).
pub const AGREEMENT_BAND: f64 = 0.005;

#[derive(Debug, Clone, PartialEq)]
pub struct SpeedTableEntry {
    /// Per-locomotive decoder step, in train vehicle order.
    pub steps: Vec<u8>,
    pub avg_speed: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SpeedTable {
    /// Entry 0 is always the implicit stopped state (spec §3).
    entries: Vec<SpeedTableEntry>,
}

impl SpeedTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, index: usize) -> Option<&SpeedTableEntry> {
        self.entries.get(index)
    }

    /// Highest entry with `avgSpeed <= speed` (spec §4.6.2).
    pub fn closest_match(&self, speed: f64) -> usize {
        let mut best = 0;
        for (i, e) in self.entries.iter().enumerate() {
            if e.avg_speed <= speed {
                best = i;
            }
        }
        best
    }

    /// Entry whose step for `loco_idx` is nearest `step`, lower
    /// preferred on ties (spec §4.6.2).
    pub fn closest_match_for_step(&self, loco_idx: usize, step: u8) -> usize {
        let mut best = 0;
        let mut best_delta = u16::MAX;
        let mut best_step = 0u8;
        for (i, e) in self.entries.iter().enumerate() {
            let Some(&s) = e.steps.get(loco_idx) else { continue };
            let delta = (s as i16 - step as i16).unsigned_abs();
            if delta < best_delta || (delta == best_delta && s < best_step) {
                best_delta = delta;
                best_step = s;
                best = i;
            }
        }
        best
    }

    /// Builds the table from each powered vehicle's speed curve (spec
    /// §4.6.1). Empty `curves` yields a table with only the null entry.
    pub fn build(curves: &[SpeedCurve]) -> Self {
        let n = curves.len();
        let mut entries = vec![SpeedTableEntry { steps: vec![0; n], avg_speed: 0.0 }];

        if n == 0 {
            return Self { entries };
        }

        if n == 1 {
            for s in 1..=126u8 {
                entries.push(SpeedTableEntry { steps: vec![s], avg_speed: curves[0].at(s) });
            }
            return Self { entries };
        }

        let global_max_speed = curves.iter().map(SpeedCurve::max_speed).fold(f64::INFINITY, f64::min);
        let s0_bound = curves
            .iter()
            .filter_map(|c| c.step_lower_bound(global_max_speed))
            .min()
            .unwrap_or(126);

        // (steps, avg_speed, band_width), built one per accepted s0.
        let mut raw: Vec<(Vec<u8>, f64, f64)> = Vec::new();

        for s0 in 1..=s0_bound {
            let target = curves[0].at(s0);
            let band_lo = target - AGREEMENT_BAND;
            let band_hi = target + AGREEMENT_BAND;

            let mut steps = vec![s0];
            let mut speeds = vec![target];
            let mut achievable = true;

            for curve in &curves[1..] {
                let Some(lo) = curve.step_lower_bound(band_lo) else {
                    achievable = false;
                    break;
                };
                let Some(hi) = curve.step_upper_bound(band_hi) else {
                    achievable = false;
                    break;
                };
                if lo > hi {
                    achievable = false;
                    break;
                }
                // Pick the candidate step closest to `target`; this
                // minimizes the entry's own max-min spread.
                let best = (lo..=hi).min_by(|&a, &b| {
                    let da = (curve.at(a) - target).abs();
                    let db = (curve.at(b) - target).abs();
                    da.partial_cmp(&db).unwrap()
                }).expect("lo..=hi is non-empty");
                steps.push(best);
                speeds.push(curve.at(best));
            }

            if !achievable {
                continue;
            }

            let max = speeds.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let min = speeds.iter().cloned().fold(f64::INFINITY, f64::min);
            let spread = max - min;
            if spread > AGREEMENT_BAND {
                continue;
            }

            let avg = speeds.iter().sum::<f64>() / speeds.len() as f64;
            raw.push((steps, avg, spread));
        }

        // Per-locomotive dedupe (spec §4.6.1 step 5): for each
        // locomotive separately, collapse consecutive runs sharing that
        // locomotive's step to the run's narrowest-spread entry.
        for loco_idx in 1..n {
            raw = dedupe_consecutive_by_loco(raw, loco_idx);
        }

        entries.extend(raw.into_iter().map(|(steps, avg_speed, _)| SpeedTableEntry { steps, avg_speed }));
        Self { entries }
    }
}

fn dedupe_consecutive_by_loco(raw: Vec<(Vec<u8>, f64, f64)>, loco_idx: usize) -> Vec<(Vec<u8>, f64, f64)> {
    let mut out: Vec<(Vec<u8>, f64, f64)> = Vec::with_capacity(raw.len());
    for item in raw {
        match out.last_mut() {
            Some(last) if last.0[loco_idx] == item.0[loco_idx] => {
                if item.2 < last.2 {
                    *last = item;
                }
            }
            _ => out.push(item),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_locomotive_table_is_identity() {
        let curve = SpeedCurve::linear(10.0);
        let table = SpeedTable::build(&[curve.clone()]);
        assert_eq!(table.len(), 127);
        assert_eq!(table.entry(1).unwrap().steps, vec![1]);
        assert!((table.entry(126).unwrap().avg_speed - curve.at(126)).abs() < 1e-9);
    }

    #[test]
    fn two_identical_curves_keep_matching_steps() {
        let curve = SpeedCurve::linear(10.0);
        let table = SpeedTable::build(&[curve.clone(), curve]);
        for i in 1..table.len() {
            let e = table.entry(i).unwrap();
            assert_eq!(e.steps[0], e.steps[1]);
        }
    }

    #[test]
    fn mismatched_curves_stay_within_agreement_band() {
        let a = SpeedCurve::linear(10.0);
        let b = SpeedCurve::linear(9.0);
        let table = SpeedTable::build(&[a.clone(), b.clone()]);
        for i in 1..table.len() {
            let e = table.entry(i).unwrap();
            let sa = a.at(e.steps[0]);
            let sb = b.at(e.steps[1]);
            assert!((sa - sb).abs() <= AGREEMENT_BAND + 1e-9);
        }
    }

    #[test]
    fn closest_match_picks_highest_entry_not_exceeding_speed() {
        let curve = SpeedCurve::linear(12.6);
        let table = SpeedTable::build(&[curve]);
        let idx = table.closest_match(5.0);
        assert!(table.entry(idx).unwrap().avg_speed <= 5.0);
        assert!(table.entry(idx + 1).unwrap().avg_speed > 5.0);
    }
}
