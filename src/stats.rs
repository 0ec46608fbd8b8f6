/*
 *  Copyright (C) 2025 Michael Bachmann
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU Affero General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU Affero General Public License for more details.
 *
 *  You should have received a copy of the GNU Affero General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Running sample-level statistics and packet-count counters, guarded by the
//! beam's stats lock — disjoint from the pending-list lock, see
//! `crate::beam`'s module docs for the lock-ordering rule.

use serde::Serialize;

/// `(count, min, max, sum, sumSq)` over a stream of power samples, computed
/// from the first sample of each packet/channel only — a deliberate cheap
/// proxy for level monitoring, not a full per-sample accumulator.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SampleStats {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub sum_sq: f64,
}

impl Default for SampleStats {
    fn default() -> Self {
        Self {
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
            sum_sq: 0.0,
        }
    }
}

impl SampleStats {
    pub fn record(&mut self, power: f64) {
        self.count += 1;
        self.min = self.min.min(power);
        self.max = self.max.max(power);
        self.sum += power;
        self.sum_sq += power * power;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Packet-level counters; everything here is "counted, not surfaced as an
/// error" per the error-handling design.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct NetStats {
    pub total: u64,
    pub wrong: u64,
    pub missed: u64,
    pub late: u64,
    pub invalid: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BeamStatistics {
    pub net: NetStats,
    pub input: SampleStats,
    pub output: SampleStats,
    pub channels: Vec<SampleStats>,
}

impl BeamStatistics {
    pub fn new(usable_channels: usize) -> Self {
        Self {
            net: NetStats::default(),
            input: SampleStats::default(),
            output: SampleStats::default(),
            channels: vec![SampleStats::default(); usable_channels],
        }
    }

    pub fn reset(&mut self) {
        self.input = SampleStats::default();
        self.output = SampleStats::default();
        for c in &mut self.channels {
            *c = SampleStats::default();
        }
    }
}

/// Complex-sample power, `re^2 + im^2`.
pub fn power(re: f32, im: f32) -> f64 {
    (re as f64) * (re as f64) + (im as f64) * (im as f64)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sample_stats_tracks_min_max_mean() {
        let mut s = SampleStats::default();
        s.record(1.0);
        s.record(3.0);
        assert_eq!(s.count, 2);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 3.0);
        assert_eq!(s.mean(), 2.0);
    }

    #[test]
    fn reset_clears_sample_stats_but_not_net() {
        let mut stats = BeamStatistics::new(2);
        stats.input.record(5.0);
        stats.net.total = 10;
        stats.reset();
        assert_eq!(stats.input.count, 0);
        assert_eq!(stats.net.total, 10);
    }
}
