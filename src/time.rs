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

//! 32.32 fixed-point absolute time: upper 32 bits are integer seconds, lower
//! 32 bits are fractional seconds in units of 2⁻³² s.

use libc::{CLOCK_REALTIME, clock_gettime, timespec};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct AbsTime(u64);

impl AbsTime {
    pub const ZERO: AbsTime = AbsTime(0);

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn from_parts(sec: u32, frac: u32) -> Self {
        Self(((sec as u64) << 32) | frac as u64)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        let sec = secs.floor();
        let frac = secs - sec;
        Self::from_parts(sec as u32, (frac * 4_294_967_296.0) as u32)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn sec(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn frac(self) -> u32 {
        self.0 as u32
    }

    pub fn as_secs_f64(self) -> f64 {
        self.sec() as f64 + self.frac() as f64 / 4_294_967_296.0
    }

    pub fn advance_secs(self, secs: f64) -> Self {
        Self::from_secs_f64(self.as_secs_f64() + secs)
    }
}

impl fmt::Display for AbsTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.9}s", self.as_secs_f64())
    }
}

impl From<u64> for AbsTime {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<AbsTime> for u64 {
    fn from(t: AbsTime) -> Self {
        t.0
    }
}

/// Wall-clock time as an [`AbsTime`], used only to interpret a configured
/// start time against the running system clock; the hot path never calls
/// this, it only compares packet timestamps to each other.
pub fn wall_clock_now() -> AbsTime {
    let mut tp = timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe { clock_gettime(CLOCK_REALTIME, &mut tp) };
    AbsTime::from_secs_f64(tp.tv_sec as f64 + tp.tv_nsec as f64 / 1_000_000_000.0)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pack_unpack_roundtrip() {
        let t = AbsTime::from_parts(1_700_000_000, 0x8000_0000);
        assert_eq!(t.sec(), 1_700_000_000);
        assert_eq!(t.frac(), 0x8000_0000);
        assert_eq!(AbsTime::from_raw(t.raw()), t);
    }

    #[test]
    fn advance_carries_into_seconds() {
        let t = AbsTime::from_parts(10, 0);
        let t2 = t.advance_secs(1.5);
        assert_eq!(t2.sec(), 11);
        assert!((t2.as_secs_f64() - 11.5).abs() < 1e-6);
    }
}
