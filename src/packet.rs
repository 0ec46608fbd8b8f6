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

//! Wire formats for the beam input stream and the per-channel output stream.

use crate::time::AbsTime;

pub const DATA_VALID: u8 = 0x01;
/// version(2) + src(2) + pol(1) + flags(1) + pad(2) + seq(4) + absTime(8) +
/// len(4) + freq(8) + sampleRate(8).
pub const BEAM_HEADER_LEN: usize = 40;
/// chan(2) + src(2) + flags(1) + pad(1) + seq(4) + absTime(8) + freq(8) +
/// sampleRate(8) + usableFraction(4).
pub const CHANNEL_HEADER_LEN: usize = 38;

/// One complex 8-bit sample, (I, Q).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sample8 {
    pub i: i8,
    pub q: i8,
}

impl Sample8 {
    pub fn wrapping_add(self, other: Sample8) -> Sample8 {
        Sample8 {
            i: self.i.wrapping_add(other.i),
            q: self.q.wrapping_add(other.q),
        }
    }

    pub fn to_complex_f32(self, swap: bool) -> num_complex::Complex32 {
        if swap {
            num_complex::Complex32::new(self.q as f32, self.i as f32)
        } else {
            num_complex::Complex32::new(self.i as f32, self.q as f32)
        }
    }
}

/// One complex 16-bit sample, (I, Q), as carried on an output channel packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sample16 {
    pub i: i16,
    pub q: i16,
}

impl Sample16 {
    /// Round-half-to-even and saturate into the i16 range.
    pub fn from_f32(c: num_complex::Complex32) -> Self {
        Self {
            i: round_saturate(c.re),
            q: round_saturate(c.im),
        }
    }
}

fn round_saturate(v: f32) -> i16 {
    let rounded = v.round_ties_even();
    if rounded >= i16::MAX as f32 {
        i16::MAX
    } else if rounded <= i16::MIN as f32 {
        i16::MIN
    } else {
        rounded as i16
    }
}

/// Header fields of an incoming beam packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeamHeader {
    pub version: u16,
    pub src: u16,
    pub pol: u8,
    pub flags: u8,
    pub seq: u32,
    pub abs_time: AbsTime,
    pub len: u32,
    pub freq: f64,
    pub sample_rate: f64,
}

impl BeamHeader {
    pub fn data_valid(&self) -> bool {
        self.flags & DATA_VALID != 0
    }

    /// Parses a big-endian wire header; `None` if `buf` is too short.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < BEAM_HEADER_LEN {
            return None;
        }
        Some(Self {
            version: u16::from_be_bytes(buf[0..2].try_into().ok()?),
            src: u16::from_be_bytes(buf[2..4].try_into().ok()?),
            pol: buf[4],
            flags: buf[5],
            seq: u32::from_be_bytes(buf[8..12].try_into().ok()?),
            abs_time: AbsTime::from_raw(u64::from_be_bytes(buf[12..20].try_into().ok()?)),
            len: u32::from_be_bytes(buf[20..24].try_into().ok()?),
            freq: f64::from_be_bytes(buf[24..32].try_into().ok()?),
            sample_rate: f64::from_be_bytes(buf[32..40].try_into().ok()?),
        })
    }
}

/// A beam packet: header plus `len` complex-8 samples.
#[derive(Debug, Clone)]
pub struct BeamPacket {
    pub header: BeamHeader,
    pub samples: Vec<Sample8>,
}

impl BeamPacket {
    /// A synthetic, all-zero packet used to fill a sequence gap; copies the
    /// header of `template` but overrides `seq`.
    pub fn synthesize_gap(template: &BeamHeader, seq: u32, len: usize) -> Self {
        let mut header = *template;
        header.seq = seq;
        BeamPacket {
            header,
            samples: vec![Sample8::default(); len],
        }
    }

    /// Parses `header` plus `header.len` complex-8 samples from `payload`,
    /// allocating a fresh sample buffer. See [`Self::parse_into`] for the
    /// pooled-buffer variant the receiver uses on its hot path.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        Self::parse_into(buf, Vec::new()).ok()
    }

    /// Parses into a caller-supplied sample buffer, clearing it first. Lets
    /// the receiver recycle buffers through a `Pool` instead of allocating
    /// one per incoming datagram. On a parse failure, `samples` is handed
    /// back unchanged so the caller can still recycle it.
    pub fn parse_into(buf: &[u8], mut samples: Vec<Sample8>) -> Result<Self, Vec<Sample8>> {
        let Some(header) = BeamHeader::parse(buf) else {
            return Err(samples);
        };
        let body = &buf[BEAM_HEADER_LEN..];
        let len = header.len as usize;
        if body.len() < len * 2 {
            return Err(samples);
        }
        samples.clear();
        samples.extend(body[..len * 2].chunks_exact(2).map(|c| Sample8 { i: c[0] as i8, q: c[1] as i8 }));
        Ok(BeamPacket { header, samples })
    }
}

/// Header fields of an outgoing channel packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelHeader {
    pub chan: u16,
    pub src: u16,
    pub seq: u32,
    pub abs_time: AbsTime,
    pub freq: f64,
    pub sample_rate: f64,
    pub usable_fraction: f32,
    pub flags: u8,
}

#[derive(Debug, Clone)]
pub struct ChannelPacket {
    pub header: ChannelHeader,
    pub samples: Vec<Sample16>,
}

impl ChannelPacket {
    /// Serializes the header and payload to the big-endian wire format into
    /// a caller-supplied, already-`clear`ed buffer — lets the transmitter
    /// recycle wire buffers through a `Pool` instead of allocating one per
    /// outgoing packet.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.header.chan.to_be_bytes());
        buf.extend_from_slice(&self.header.src.to_be_bytes());
        buf.push(self.header.flags);
        buf.push(0); // pad
        buf.extend_from_slice(&self.header.seq.to_be_bytes());
        buf.extend_from_slice(&self.header.abs_time.raw().to_be_bytes());
        buf.extend_from_slice(&self.header.freq.to_be_bytes());
        buf.extend_from_slice(&self.header.sample_rate.to_be_bytes());
        buf.extend_from_slice(&self.header.usable_fraction.to_be_bytes());
        for s in &self.samples {
            buf.extend_from_slice(&s.i.to_be_bytes());
            buf.extend_from_slice(&s.q.to_be_bytes());
        }
    }

    /// Serializes into a freshly allocated buffer; convenience wrapper
    /// around [`Self::encode_into`] for callers that don't pool buffers.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(CHANNEL_HEADER_LEN + self.samples.len() * 4);
        self.encode_into(&mut buf);
        buf
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decimation_sum_wraps() {
        let a = Sample8 { i: 100, q: 100 };
        let b = Sample8 { i: 100, q: 100 };
        let sum = a.wrapping_add(b);
        assert_eq!(sum.i, 100i8.wrapping_add(100));
    }

    #[test]
    fn round_saturate_clamps() {
        assert_eq!(round_saturate(1e9), i16::MAX);
        assert_eq!(round_saturate(-1e9), i16::MIN);
        assert_eq!(round_saturate(0.5), 0);
        assert_eq!(round_saturate(1.5), 2);
    }

    #[test]
    fn synthesize_gap_is_zeroed_and_reseqed() {
        let header = BeamHeader {
            version: 1,
            src: 7,
            pol: 0,
            flags: DATA_VALID,
            seq: 9,
            abs_time: AbsTime::ZERO,
            len: 4,
            freq: 0.0,
            sample_rate: 0.0,
        };
        let gap = BeamPacket::synthesize_gap(&header, 10, 4);
        assert_eq!(gap.header.seq, 10);
        assert_eq!(gap.header.src, 7);
        assert!(gap.samples.iter().all(|s| *s == Sample8::default()));
    }

    #[test]
    fn beam_header_parse_roundtrip() {
        let header = BeamHeader {
            version: 1,
            src: 7,
            pol: 1,
            flags: DATA_VALID,
            seq: 42,
            abs_time: AbsTime::from_parts(5, 6),
            len: 3,
            freq: 1420.0,
            sample_rate: 100.0,
        };
        let mut buf = vec![0u8; BEAM_HEADER_LEN + 6];
        buf[0..2].copy_from_slice(&header.version.to_be_bytes());
        buf[2..4].copy_from_slice(&header.src.to_be_bytes());
        buf[4] = header.pol;
        buf[5] = header.flags;
        buf[8..12].copy_from_slice(&header.seq.to_be_bytes());
        buf[12..20].copy_from_slice(&header.abs_time.raw().to_be_bytes());
        buf[20..24].copy_from_slice(&header.len.to_be_bytes());
        buf[24..32].copy_from_slice(&header.freq.to_be_bytes());
        buf[32..40].copy_from_slice(&header.sample_rate.to_be_bytes());
        let parsed = BeamPacket::parse(&buf).unwrap();
        assert_eq!(parsed.header, header);
        assert_eq!(parsed.samples.len(), 3);
    }

    #[test]
    fn channel_packet_serializes_expected_length() {
        let header = ChannelHeader {
            chan: 1,
            src: 1,
            seq: 0,
            abs_time: AbsTime::ZERO,
            freq: 0.0,
            sample_rate: 0.0,
            usable_fraction: 0.8,
            flags: DATA_VALID,
        };
        let packet = ChannelPacket { header, samples: vec![Sample16::default(); 4] };
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), CHANNEL_HEADER_LEN + 4 * 4);
    }
}
