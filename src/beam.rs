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

//! The beam: owns the input ring, the pending-iteration list, and the
//! ingest/scheduling state machine. This is the part of the system every
//! other component either feeds into or is driven by.
//!
//! Two disjoint locks guard beam state: `locked` (the "beam lock" in the
//! design — pending list, sequence/time bookkeeping, state) and `stats` (the
//! "stats lock"). A thread never holds both at once, and never holds either
//! while blocked on ring I/O or DFB math.

use crate::config::Config;
use crate::dfb::{DfbKernel, consumed, threshold};
use crate::error::ChannelizerError;
use crate::packet::{BeamPacket, Sample8};
use crate::pool::Pool;
use crate::ring::InputRing;
use crate::stats::{BeamStatistics, power};
use crate::time::AbsTime;
use crossbeam::channel::Sender;
use num_complex::Complex32;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::{info, warn};

pub const PROTOCOL_VERSION: u16 = 1;

/// Sample-storage free-list size: generous relative to the bounded input
/// channel capacity, since a packet's buffer is checked out from the moment
/// the receiver parses it until `Beam::handle_packet` frees or consumes it.
const SAMPLE_POOL_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeamState {
    Pending,
    Running,
    Idle,
}

/// One scheduled DFB iteration, handed to a worker over the work queue.
#[derive(Debug, Clone, Copy)]
pub struct PacketInfo {
    pub sample: u64,
    pub seq: u64,
    pub abs_time: AbsTime,
}

/// Immutable, precomputed layout shared by all workers; cheap to clone.
#[derive(Debug, Clone, Copy)]
pub struct ChannelMeta {
    pub usable_channels: usize,
    pub channel_samples: usize,
    pub chan_spacing: f64,
    pub center_freq: f64,
    pub sample_rate: f64,
    pub usable_fraction: f32,
    pub channel_src: u32,
}

struct PacketTiming {
    beam_time: AbsTime,
    beam_sec_per_sample: f64,
    channel_time: AbsTime,
    channel_sec_per_sample: f64,
    channel_sec_per_packet: f64,
}

struct Locked {
    state: BeamState,
    input_seq: u32,
    output_seq: u64,
    armed: bool,
    /// sample_index -> completed; ordered ascending so the oldest entry is
    /// always first, which is exactly the prefix `ingest`'s flush walk needs.
    pending: BTreeMap<u64, bool>,
    timing: PacketTiming,
    start_time_sec: Option<i64>,
}

struct Params {
    total_channels: usize,
    overlap: usize,
    foldings: usize,
    channel_samples: usize,
    threshold: usize,
    consumed: usize,
    version: u16,
    src: u32,
    pol: u8,
    decimation: usize,
    swap: bool,
    bandwidth_mhz: f64,
    oversampling: f64,
    channel_src: u32,
}

pub struct Beam {
    params: Params,
    ring: InputRing,
    locked: Mutex<Locked>,
    stats: Mutex<BeamStatistics>,
    work_tx: Sender<PacketInfo>,
    /// Natural-FFT-order bin indices for each usable output channel, already
    /// in final transmit order: negative frequencies first, then DC and
    /// positive frequencies.
    usable_indices: Vec<usize>,
    center_freq: Mutex<f64>,
    /// Backing storage for incoming packet samples, analogous to the
    /// original's `beamPktList`. `receiver.rs` checks a buffer out before
    /// parsing each datagram; `handle_packet` frees it back here on every
    /// path, whether or not the packet was actually ingested.
    sample_pool: Pool<Vec<Sample8>>,
}

fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

impl Beam {
    pub fn new(config: &Config, ring_capacity: usize, work_tx: Sender<PacketInfo>) -> Self {
        let total_channels = config.channels.total as usize;
        let usable_channels = config.channels.usable as usize;
        let overlap = config.overlap() as usize;
        let foldings = config.channels.foldings as usize;
        let channel_samples = 1024usize;
        let beam_sec_per_sample = 1.0 / (config.beam.bandwidth * 1_000_000.0);
        let channel_sec_per_sample = (total_channels - overlap) as f64 * beam_sec_per_sample;
        let channel_sec_per_packet = channel_samples as f64 * channel_sec_per_sample;

        let half = usable_channels / 2;
        let usable_indices: Vec<usize> = (total_channels - half..total_channels)
            .chain(0..half)
            .collect();

        let initial_state = if config.start_time_sec.is_some() {
            BeamState::Pending
        } else {
            BeamState::Idle
        };

        Self {
            params: Params {
                total_channels,
                overlap,
                foldings,
                channel_samples,
                threshold: threshold(total_channels, channel_samples),
                consumed: consumed(total_channels, overlap, channel_samples),
                version: PROTOCOL_VERSION,
                src: config.beam.src,
                pol: config.beam.pol,
                decimation: config.decimation.max(1) as usize,
                swap: config.swap_inputs,
                bandwidth_mhz: config.beam.bandwidth,
                oversampling: config.beam.oversampling,
                channel_src: config.channel_src,
            },
            ring: InputRing::new(ring_capacity),
            locked: Mutex::new(Locked {
                state: initial_state,
                input_seq: 0,
                output_seq: 0,
                armed: false,
                pending: BTreeMap::new(),
                timing: PacketTiming {
                    beam_time: AbsTime::ZERO,
                    beam_sec_per_sample,
                    channel_time: AbsTime::ZERO,
                    channel_sec_per_sample,
                    channel_sec_per_packet,
                },
                start_time_sec: config.start_time_sec,
            }),
            stats: Mutex::new(BeamStatistics::new(usable_channels)),
            work_tx,
            usable_indices,
            center_freq: Mutex::new(config.beam.freq),
            sample_pool: Pool::with_capacity(SAMPLE_POOL_SIZE, Vec::new),
        }
    }

    /// Checks a sample buffer out of the pool for the receiver to parse a
    /// new packet into. Exhaustion is a fatal, NO_BUFFER_AVAIL-style
    /// condition: the pool is sized to the bounded input queue, so running
    /// out means packets are piling up faster than `handle_packet` frees them.
    pub fn alloc_sample_buffer(&self) -> Vec<Sample8> {
        self.sample_pool
            .alloc()
            .expect("NO_BUFFER_AVAIL: sample buffer pool exhausted")
    }

    /// Returns a buffer the receiver couldn't turn into a packet (malformed
    /// datagram) straight back to the pool without ever reaching `handle_packet`.
    pub fn free_sample_buffer(&self, samples: Vec<Sample8>) {
        self.sample_pool.free(samples);
    }

    pub fn make_kernel(&self) -> DfbKernel {
        DfbKernel::new(
            self.params.total_channels,
            self.params.overlap,
            self.params.foldings,
            self.params.channel_samples,
        )
    }

    pub fn channel_meta(&self) -> ChannelMeta {
        let total = self.params.total_channels as f64;
        ChannelMeta {
            usable_channels: self.usable_indices.len(),
            channel_samples: self.params.channel_samples,
            chan_spacing: self.params.bandwidth_mhz / total,
            center_freq: *self.center_freq.lock().expect("center_freq lock poisoned"),
            sample_rate: self.params.bandwidth_mhz / (1.0 - self.params.oversampling) / total,
            usable_fraction: (1.0 - self.params.oversampling) as f32,
            channel_src: self.params.channel_src,
        }
    }

    pub fn state(&self) -> BeamState {
        self.locked.lock().expect("beam lock poisoned").state
    }

    pub fn stats_snapshot(&self) -> BeamStatistics {
        self.stats.lock().expect("stats lock poisoned").clone()
    }

    /// External start command: arms the beam to begin at `start_time_sec`
    /// (`None` starts on the next valid packet regardless of its time).
    pub fn start(&self, start_time_sec: Option<i64>, center_freq: Option<f64>) {
        let mut locked = self.locked.lock().expect("beam lock poisoned");
        locked.start_time_sec = start_time_sec;
        locked.armed = false;
        locked.state = BeamState::Pending;
        drop(locked);
        if let Some(freq) = center_freq {
            *self.center_freq.lock().expect("center_freq lock poisoned") = freq;
        }
    }

    pub fn stop(&self) {
        self.locked.lock().expect("beam lock poisoned").state = BeamState::Idle;
    }

    /// Implements the 8-step packet-handling order. Returns `(error,
    /// start_flag)`: `error` is set only for IPV/STAP, everything else
    /// (wrong source, late, invalid, missed) is only counted in statistics.
    pub fn handle_packet(&self, pkt: BeamPacket) -> (Option<ChannelizerError>, bool) {
        let mut locked = self.locked.lock().expect("beam lock poisoned");

        // Step 1.
        if locked.state == BeamState::Idle {
            self.sample_pool.free(pkt.samples);
            return (None, false);
        }

        // Step 2.
        self.stats.lock().expect("stats lock poisoned").net.total += 1;

        // Step 3.
        if !pkt.header.data_valid() {
            locked.armed = false;
            locked.input_seq = 0;
            drop(locked);
            self.sample_pool.free(pkt.samples);
            let mut stats = self.stats.lock().expect("stats lock poisoned");
            stats.input = Default::default();
            stats.net.invalid += 1;
            return (None, false);
        }

        // Step 4.
        if pkt.header.src as u32 != self.params.src || pkt.header.pol != self.params.pol {
            drop(locked);
            self.sample_pool.free(pkt.samples);
            self.stats.lock().expect("stats lock poisoned").net.wrong += 1;
            return (None, false);
        }

        let mut start_flag = false;

        // Step 5.
        if locked.state == BeamState::Pending {
            if pkt.header.version != self.params.version {
                locked.state = BeamState::Idle;
                warn!("beam {}: protocol version mismatch, going IDLE", self.params.src);
                self.sample_pool.free(pkt.samples);
                return (Some(ChannelizerError::Ipv), false);
            }

            let t = pkt.header.abs_time.sec() as i64;
            match locked.start_time_sec {
                None => {
                    self.transition_to_running(&mut locked, &pkt);
                    start_flag = true;
                }
                Some(start) if t < start => {
                    locked.armed = true;
                    self.sample_pool.free(pkt.samples);
                    return (None, false);
                }
                Some(_) if !locked.armed => {
                    // Never saw a waiting packet before start time passed:
                    // free this one uncounted and wait for the next.
                    locked.armed = true;
                    warn!("beam {}: start time already passed", self.params.src);
                    self.sample_pool.free(pkt.samples);
                    return (Some(ChannelizerError::Stap), false);
                }
                Some(_) => {
                    self.transition_to_running(&mut locked, &pkt);
                    start_flag = true;
                }
            }
        }

        // Step 6.
        if seq_lt(pkt.header.seq, locked.input_seq) {
            drop(locked);
            self.sample_pool.free(pkt.samples);
            self.stats.lock().expect("stats lock poisoned").net.late += 1;
            return (None, start_flag);
        }

        // Step 7.
        self.add_packet(&mut locked, pkt);
        (None, start_flag)
    }

    fn transition_to_running(&self, locked: &mut Locked, pkt: &BeamPacket) {
        locked.input_seq = pkt.header.seq;
        locked.output_seq = 0;
        locked.armed = false;
        locked.pending.clear();
        self.ring.reset();
        self.stats.lock().expect("stats lock poisoned").reset();

        locked.timing.beam_time = pkt.header.abs_time;
        let dt = self.params.total_channels as f64
            * self.params.foldings as f64
            * locked.timing.beam_sec_per_sample
            * 0.5;
        locked.timing.channel_time = locked.timing.beam_time.advance_secs(dt);
        locked.state = BeamState::Running;
        info!("beam {}: RUNNING from seq {}", self.params.src, pkt.header.seq);
    }

    fn add_packet(&self, locked: &mut Locked, pkt: BeamPacket) {
        let gap_len = pkt.samples.len();
        while seq_lt(locked.input_seq, pkt.header.seq) {
            let gap = BeamPacket::synthesize_gap(&pkt.header, locked.input_seq, gap_len);
            self.ingest(locked, gap);
            self.stats.lock().expect("stats lock poisoned").net.missed += 1;
        }
        self.ingest(locked, pkt);

        while self.ring.last() - self.ring.next() >= self.params.threshold as u64 {
            self.schedule(locked);
        }
    }

    fn ingest(&self, locked: &mut Locked, pkt: BeamPacket) {
        let decim = self.params.decimation;
        let raw_samples = pkt.samples;
        let samples: Vec<Sample8> = if decim > 1 {
            let decimated = raw_samples
                .chunks(decim)
                .map(|c| c.iter().fold(Sample8::default(), |acc, s| acc.wrapping_add(*s)))
                .collect();
            self.sample_pool.free(raw_samples);
            decimated
        } else {
            raw_samples
        };
        let len = samples.len() as u64;

        if self.ring.free() < len {
            let mut new_done = self.ring.done();
            let mut complete_prefix = Vec::new();
            for (&sample, &complete) in locked.pending.iter() {
                if complete {
                    new_done = sample;
                    complete_prefix.push(sample);
                } else {
                    break;
                }
            }
            for k in complete_prefix {
                locked.pending.remove(&k);
            }
            self.ring.advance_done(new_done);

            if self.ring.free() < len {
                panic!(
                    "NO_BUFFER_AVAIL: ring exhausted (done={} next={} last={} pending={})",
                    self.ring.done(),
                    self.ring.next(),
                    self.ring.last(),
                    locked.pending.len()
                );
            }
        }

        if let Some(first) = samples.first() {
            let p = power(first.i as f32, first.q as f32);
            self.stats.lock().expect("stats lock poisoned").input.record(p);
        }

        self.ring.write(&samples).expect("free space checked above");
        locked.input_seq = pkt.header.seq.wrapping_add(1);
        self.sample_pool.free(samples);
    }

    fn schedule(&self, locked: &mut Locked) {
        let sample = self.ring.next();
        locked.pending.insert(sample, false);

        let seq = locked.output_seq;
        locked.output_seq += 1;
        let info = PacketInfo {
            sample,
            seq,
            abs_time: locked.timing.channel_time,
        };
        locked.timing.channel_time = locked
            .timing
            .channel_time
            .advance_secs(locked.timing.channel_sec_per_packet);

        self.ring.advance_next(self.params.consumed as u64);
        self.work_tx.send(info).expect("work queue disconnected");
    }

    /// Runs one DFB iteration for `sample`, called from a worker thread.
    /// Returns `None` if the beam stopped being RUNNING before the job could
    /// be abandoned, in which case its pending-list entry is removed without
    /// ever touching the ring.
    pub fn dfb_process(&self, sample: u64, kernel: &mut DfbKernel) -> Option<Vec<Vec<Complex32>>> {
        {
            let mut locked = self.locked.lock().expect("beam lock poisoned");
            if locked.state != BeamState::Running {
                locked.pending.remove(&sample);
                return None;
            }
        }

        let view = self.ring.view(sample, self.params.threshold as u64);
        debug_assert_eq!(view.len(), self.params.threshold as u64);
        let mut input = vec![Complex32::default(); view.len() as usize];
        view.copy_to_complex(&mut input, self.params.swap);

        let mut out: Vec<Vec<Complex32>> = self
            .usable_indices
            .iter()
            .map(|_| vec![Complex32::default(); self.params.channel_samples])
            .collect();
        kernel.iterate(&input, &self.usable_indices, &mut out);

        {
            let mut locked = self.locked.lock().expect("beam lock poisoned");
            if let Some(done) = locked.pending.get_mut(&sample) {
                *done = true;
            }
        }

        self.record_output_stats(&out);
        Some(out)
    }

    fn record_output_stats(&self, out: &[Vec<Complex32>]) {
        let mut stats = self.stats.lock().expect("stats lock poisoned");
        for (k, channel) in out.iter().enumerate() {
            if let Some(first) = channel.first() {
                let p = power(first.re, first.im);
                stats.channels[k].record(p);
                stats.output.record(p);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::packet::{BeamHeader, DATA_VALID};

    fn test_config() -> Config {
        let mut cfg = Config::default();
        cfg.channels.total = 16;
        cfg.channels.usable = 8;
        cfg.channels.foldings = 2;
        cfg.beam.oversampling = 0.0;
        cfg.start_time_sec = None;
        cfg
    }

    fn header(seq: u32, len: u32) -> BeamHeader {
        BeamHeader {
            version: PROTOCOL_VERSION,
            src: 0,
            pol: 0,
            flags: DATA_VALID,
            seq,
            abs_time: AbsTime::from_parts(1000, 0),
            len,
            freq: 0.0,
            sample_rate: 0.0,
        }
    }

    fn packet(seq: u32, len: usize) -> BeamPacket {
        BeamPacket {
            header: header(seq, len as u32),
            samples: vec![Sample8 { i: 1, q: 1 }; len],
        }
    }

    #[test]
    fn idle_beam_drops_packets_without_counting() {
        let (tx, _rx) = crossbeam::channel::unbounded();
        let mut cfg = test_config();
        cfg.start_time_sec = None;
        let beam = Beam::new(&cfg, 1 << 16, tx);
        beam.stop();
        let (err, start) = beam.handle_packet(packet(0, 16));
        assert!(err.is_none());
        assert!(!start);
        assert_eq!(beam.stats_snapshot().net.total, 0);
    }

    #[test]
    fn wrong_source_is_counted_not_ingested() {
        let (tx, _rx) = crossbeam::channel::unbounded();
        let cfg = test_config();
        let beam = Beam::new(&cfg, 1 << 16, tx);
        let mut pkt = packet(0, 16);
        pkt.header.src = 99;
        let (err, _start) = beam.handle_packet(pkt);
        assert!(err.is_none());
        assert_eq!(beam.stats_snapshot().net.wrong, 1);
        assert_eq!(beam.ring.last(), 0);
    }

    #[test]
    fn gap_fill_counts_missed_and_advances_input_seq() {
        let (tx, rx) = crossbeam::channel::unbounded();
        let cfg = test_config();
        let beam = Beam::new(&cfg, 1 << 16, tx);
        beam.handle_packet(packet(0, 16));
        beam.handle_packet(packet(3, 16));
        assert_eq!(beam.stats_snapshot().net.missed, 2);
        assert_eq!(beam.ring.last(), 16 * 4);
        drop(rx);
    }

    #[test]
    fn late_packet_is_counted_and_not_ingested() {
        let (tx, _rx) = crossbeam::channel::unbounded();
        let cfg = test_config();
        let beam = Beam::new(&cfg, 1 << 16, tx);
        beam.handle_packet(packet(0, 16));
        beam.handle_packet(packet(1, 16));
        let before = beam.ring.last();
        beam.handle_packet(packet(0, 16));
        assert_eq!(beam.stats_snapshot().net.late, 1);
        assert_eq!(beam.ring.last(), before);
    }

    #[test]
    fn version_mismatch_during_pending_goes_idle() {
        let (tx, _rx) = crossbeam::channel::unbounded();
        let mut cfg = test_config();
        cfg.start_time_sec = Some(0);
        let beam = Beam::new(&cfg, 1 << 16, tx);
        let mut pkt = packet(0, 16);
        pkt.header.version = PROTOCOL_VERSION + 1;
        let (err, start) = beam.handle_packet(pkt);
        assert!(matches!(err, Some(ChannelizerError::Ipv)));
        assert!(!start);
        assert_eq!(beam.state(), BeamState::Idle);
    }

    #[test]
    fn stap_packet_is_dropped_uncounted_and_does_not_start() {
        let (tx, _rx) = crossbeam::channel::unbounded();
        let mut cfg = test_config();
        cfg.start_time_sec = Some(0);
        let beam = Beam::new(&cfg, 1 << 16, tx);

        let (err, start) = beam.handle_packet(packet(0, 16));
        assert!(matches!(err, Some(ChannelizerError::Stap)));
        assert!(!start);
        assert_eq!(beam.state(), BeamState::Pending);
        assert_eq!(beam.stats_snapshot().net.total, 1);
        assert_eq!(beam.ring.last(), 0);

        let (err, start) = beam.handle_packet(packet(0, 16));
        assert!(err.is_none());
        assert!(start);
        assert_eq!(beam.state(), BeamState::Running);
    }

    #[test]
    fn scheduling_fires_once_threshold_reached() {
        let (tx, rx) = crossbeam::channel::unbounded();
        let cfg = test_config(); // total=16, overlap=0, channel_samples=1024 -> threshold=16*1024
        let beam = Beam::new(&cfg, 1 << 20, tx);
        for seq in 0..1024u32 {
            beam.handle_packet(packet(seq, 16));
        }
        assert!(rx.try_recv().is_ok());
    }
}
