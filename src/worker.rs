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

//! Worker threads: each owns one [`DfbKernel`] and turns scheduled DFB jobs
//! into output channel-packet vectors.

use crate::beam::{Beam, PacketInfo};
use crate::packet::{ChannelHeader, ChannelPacket, Sample16, DATA_VALID};
use crate::pool::Pool;
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, instrument};

/// Output-vector storage pool size: large enough to cover every worker
/// having a vector in flight (built, queued for reorder, or mid-send) at
/// once, analogous to the original's `chanPktList`.
pub const OUTPUT_VECTOR_POOL_SIZE: usize = 1024;

/// `msgNumber = packetInfo.seq` travels with the vector so the transmitter
/// can reassemble strict output order across however many workers raced to
/// produce it.
pub struct OutputVector {
    pub seq: u64,
    pub packets: Vec<ChannelPacket>,
}

pub fn spawn_worker(
    id: usize,
    beam: Arc<Beam>,
    work_rx: Receiver<PacketInfo>,
    transmit_tx: Sender<OutputVector>,
    shutdown: Arc<AtomicBool>,
    output_pool: Arc<Pool<Vec<ChannelPacket>>>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("worker-{id}"))
        .spawn(move || worker_loop(id, beam, work_rx, transmit_tx, shutdown, output_pool))
        .expect("failed to spawn worker thread")
}

#[instrument(skip(beam, work_rx, transmit_tx, shutdown, output_pool))]
fn worker_loop(
    id: usize,
    beam: Arc<Beam>,
    work_rx: Receiver<PacketInfo>,
    transmit_tx: Sender<OutputVector>,
    shutdown: Arc<AtomicBool>,
    output_pool: Arc<Pool<Vec<ChannelPacket>>>,
) {
    let _ = crate::utils::set_realtime_priority();
    let mut kernel = beam.make_kernel();
    info!("worker {id} started");

    loop {
        let job = match work_rx.recv_timeout(Duration::from_millis(250)) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let Some(channels) = beam.dfb_process(job.sample, &mut kernel) else {
            continue;
        };
        let vector = build_output_vector(&beam, &job, channels, &output_pool);
        if transmit_tx.send(vector).is_err() {
            break;
        }
    }
    info!("worker {id} stopped");
}

fn build_output_vector(
    beam: &Beam,
    job: &PacketInfo,
    channels: Vec<Vec<num_complex::Complex32>>,
    output_pool: &Pool<Vec<ChannelPacket>>,
) -> OutputVector {
    let meta = beam.channel_meta();
    let half = meta.usable_channels / 2;

    let mut packets = output_pool
        .alloc()
        .expect("NO_PACKET_VECTOR: output vector pool exhausted");
    packets.clear();
    packets.extend(channels.into_iter().enumerate().map(|(i, bins)| {
        let freq = meta.center_freq + (i as f64 - half as f64) * meta.chan_spacing;
        let header = ChannelHeader {
            chan: i as u16,
            src: meta.channel_src as u16,
            seq: job.seq as u32,
            abs_time: job.abs_time,
            freq,
            sample_rate: meta.sample_rate,
            usable_fraction: meta.usable_fraction,
            flags: DATA_VALID,
        };
        let samples = bins.into_iter().map(Sample16::from_f32).collect();
        ChannelPacket { header, samples }
    }));

    OutputVector { seq: job.seq, packets }
}
