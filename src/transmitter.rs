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

//! The transmitter: reassembles worker output into strict sequence order
//! before sending it on, since several workers can finish out of order.

use crate::beam::{Beam, BeamState};
use crate::packet::ChannelPacket;
use crate::pool::Pool;
use crate::socket::channel_addr;
use crate::worker::OutputVector;
use crossbeam::channel::Receiver;
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, UdpSocket};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{info, instrument, warn};

/// Wire-buffer scratch pool size: generous relative to one worker's worth of
/// usable channels, since a slow send can leave several packets' buffers
/// checked out at once.
const WIRE_BUFFER_POOL_SIZE: usize = 1024;

pub fn spawn_transmitter(
    socket: UdpSocket,
    output_addr: Ipv4Addr,
    output_port: u16,
    beam: Arc<Beam>,
    transmit_rx: Receiver<OutputVector>,
    output_pool: Arc<Pool<Vec<ChannelPacket>>>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("transmitter".to_owned())
        .spawn(move || transmitter_loop(socket, output_addr, output_port, beam, transmit_rx, output_pool))
        .expect("failed to spawn transmitter thread")
}

#[instrument(skip(socket, beam, transmit_rx, output_pool))]
fn transmitter_loop(
    socket: UdpSocket,
    output_addr: Ipv4Addr,
    output_port: u16,
    beam: Arc<Beam>,
    transmit_rx: Receiver<OutputVector>,
    output_pool: Arc<Pool<Vec<ChannelPacket>>>,
) {
    let _ = crate::utils::set_realtime_priority();
    info!("transmitter started");

    let wire_buffers: Pool<Vec<u8>> = Pool::with_capacity(WIRE_BUFFER_POOL_SIZE, Vec::new);
    let mut cur_seq: u64 = 0;
    let mut reorder: BTreeMap<u64, OutputVector> = BTreeMap::new();

    while let Ok(vector) = transmit_rx.recv() {
        if beam.state() != BeamState::Running {
            for vector in std::mem::take(&mut reorder).into_values() {
                output_pool.free(vector.packets);
            }
            cur_seq = 0;
            continue;
        }

        reorder.insert(vector.seq, vector);

        while let Some(vector) = reorder.remove(&cur_seq) {
            send_vector(&socket, output_addr, output_port, &vector, &wire_buffers);
            output_pool.free(vector.packets);
            cur_seq += 1;
        }
    }

    info!("transmitter stopped");
}

fn send_vector(
    socket: &UdpSocket,
    output_addr: Ipv4Addr,
    output_port: u16,
    vector: &OutputVector,
    wire_buffers: &Pool<Vec<u8>>,
) {
    for packet in &vector.packets {
        let addr = channel_addr(output_addr, output_port, packet.header.chan);
        let mut buf = wire_buffers
            .alloc()
            .expect("NO_PACKET_VECTOR: wire buffer pool exhausted");
        buf.clear();
        packet.encode_into(&mut buf);
        if let Err(e) = socket.send_to(&buf, addr) {
            warn!("failed to send channel {} packet: {e}", packet.header.chan);
        }
        wire_buffers.free(buf);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;
    use crate::packet::{ChannelHeader, ChannelPacket, DATA_VALID};
    use crate::time::AbsTime;
    use std::net::SocketAddr;

    fn vector(seq: u64, chan: u16) -> OutputVector {
        OutputVector {
            seq,
            packets: vec![ChannelPacket {
                header: ChannelHeader {
                    chan,
                    src: 1,
                    seq: seq as u32,
                    abs_time: AbsTime::ZERO,
                    freq: 0.0,
                    sample_rate: 0.0,
                    usable_fraction: 1.0,
                    flags: DATA_VALID,
                },
                samples: vec![],
            }],
        }
    }

    #[test]
    fn out_of_order_vectors_are_reassembled_in_sequence() {
        let cfg = Config::default();
        let (work_tx, _work_rx) = crossbeam::channel::unbounded();
        let beam = Arc::new(Beam::new(&cfg, 1 << 16, work_tx));
        beam.start(None, None);
        beam.handle_packet(crate::packet::BeamPacket {
            header: crate::packet::BeamHeader {
                version: crate::beam::PROTOCOL_VERSION,
                src: cfg.beam.src as u16,
                pol: cfg.beam.pol,
                flags: DATA_VALID,
                seq: 0,
                abs_time: AbsTime::from_parts(1, 0),
                len: 0,
                freq: 0.0,
                sample_rate: 0.0,
            },
            samples: vec![],
        });
        assert_eq!(beam.state(), BeamState::Running);

        let socket = UdpSocket::bind(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)).unwrap();
        let (tx, rx) = crossbeam::channel::unbounded();
        tx.send(vector(1, 0)).unwrap();
        tx.send(vector(0, 0)).unwrap();
        drop(tx);

        let output_pool = Arc::new(Pool::with_capacity(4, Vec::new));
        transmitter_loop(socket, Ipv4Addr::new(227, 1, 1, 1), 51000, beam, rx, output_pool);
    }

    #[test]
    fn non_running_beam_drops_backlog_and_resets_sequence() {
        let cfg = Config::default();
        let (work_tx, _work_rx) = crossbeam::channel::unbounded();
        let beam = Arc::new(Beam::new(&cfg, 1 << 16, work_tx));
        beam.stop();

        let socket = UdpSocket::bind(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)).unwrap();
        let (tx, rx) = crossbeam::channel::unbounded();
        tx.send(vector(5, 0)).unwrap();
        drop(tx);

        let output_pool = Arc::new(Pool::with_capacity(4, Vec::new));
        transmitter_loop(socket, Ipv4Addr::new(227, 1, 1, 1), 51000, beam, rx, output_pool);
    }
}
