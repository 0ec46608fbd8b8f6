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

//! The receiver: a single dedicated thread that reads the beam multicast
//! stream and hands decoded packets to [`crate::input`]. It performs no
//! semantic validation of its own — that all lives in `Beam::handle_packet`
//! — except the IDLE short-circuit, which exists purely so a stopped beam
//! doesn't pay for parsing packets nobody will read.

use crate::beam::{Beam, BeamState};
use crate::packet::BeamPacket;
use crossbeam::channel::Sender;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info, instrument, warn};

pub fn spawn_receiver(
    socket: UdpSocket,
    beam: Arc<Beam>,
    input_tx: Sender<BeamPacket>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("receiver".to_owned())
        .spawn(move || receiver_loop(socket, beam, input_tx, shutdown))
        .expect("failed to spawn receiver thread")
}

#[instrument(skip(socket, beam, input_tx, shutdown))]
fn receiver_loop(socket: UdpSocket, beam: Arc<Beam>, input_tx: Sender<BeamPacket>, shutdown: Arc<AtomicBool>) {
    let _ = crate::utils::set_realtime_priority();
    info!("receiver started");
    let mut buf = vec![0u8; 65536];

    while !shutdown.load(Ordering::Relaxed) {
        let (len, _from) = match socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::Interrupted =>
            {
                continue;
            }
            Err(e) => {
                error!("receiver socket error, terminating: {e}");
                panic!("receiver socket fatal error: {e}");
            }
        };

        if beam.state() == BeamState::Idle {
            continue;
        }

        let samples = beam.alloc_sample_buffer();
        let packet = match BeamPacket::parse_into(&buf[..len], samples) {
            Ok(packet) => packet,
            Err(samples) => {
                warn!("dropping malformed beam packet ({len} bytes)");
                beam.free_sample_buffer(samples);
                continue;
            }
        };

        // NO_PACKET_VECTOR: the input queue must never be allowed to build
        // unbounded backlog behind a receiver that outpaces Input/Beam.
        if input_tx.try_send(packet).is_err() {
            panic!("input queue full or disconnected; receiver cannot keep up");
        }
    }
    info!("receiver stopped");
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::time::Duration;

    #[test]
    fn idle_beam_discards_without_enqueueing() {
        let cfg = Config::default();
        let (work_tx, _work_rx) = crossbeam::channel::unbounded();
        let beam = Arc::new(Beam::new(&cfg, 1 << 16, work_tx));
        beam.stop();
        assert_eq!(beam.state(), BeamState::Idle);

        let socket = UdpSocket::bind(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)).unwrap();
        socket.set_read_timeout(Some(Duration::from_millis(10))).unwrap();
        let (input_tx, input_rx) = crossbeam::channel::bounded(1);
        let shutdown = Arc::new(AtomicBool::new(true));
        receiver_loop(socket, beam, input_tx, shutdown);
        assert!(input_rx.try_recv().is_err());
    }
}
