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

//! Input: the single thread that drains the receiver's queue and drives
//! [`Beam::handle_packet`]. Kept separate from the receiver so a slow beam
//! (busy flushing a full ring, say) never stalls the socket read loop.

use crate::beam::Beam;
use crate::error::ChannelizerError;
use crate::packet::BeamPacket;
use crossbeam::channel::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{info, instrument, warn};

/// Sent upward once per beam start, so the control layer can answer a
/// "has this beam started yet" status query without polling `Beam::state`.
pub enum InputEvent {
    Started,
}

pub fn spawn_input(
    beam: Arc<Beam>,
    input_rx: Receiver<BeamPacket>,
    event_tx: crossbeam::channel::Sender<InputEvent>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("input".to_owned())
        .spawn(move || input_loop(beam, input_rx, event_tx))
        .expect("failed to spawn input thread")
}

#[instrument(skip(beam, input_rx, event_tx))]
fn input_loop(beam: Arc<Beam>, input_rx: Receiver<BeamPacket>, event_tx: crossbeam::channel::Sender<InputEvent>) {
    info!("input started");

    while let Ok(pkt) = input_rx.recv() {
        let (error, started) = beam.handle_packet(pkt);

        match error {
            Some(ChannelizerError::Stap) => {
                warn!("beam start time already passed (STAP); packet dropped, waiting for the next one");
            }
            Some(ChannelizerError::Ipv) => {
                warn!("protocol version mismatch (IPV); beam went IDLE");
            }
            Some(other) => warn!("beam reported error: {other}"),
            None => {}
        }

        if started {
            let _ = event_tx.send(InputEvent::Started);
        }
    }

    info!("input stopped");
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;
    use crate::packet::{BeamHeader, Sample8, DATA_VALID};
    use crate::time::AbsTime;

    fn packet(seq: u32, len: usize) -> BeamPacket {
        BeamPacket {
            header: BeamHeader {
                version: crate::beam::PROTOCOL_VERSION,
                src: 0,
                pol: 0,
                flags: DATA_VALID,
                seq,
                abs_time: AbsTime::from_parts(1000, 0),
                len: len as u32,
                freq: 0.0,
                sample_rate: 0.0,
            },
            samples: vec![Sample8 { i: 1, q: 1 }; len],
        }
    }

    #[test]
    fn first_packet_emits_started_event() {
        let mut cfg = Config::default();
        cfg.start_time_sec = None;
        let (work_tx, _work_rx) = crossbeam::channel::unbounded();
        let beam = Arc::new(Beam::new(&cfg, 1 << 16, work_tx));
        let (input_tx, input_rx) = crossbeam::channel::unbounded();
        let (event_tx, event_rx) = crossbeam::channel::unbounded();

        input_tx.send(packet(0, 16)).unwrap();
        drop(input_tx);
        input_loop(beam, input_rx, event_tx);

        assert!(matches!(event_rx.try_recv(), Ok(InputEvent::Started)));
    }
}
