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

//! A single-beam digital channelizer: splits one wideband beam multicast
//! stream into per-channel multicast output streams via a polyphase filter
//! bank and FFT. See [`beam`] for the packet state machine at the heart of
//! it, [`dfb`] for the filter/FFT kernel, and [`run_pipeline`] for how the
//! pieces are wired together into threads.

pub mod beam;
pub mod config;
pub mod control;
pub mod dfb;
pub mod error;
pub mod input;
pub mod packet;
pub mod pool;
pub mod receiver;
pub mod ring;
pub mod socket;
pub mod stats;
pub mod time;
pub mod transmitter;
pub mod utils;
pub mod worker;

use crate::beam::Beam;
use crate::config::Config;
use crate::error::ChannelizerResult;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::info;

/// Ring sizing: the design requires the ring hold at least a few scheduling
/// thresholds worth of samples so backpressure from a full pending list has
/// room to drain before `ingest` ever hits `NO_BUFFER_AVAIL`.
const RING_THRESHOLD_MULTIPLE: usize = 64;

/// Constructs every hot-path component and the threads that run them, wires
/// the control-plane HTTP API on top, and blocks until shutdown is
/// requested. Leaf-first construction, reverse-order teardown: the
/// transmitter socket and workers are built before the input/receiver
/// threads that feed them, and shutdown flips `shutdown` before the join.
pub async fn run_pipeline(subsys: &SubsystemHandle, config: Config) -> ChannelizerResult<()> {
    config.validate()?;

    let channel_samples = 1024usize;
    let threshold = config.channels.total as usize * channel_samples;
    let ring_capacity = threshold * RING_THRESHOLD_MULTIPLE;

    let (work_tx, work_rx) = crossbeam::channel::unbounded();
    let beam = Arc::new(Beam::new(&config, ring_capacity, work_tx));

    let interface_ip = match config.interface_ip {
        std::net::IpAddr::V4(v4) => v4,
        std::net::IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
    };

    let input_socket = crate::socket::create_input_socket(config.input.addr, config.input.port, interface_ip)?;
    let output_socket = crate::socket::create_output_socket(interface_ip)?;

    let shutdown = Arc::new(AtomicBool::new(false));

    let output_pool = Arc::new(crate::pool::Pool::with_capacity(
        crate::worker::OUTPUT_VECTOR_POOL_SIZE,
        Vec::new,
    ));

    let (transmit_tx, transmit_rx) = crossbeam::channel::unbounded();
    let mut workers = Vec::new();
    for id in 0..config.workers as usize {
        workers.push(crate::worker::spawn_worker(
            id,
            beam.clone(),
            work_rx.clone(),
            transmit_tx.clone(),
            shutdown.clone(),
            output_pool.clone(),
        ));
    }
    drop(transmit_tx);

    let transmitter = crate::transmitter::spawn_transmitter(
        output_socket,
        config.output.addr,
        config.output.port,
        beam.clone(),
        transmit_rx,
        output_pool,
    );

    let (input_tx, input_rx) = crossbeam::channel::bounded(4096);
    let (event_tx, _event_rx) = crossbeam::channel::unbounded();
    let input = crate::input::spawn_input(beam.clone(), input_rx, event_tx);

    let receiver = crate::receiver::spawn_receiver(input_socket, beam.clone(), input_tx, shutdown.clone());

    let api = crate::control::ChannelizerApi::spawn(beam.clone());
    crate::control::start_webserver(subsys, config.webserver.clone(), api);

    subsys.on_shutdown_requested().await;
    info!("shutdown requested, stopping pipeline");

    beam.stop();
    shutdown.store(true, Ordering::Relaxed);

    let _ = receiver.join();
    let _ = input.join();
    for w in workers {
        let _ = w.join();
    }
    let _ = transmitter.join();

    Ok(())
}
