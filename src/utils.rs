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

use crate::error::ChannelizerError;
use pnet::datalink::{self, NetworkInterface};
use std::net::IpAddr;
use thread_priority::{RealtimeThreadSchedulePolicy, ThreadPriority, ThreadSchedulePolicy};
use tracing::warn;

/// Finds the local NIC bound to `ip`, used to validate `interfaceIp` at
/// startup before handing it to `socket2`'s multicast join.
pub fn find_network_interface(ip: IpAddr) -> Result<NetworkInterface, ChannelizerError> {
    for iface in datalink::interfaces() {
        for ipn in &iface.ips {
            if ipn.ip() == ip {
                return Ok(iface);
            }
        }
    }
    Err(ChannelizerError::InvalidConfig(format!("no network interface bound to {ip}")))
}

/// Raises the calling thread to the highest realtime FIFO priority available.
/// Used by the receiver and worker threads, which sit on the hot path and
/// must not be starved by the rest of the process. Best-effort: lacking
/// `CAP_SYS_NICE` is logged, not fatal.
pub fn set_realtime_priority() -> bool {
    match thread_priority::set_thread_priority_and_policy(
        thread_priority::thread_native_id(),
        ThreadPriority::Max,
        ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
    ) {
        Ok(()) => true,
        Err(e) => {
            warn!("could not set realtime thread priority: {e:?}");
            false
        }
    }
}
