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

use crate::error::ChannelizerResult;
use socket2::{Domain, Protocol as SockProto, SockAddr, Socket, Type};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket},
    time::Duration,
};
use tracing::{info, instrument};

/// Opens the beam-input receive socket: joins the multicast group when the
/// configured address is multicast, otherwise binds directly (used by tests
/// and unicast replay setups). A short read timeout lets the receiver loop
/// observe shutdown and state changes instead of blocking forever.
#[instrument]
pub fn create_input_socket(
    group: Ipv4Addr,
    port: u16,
    local_ip: Ipv4Addr,
) -> ChannelizerResult<UdpSocket> {
    info!(
        "opening beam input socket {}{}:{} on interface {}",
        if group.is_multicast() {
            "multicast "
        } else {
            "unicast "
        },
        group,
        port,
        local_ip
    );

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(SockProto::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_read_timeout(Some(Duration::from_millis(250)))?;
    socket.set_recv_buffer_size(16 * 1024 * 1024)?;

    if group.is_multicast() {
        socket.join_multicast_v4(&group, &local_ip)?;
        socket.bind(&SockAddr::from(SocketAddr::new(IpAddr::V4(group), port)))?;
    } else {
        socket.bind(&SockAddr::from(SocketAddr::new(IpAddr::V4(local_ip), port)))?;
    }
    Ok(socket.into())
}

/// Opens the single UDP socket the transmitter sends all per-channel output
/// packets from; destination varies per send call, see [`channel_addr`].
#[instrument]
pub fn create_output_socket(local_ip: Ipv4Addr) -> ChannelizerResult<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(SockProto::UDP))?;
    socket.set_send_buffer_size(16 * 1024 * 1024)?;
    socket.bind(&SockAddr::from(SocketAddr::new(IpAddr::V4(local_ip), 0)))?;
    Ok(socket.into())
}

/// `base_addr + channel`, computed in host byte order then restored, matching
/// the per-channel multicast addressing scheme in the design.
pub fn channel_addr(base_addr: Ipv4Addr, base_port: u16, channel: u16) -> SocketAddr {
    let base = u32::from(base_addr);
    let addr = Ipv4Addr::from(base.wrapping_add(channel as u32));
    SocketAddr::new(IpAddr::V4(addr), base_port + channel)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn channel_addr_increments_host_order() {
        let base = Ipv4Addr::new(227, 1, 1, 1);
        let addr = channel_addr(base, 51000, 5);
        assert_eq!(addr, SocketAddr::new(IpAddr::V4(Ipv4Addr::new(227, 1, 1, 6)), 51005));
    }

    #[test]
    fn channel_addr_bijective_over_range() {
        let base = Ipv4Addr::new(227, 1, 1, 1);
        let mut seen = std::collections::HashSet::new();
        for c in 0..230u16 {
            let a = channel_addr(base, 51000, c);
            assert!(seen.insert(a));
        }
    }
}
