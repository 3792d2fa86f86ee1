//! rtnetlink socket and message decoding for the interface watcher.

use super::{KernelEvent, KernelLinks};
use crate::error::WatcherError;
use conn_types::{IpPrefix, LinkAddress, RouteInfo};
use netlink_packet_core::{NLM_F_DUMP, NLM_F_REQUEST, NetlinkHeader, NetlinkMessage, NetlinkPayload};
use netlink_packet_route::address::{AddressAttribute, AddressMessage, AddressScope};
use netlink_packet_route::link::{LinkAttribute, LinkFlags, LinkMessage, State};
use netlink_packet_route::route::{RouteAddress, RouteAttribute, RouteMessage, RouteProtocol, RouteType};
use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};
use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};
use std::net::IpAddr;
use tokio::io::unix::AsyncFd;
use tracing::{debug, instrument, trace, warn};

const RTNLGRP_LINK: u32 = 1;
const RTNLGRP_IPV4_IFADDR: u32 = 5;
const RTNLGRP_IPV4_ROUTE: u32 = 7;
const RTNLGRP_IPV6_IFADDR: u32 = 9;
const RTNLGRP_IPV6_ROUTE: u32 = 11;

const RT_TABLE_MAIN: u32 = 254;

const RECV_BUFFER_SIZE: usize = 65536;

fn group_mask(groups: &[u32]) -> u32 {
    groups.iter().fold(0, |mask, group| mask | (1 << (group - 1)))
}

/// Converts one rtnetlink message into a watcher event. Messages the
/// watcher does not follow yield `None`.
pub fn kernel_event(msg: &RouteNetlinkMessage) -> Option<KernelEvent> {
    match msg {
        RouteNetlinkMessage::NewLink(link) => {
            let name = link.attributes.iter().find_map(|attr| match attr {
                LinkAttribute::IfName(name) => Some(name.clone()),
                _ => None,
            })?;
            Some(KernelEvent::NewLink {
                index: link.header.index,
                name,
                up: link_is_up(link),
            })
        }
        RouteNetlinkMessage::DelLink(link) => Some(KernelEvent::DelLink {
            index: link.header.index,
        }),
        RouteNetlinkMessage::NewAddress(msg) => {
            let (index, address) = interface_address(msg)?;
            Some(KernelEvent::NewAddress { index, address })
        }
        RouteNetlinkMessage::DelAddress(msg) => {
            let (index, address) = interface_address(msg)?;
            Some(KernelEvent::DelAddress { index, address })
        }
        RouteNetlinkMessage::NewRoute(msg) => {
            let (index, route) = interface_route(msg)?;
            Some(KernelEvent::NewRoute { index, route })
        }
        RouteNetlinkMessage::DelRoute(msg) => {
            let (index, route) = interface_route(msg)?;
            Some(KernelEvent::DelRoute { index, route })
        }
        _ => None,
    }
}

/// Administratively up and operational. The `Unknown` operstate counts as
/// up, as reported by point-to-point and tunnel devices.
fn link_is_up(link: &LinkMessage) -> bool {
    let operational = link.attributes.iter().find_map(|attr| match attr {
        LinkAttribute::OperState(state) => Some(matches!(state, State::Up | State::Unknown)),
        _ => None,
    });
    link.header.flags.contains(LinkFlags::Up) && operational.unwrap_or(true)
}

/// Link-local and host-scoped addresses are skipped. For IPv4 the local
/// address wins over the peer address of point-to-point links.
fn interface_address(msg: &AddressMessage) -> Option<(u32, LinkAddress)> {
    if matches!(msg.header.scope, AddressScope::Link | AddressScope::Host) {
        return None;
    }
    let mut local = None;
    let mut address = None;
    for attr in &msg.attributes {
        match attr {
            AddressAttribute::Local(ip) => local = Some(*ip),
            AddressAttribute::Address(ip) => address = Some(*ip),
            _ => {}
        }
    }
    let ip = local.or(address)?;
    Some((msg.header.index, LinkAddress::new(ip, msg.header.prefix_len)))
}

/// Unicast routes of the main table with a single output interface.
/// Routes the kernel derives from addresses are skipped.
fn interface_route(msg: &RouteMessage) -> Option<(u32, RouteInfo)> {
    let header = &msg.header;
    if matches!(header.protocol, RouteProtocol::Kernel) || !matches!(header.kind, RouteType::Unicast) {
        return None;
    }
    let mut table = u32::from(header.table);
    let mut destination = None;
    let mut gateway = None;
    let mut oif = None;
    for attr in &msg.attributes {
        match attr {
            RouteAttribute::Table(t) => table = *t,
            RouteAttribute::Destination(addr) => destination = route_address(addr),
            RouteAttribute::Gateway(addr) => gateway = route_address(addr),
            RouteAttribute::Oif(index) => oif = Some(*index),
            _ => {}
        }
    }
    if table != RT_TABLE_MAIN {
        return None;
    }
    let index = oif?;
    let destination = match destination {
        Some(addr) => IpPrefix::new(addr, header.destination_prefix_length).ok()?,
        None => match header.address_family {
            AddressFamily::Inet => IpPrefix::default_v4(),
            AddressFamily::Inet6 => IpPrefix::default_v6(),
            _ => return None,
        },
    };
    Some((index, RouteInfo::new(destination, gateway)))
}

fn route_address(addr: &RouteAddress) -> Option<IpAddr> {
    match addr {
        RouteAddress::Inet(v4) => Some(IpAddr::V4(*v4)),
        RouteAddress::Inet6(v6) => Some(IpAddr::V6(*v6)),
        _ => None,
    }
}

/// Splits one datagram into netlink messages.
pub fn decode_batch(buf: &[u8]) -> Result<Vec<NetlinkMessage<RouteNetlinkMessage>>, WatcherError> {
    let mut messages = Vec::new();
    let mut offset = 0;
    while offset < buf.len() {
        let msg = NetlinkMessage::<RouteNetlinkMessage>::deserialize(&buf[offset..])
            .map_err(|e| WatcherError::Decode(e.to_string()))?;
        let length = msg.header.length as usize;
        if length == 0 {
            break;
        }
        messages.push(msg);
        // Netlink messages are 4-byte aligned
        offset += (length + 3) & !3;
    }
    Ok(messages)
}

/// Folds a batch into `kernel`. Returns true when the batch ends a dump.
fn apply_batch(kernel: &mut KernelLinks, messages: Vec<NetlinkMessage<RouteNetlinkMessage>>) -> bool {
    let mut done = false;
    for msg in messages {
        match msg.payload {
            NetlinkPayload::InnerMessage(inner) => {
                if let Some(event) = kernel_event(&inner) {
                    trace!(?event, "Kernel event");
                    kernel.apply(event);
                }
            }
            NetlinkPayload::Done(_) => done = true,
            NetlinkPayload::Error(e) => warn!(error = ?e, "Netlink error reply"),
            _ => {}
        }
    }
    done
}

/// rtnetlink socket bound to the link, address and route groups.
pub struct RouteSocket {
    inner: AsyncFd<Socket>,
    buffer: Vec<u8>,
}

impl RouteSocket {
    #[instrument]
    pub fn open() -> Result<Self, WatcherError> {
        let mut socket = Socket::new(NETLINK_ROUTE).map_err(|e| WatcherError::socket("socket", e))?;
        let groups = group_mask(&[
            RTNLGRP_LINK,
            RTNLGRP_IPV4_IFADDR,
            RTNLGRP_IPV4_ROUTE,
            RTNLGRP_IPV6_IFADDR,
            RTNLGRP_IPV6_ROUTE,
        ]);
        socket
            .bind(&SocketAddr::new(0, groups))
            .map_err(|e| WatcherError::socket("bind", e))?;
        socket
            .set_non_blocking(true)
            .map_err(|e| WatcherError::socket("set non-blocking", e))?;
        let inner = AsyncFd::new(socket).map_err(|e| WatcherError::socket("register", e))?;
        debug!(groups, "rtnetlink socket bound");
        Ok(Self {
            inner,
            buffer: Vec::with_capacity(RECV_BUFFER_SIZE),
        })
    }

    /// Dumps links, then addresses, then routes into `kernel`. Multicast
    /// events arriving meanwhile are folded in as well.
    pub async fn dump(&mut self, kernel: &mut KernelLinks) -> Result<(), WatcherError> {
        let requests = [
            RouteNetlinkMessage::GetLink(LinkMessage::default()),
            RouteNetlinkMessage::GetAddress(AddressMessage::default()),
            RouteNetlinkMessage::GetRoute(RouteMessage::default()),
        ];
        for request in requests {
            self.send_dump_request(request)?;
            while !apply_batch(kernel, self.recv().await?) {}
        }
        Ok(())
    }

    /// Waits for the next datagram and returns the events it carries.
    pub async fn recv_events(&mut self) -> Result<Vec<KernelEvent>, WatcherError> {
        let events = self
            .recv()
            .await?
            .into_iter()
            .filter_map(|msg| match msg.payload {
                NetlinkPayload::InnerMessage(inner) => kernel_event(&inner),
                _ => None,
            })
            .collect();
        Ok(events)
    }

    fn send_dump_request(&self, request: RouteNetlinkMessage) -> Result<(), WatcherError> {
        let mut header = NetlinkHeader::default();
        header.flags = NLM_F_REQUEST | NLM_F_DUMP;
        let mut packet = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(request));
        packet.finalize();

        let mut buf = vec![0u8; packet.buffer_len()];
        packet.serialize(&mut buf);
        self.inner
            .get_ref()
            .send(&buf, 0)
            .map_err(|e| WatcherError::socket("send dump request", e))?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<NetlinkMessage<RouteNetlinkMessage>>, WatcherError> {
        loop {
            let mut guard = self
                .inner
                .readable()
                .await
                .map_err(|e| WatcherError::socket("poll", e))?;
            let buffer = &mut self.buffer;
            match guard.try_io(|socket| {
                buffer.clear();
                socket.get_ref().recv(buffer, 0)
            }) {
                Ok(Ok(_)) => return decode_batch(&self.buffer),
                Ok(Err(e)) => return Err(WatcherError::socket("recv", e)),
                Err(_would_block) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn link_message(index: u32, name: &str, flags: LinkFlags, state: State) -> LinkMessage {
        let mut link = LinkMessage::default();
        link.header.index = index;
        link.header.flags = flags;
        link.attributes = vec![LinkAttribute::IfName(name.into()), LinkAttribute::OperState(state)];
        link
    }

    fn address_message(index: u32, ip: IpAddr, prefix_len: u8, scope: AddressScope) -> AddressMessage {
        let mut msg = AddressMessage::default();
        msg.header.family = if ip.is_ipv4() { AddressFamily::Inet } else { AddressFamily::Inet6 };
        msg.header.index = index;
        msg.header.prefix_len = prefix_len;
        msg.header.scope = scope;
        msg.attributes = vec![AddressAttribute::Address(ip)];
        msg
    }

    fn route_message(protocol: RouteProtocol, attributes: Vec<RouteAttribute>) -> RouteMessage {
        let mut msg = RouteMessage::default();
        msg.header.address_family = AddressFamily::Inet;
        msg.header.table = 254;
        msg.header.protocol = protocol;
        msg.header.kind = RouteType::Unicast;
        msg.attributes = attributes;
        msg
    }

    #[test]
    fn test_group_mask() {
        assert_eq!(group_mask(&[RTNLGRP_LINK]), 0x1);
        assert_eq!(
            group_mask(&[RTNLGRP_LINK, RTNLGRP_IPV4_IFADDR, RTNLGRP_IPV4_ROUTE, RTNLGRP_IPV6_IFADDR, RTNLGRP_IPV6_ROUTE]),
            0x1 | 0x10 | 0x40 | 0x100 | 0x400
        );
    }

    #[test]
    fn test_link_events() {
        let up = link_message(2, "eth0", LinkFlags::Up | LinkFlags::LowerUp, State::Up);
        assert_eq!(
            kernel_event(&RouteNetlinkMessage::NewLink(up)),
            Some(KernelEvent::NewLink { index: 2, name: "eth0".into(), up: true })
        );

        // No carrier
        let no_carrier = link_message(2, "eth0", LinkFlags::Up, State::Down);
        assert_eq!(
            kernel_event(&RouteNetlinkMessage::NewLink(no_carrier)),
            Some(KernelEvent::NewLink { index: 2, name: "eth0".into(), up: false })
        );

        let tunnel = link_message(5, "tun0", LinkFlags::Up, State::Unknown);
        assert!(matches!(
            kernel_event(&RouteNetlinkMessage::NewLink(tunnel)),
            Some(KernelEvent::NewLink { up: true, .. })
        ));

        let admin_down = link_message(2, "eth0", LinkFlags::empty(), State::Unknown);
        assert!(matches!(
            kernel_event(&RouteNetlinkMessage::NewLink(admin_down)),
            Some(KernelEvent::NewLink { up: false, .. })
        ));

        let gone = link_message(2, "eth0", LinkFlags::empty(), State::Down);
        assert_eq!(
            kernel_event(&RouteNetlinkMessage::DelLink(gone)),
            Some(KernelEvent::DelLink { index: 2 })
        );
    }

    #[test]
    fn test_address_events_skip_link_scope() {
        let global = address_message(2, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)), 24, AddressScope::Universe);
        assert_eq!(
            kernel_event(&RouteNetlinkMessage::NewAddress(global)),
            Some(KernelEvent::NewAddress { index: 2, address: "192.168.1.10/24".parse().unwrap() })
        );

        let link_local = address_message(2, IpAddr::V6("fe80::1".parse::<Ipv6Addr>().unwrap()), 64, AddressScope::Link);
        assert_eq!(kernel_event(&RouteNetlinkMessage::NewAddress(link_local)), None);

        let loopback = address_message(1, IpAddr::V4(Ipv4Addr::LOCALHOST), 8, AddressScope::Host);
        assert_eq!(kernel_event(&RouteNetlinkMessage::DelAddress(loopback)), None);
    }

    #[test]
    fn test_point_to_point_prefers_local_address() {
        let mut ptp = address_message(7, IpAddr::V4(Ipv4Addr::new(10, 64, 0, 1)), 32, AddressScope::Universe);
        ptp.attributes.push(AddressAttribute::Local(IpAddr::V4(Ipv4Addr::new(10, 64, 0, 2))));
        assert_eq!(
            kernel_event(&RouteNetlinkMessage::NewAddress(ptp)),
            Some(KernelEvent::NewAddress { index: 7, address: "10.64.0.2/32".parse().unwrap() })
        );
    }

    #[test]
    fn test_route_events() {
        let default = route_message(
            RouteProtocol::Boot,
            vec![
                RouteAttribute::Gateway(RouteAddress::Inet(Ipv4Addr::new(192, 168, 1, 1))),
                RouteAttribute::Oif(2),
            ],
        );
        assert_eq!(
            kernel_event(&RouteNetlinkMessage::NewRoute(default)),
            Some(KernelEvent::NewRoute {
                index: 2,
                route: RouteInfo::default_via("192.168.1.1".parse().unwrap()),
            })
        );

        let mut subnet = route_message(
            RouteProtocol::Static,
            vec![
                RouteAttribute::Destination(RouteAddress::Inet(Ipv4Addr::new(10, 8, 0, 0))),
                RouteAttribute::Gateway(RouteAddress::Inet(Ipv4Addr::new(192, 168, 1, 254))),
                RouteAttribute::Oif(2),
            ],
        );
        subnet.header.destination_prefix_length = 16;
        assert_eq!(
            kernel_event(&RouteNetlinkMessage::DelRoute(subnet)),
            Some(KernelEvent::DelRoute {
                index: 2,
                route: RouteInfo::new("10.8.0.0/16".parse().unwrap(), Some("192.168.1.254".parse().unwrap())),
            })
        );
    }

    #[test]
    fn test_route_events_skip_kernel_and_foreign_tables() {
        let connected = route_message(
            RouteProtocol::Kernel,
            vec![
                RouteAttribute::Destination(RouteAddress::Inet(Ipv4Addr::new(192, 168, 1, 0))),
                RouteAttribute::Oif(2),
            ],
        );
        assert_eq!(kernel_event(&RouteNetlinkMessage::NewRoute(connected)), None);

        let mut secondary = route_message(RouteProtocol::Boot, vec![RouteAttribute::Oif(2)]);
        secondary.attributes.push(RouteAttribute::Table(1002));
        assert_eq!(kernel_event(&RouteNetlinkMessage::NewRoute(secondary)), None);

        // Multipath routes carry no single output interface
        let multipath = route_message(RouteProtocol::Boot, Vec::new());
        assert_eq!(kernel_event(&RouteNetlinkMessage::NewRoute(multipath)), None);
    }

    #[test]
    fn test_decode_batch_and_dump_completion() {
        let mut buf = Vec::new();
        for payload in [
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewLink(link_message(
                2,
                "eth0",
                LinkFlags::Up | LinkFlags::LowerUp,
                State::Up,
            ))),
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewAddress(address_message(
                2,
                IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)),
                24,
                AddressScope::Universe,
            ))),
        ] {
            let mut packet = NetlinkMessage::new(NetlinkHeader::default(), payload);
            packet.finalize();
            let start = buf.len();
            buf.resize(start + packet.buffer_len(), 0);
            packet.serialize(&mut buf[start..]);
        }

        let messages = decode_batch(&buf).unwrap();
        assert_eq!(messages.len(), 2);

        let mut kernel = KernelLinks::default();
        assert!(!apply_batch(&mut kernel, messages));
        let eth0 = kernel.by_name("eth0").unwrap();
        assert!(eth0.up);
        assert_eq!(eth0.addresses, vec!["192.168.1.10/24".parse().unwrap()]);
    }
}
