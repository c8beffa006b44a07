//! Minimal DHCP server for the access point.
//!
//! Hands each client an address from a small pool on the access point's subnet, with the
//! access point itself as router and DNS server so every lookup lands on the spoofer.

#![allow(clippy::future_not_send, reason = "single-threaded")]

use heapless::Vec;

/// Fixed BOOTP header plus the magic cookie.
pub const DHCP_MIN_LEN: usize = 240;
/// Replies are padded to the classic BOOTP minimum.
pub const DHCP_REPLY_LEN: usize = 300;

const DHCP_MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];
const BOOTREQUEST: u8 = 1;
const BOOTREPLY: u8 = 2;
const HTYPE_ETHERNET: u8 = 1;

const OPTION_PAD: u8 = 0;
const OPTION_SUBNET_MASK: u8 = 1;
const OPTION_ROUTER: u8 = 3;
const OPTION_DNS_SERVER: u8 = 6;
const OPTION_REQUESTED_IP: u8 = 50;
const OPTION_LEASE_TIME: u8 = 51;
const OPTION_MESSAGE_TYPE: u8 = 53;
const OPTION_SERVER_ID: u8 = 54;
const OPTION_END: u8 = 255;

pub type MacAddress = [u8; 6];
pub type Ipv4 = [u8; 4];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageType {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
    Other(u8),
}

impl From<u8> for MessageType {
    fn from(code: u8) -> Self {
        match code {
            1 => Self::Discover,
            2 => Self::Offer,
            3 => Self::Request,
            4 => Self::Decline,
            5 => Self::Ack,
            6 => Self::Nak,
            7 => Self::Release,
            8 => Self::Inform,
            other => Self::Other(other),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(kind: MessageType) -> Self {
        match kind {
            MessageType::Discover => 1,
            MessageType::Offer => 2,
            MessageType::Request => 3,
            MessageType::Decline => 4,
            MessageType::Ack => 5,
            MessageType::Nak => 6,
            MessageType::Release => 7,
            MessageType::Inform => 8,
            MessageType::Other(code) => code,
        }
    }
}

/// The fields of a client message this server acts on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DhcpRequest {
    pub kind: MessageType,
    pub transaction_id: u32,
    pub flags: u16,
    pub client_mac: MacAddress,
    pub client_ip: Option<Ipv4>,
    pub requested_ip: Option<Ipv4>,
    pub server_id: Option<Ipv4>,
}

/// Parse a BOOTREQUEST from an Ethernet client. Anything else yields `None`.
#[must_use]
pub fn parse_request(frame: &[u8]) -> Option<DhcpRequest> {
    if frame.len() < DHCP_MIN_LEN
        || frame.first() != Some(&BOOTREQUEST)
        || frame.get(1..3) != Some(&[HTYPE_ETHERNET, 6][..])
        || frame.get(236..240) != Some(&DHCP_MAGIC_COOKIE[..])
    {
        return None;
    }

    let transaction_id = u32::from_be_bytes(frame.get(4..8)?.try_into().ok()?);
    let flags = u16::from_be_bytes(frame.get(10..12)?.try_into().ok()?);
    let ciaddr: Ipv4 = frame.get(12..16)?.try_into().ok()?;
    let client_mac: MacAddress = frame.get(28..34)?.try_into().ok()?;

    let mut kind = None;
    let mut requested_ip = None;
    let mut server_id = None;
    for (code, data) in options(frame.get(DHCP_MIN_LEN..)?) {
        match (code, data.len()) {
            (OPTION_MESSAGE_TYPE, 1) => kind = data.first().copied().map(MessageType::from),
            (OPTION_REQUESTED_IP, 4) => requested_ip = data.try_into().ok(),
            (OPTION_SERVER_ID, 4) => server_id = data.try_into().ok(),
            _ => {}
        }
    }

    Some(DhcpRequest {
        kind: kind?,
        transaction_id,
        flags,
        client_mac,
        client_ip: (ciaddr != [0; 4]).then_some(ciaddr),
        requested_ip,
        server_id,
    })
}

// Walks `code, len, data` triples until END or the data runs out.
fn options(mut bytes: &[u8]) -> impl Iterator<Item = (u8, &[u8])> {
    core::iter::from_fn(move || {
        loop {
            let (&code, rest) = bytes.split_first()?;
            match code {
                OPTION_PAD => bytes = rest,
                OPTION_END => return None,
                _ => {
                    let (&len, rest) = rest.split_first()?;
                    let (data, rest) = rest.split_at_checked(usize::from(len))?;
                    bytes = rest;
                    return Some((code, data));
                }
            }
        }
    })
}

/// Highest host octet handed out; `.255` is the subnet broadcast.
const LAST_HOST: u8 = 254;

#[derive(Clone, Copy, Debug)]
struct Lease {
    mac: MacAddress,
    host: u8,
    last_seen: u32,
}

/// Address assignments, sticky per MAC.
///
/// Addresses are `network.first_host ..= network.first_host + N - 1`, cut short at `.254` so
/// the pool never reaches the broadcast address or wraps into `.0`. When every address is
/// taken, the lease least recently touched is handed to the newcomer.
#[derive(Debug)]
pub struct LeasePool<const N: usize> {
    network: [u8; 3],
    first_host: u8,
    size: usize,
    leases: Vec<Lease, N>,
    clock: u32,
}

impl<const N: usize> LeasePool<N> {
    /// Pool on the `/24` of `server_ip`, starting `offset` hosts above it.
    #[must_use]
    pub fn new(server_ip: Ipv4, offset: u8) -> Self {
        let [a, b, c, host] = server_ip;
        let first_host = host.saturating_add(offset);
        let room = LAST_HOST
            .checked_sub(first_host)
            .map_or(0, |span| usize::from(span).saturating_add(1));
        let size = room.min(N);
        Self {
            network: [a, b, c],
            first_host,
            size,
            leases: Vec::new(),
            clock: 0,
        }
    }

    fn address(&self, host: u8) -> Ipv4 {
        let [a, b, c] = self.network;
        [a, b, c, host]
    }

    fn host_in_pool(&self, ip: Ipv4) -> Option<u8> {
        let [a, b, c, host] = ip;
        let index = usize::from(host.checked_sub(self.first_host)?);
        ([a, b, c] == self.network && index < self.size).then_some(host)
    }

    /// Address for `mac`, preferring the one it already holds, then `requested` if free.
    pub fn assign(&mut self, mac: MacAddress, requested: Option<Ipv4>) -> Option<Ipv4> {
        self.clock = self.clock.wrapping_add(1);
        let now = self.clock;

        if let Some(lease) = self.leases.iter_mut().find(|lease| lease.mac == mac) {
            lease.last_seen = now;
            let host = lease.host;
            return Some(self.address(host));
        }

        let host = requested
            .and_then(|ip| self.host_in_pool(ip))
            .filter(|&host| self.is_free(host))
            .or_else(|| self.first_free_host());

        match host {
            Some(host) => {
                self.leases
                    .push(Lease {
                        mac,
                        host,
                        last_seen: now,
                    })
                    .ok()?;
                Some(self.address(host))
            }
            None => {
                let oldest = self.leases.iter_mut().min_by_key(|lease| lease.last_seen)?;
                oldest.mac = mac;
                oldest.last_seen = now;
                let host = oldest.host;
                Some(self.address(host))
            }
        }
    }

    /// The address `mac` holds, if any.
    #[must_use]
    pub fn lease_of(&self, mac: MacAddress) -> Option<Ipv4> {
        self.leases
            .iter()
            .find(|lease| lease.mac == mac)
            .map(|lease| self.address(lease.host))
    }

    pub fn release(&mut self, mac: MacAddress) {
        self.leases.retain(|lease| lease.mac != mac);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    fn is_free(&self, host: u8) -> bool {
        self.leases.iter().all(|lease| lease.host != host)
    }

    fn first_free_host(&self) -> Option<u8> {
        (0..self.size)
            .filter_map(|index| u8::try_from(index).ok())
            .filter_map(|index| self.first_host.checked_add(index))
            .find(|&host| self.is_free(host))
    }
}

/// What the server answers to `request`, and with which address. `None` means stay silent.
pub fn answer<const N: usize>(
    request: &DhcpRequest,
    server_ip: Ipv4,
    pool: &mut LeasePool<N>,
) -> Option<(MessageType, Ipv4)> {
    match request.kind {
        MessageType::Discover => {
            let offered = pool.assign(request.client_mac, request.requested_ip)?;
            Some((MessageType::Offer, offered))
        }
        MessageType::Request => {
            // Addressed to another server: that server's offer won.
            if request.server_id.is_some_and(|id| id != server_ip) {
                return None;
            }
            let wanted = request.requested_ip.or(request.client_ip);
            let assigned = pool.assign(request.client_mac, wanted)?;
            if wanted.is_none_or(|ip| ip == assigned) {
                Some((MessageType::Ack, assigned))
            } else {
                Some((MessageType::Nak, [0; 4]))
            }
        }
        MessageType::Release | MessageType::Decline => {
            pool.release(request.client_mac);
            None
        }
        _ => None,
    }
}

/// Build an OFFER, ACK or NAK into `out`. Returns the reply length.
#[must_use]
pub fn build_reply(
    out: &mut [u8],
    request: &DhcpRequest,
    kind: MessageType,
    your_ip: Ipv4,
    server_ip: Ipv4,
    lease_seconds: u32,
) -> Option<usize> {
    let reply = out.get_mut(..DHCP_REPLY_LEN)?;
    reply.fill(0);
    reply[0] = BOOTREPLY;
    reply[1] = HTYPE_ETHERNET;
    reply[2] = 6;
    reply[4..8].copy_from_slice(&request.transaction_id.to_be_bytes());
    reply[10..12].copy_from_slice(&request.flags.to_be_bytes());
    reply[16..20].copy_from_slice(&your_ip);
    reply[20..24].copy_from_slice(&server_ip);
    reply[28..34].copy_from_slice(&request.client_mac);
    reply[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);

    let mut writer = OptionWriter {
        buffer: reply,
        pos: DHCP_MIN_LEN,
    };
    writer.put(OPTION_MESSAGE_TYPE, &[u8::from(kind)])?;
    writer.put(OPTION_SERVER_ID, &server_ip)?;
    if kind != MessageType::Nak {
        writer.put(OPTION_LEASE_TIME, &lease_seconds.to_be_bytes())?;
        writer.put(OPTION_SUBNET_MASK, &[255, 255, 255, 0])?;
        writer.put(OPTION_ROUTER, &server_ip)?;
        writer.put(OPTION_DNS_SERVER, &server_ip)?;
    }
    writer.end()?;
    Some(DHCP_REPLY_LEN)
}

struct OptionWriter<'a> {
    buffer: &'a mut [u8],
    pos: usize,
}

impl OptionWriter<'_> {
    fn put(&mut self, code: u8, data: &[u8]) -> Option<()> {
        let len = u8::try_from(data.len()).ok()?;
        let end = self.pos.checked_add(data.len())?.checked_add(2)?;
        let slot = self.buffer.get_mut(self.pos..end)?;
        slot[0] = code;
        slot[1] = len;
        slot[2..].copy_from_slice(data);
        self.pos = end;
        Some(())
    }

    fn end(&mut self) -> Option<()> {
        *self.buffer.get_mut(self.pos)? = OPTION_END;
        self.pos = self.pos.checked_add(1)?;
        Some(())
    }
}

#[cfg(feature = "wifi")]
pub use task::dhcp_server_task;

#[cfg(feature = "wifi")]
mod task {
    use defmt::{debug, error, info, warn};
    use embassy_net::{
        IpAddress, IpEndpoint, Ipv4Address, Stack,
        udp::{self, UdpSocket},
    };

    use super::{LeasePool, answer, build_reply, parse_request};
    use crate::shared_constants::{
        DHCP_CLIENT_PORT, DHCP_LEASE_SECONDS, DHCP_POOL_OFFSET, DHCP_POOL_SIZE, DHCP_SERVER_PORT,
    };

    const DATAGRAM_LEN: usize = 768;

    /// DHCP server task - leases addresses on the access point's subnet.
    #[embassy_executor::task]
    pub async fn dhcp_server_task(stack: &'static Stack<'static>, server_ip: Ipv4Address) -> ! {
        let mut rx_meta = [udp::PacketMetadata::EMPTY; 4];
        let mut rx_buffer = [0u8; DATAGRAM_LEN];
        let mut tx_meta = [udp::PacketMetadata::EMPTY; 4];
        let mut tx_buffer = [0u8; DATAGRAM_LEN];
        let mut socket = UdpSocket::new(
            *stack,
            &mut rx_meta,
            &mut rx_buffer,
            &mut tx_meta,
            &mut tx_buffer,
        );

        if let Err(err) = socket.bind(DHCP_SERVER_PORT) {
            error!("DHCP server failed to bind: {:?}", err);
            core::panic!("Unable to bind DHCP port");
        }

        let server = server_ip.octets();
        let [a, b, c, _] = server;
        let broadcast = IpEndpoint::new(
            IpAddress::Ipv4(Ipv4Address::new(a, b, c, 255)),
            DHCP_CLIENT_PORT,
        );
        let mut pool = LeasePool::<DHCP_POOL_SIZE>::new(server, DHCP_POOL_OFFSET);
        info!("DHCP server listening on {}", server_ip);

        let mut frame = [0u8; DATAGRAM_LEN];
        let mut response = [0u8; DATAGRAM_LEN];

        loop {
            let len = match socket.recv_from(&mut frame).await {
                Ok((len, _remote)) => len,
                Err(err) => {
                    warn!("DHCP recv error: {:?}", err);
                    continue;
                }
            };

            let Some(request) = frame.get(..len).and_then(parse_request) else {
                continue;
            };
            debug!(
                "DHCP {:?} from {:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
                u8::from(request.kind),
                request.client_mac[0],
                request.client_mac[1],
                request.client_mac[2],
                request.client_mac[3],
                request.client_mac[4],
                request.client_mac[5]
            );

            let Some((kind, your_ip)) = answer(&request, server, &mut pool) else {
                continue;
            };
            let Some(reply_len) = build_reply(
                &mut response,
                &request,
                kind,
                your_ip,
                server,
                DHCP_LEASE_SECONDS,
            ) else {
                warn!("Failed to build DHCP reply");
                continue;
            };

            let Some(datagram) = response.get(..reply_len) else {
                continue;
            };
            if let Err(err) = socket.send_to(datagram, broadcast).await {
                warn!("DHCP send error: {:?}", err);
            } else {
                let [w, x, y, z] = your_ip;
                debug!("DHCP {} -> {}.{}.{}.{}", u8::from(kind), w, x, y, z);
            }
        }
    }
}
