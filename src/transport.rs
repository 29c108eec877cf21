// src/transport.rs
//! UDP transport and clock abstractions consumed by the mDNS engine.
//!
//! The engine never touches a socket directly; it talks to a [`Transport`]
//! so tests can substitute a scripted one. [`MulticastSocket`] is the
//! production implementation.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, warn};

use crate::mdns::MDNS_MULTICAST_ADDR;

/// How long `begin` waits for a usable IPv4 interface to appear.
const NETWORK_READY_WAIT: Duration = Duration::from_secs(5);
const NETWORK_READY_POLL: Duration = Duration::from_millis(100);

/// Buffered datagram transport. A packet is assembled between
/// `begin_packet` and `end_packet`; calling `begin_packet` again before
/// `end_packet` flushes whatever is pending.
pub trait Transport {
    fn begin(&mut self, port: u16) -> io::Result<()>;
    fn begin_packet(&mut self, addr: Ipv4Addr, port: u16) -> io::Result<()>;
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;
    fn end_packet(&mut self) -> io::Result<()>;
    /// Polls for one inbound datagram; returns its length, or 0 when
    /// nothing is pending this tick.
    fn parse_packet(&mut self) -> io::Result<usize>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// Source address of the datagram last returned by `parse_packet`.
    fn remote_ip(&self) -> Ipv4Addr;
    fn remote_port(&self) -> u16;
    /// The interface address advertised in A records.
    fn local_ip(&self) -> Ipv4Addr;
    fn stop(&mut self);
}

/// Monotonic millisecond clock. Wraparound is fine; all consumers compare
/// differences.
pub trait Clock {
    fn millis(&self) -> u32;
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn millis(&self) -> u32 {
        self.origin.elapsed().as_millis() as u32
    }
}

/// The production transport: a nonblocking UDP socket bound to the mDNS
/// port with the multicast group joined on every non-loopback IPv4
/// interface.
pub struct MulticastSocket {
    socket: Option<UdpSocket>,
    local_ip: Ipv4Addr,
    send_buf: Vec<u8>,
    dest: Option<SocketAddr>,
    recv_buf: Vec<u8>,
    recv_pos: usize,
    remote: SocketAddr,
}

impl MulticastSocket {
    pub fn new() -> Self {
        MulticastSocket {
            socket: None,
            local_ip: Ipv4Addr::UNSPECIFIED,
            send_buf: Vec::new(),
            dest: None,
            recv_buf: Vec::new(),
            recv_pos: 0,
            remote: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        }
    }

    /// First non-loopback IPv4 interface address, if any is up yet.
    fn pick_local_ip() -> Option<Ipv4Addr> {
        let ifaces = if_addrs::get_if_addrs().ok()?;
        ifaces.iter().find_map(|iface| match iface.ip() {
            IpAddr::V4(ip) if !ip.is_loopback() => Some(ip),
            _ => None,
        })
    }

    fn socket(&self) -> io::Result<&UdpSocket> {
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket not open"))
    }
}

impl Default for MulticastSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MulticastSocket {
    fn begin(&mut self, port: u16) -> io::Result<()> {
        // The interface may still be coming up right after boot. Poll for a
        // bounded while before giving up.
        let start = Instant::now();
        let local_ip = loop {
            if let Some(ip) = Self::pick_local_ip() {
                break ip;
            }
            if start.elapsed() >= NETWORK_READY_WAIT {
                return Err(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    "no usable IPv4 interface",
                ));
            }
            std::thread::sleep(NETWORK_READY_POLL);
        };

        let address = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        sock.set_reuse_address(true)?;
        #[cfg(unix)]
        sock.set_reuse_port(true)?;
        sock.bind(&address.into())?;
        let socket: UdpSocket = sock.into();

        // Join the group on every IPv4 interface so queries arrive no
        // matter which segment the peer sits on.
        match if_addrs::get_if_addrs() {
            Ok(ifaces) => {
                for iface in ifaces {
                    let IpAddr::V4(ipv4) = iface.ip() else { continue };
                    if ipv4.is_loopback() {
                        continue;
                    }
                    match socket.join_multicast_v4(&MDNS_MULTICAST_ADDR, &ipv4) {
                        Ok(()) => debug!("joined multicast {} on {}", MDNS_MULTICAST_ADDR, ipv4),
                        Err(e) => debug!("failed to join {} on {}: {}", MDNS_MULTICAST_ADDR, ipv4, e),
                    }
                }
            }
            Err(e) => {
                warn!("could not enumerate interfaces: {}", e);
                let _ = socket.join_multicast_v4(&MDNS_MULTICAST_ADDR, &Ipv4Addr::UNSPECIFIED);
            }
        }
        socket.set_nonblocking(true)?;

        self.socket = Some(socket);
        self.local_ip = local_ip;
        Ok(())
    }

    fn begin_packet(&mut self, addr: Ipv4Addr, port: u16) -> io::Result<()> {
        if !self.send_buf.is_empty() {
            self.end_packet()?;
        }
        self.dest = Some(SocketAddr::new(IpAddr::V4(addr), port));
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.send_buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn end_packet(&mut self) -> io::Result<()> {
        let dest = self
            .dest
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no packet destination"))?;
        let socket = self.socket()?;
        let result = socket.send_to(&self.send_buf, dest).map(|_| ());
        self.send_buf.clear();
        result
    }

    fn parse_packet(&mut self) -> io::Result<usize> {
        let socket = self.socket()?;
        let mut buf = [0u8; 4096];
        match socket.recv_from(&mut buf) {
            Ok((size, from)) => {
                self.recv_buf.clear();
                self.recv_buf.extend_from_slice(&buf[..size]);
                self.recv_pos = 0;
                self.remote = from;
                Ok(size)
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.recv_buf[self.recv_pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.recv_pos += n;
        Ok(n)
    }

    fn remote_ip(&self) -> Ipv4Addr {
        match self.remote.ip() {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        }
    }

    fn remote_port(&self) -> u16 {
        self.remote.port()
    }

    fn local_ip(&self) -> Ipv4Addr {
        self.local_ip
    }

    fn stop(&mut self) {
        self.socket = None;
        self.send_buf.clear();
        self.dest = None;
    }
}
