// src/mdns/responder.rs
//! The Bonjour engine.
//!
//! Owns the service table, the resolver slots and the send path. The
//! engine is fully cooperative: it advances only inside [`Bonjour::run`],
//! draining at most one inbound datagram per tick, then driving query
//! resend/timeout and the periodic re-announcement burst. User callbacks
//! fire only after a datagram has been completely parsed and must not
//! re-enter the engine.

use std::net::Ipv4Addr;

use tracing::{debug, info, warn};

use crate::transport::{Clock, MulticastSocket, SystemClock, Transport};
use crate::{
    BonjourError, DiscoveredService, NameResolvedCallback, Result, ServiceFoundCallback,
    ServiceProtocol,
};

use super::dns_reader::DnsReader;
use super::name;
use super::parser::{self, Header, QueryIntent};
use super::records::{self, PacketShape};
use super::registry::ServiceTable;
use super::resolver::{Resolver, NAME_SLOT, SERVICE_SLOT};
use super::{
    ANNOUNCE_INTERVAL_MS, MAX_SERVICE_RECORDS, MDNS_DEFAULT_NAME, MDNS_MULTICAST_ADDR, MDNS_PORT,
    MDNS_TLD,
};

pub struct Bonjour<T: Transport, C: Clock = SystemClock> {
    transport: T,
    clock: C,
    /// Fully qualified host identity; always `Some` while running.
    host_name: Option<String>,
    services: ServiceTable,
    resolver: Resolver,
    name_resolved_cb: Option<NameResolvedCallback>,
    service_found_cb: Option<ServiceFoundCallback>,
    last_announce: u32,
    running: bool,
}

impl Bonjour<MulticastSocket, SystemClock> {
    /// An engine over the default multicast socket and system clock.
    pub fn new() -> Self {
        Self::with_clock(MulticastSocket::new(), SystemClock::new())
    }
}

impl Default for Bonjour<MulticastSocket, SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport, C: Clock> Bonjour<T, C> {
    pub fn with_clock(transport: T, clock: C) -> Self {
        Bonjour {
            transport,
            clock,
            host_name: None,
            services: ServiceTable::new(),
            resolver: Resolver::new(),
            name_resolved_cb: None,
            service_found_cb: None,
            last_announce: 0,
            running: false,
        }
    }

    /// Opens the socket under the default host name.
    pub fn begin(&mut self) -> Result<()> {
        self.begin_with_name(MDNS_DEFAULT_NAME)
    }

    pub fn begin_with_name(&mut self, host_name: &str) -> Result<()> {
        self.set_name(host_name)?;
        self.transport
            .begin(MDNS_PORT)
            .map_err(|e| BonjourError::Socket(e.to_string()))?;
        self.running = true;
        self.last_announce = self.clock.millis();
        info!(host = host_name, "mDNS responder listening on port {MDNS_PORT}");
        Ok(())
    }

    /// Replaces the host identity. Peers learn of the change on the next
    /// query or announcement.
    pub fn set_name(&mut self, host_name: &str) -> Result<()> {
        if host_name.is_empty() {
            return Err(BonjourError::InvalidArgument("host name is empty"));
        }
        if !name::labels_fit(host_name) {
            return Err(BonjourError::InvalidArgument("label longer than 63 bytes"));
        }
        self.host_name = Some(format!("{host_name}{MDNS_TLD}"));
        Ok(())
    }

    /// Registers a service and announces it right away. The service type
    /// is derived from the rightmost label of `service_name` plus the
    /// protocol suffix.
    pub fn add_service(
        &mut self,
        service_name: &str,
        port: u16,
        proto: ServiceProtocol,
        txt: Option<&[u8]>,
    ) -> Result<()> {
        let idx = self.services.insert(service_name, port, proto, txt)?;
        if let Some(rec) = self.services.get(idx) {
            info!(service = %rec.service_name, port, "service registered");
        }
        self.announce_service(idx);
        Ok(())
    }

    /// Removes the first service matching port and protocol (and name,
    /// when given), emitting its goodbye first.
    pub fn remove_service(&mut self, service_name: Option<&str>, port: u16, proto: ServiceProtocol) {
        if let Some(idx) = self.services.find(service_name, port, proto) {
            self.release_service(idx);
        }
    }

    pub fn remove_all_services(&mut self) {
        for idx in 0..MAX_SERVICE_RECORDS {
            self.release_service(idx);
        }
    }

    pub fn set_name_resolved_callback(&mut self, cb: NameResolvedCallback) {
        self.name_resolved_cb = Some(cb);
    }

    pub fn set_service_found_callback(&mut self, cb: ServiceFoundCallback) {
        self.service_found_cb = Some(cb);
    }

    /// Starts resolving `<host_name>.local` to an IPv4 address. Any prior
    /// resolution is cancelled. `timeout_ms` of 0 keeps trying forever.
    pub fn resolve_name(&mut self, host_name: &str, timeout_ms: u32) -> Result<()> {
        if self.name_resolved_cb.is_none() {
            return Err(BonjourError::NoCallback);
        }
        if host_name.is_empty() {
            return Err(BonjourError::InvalidArgument("host name is empty"));
        }
        if !name::labels_fit(host_name) {
            return Err(BonjourError::InvalidArgument("label longer than 63 bytes"));
        }
        self.cancel_resolve_name();
        let now = self.clock.millis();
        self.resolver
            .begin(NAME_SLOT, format!("{host_name}{MDNS_TLD}"), timeout_ms, now);
        self.send_query(NAME_SLOT);
        Ok(())
    }

    pub fn cancel_resolve_name(&mut self) {
        self.resolver.cancel(NAME_SLOT);
    }

    pub fn is_resolving_name(&self) -> bool {
        self.resolver.is_active(NAME_SLOT)
    }

    /// Starts enumerating instances of a service type. `service` may be a
    /// bare label ("_ipp") or already carry the protocol ("_ipp._tcp");
    /// either way the query goes out for `_ipp._tcp.local`.
    pub fn start_service_discovery(
        &mut self,
        service: &str,
        proto: ServiceProtocol,
        timeout_ms: u32,
    ) -> Result<()> {
        if self.service_found_cb.is_none() {
            return Err(BonjourError::NoCallback);
        }
        if service.is_empty() {
            return Err(BonjourError::InvalidArgument("service type is empty"));
        }
        if !name::labels_fit(service) {
            return Err(BonjourError::InvalidArgument("label longer than 63 bytes"));
        }
        self.stop_service_discovery();
        let qname = if service.ends_with("._tcp") || service.ends_with("._udp") {
            format!("{service}{MDNS_TLD}")
        } else {
            format!("{service}{}", proto.postfix())
        };
        let now = self.clock.millis();
        self.resolver.service_proto = proto;
        self.resolver.begin(SERVICE_SLOT, qname, timeout_ms, now);
        self.send_query(SERVICE_SLOT);
        Ok(())
    }

    pub fn stop_service_discovery(&mut self) {
        self.resolver.cancel(SERVICE_SLOT);
    }

    pub fn is_discovering_service(&self) -> bool {
        self.resolver.is_active(SERVICE_SLOT)
    }

    /// One cooperative tick: service at most one inbound datagram, drive
    /// resend/timeout of the outstanding lookups, re-announce when due.
    pub fn run(&mut self) {
        if !self.running {
            return;
        }
        self.process_inbound();
        self.drive_resolver();
        self.drive_announcements();
    }

    /// Sends a goodbye for every registered service and closes the socket.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.remove_all_services();
        self.transport.stop();
        self.running = false;
        info!("mDNS responder stopped");
    }

    fn process_inbound(&mut self) {
        let len = match self.transport.parse_packet() {
            Ok(0) => return,
            Ok(len) => len,
            Err(e) => {
                debug!("inbound poll failed: {e}");
                return;
            }
        };
        let mut data = vec![0u8; len];
        let n = match self.transport.read(&mut data) {
            Ok(n) => n,
            Err(e) => {
                debug!("datagram read failed: {e}");
                return;
            }
        };
        data.truncate(n);
        if self.transport.remote_port() != MDNS_PORT {
            return;
        }

        let mut reader = DnsReader::new(data);
        let Ok(header) = Header::parse(&mut reader) else {
            return;
        };
        if header.opcode() != 0 {
            return;
        }

        if !header.is_response() {
            let Some(host) = self.host_name.as_deref() else {
                return;
            };
            let intent = parser::scan_questions(&mut reader, &header, host, &self.services);
            self.respond(intent);
        } else if self.resolver.is_active(NAME_SLOT) || self.resolver.is_active(SERVICE_SLOT) {
            let digest = parser::scan_answers(
                &mut reader,
                &header,
                self.resolver.get(NAME_SLOT).map(|q| q.name.as_str()),
                self.resolver.get(SERVICE_SLOT).map(|q| q.name.as_str()),
            );
            self.deliver(digest);
        }
    }

    /// Answers one parsed query: host A record first, then every service
    /// flagged directly or through the DNS-SD cascade, the IPv6 denial
    /// last. Replies go to the querying peer.
    fn respond(&mut self, intent: QueryIntent) {
        let peer = self.transport.remote_ip();
        let mut serve = intent.services_asked;
        if intent.meta_asked {
            // An enumeration request: every advertised service replies.
            for (i, _) in self.services.iter() {
                serve[i] = true;
            }
        }

        let Some(host) = self.host_name.as_deref() else {
            return;
        };
        if intent.host_asked {
            debug!(peer = %peer, "answering host query");
            if let Err(e) = Self::emit(
                &mut self.transport,
                host,
                &PacketShape::MyIpAnswer,
                intent.xid,
                peer,
            ) {
                warn!("failed to answer host query: {e}");
            }
        }
        for (idx, rec) in self.services.iter() {
            if !serve[idx] {
                continue;
            }
            debug!(service = %rec.service_name, peer = %peer, "answering service query");
            if let Err(e) = Self::emit(
                &mut self.transport,
                host,
                &PacketShape::ServiceRecord(rec),
                intent.xid,
                peer,
            ) {
                warn!("failed to answer service query: {e}");
            }
        }
        if intent.wants_ipv6 {
            if let Err(e) = Self::emit(
                &mut self.transport,
                host,
                &PacketShape::NoIpv6,
                intent.xid,
                peer,
            ) {
                warn!("failed to send AAAA denial: {e}");
            }
        }
    }

    /// Fires the user callbacks for whatever one response datagram
    /// yielded. A resolved name clears its slot; discovery keeps running
    /// until timeout or cancellation.
    fn deliver(&mut self, digest: parser::AnswerDigest) {
        if let Some(ip) = digest.resolved_ip {
            if let Some(query) = self.resolver.take(NAME_SLOT) {
                let short = name::strip_tld(&query.name);
                debug!(name = short, "name resolved");
                if let Some(cb) = self.name_resolved_cb.as_mut() {
                    cb(short, Some(Ipv4Addr::from(ip)));
                }
            }
        }

        if digest.instances.is_empty() || !self.resolver.is_active(SERVICE_SLOT) {
            return;
        }
        let proto = self.resolver.service_proto;
        let service = self
            .resolver
            .get(SERVICE_SLOT)
            .map(|q| name::strip_tld(&q.name).to_owned());
        if let (Some(service), Some(cb)) = (service, self.service_found_cb.as_mut()) {
            for inst in &digest.instances {
                debug!(instance = %inst.name, "service instance discovered");
                cb(DiscoveredService {
                    service: &service,
                    proto,
                    instance: Some(&inst.name),
                    ip: inst.ip.map(Ipv4Addr::from),
                    port: inst.port,
                    txt: inst.txt.as_deref(),
                });
            }
        }
    }

    fn drive_resolver(&mut self) {
        let now = self.clock.millis();
        for slot in [NAME_SLOT, SERVICE_SLOT] {
            if !self.resolver.is_active(slot) {
                continue;
            }
            if self.resolver.resend_due(slot, now) {
                self.send_query(slot);
            }
            if self.resolver.timed_out(slot, now) {
                let Some(query) = self.resolver.take(slot) else {
                    continue;
                };
                let short = name::strip_tld(&query.name);
                debug!(name = short, "lookup timed out");
                if slot == NAME_SLOT {
                    if let Some(cb) = self.name_resolved_cb.as_mut() {
                        cb(short, None);
                    }
                } else if let Some(cb) = self.service_found_cb.as_mut() {
                    cb(DiscoveredService {
                        service: short,
                        proto: self.resolver.service_proto,
                        instance: None,
                        ip: None,
                        port: 0,
                        txt: None,
                    });
                }
            }
        }
    }

    fn drive_announcements(&mut self) {
        let now = self.clock.millis();
        if now.wrapping_sub(self.last_announce) <= ANNOUNCE_INTERVAL_MS {
            return;
        }
        let Some(host) = self.host_name.as_deref() else {
            return;
        };
        for (_, rec) in self.services.iter() {
            if let Err(e) = Self::emit(
                &mut self.transport,
                host,
                &PacketShape::ServiceRecord(rec),
                0,
                MDNS_MULTICAST_ADDR,
            ) {
                warn!(service = %rec.service_name, "re-announcement failed: {e}");
            }
        }
        self.last_announce = now;
    }

    fn announce_service(&mut self, idx: usize) {
        let Some(host) = self.host_name.as_deref() else {
            return;
        };
        if let Some(rec) = self.services.get(idx) {
            if let Err(e) = Self::emit(
                &mut self.transport,
                host,
                &PacketShape::ServiceRecord(rec),
                0,
                MDNS_MULTICAST_ADDR,
            ) {
                warn!(service = %rec.service_name, "announcement failed: {e}");
            }
        }
    }

    /// Goodbye, then free. The record must leave the table before the
    /// next announcement burst could repeat it.
    fn release_service(&mut self, idx: usize) {
        let Some(rec) = self.services.take(idx) else {
            return;
        };
        let host = self.host_name.as_deref().unwrap_or(MDNS_DEFAULT_NAME);
        if let Err(e) = Self::emit(
            &mut self.transport,
            host,
            &PacketShape::ServiceRecordRelease(&rec),
            0,
            MDNS_MULTICAST_ADDR,
        ) {
            warn!(service = %rec.service_name, "goodbye failed: {e}");
        }
        info!(service = %rec.service_name, "service released");
    }

    fn send_query(&mut self, slot: usize) {
        let Some(query) = self.resolver.get(slot) else {
            return;
        };
        let shape = if slot == NAME_SLOT {
            PacketShape::NameQuery(&query.name)
        } else {
            PacketShape::ServiceQuery(&query.name)
        };
        let host = self.host_name.as_deref().unwrap_or(MDNS_DEFAULT_NAME);
        if let Err(e) = Self::emit(&mut self.transport, host, &shape, 0, MDNS_MULTICAST_ADDR) {
            warn!("query send failed: {e}");
        }
        let now = self.clock.millis();
        self.resolver.mark_sent(slot, now);
    }

    /// Builds one packet and hands it to the transport inside a single
    /// begin/end pair, so no partially written packet is ever flushed.
    fn emit(
        transport: &mut T,
        host: &str,
        shape: &PacketShape<'_>,
        xid: u16,
        dest: Ipv4Addr,
    ) -> std::io::Result<()> {
        let ip = transport.local_ip();
        let packet = records::build_packet(shape, xid, host, ip)?;
        transport.begin_packet(dest, MDNS_PORT)?;
        transport.write(&packet)?;
        transport.end_packet()
    }
}

impl<T: Transport, C: Clock> Drop for Bonjour<T, C> {
    fn drop(&mut self) {
        self.stop();
    }
}
