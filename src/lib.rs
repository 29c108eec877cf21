// src/lib.rs
//! A self-contained multicast DNS ("Bonjour") responder and query client.
//!
//! The engine binds `224.0.0.251:5353`, answers queries for the host name
//! and a small table of advertised DNS-SD services (PTR/SRV/TXT plus an A
//! record), and can resolve a peer host name or enumerate instances of a
//! service type on the local link. Everything is driven cooperatively:
//! nothing happens between calls to [`Bonjour::run`].

use std::net::Ipv4Addr;

use thiserror::Error;

pub mod mdns;
pub mod transport;

pub use mdns::responder::Bonjour;
pub use transport::{Clock, MulticastSocket, SystemClock, Transport};

#[derive(Error, Debug)]
pub enum BonjourError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("service table is full")]
    TableFull,
    #[error("socket error: {0}")]
    Socket(String),
    #[error("no callback registered for this query kind")]
    NoCallback,
}

pub type Result<T> = std::result::Result<T, BonjourError>;

/// Transport layer of an advertised or discovered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceProtocol {
    Tcp,
    Udp,
}

impl ServiceProtocol {
    /// Suffix appended to a service label to form the full type name.
    pub(crate) fn postfix(self) -> &'static str {
        match self {
            ServiceProtocol::Tcp => "._tcp.local",
            ServiceProtocol::Udp => "._udp.local",
        }
    }
}

/// Invoked when a name resolution finishes. The address is `None` when the
/// lookup timed out.
pub type NameResolvedCallback = Box<dyn FnMut(&str, Option<Ipv4Addr>)>;

/// Invoked once per service instance discovered, or once with an empty
/// [`DiscoveredService::instance`] when the discovery timed out.
pub type ServiceFoundCallback = Box<dyn FnMut(DiscoveredService<'_>)>;

/// One DNS-SD enumeration result, as aggregated from a single datagram.
#[derive(Debug)]
pub struct DiscoveredService<'a> {
    /// The queried service type, without the `.local` suffix.
    pub service: &'a str,
    pub proto: ServiceProtocol,
    /// `None` only when the discovery timed out.
    pub instance: Option<&'a str>,
    /// Host address from the correlated A record, when one was seen.
    pub ip: Option<Ipv4Addr>,
    /// Port from the SRV record, 0 when none was seen.
    pub port: u16,
    /// Raw TXT RDATA, length-prefixed key/value blobs verbatim.
    pub txt: Option<&'a [u8]>,
}
