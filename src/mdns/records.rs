//! Outbound packet shapes.
//!
//! Every datagram the engine emits is one of five fixed shapes, assembled
//! whole in a [`DnsWriter`] and handed to the transport between one
//! `begin_packet`/`end_packet` pair:
//!
//! * `MyIpAnswer` - a lone A record for the host identity;
//! * `ServiceRecord` - SRV + TXT + meta-PTR + self-PTR answers with the A
//!   record as additional, the full DNS-SD advertisement of one service;
//! * `ServiceRecordRelease` - the self-PTR with TTL 0 ("goodbye");
//! * `NameQuery`/`ServiceQuery` - a single A or PTR question;
//! * `NoIpv6` - an NXDOMAIN-flavored reply to an AAAA question, carrying
//!   the A record as additional in case the peer settles for IPv4.

use std::net::Ipv4Addr;

use super::dns_writer::DnsWriter;
use super::name::write_name;
use super::registry::ServiceRecord;
use super::{DNS_SD_SERVICE, MDNS_RESPONSE_TTL};

pub const TYPE_A: u16 = 0x0001;
pub const TYPE_PTR: u16 = 0x000C;
pub const TYPE_TXT: u16 = 0x0010;
pub const TYPE_SRV: u16 = 0x0021;
pub const TYPE_AAAA: u16 = 0x001C;

pub const CLASS_IN: u16 = 0x0001;
/// High bit of the CLASS field: peers must flush cached records for this
/// (name, type, class). Set on every record we are authoritative for.
pub const CLASS_IN_FLUSH: u16 = 0x8001;

const FLAG_RESPONSE: u16 = 0x8000;
const FLAG_AUTHORITATIVE: u16 = 0x0400;
const RCODE_NAME_ERROR: u16 = 0x0003;

pub(crate) enum PacketShape<'a> {
    MyIpAnswer,
    ServiceRecord(&'a ServiceRecord),
    ServiceRecordRelease(&'a ServiceRecord),
    NameQuery(&'a str),
    ServiceQuery(&'a str),
    NoIpv6,
}

/// Builds the full datagram for one shape. `xid` echoes the triggering
/// query and is 0 on everything unsolicited. `host` is the fully
/// qualified identity ("myspark.local"); `ip` the address it resolves to.
pub(crate) fn build_packet(
    shape: &PacketShape<'_>,
    xid: u16,
    host: &str,
    ip: Ipv4Addr,
) -> std::io::Result<Vec<u8>> {
    let mut w = DnsWriter::with_capacity(128);
    match shape {
        PacketShape::MyIpAnswer => {
            header(&mut w, xid, FLAG_RESPONSE | FLAG_AUTHORITATIVE, 0, 1, 0, 0)?;
            write_a_record(&mut w, host, ip)?;
        }
        PacketShape::ServiceRecord(rec) => {
            header(&mut w, xid, FLAG_RESPONSE | FLAG_AUTHORITATIVE, 0, 4, 0, 1)?;

            // SRV: location of this instance on the host.
            write_instance_name(&mut w, rec)?;
            w.write_u16(TYPE_SRV)?;
            w.write_u16(CLASS_IN_FLUSH)?;
            w.write_u32(MDNS_RESPONSE_TTL)?;
            w.write_u16(8 + host.len() as u16)?;
            w.write_u16(0)?; // priority
            w.write_u16(0)?; // weight
            w.write_u16(rec.port)?;
            write_name(&mut w, host, true)?;

            // TXT: payload verbatim, or the mandatory single empty string.
            write_instance_name(&mut w, rec)?;
            w.write_u16(TYPE_TXT)?;
            w.write_u16(CLASS_IN_FLUSH)?;
            w.write_u32(MDNS_RESPONSE_TTL)?;
            match &rec.txt {
                Some(txt) => {
                    w.write_u16(txt.len() as u16)?;
                    w.write_bytes(txt)?;
                }
                None => {
                    w.write_u16(1)?;
                    w.write_u8(0)?;
                }
            }

            // Meta PTR: makes the type enumerable via the DNS-SD catalog.
            write_name(&mut w, DNS_SD_SERVICE, true)?;
            w.write_u16(TYPE_PTR)?;
            w.write_u16(CLASS_IN)?;
            w.write_u32(MDNS_RESPONSE_TTL)?;
            w.write_u16(rec.service_name.len() as u16 + 2)?;
            write_name(&mut w, &rec.service_name, true)?;

            // Self PTR: type name -> instance name.
            write_ptr_record(&mut w, rec, MDNS_RESPONSE_TTL)?;

            // Additional: our address, saving the peer a follow-up query.
            write_a_record(&mut w, host, ip)?;
        }
        PacketShape::ServiceRecordRelease(rec) => {
            header(&mut w, xid, FLAG_RESPONSE | FLAG_AUTHORITATIVE, 0, 1, 0, 0)?;
            write_ptr_record(&mut w, rec, 0)?;
        }
        PacketShape::NameQuery(qname) | PacketShape::ServiceQuery(qname) => {
            header(&mut w, xid, 0, 1, 0, 0, 0)?;
            write_name(&mut w, qname, true)?;
            let qtype = match shape {
                PacketShape::NameQuery(_) => TYPE_A,
                _ => TYPE_PTR,
            };
            w.write_u16(qtype)?;
            w.write_u16(CLASS_IN)?;
        }
        PacketShape::NoIpv6 => {
            // No AAAA record exists here; answer "name error" but attach
            // the A record in case the peer settles for IPv4.
            header(
                &mut w,
                xid,
                FLAG_RESPONSE | FLAG_AUTHORITATIVE | RCODE_NAME_ERROR,
                1,
                0,
                0,
                1,
            )?;
            write_name(&mut w, host, true)?;
            w.write_u16(TYPE_AAAA)?;
            w.write_u16(CLASS_IN)?;
            write_a_record(&mut w, host, ip)?;
        }
    }
    Ok(w.into_inner())
}

fn header(
    w: &mut DnsWriter,
    xid: u16,
    flags: u16,
    qd: u16,
    an: u16,
    ns: u16,
    ar: u16,
) -> std::io::Result<()> {
    w.write_u16(xid)?;
    w.write_u16(flags)?;
    w.write_u16(qd)?;
    w.write_u16(an)?;
    w.write_u16(ns)?;
    w.write_u16(ar)
}

/// The host's A record: name, cache-flush class, TTL, 4-byte address.
fn write_a_record(w: &mut DnsWriter, host: &str, ip: Ipv4Addr) -> std::io::Result<()> {
    write_name(w, host, true)?;
    w.write_u16(TYPE_A)?;
    w.write_u16(CLASS_IN_FLUSH)?;
    w.write_u32(MDNS_RESPONSE_TTL)?;
    w.write_u16(4)?;
    w.write_bytes(&ip.octets())
}

/// Full instance name: the registered labels followed by the protocol
/// suffix, e.g. `Living Room._ipp` + `_tcp.local`.
fn write_instance_name(w: &mut DnsWriter, rec: &ServiceRecord) -> std::io::Result<()> {
    write_name(w, &rec.name, false)?;
    write_name(w, &rec.proto.postfix()[1..], true)
}

/// The self PTR (type name -> instance name) with the given TTL; TTL 0 is
/// the goodbye form. RDLENGTH is the instance name's label bytes plus the
/// 13 bytes of `._?cp.local` encoding and terminator.
fn write_ptr_record(w: &mut DnsWriter, rec: &ServiceRecord, ttl: u32) -> std::io::Result<()> {
    write_name(w, &rec.service_name, true)?;
    w.write_u16(TYPE_PTR)?;
    w.write_u16(CLASS_IN)?;
    w.write_u32(ttl)?;
    w.write_u16(rec.name.len() as u16 + 13)?;
    write_instance_name(w, rec)
}
