//! The question and answer walks over one inbound datagram.
//!
//! Names are never materialized. Each walk streams label bytes through
//! per-candidate [`MatchState`] cursors; compression pointers are not
//! dereferenced, their pointed-to offset's low byte serves as a
//! fingerprint to correlate records within the packet.

use tracing::trace;

use super::dns_reader::DnsReader;
use super::name::MatchState;
use super::records::{CLASS_IN, TYPE_A, TYPE_AAAA, TYPE_PTR, TYPE_SRV, TYPE_TXT};
use super::registry::ServiceTable;
use super::{DNS_SD_SERVICE, MAX_INSTANCES_PER_PACKET, MAX_SERVICE_RECORDS};

/// Candidates in the question walk: host identity, the DNS-SD meta-name,
/// then one per service slot.
const QUESTION_CANDIDATES: usize = MAX_SERVICE_RECORDS + 2;
const HOST_CANDIDATE: usize = 0;
const META_CANDIDATE: usize = 1;

const NAME_TARGET: usize = 0;
const SERVICE_TARGET: usize = 1;

#[derive(Debug)]
pub(crate) struct Header {
    pub xid: u16,
    pub flags: u16,
    pub qd: u16,
    pub an: u16,
    pub ns: u16,
    pub ar: u16,
}

impl Header {
    pub fn parse(r: &mut DnsReader) -> std::io::Result<Header> {
        Ok(Header {
            xid: r.read_u16()?,
            flags: r.read_u16()?,
            qd: r.read_u16()?,
            an: r.read_u16()?,
            ns: r.read_u16()?,
            ar: r.read_u16()?,
        })
    }

    pub fn is_response(&self) -> bool {
        self.flags & 0x8000 != 0
    }

    pub fn opcode(&self) -> u8 {
        ((self.flags >> 11) & 0x0F) as u8
    }

    fn record_total(&self) -> usize {
        self.qd as usize + self.an as usize + self.ns as usize + self.ar as usize
    }
}

/// What an inbound query asked us for.
#[derive(Debug)]
pub(crate) struct QueryIntent {
    pub xid: u16,
    pub host_asked: bool,
    pub meta_asked: bool,
    pub wants_ipv6: bool,
    pub services_asked: [bool; MAX_SERVICE_RECORDS],
}

/// Walks the question section, testing every question name against the
/// host identity, the DNS-SD meta-name and each live service type.
/// Truncation keeps whatever was recognized up to that point.
pub(crate) fn scan_questions(
    r: &mut DnsReader,
    header: &Header,
    host: &str,
    services: &ServiceTable,
) -> QueryIntent {
    let mut names: [Option<&[u8]>; QUESTION_CANDIDATES] = [None; QUESTION_CANDIDATES];
    names[HOST_CANDIDATE] = Some(host.as_bytes());
    names[META_CANDIDATE] = Some(DNS_SD_SERVICE.as_bytes());
    for (i, rec) in services.iter() {
        names[2 + i] = Some(rec.service_name.as_bytes());
    }

    let mut asked = [false; QUESTION_CANDIDATES];
    let mut wants_ipv6 = false;
    // Where each candidate's name first appeared, kept across questions so
    // later questions may back-reference it with a compression pointer.
    let mut first_offset: [Option<u16>; QUESTION_CANDIDATES] = [None; QUESTION_CANDIDATES];

    let mut walk = || -> std::io::Result<()> {
        for _ in 0..header.qd {
            let mut st = [MatchState::new(); QUESTION_CANDIDATES];
            let name_start = r.position() as u16;
            loop {
                let len = r.read_u8()?;
                if len == 0 {
                    break;
                }
                if len & 0xC0 == 0xC0 {
                    let low = r.read_u8()?;
                    for j in 0..QUESTION_CANDIDATES {
                        if let Some(off) = first_offset[j] {
                            if (off & 0xFF) as u8 != low {
                                st[j].fail();
                            }
                        }
                    }
                    break; // a pointer ends the name
                }
                let chunk = r.read_bytes(len as usize)?;
                for j in 0..QUESTION_CANDIDATES {
                    if let Some(name) = names[j] {
                        if !asked[j] && st[j].matched() {
                            st[j].match_label_chunk(name, &chunk);
                        }
                    }
                }
            }

            let qtype = r.read_u16()?;
            let qclass = r.read_u16()?;
            for j in 0..QUESTION_CANDIDATES {
                let Some(name) = names[j] else { continue };
                if asked[j] || !st[j].complete(name) {
                    continue;
                }
                if first_offset[j].is_none() {
                    first_offset[j] = Some(name_start);
                }
                if qclass & 0x7FFF != CLASS_IN {
                    continue;
                }
                match j {
                    HOST_CANDIDATE => {
                        if qtype == TYPE_A {
                            asked[j] = true;
                        } else if qtype == TYPE_AAAA {
                            wants_ipv6 = true;
                        }
                    }
                    META_CANDIDATE => {
                        if qtype == TYPE_PTR {
                            asked[j] = true;
                        }
                    }
                    _ => {
                        if matches!(qtype, TYPE_PTR | TYPE_TXT | TYPE_SRV) {
                            asked[j] = true;
                        }
                    }
                }
            }
        }
        Ok(())
    };
    if walk().is_err() {
        trace!("question section ended early");
    }

    let mut services_asked = [false; MAX_SERVICE_RECORDS];
    services_asked.copy_from_slice(&asked[2..]);
    QueryIntent {
        xid: header.xid,
        host_asked: asked[HOST_CANDIDATE],
        meta_asked: asked[META_CANDIDATE],
        wants_ipv6,
        services_asked,
    }
}

/// Everything one response datagram yielded for the active lookups.
#[derive(Debug)]
pub(crate) struct AnswerDigest {
    pub resolved_ip: Option<[u8; 4]>,
    pub instances: Vec<InstanceAnswer>,
}

/// One discovered service instance, aggregated across the PTR/SRV/TXT/A
/// records of a single datagram.
#[derive(Debug)]
pub(crate) struct InstanceAnswer {
    pub name: String,
    pub ip: Option<[u8; 4]>,
    pub port: u16,
    pub txt: Option<Vec<u8>>,
}

struct InstanceSlot {
    name: Vec<u8>,
    /// Packet offset of the instance name inside the PTR RDATA; SRV and
    /// TXT owners back-reference it.
    offset: u16,
    port: u16,
    /// Fingerprint of the SRV target's location, for A-record pairing.
    /// 0 until an SRV is seen.
    target_hint: u8,
    txt: Option<Vec<u8>>,
}

struct CachedA {
    /// Owner fingerprint; 0xFF when the owner had none to take.
    owner_hint: u8,
    ip: [u8; 4],
}

/// Walks every record of a response, feeding the two resolver targets and
/// collecting per-packet instance slots, then correlates instance slots
/// with the A records seen in the same datagram.
pub(crate) fn scan_answers(
    r: &mut DnsReader,
    header: &Header,
    name_target: Option<&str>,
    service_target: Option<&str>,
) -> AnswerDigest {
    let targets: [Option<&[u8]>; 2] = [
        name_target.map(str::as_bytes),
        service_target.map(str::as_bytes),
    ];
    let mut first_offset: [Option<u16>; 2] = [None; 2];
    let mut resolved: Option<[u8; 4]> = None;
    let mut instances: Vec<InstanceSlot> = Vec::new();
    let mut a_cache: Vec<CachedA> = Vec::new();

    let mut walk = || -> std::io::Result<()> {
        for i in 0..header.record_total() {
            let in_question = i < header.qd as usize;

            let mut st = [MatchState::new(); 2];
            let mut part_matched = [false; 2];
            let mut last_compressed = [false; 2];
            let mut was_compressed = [false; 2];
            let mut inst_st = vec![MatchState::new(); instances.len()];
            let mut first_ptr_byte: u8 = 0;
            let name_start = r.position() as u16;

            loop {
                let len = r.read_u8()?;
                if len == 0 {
                    break;
                }
                if len & 0xC0 == 0xC0 {
                    let low = r.read_u8()?;
                    for j in 0..2 {
                        match first_offset[j] {
                            Some(off) if (off & 0xFF) as u8 != low => st[j].fail(),
                            _ => was_compressed[j] = true,
                        }
                        last_compressed[j] = true;
                    }
                    if first_ptr_byte == 0 {
                        first_ptr_byte = low;
                    }
                    break;
                }
                if in_question {
                    // Question names only matter as pointer anchors for
                    // the offsets recorded below, skip their bytes.
                    r.skip(len as usize)?;
                    continue;
                }
                if first_ptr_byte == 0 {
                    first_ptr_byte = ((r.position() - 1) & 0xFF) as u8;
                }
                let chunk = r.read_bytes(len as usize)?;
                for j in 0..2 {
                    if let Some(name) = targets[j] {
                        st[j].match_label_chunk(name, &chunk);
                        if st[j].matched() {
                            part_matched[j] = true;
                        }
                        last_compressed[j] = false;
                    }
                }
                for (k, slot) in instances.iter().enumerate() {
                    // Compare only while the candidate has bytes left:
                    // the stored name is the bare instance label, the
                    // trailing type labels of the owner are ignored.
                    if inst_st[k].matched() && inst_st[k].remaining(&slot.name) >= chunk.len() {
                        inst_st[k].match_label_chunk(&slot.name, &chunk);
                    }
                }
            }

            if in_question {
                r.skip(4)?;
                continue;
            }

            let rtype = r.read_u16()?;
            let rclass = r.read_u16()?;
            let _ttl = r.read_u32()?;
            let rdlen = r.read_u16()? as usize;
            let rdata_start = r.position();

            for j in 0..2 {
                if first_offset[j].is_none() && targets[j].is_some_and(|n| st[j].complete(n)) {
                    first_offset[j] = Some(name_start);
                }
            }

            // Full literal match, or the compression-pointer guesses: a
            // matched literal prefix ending in a pointer, or a pointer
            // back to where the target's name was first seen.
            let owner_matches = |j: usize| -> bool {
                let Some(name) = targets[j] else { return false };
                st[j].complete(name)
                    || (part_matched[j] && last_compressed[j])
                    || (was_compressed[j] && st[j].matched())
            };
            let class_in = rclass & 0x7FFF == CLASS_IN;

            match rtype {
                TYPE_A if rdlen == 4 => {
                    let bytes = r.read_bytes(4)?;
                    let ip = [bytes[0], bytes[1], bytes[2], bytes[3]];
                    if class_in && resolved.is_none() && owner_matches(NAME_TARGET) {
                        trace!("A record resolved the pending name lookup");
                        resolved = Some(ip);
                    } else if a_cache.len() < MAX_INSTANCES_PER_PACKET {
                        a_cache.push(CachedA {
                            owner_hint: if first_ptr_byte != 0 { first_ptr_byte } else { 0xFF },
                            ip,
                        });
                    }
                }
                TYPE_PTR if class_in && rdlen >= 2 && owner_matches(SERVICE_TARGET) => {
                    let label_len = r.read_u8()? as usize;
                    if label_len & 0xC0 != 0xC0 && instances.len() < MAX_INSTANCES_PER_PACKET {
                        let name = r.read_bytes(label_len.min(rdlen - 1))?;
                        trace!(offset = rdata_start, "new instance slot");
                        instances.push(InstanceSlot {
                            name,
                            offset: rdata_start as u16,
                            port: 0,
                            target_hint: 0,
                            txt: None,
                        });
                    }
                }
                TYPE_SRV if rdlen >= 8 => {
                    if let Some(k) = match_instance(&instances, &inst_st, first_ptr_byte) {
                        let _priority = r.read_u16()?;
                        let _weight = r.read_u16()?;
                        let port = r.read_u16()?;
                        let target_first = r.read_u8()?;
                        let target_second = r.read_u8()?;
                        instances[k].port = port;
                        instances[k].target_hint = if target_first & 0xC0 == 0xC0 {
                            target_second
                        } else {
                            ((rdata_start + 6) & 0xFF) as u8
                        };
                    }
                }
                TYPE_TXT if rdlen > 1 => {
                    if let Some(k) = match_instance(&instances, &inst_st, first_ptr_byte) {
                        if instances[k].txt.is_none() {
                            instances[k].txt = Some(r.read_bytes(rdlen)?);
                        }
                    }
                }
                _ => {}
            }

            // Whatever the record held, resume at the next one.
            r.set_position(rdata_start + rdlen)?;
        }
        Ok(())
    };
    if walk().is_err() {
        trace!("record section ended early");
    }

    let instances = instances
        .into_iter()
        .map(|slot| {
            let ip = a_cache
                .iter()
                .find(|a| a.owner_hint == slot.target_hint || a.owner_hint == 0xFF)
                .or_else(|| a_cache.first())
                .map(|a| a.ip);
            InstanceAnswer {
                name: String::from_utf8_lossy(&slot.name).into_owned(),
                ip,
                port: slot.port,
                txt: slot.txt,
            }
        })
        .collect();

    AnswerDigest {
        resolved_ip: resolved,
        instances,
    }
}

/// An SRV or TXT owner designates an instance slot either through a
/// pointer back to the instance name inside the PTR RDATA, or by spelling
/// the instance label out verbatim.
fn match_instance(
    instances: &[InstanceSlot],
    inst_st: &[MatchState],
    first_ptr_byte: u8,
) -> Option<usize> {
    instances.iter().enumerate().position(|(k, slot)| {
        (first_ptr_byte != 0 && first_ptr_byte == (slot.offset & 0xFF) as u8)
            || inst_st[k].complete(&slot.name)
    })
}
