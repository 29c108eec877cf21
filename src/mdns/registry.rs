//! Fixed-capacity table of advertised DNS-SD services.

use crate::{BonjourError, Result, ServiceProtocol};

use super::name;
use super::MAX_SERVICE_RECORDS;

/// One advertised service. Each occupied slot owns its strings.
#[derive(Debug)]
pub(crate) struct ServiceRecord {
    /// Instance name as registered, e.g. `Living Room._ipp`.
    pub name: String,
    /// Derived type name, e.g. `_ipp._tcp.local`.
    pub service_name: String,
    pub port: u16,
    pub proto: ServiceProtocol,
    /// Raw TXT RDATA; at least one byte when present.
    pub txt: Option<Vec<u8>>,
}

pub(crate) struct ServiceTable {
    slots: [Option<ServiceRecord>; MAX_SERVICE_RECORDS],
}

impl ServiceTable {
    pub fn new() -> Self {
        ServiceTable {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Validates and stores a record in the first free slot, returning its
    /// index. Nothing is emitted here; announcement is the engine's job.
    pub fn insert(
        &mut self,
        name: &str,
        port: u16,
        proto: ServiceProtocol,
        txt: Option<&[u8]>,
    ) -> Result<usize> {
        if name.is_empty() {
            return Err(BonjourError::InvalidArgument("service name is empty"));
        }
        if !name::labels_fit(name) {
            return Err(BonjourError::InvalidArgument("label longer than 63 bytes"));
        }
        if port == 0 {
            return Err(BonjourError::InvalidArgument("service port is zero"));
        }
        if txt.is_some_and(|t| t.is_empty()) {
            return Err(BonjourError::InvalidArgument("TXT payload is empty"));
        }

        let idx = self
            .slots
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(BonjourError::TableFull)?;
        let service_name = format!("{}{}", name::rightmost_label(name), proto.postfix());
        self.slots[idx] = Some(ServiceRecord {
            name: name.to_owned(),
            service_name,
            port,
            proto,
            txt: txt.map(|t| t.to_vec()),
        });
        Ok(idx)
    }

    /// First occupied slot matching port and protocol, and the name when
    /// one is given.
    pub fn find(&self, name: Option<&str>, port: u16, proto: ServiceProtocol) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.as_ref().is_some_and(|rec| {
                rec.port == port && rec.proto == proto && name.is_none_or(|n| rec.name == n)
            })
        })
    }

    pub fn get(&self, idx: usize) -> Option<&ServiceRecord> {
        self.slots.get(idx)?.as_ref()
    }

    pub fn take(&mut self, idx: usize) -> Option<ServiceRecord> {
        self.slots.get_mut(idx)?.take()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &ServiceRecord)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|rec| (i, rec)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_service_name_from_rightmost_label() {
        let mut table = ServiceTable::new();
        let idx = table
            .insert("Living Room._ipp", 631, ServiceProtocol::Tcp, None)
            .unwrap();
        assert_eq!(table.get(idx).unwrap().service_name, "_ipp._tcp.local");

        let idx = table.insert("x", 1234, ServiceProtocol::Udp, None).unwrap();
        assert_eq!(table.get(idx).unwrap().service_name, "x._udp.local");
    }

    #[test]
    fn rejects_bad_arguments() {
        let mut table = ServiceTable::new();
        assert!(table.insert("", 80, ServiceProtocol::Tcp, None).is_err());
        assert!(table.insert("web", 0, ServiceProtocol::Tcp, None).is_err());
        assert!(table
            .insert("web", 80, ServiceProtocol::Tcp, Some(b""))
            .is_err());
    }

    #[test]
    fn fills_up_at_capacity() {
        let mut table = ServiceTable::new();
        for i in 0..MAX_SERVICE_RECORDS {
            table
                .insert("svc", 1000 + i as u16, ServiceProtocol::Tcp, None)
                .unwrap();
        }
        assert!(matches!(
            table.insert("svc", 2000, ServiceProtocol::Tcp, None),
            Err(BonjourError::TableFull)
        ));
        // Freeing a slot makes room again.
        let idx = table.find(None, 1003, ServiceProtocol::Tcp).unwrap();
        table.take(idx);
        assert!(table.insert("svc", 2000, ServiceProtocol::Tcp, None).is_ok());
    }

    #[test]
    fn find_matches_port_proto_and_optional_name() {
        let mut table = ServiceTable::new();
        table.insert("a._http", 80, ServiceProtocol::Tcp, None).unwrap();
        table.insert("b._http", 80, ServiceProtocol::Tcp, None).unwrap();
        assert_eq!(table.find(None, 80, ServiceProtocol::Tcp), Some(0));
        assert_eq!(table.find(Some("b._http"), 80, ServiceProtocol::Tcp), Some(1));
        assert_eq!(table.find(None, 80, ServiceProtocol::Udp), None);
    }
}
