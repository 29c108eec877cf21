use std::io::{Cursor, Write};

use byteorder::{BigEndian, WriteBytesExt};

/// A big-endian writer for assembling one outbound DNS datagram.
pub struct DnsWriter {
    data: Cursor<Vec<u8>>,
}

impl DnsWriter {
    pub fn new() -> Self {
        DnsWriter {
            data: Cursor::new(Vec::new()),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        DnsWriter {
            data: Cursor::new(Vec::with_capacity(capacity)),
        }
    }

    pub fn write_u8(&mut self, v: u8) -> std::io::Result<()> {
        self.data.write_u8(v)
    }

    pub fn write_u16(&mut self, v: u16) -> std::io::Result<()> {
        self.data.write_u16::<BigEndian>(v)
    }

    pub fn write_u32(&mut self, v: u32) -> std::io::Result<()> {
        self.data.write_u32::<BigEndian>(v)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.data.write_all(bytes)
    }

    pub fn len(&self) -> usize {
        self.data.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.get_ref().is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data.into_inner()
    }
}

impl Default for DnsWriter {
    fn default() -> Self {
        Self::new()
    }
}
