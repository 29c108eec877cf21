use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

/// A bounds-checked big-endian cursor over one inbound datagram.
///
/// Domain names are not decoded here; the parser streams label bytes
/// through its candidate matchers instead of materializing label lists.
pub struct DnsReader {
    inner: Cursor<Vec<u8>>,
}

impl DnsReader {
    pub fn new(data: Vec<u8>) -> Self {
        DnsReader {
            inner: Cursor::new(data),
        }
    }

    pub fn position(&self) -> usize {
        self.inner.position() as usize
    }

    pub fn set_position(&mut self, pos: usize) -> std::io::Result<()> {
        if pos > self.inner.get_ref().len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "seek past end of datagram",
            ));
        }
        self.inner.set_position(pos as u64);
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> std::io::Result<()> {
        let pos = self.position().saturating_add(n);
        self.set_position(pos)
    }

    pub fn read_u8(&mut self) -> std::io::Result<u8> {
        self.inner.read_u8()
    }

    pub fn read_u16(&mut self) -> std::io::Result<u16> {
        self.inner.read_u16::<BigEndian>()
    }

    pub fn read_u32(&mut self) -> std::io::Result<u32> {
        self.inner.read_u32::<BigEndian>()
    }

    pub fn read_bytes(&mut self, len: usize) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }
}
