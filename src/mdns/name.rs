//! DNS name codec: label-list encoding and streaming candidate matching.

use super::dns_writer::DnsWriter;
use super::MDNS_TLD;

/// Encodes a dot-delimited name as length-prefixed labels, optionally
/// followed by the terminating zero byte. No compression is emitted;
/// peers that compress still interoperate because full labels decode
/// unambiguously.
pub fn write_name(w: &mut DnsWriter, name: &str, zero_terminate: bool) -> std::io::Result<()> {
    for label in name.split('.').filter(|l| !l.is_empty()) {
        debug_assert!(label.len() < 64, "DNS label longer than 63 bytes");
        w.write_u8(label.len() as u8)?;
        w.write_bytes(label.as_bytes())?;
    }
    if zero_terminate {
        w.write_u8(0)?;
    }
    Ok(())
}

/// Whether every label of `name` fits the 63-byte wire limit. Checked at
/// the public API boundary so the writer never sees an oversized label.
pub fn labels_fit(name: &str) -> bool {
    name.split('.').all(|l| l.len() < 64)
}

/// The rightmost dot-delimited component of `name`, or the whole name
/// when it has no dot. Used to derive a service type from an instance
/// name ("Printer._ipp" -> "_ipp").
pub fn rightmost_label(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Strips a trailing `.local`, the form callbacks report names in.
pub fn strip_tld(name: &str) -> &str {
    name.strip_suffix(MDNS_TLD).unwrap_or(name)
}

/// Cursor state for streaming comparison of wire labels against one
/// candidate name. The candidate itself is passed to every call so the
/// state stays `Copy` and can live in fixed per-packet arrays.
#[derive(Debug, Clone, Copy)]
pub struct MatchState {
    pos: usize,
    matched: bool,
}

impl MatchState {
    pub fn new() -> Self {
        MatchState {
            pos: 0,
            matched: true,
        }
    }

    pub fn reset(&mut self) {
        *self = MatchState::new();
    }

    pub fn matched(&self) -> bool {
        self.matched
    }

    pub fn fail(&mut self) {
        self.matched = false;
    }

    pub fn remaining(&self, name: &[u8]) -> usize {
        name.len().saturating_sub(self.pos)
    }

    /// Matched and no candidate bytes left: the wire name equals the
    /// candidate.
    pub fn complete(&self, name: &[u8]) -> bool {
        self.matched && self.pos >= name.len()
    }

    /// Advances the cursor across one wire chunk. When fewer candidate
    /// bytes remain than the chunk holds the match fails; a dot following
    /// the consumed bytes is eaten so per-label calls line up with the
    /// candidate's own label boundaries.
    pub fn match_label_chunk(&mut self, name: &[u8], chunk: &[u8]) -> bool {
        if self.remaining(name) >= chunk.len() {
            if name[self.pos..self.pos + chunk.len()] != *chunk {
                self.matched = false;
            }
            self.pos += chunk.len();
            if name.get(self.pos) == Some(&b'.') {
                self.pos += 1;
            }
        } else {
            self.matched = false;
            self.pos = name.len();
        }
        self.matched
    }
}

impl Default for MatchState {
    fn default() -> Self {
        Self::new()
    }
}
