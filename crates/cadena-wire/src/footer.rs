//! Message footers: lightweight out-of-band state behind the body.
//!
//! A footer is a trailing POD Struct of alternating `(Id opcode, Struct
//! payload)` pairs. Unknown opcodes are skipped for forward
//! compatibility. The one defined opcode carries a monotonically
//! increasing registry [`Generation`] counter used to synchronize
//! registry replay between peers; it is emitted only when the value
//! changed since the last send.

use cadena_pod::{Builder, Parser, PodError};

use crate::error::WireError;

/// Footer opcode: registry generation counter (`Long` payload).
pub const FOOTER_GENERATION: u32 = 0;

/// Peer-synchronized registry generation state.
///
/// `advance` moves the local generation (or echoes a received one);
/// `write_footer` appends the footer only when the advertised value
/// changed since it was last sent.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    current: u64,
    sent: u64,
    received: u64,
}

impl Generation {
    /// Fresh state; nothing sent or received yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The value currently advertised to the peer.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.current
    }

    /// The newest value received from the peer.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Raise the advertised generation (monotonic).
    pub fn advance(&mut self, generation: u64) {
        self.current = self.current.max(generation);
    }

    /// Note a generation received in a peer footer (monotonic max-merge).
    pub fn note_received(&mut self, generation: u64) {
        if generation > self.received {
            tracing::trace!(generation, "peer registry generation");
            self.received = generation;
        }
    }

    /// Append the footer to an outbound message if the advertised value
    /// changed since the last send.
    pub fn write_footer(&mut self, b: &mut Builder) {
        if self.current == self.sent {
            return;
        }
        self.sent = self.current;
        tracing::trace!(generation = self.current, "sending registry generation");
        let outer = b.push_struct();
        b.id(FOOTER_GENERATION);
        let inner = b.push_struct();
        b.long(self.current as i64);
        b.pop(inner);
        b.pop(outer);
    }

    /// Process the footer region of a received message.
    pub fn read_footer(&mut self, footer: &[u8]) -> Result<(), WireError> {
        let mut reader = FooterReader::new(footer);
        while let Some((opcode, payload)) = reader.next_entry().map_err(|e| {
            WireError::Protocol(format!("malformed footer: {e}"))
        })? {
            match opcode {
                FOOTER_GENERATION => {
                    let mut p = Parser::new(payload);
                    let f = p
                        .push_struct()
                        .and_then(|f| p.get_long().map(|v| (f, v)));
                    match f {
                        Ok((_, v)) => self.note_received(v as u64),
                        Err(e) => {
                            return Err(WireError::Protocol(format!(
                                "generation footer: {e}"
                            )))
                        }
                    }
                }
                other => {
                    // forward compatibility: skip what we don't know
                    tracing::debug!(opcode = other, "ignoring unknown footer entry");
                }
            }
        }
        Ok(())
    }
}

/// Low-level walk over `(Id, Struct)` footer pairs.
pub struct FooterReader<'a> {
    parser: Option<Parser<'a>>,
    raw: &'a [u8],
}

impl<'a> FooterReader<'a> {
    /// Wrap the footer region of a message (may be empty).
    #[must_use]
    pub fn new(footer: &'a [u8]) -> Self {
        Self {
            parser: None,
            raw: footer,
        }
    }

    /// Next `(opcode, payload)` pair, or `None` at the end.
    ///
    /// The payload is the raw encoded Struct, to be parsed per opcode.
    pub fn next_entry(&mut self) -> Result<Option<(u32, &'a [u8])>, PodError> {
        if self.parser.is_none() {
            if self.raw.len() < cadena_pod::HEADER_SIZE {
                return Ok(None);
            }
            let mut p = Parser::new(self.raw);
            p.push_struct()?;
            self.parser = Some(p);
        }
        let p = self.parser.as_mut().ok_or(PodError::NoEntry)?;
        if p.at_end() {
            return Ok(None);
        }
        let opcode = p.get_id()?;
        let start = p.offset();
        let pod = p.get_pod()?;
        let total = cadena_pod::HEADER_SIZE + cadena_pod::round_up(pod.body().len());
        Ok(Some((opcode, &self.raw[start..start + total])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn footer_bytes(g: &mut Generation) -> Vec<u8> {
        let mut b = Builder::new();
        g.write_footer(&mut b);
        b.into_inner()
    }

    #[test]
    fn emitted_only_on_change() {
        let mut g = Generation::new();
        assert!(footer_bytes(&mut g).is_empty());

        g.advance(5);
        let bytes = footer_bytes(&mut g);
        assert!(!bytes.is_empty());

        // unchanged: nothing goes out
        assert!(footer_bytes(&mut g).is_empty());

        g.advance(6);
        assert!(!footer_bytes(&mut g).is_empty());
    }

    #[test]
    fn receiver_max_merges() {
        let mut sender = Generation::new();
        sender.advance(9);
        let bytes = footer_bytes(&mut sender);

        let mut receiver = Generation::new();
        receiver.read_footer(&bytes).unwrap();
        assert_eq!(receiver.received(), 9);

        // an older value does not regress
        let mut stale = Generation::new();
        stale.advance(3);
        let stale_bytes = footer_bytes(&mut stale);
        receiver.read_footer(&stale_bytes).unwrap();
        assert_eq!(receiver.received(), 9);
    }

    #[test]
    fn echo_until_local_advances() {
        let mut client = Generation::new();
        let mut server = Generation::new();
        server.advance(4);
        let bytes = footer_bytes(&mut server);

        client.read_footer(&bytes).unwrap();
        client.advance(client.received());
        // first outbound message after the merge carries the value
        assert!(!footer_bytes(&mut client).is_empty());
        // and later ones stay silent until something changes
        assert!(footer_bytes(&mut client).is_empty());
    }

    #[test]
    fn unknown_opcodes_are_skipped() {
        let mut b = Builder::new();
        let outer = b.push_struct();
        b.id(77); // unknown
        let inner = b.push_struct();
        b.int(1);
        b.pop(inner);
        b.id(FOOTER_GENERATION);
        let inner = b.push_struct();
        b.long(12);
        b.pop(inner);
        b.pop(outer);
        let bytes = b.into_inner();

        let mut g = Generation::new();
        g.read_footer(&bytes).unwrap();
        assert_eq!(g.received(), 12);
    }

    #[test]
    fn empty_footer_is_fine() {
        let mut g = Generation::new();
        g.read_footer(&[]).unwrap();
        assert_eq!(g.received(), 0);
    }
}
