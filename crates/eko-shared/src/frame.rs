//! Packet framing.
//!
//! ```text
//!  byte 0     version (= 1)
//!  byte 1     high 2 bits: encoding tag, low 6 bits: type tag
//!  bytes 2-3  payload length, big-endian u16
//!  bytes 4..  payload
//! ```
//!
//! [`Framer`] turns an arbitrary chunked byte stream into packets. It owns a
//! reassembly buffer of exactly [`MAX_PACKET_SIZE`] bytes, validates each
//! header as soon as its four bytes are present, and never needs a runtime:
//! feed bytes, pull packets.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::Encoding;
use crate::constants::{HEADER_SIZE, MAX_PACKET_SIZE, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION};
use crate::error::{CodecError, FrameError};
use crate::protocol::{PacketType, Payload};

/// One framed packet with its body still encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub encoding: Encoding,
    pub kind: PacketType,
    pub payload: Bytes,
}

impl Packet {
    /// Encode `payload` into a packet. Fails only if the body would exceed
    /// [`MAX_PAYLOAD_SIZE`].
    pub fn new(encoding: Encoding, payload: &Payload) -> Result<Self, CodecError> {
        Ok(Self {
            encoding,
            kind: payload.kind(),
            payload: Bytes::from(payload.encode(encoding)?),
        })
    }

    pub fn decode(&self) -> Result<Payload, CodecError> {
        Payload::decode(self.kind, self.encoding, &self.payload)
    }

    /// Wire bytes: header followed by payload.
    pub fn to_bytes(&self) -> Bytes {
        debug_assert!(self.payload.len() <= MAX_PAYLOAD_SIZE);
        let mut out = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        out.put_u8(PROTOCOL_VERSION);
        out.put_u8((self.encoding.tag() << 6) | self.kind.tag());
        out.put_u16(self.payload.len() as u16);
        out.put_slice(&self.payload);
        out.freeze()
    }
}

/// Validated header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    encoding: Encoding,
    kind: PacketType,
    len: usize,
}

fn parse_header(bytes: &[u8]) -> Result<Header, FrameError> {
    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(FrameError::UnsupportedVersion(version));
    }

    let encoding_tag = bytes[1] >> 6;
    let encoding =
        Encoding::from_tag(encoding_tag).ok_or(FrameError::UnsupportedEncoding(encoding_tag))?;

    let type_tag = bytes[1] & 0x3F;
    let kind = PacketType::from_tag(type_tag).ok_or(FrameError::UnsupportedType(type_tag))?;

    let len = usize::from(u16::from_be_bytes([bytes[2], bytes[3]]));
    if len > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge {
            len,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    Ok(Header {
        encoding,
        kind,
        len,
    })
}

/// Incremental packet reassembler for one connection.
#[derive(Debug)]
pub struct Framer {
    buf: Box<[u8]>,
    filled: usize,
    poisoned: bool,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    pub fn new() -> Self {
        Self {
            buf: vec![0u8; MAX_PACKET_SIZE].into_boxed_slice(),
            filled: 0,
            poisoned: false,
        }
    }

    /// Bytes currently held for a partial packet.
    pub fn buffered(&self) -> usize {
        self.filled
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Feed one input chunk. The returned iterator yields every packet the
    /// chunk completes, in order, and must be drained: input it has not
    /// reached yet is dropped with it.
    ///
    /// The first header error is yielded once; after it the framer is
    /// poisoned and yields nothing, for this chunk and every later one.
    pub fn feed<'a>(&'a mut self, input: &'a [u8]) -> Feed<'a> {
        Feed {
            framer: self,
            input,
        }
    }

    /// Convenience for tests and clients: drain a chunk into a vector,
    /// stopping at the first error.
    pub fn push(&mut self, input: &[u8]) -> Result<Vec<Packet>, FrameError> {
        self.feed(input).collect()
    }

    fn try_extract(&mut self) -> Option<Result<Packet, FrameError>> {
        if self.filled < HEADER_SIZE {
            return None;
        }

        let header = match parse_header(&self.buf[..HEADER_SIZE]) {
            Ok(header) => header,
            Err(e) => {
                self.poisoned = true;
                self.filled = 0;
                return Some(Err(e));
            }
        };

        let end = HEADER_SIZE + header.len;
        if self.filled < end {
            return None;
        }

        let payload = Bytes::copy_from_slice(&self.buf[HEADER_SIZE..end]);

        // Compact so the next packet starts at offset 0.
        self.buf.copy_within(end..self.filled, 0);
        self.filled -= end;

        Some(Ok(Packet {
            encoding: header.encoding,
            kind: header.kind,
            payload,
        }))
    }

    fn fill(&mut self, input: &[u8]) -> usize {
        let take = (MAX_PACKET_SIZE - self.filled).min(input.len());
        self.buf[self.filled..self.filled + take].copy_from_slice(&input[..take]);
        self.filled += take;
        take
    }
}

/// Iterator returned by [`Framer::feed`].
pub struct Feed<'a> {
    framer: &'a mut Framer,
    input: &'a [u8],
}

impl Iterator for Feed<'_> {
    type Item = Result<Packet, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.framer.poisoned {
                return None;
            }

            if let Some(result) = self.framer.try_extract() {
                if result.is_err() {
                    self.input = &[];
                }
                return Some(result);
            }

            if self.input.is_empty() {
                return None;
            }

            // After extraction the buffer holds less than one full packet,
            // so there is always room for at least one more byte.
            let taken = self.framer.fill(self.input);
            self.input = &self.input[taken..];
        }
    }
}
