//! RFC 6455 frame codec.
//!
//! Client frames are decoded in place: the payload is unmasked inside the receive buffer and
//! handed back as a slice, so relaying a message never copies it before encoding.

use crate::error::FrameError;
use crate::{Error, Result};

const FIN: u8 = 0x80;
const RESERVED_BITS: u8 = 0x70;
const OPCODE_BITS: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LENGTH_BITS: u8 = 0x7F;

const LENGTH_16: u8 = 126;
const LENGTH_64: u8 = 127;

/// Two header bytes plus the masking key of an empty client frame.
const MIN_CLIENT_FRAME_LEN: usize = 6;

/// Largest server frame header: two bytes plus a 64-bit length.
pub const MAX_HEADER_LEN: usize = 10;

/// Frame opcodes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Reserved(u8),
}

impl From<u8> for Opcode {
    fn from(bits: u8) -> Self {
        match bits & OPCODE_BITS {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            other => Self::Reserved(other),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> Self {
        match opcode {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
            Opcode::Reserved(bits) => bits & OPCODE_BITS,
        }
    }
}

/// One decoded client frame.
#[derive(Debug, Eq, PartialEq)]
pub struct Frame<'a> {
    pub fin: bool,
    pub opcode: Opcode,
    /// Unmasked payload.
    pub payload: &'a [u8],
    /// Bytes the frame occupied at the front of the buffer.
    pub len: usize,
}

/// Outcome of [`decode_frame`].
#[derive(Debug, Eq, PartialEq)]
pub enum Decoded<'a> {
    /// The buffer does not yet hold a whole frame; nothing was modified.
    Incomplete,
    /// The bytes can never become a valid client frame.
    Invalid(FrameError),
    Frame(Frame<'a>),
}

/// Decode the client frame at the front of `buffer`, unmasking its payload in place.
pub fn decode_frame(buffer: &mut [u8]) -> Decoded<'_> {
    if buffer.len() < MIN_CLIENT_FRAME_LEN {
        return Decoded::Incomplete;
    }
    let [first, second, ..] = *buffer else {
        return Decoded::Incomplete;
    };

    if first & RESERVED_BITS != 0 {
        return Decoded::Invalid(FrameError::ReservedBits);
    }
    if second & MASK_BIT == 0 {
        return Decoded::Invalid(FrameError::Unmasked);
    }

    let (declared_len, mask_offset) = match second & LENGTH_BITS {
        LENGTH_16 => match buffer.get(2..4) {
            Some(&[high, low]) => (u64::from(u16::from_be_bytes([high, low])), 4),
            _ => return Decoded::Incomplete,
        },
        LENGTH_64 => {
            let Some(length_bytes) = buffer.get(2..10) else {
                return Decoded::Incomplete;
            };
            let mut be = [0u8; 8];
            be.copy_from_slice(length_bytes);
            let declared = u64::from_be_bytes(be);
            if declared >> 63 != 0 {
                return Decoded::Invalid(FrameError::LengthOverflow);
            }
            (declared, 10)
        }
        short => (u64::from(short), 2),
    };

    let data_offset = mask_offset + 4;
    let Some(&[k0, k1, k2, k3]) = buffer.get(mask_offset..data_offset) else {
        return Decoded::Incomplete;
    };

    // A length that does not fit `usize` can never be buffered; the caller runs out of room.
    let Some(end) = usize::try_from(declared_len)
        .ok()
        .and_then(|payload_len| data_offset.checked_add(payload_len))
    else {
        return Decoded::Incomplete;
    };
    let Some(payload) = buffer.get_mut(data_offset..end) else {
        return Decoded::Incomplete;
    };

    apply_mask(payload, [k0, k1, k2, k3]);

    Decoded::Frame(Frame {
        fin: first & FIN != 0,
        opcode: Opcode::from(first),
        payload,
        len: end,
    })
}

/// XOR `bytes` with the repeating 4-byte masking key. Masking and unmasking are the same.
pub fn apply_mask(bytes: &mut [u8], key: [u8; 4]) {
    for (byte, key_byte) in bytes.iter_mut().zip(key.iter().cycle()) {
        *byte ^= key_byte;
    }
}

/// Header of an unmasked server frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameHeader {
    bytes: [u8; MAX_HEADER_LEN],
    len: usize,
}

impl FrameHeader {
    /// Header for a final frame with `opcode` carrying `payload_len` bytes, using the shortest
    /// of the three length encodings.
    #[must_use]
    pub fn new(opcode: Opcode, payload_len: usize) -> Self {
        let mut bytes = [0u8; MAX_HEADER_LEN];
        let [first, second, extended @ ..] = &mut bytes;
        *first = FIN | u8::from(opcode);

        let len = match (u8::try_from(payload_len), u16::try_from(payload_len)) {
            (Ok(short), _) if short < LENGTH_16 => {
                *second = short;
                2
            }
            (_, Ok(medium)) => {
                *second = LENGTH_16;
                let [high, low, ..] = extended;
                [*high, *low] = medium.to_be_bytes();
                4
            }
            _ => {
                *second = LENGTH_64;
                *extended = u64::try_from(payload_len)
                    .unwrap_or(u64::MAX)
                    .to_be_bytes();
                10
            }
        };

        Self { bytes, len }
    }

    /// Header for a final text frame.
    #[must_use]
    pub fn text(payload_len: usize) -> Self {
        Self::new(Opcode::Text, payload_len)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.get(..self.len).unwrap_or(&self.bytes)
    }
}

/// Encode `payload` as one unmasked text frame into `out`, header and payload contiguous so
/// the frame goes out in a single write. Returns the frame length.
///
/// # Errors
/// Returns [`Error::BufferTooSmall`] if `out` cannot hold the frame.
pub fn encode_text_frame(payload: &[u8], out: &mut [u8]) -> Result<usize> {
    let header = FrameHeader::text(payload.len());
    let header_bytes = header.as_bytes();
    let total = header_bytes
        .len()
        .checked_add(payload.len())
        .ok_or(Error::BufferTooSmall)?;
    let frame = out.get_mut(..total).ok_or(Error::BufferTooSmall)?;
    let (head, body) = frame.split_at_mut(header_bytes.len());
    head.copy_from_slice(header_bytes);
    body.copy_from_slice(payload);
    Ok(total)
}
