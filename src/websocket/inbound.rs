//! Splitting a client's receive buffer into frames.

use heapless::Vec;

use super::frame::{Decoded, Opcode, decode_frame};
use crate::{Error, Result};

/// What the connection should do after the buffered frames were handled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Flow {
    /// Keep reading.
    Continue,
    /// The client sent a close frame.
    Close,
}

/// Handle every complete frame at the front of `inbound`, keeping any partial one.
///
/// Each final text payload is passed to `relay`. Binary, control and fragmented frames are
/// dropped, and nothing after a close frame is looked at.
///
/// # Errors
/// Returns [`Error::InvalidFrame`] for bytes that can never form a client frame, and
/// [`Error::FrameTooLarge`] when `inbound` is full without holding a whole frame.
pub fn drain_frames<const B: usize>(
    inbound: &mut Vec<u8, B>,
    mut relay: impl FnMut(&[u8]),
) -> Result<Flow> {
    loop {
        let full = inbound.is_full();
        let consumed = match decode_frame(inbound) {
            Decoded::Incomplete if full => return Err(Error::FrameTooLarge),
            Decoded::Incomplete => return Ok(Flow::Continue),
            Decoded::Invalid(err) => return Err(err.into()),
            Decoded::Frame(frame) => match frame.opcode {
                Opcode::Close => return Ok(Flow::Close),
                Opcode::Text if frame.fin => {
                    relay(frame.payload);
                    frame.len
                }
                _ => frame.len,
            },
        };

        let remaining = inbound.len().saturating_sub(consumed);
        inbound.copy_within(consumed.., 0);
        inbound.truncate(remaining);
    }
}
