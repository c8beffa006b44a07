//! WebSocket broadcast chat.
//!
//! Every text message a client sends is relayed to every other client, and every change in
//! the number of connected clients is announced to all of them. The protocol pieces
//! ([`frame`], [`handshake`], [`inbound`], [`registry`]) are plain functions and types; the
//! accept loops that drive them on the device live in `server`.

pub mod frame;
pub mod handshake;
pub mod inbound;
pub mod registry;

#[cfg(feature = "wifi")]
mod server;

pub use frame::{Decoded, Frame, FrameHeader, Opcode, apply_mask, decode_frame, encode_text_frame};
pub use handshake::{accept_key, client_key, write_upgrade_response};
pub use inbound::{Flow, drain_frames};
pub use registry::{BroadcastHub, ClientId, ClientRegistry, FrameSink, user_count_message};
#[cfg(feature = "wifi")]
pub use server::{OutboundFrame, Outboxes, WebSocketServer};
