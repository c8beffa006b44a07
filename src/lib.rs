//! A captive-portal chat appliance for the Raspberry Pi Pico W.
//!
//! The board runs a Wi-Fi access point, answers every DNS query with its own address, serves
//! a chat page over HTTP, and relays chat messages between browsers over WebSockets.
//!
//! The protocol core (DNS answers, request parsing, HTTP routing, WebSocket framing and the
//! broadcast registry) has no hardware dependencies and is tested on the host. The `wifi`
//! feature adds the embassy tasks that run it on the device.
#![no_std]

#[cfg(all(feature = "wifi", any(feature = "pico1", feature = "pico2")))]
pub mod access_point;
#[cfg(feature = "wifi")]
pub mod chat_portal;
#[cfg(feature = "wifi")]
mod connection;
pub mod dhcp_server;
pub mod dns_server;
mod error;
pub mod http_server;
pub mod request_head;
mod shared_constants;
pub mod websocket;

// Re-export commonly used items
#[cfg(all(feature = "wifi", any(feature = "pico1", feature = "pico2")))]
pub use access_point::{RadioPins, start_access_point};
#[cfg(feature = "wifi")]
pub use chat_portal::{ChatPortal, ChatPortalStatic};
pub use error::{Error, FrameError, Result};
pub use http_server::{ContentSource, Page, Route, StaticContent, route};
pub use request_head::{HeadBuffer, HeadStatus, RequestHead};
pub use shared_constants::*;
pub use websocket::{BroadcastHub, ClientId, ClientRegistry, FrameSink};
