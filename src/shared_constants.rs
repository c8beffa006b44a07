//! Load-time configuration for the chat portal.
//!
//! SSID, password, access-point address and the connection ceiling come from the build
//! environment (see `build.rs`), which also fixes the DHCP pool so it fits below `.255`;
//! everything else is fixed sizing for the RP2040's small heap.

#[cfg(feature = "wifi")]
use embassy_time::Duration;

include!(concat!(env!("OUT_DIR"), "/portal_config.rs"));

/// SSID the access point advertises.
pub const AP_SSID: &str = env!("CHAT_AP_SSID");

/// WPA2 passphrase; empty means an open network.
pub const AP_PASSWORD: &str = env!("CHAT_AP_PASSWORD");

/// Prefix length of the access point's subnet.
pub const AP_PREFIX_LEN: u8 = 24;

pub const DNS_PORT: u16 = 53;
pub const DHCP_SERVER_PORT: u16 = 67;
pub const DHCP_CLIENT_PORT: u16 = 68;
pub const HTTP_PORT: u16 = 80;
pub const WEBSOCKET_PORT: u16 = 81;

/// Classic DNS-over-UDP datagram limit.
pub const DNS_DATAGRAM_LEN: usize = 512;

/// Bytes written per chunk while streaming content, with a scheduler yield after each.
pub const CHUNK_SIZE: usize = 1024;

/// Hard ceiling on an HTTP request head; exceeding it yields `413`.
pub const REQUEST_BUFFER_LEN: usize = 1024;

/// Hard ceiling on a WebSocket upgrade request.
pub const HANDSHAKE_BUFFER_LEN: usize = 1024;

/// Largest text payload relayed between chat clients.
pub const MAX_MESSAGE_LEN: usize = 1024;

/// Receive buffer for one client: a maximal payload plus the largest client frame header.
pub const FRAME_BUFFER_LEN: usize = MAX_MESSAGE_LEN + 14;

/// Capacity of one encoded server frame.
pub const OUTBOUND_FRAME_LEN: usize = MAX_MESSAGE_LEN + 10;

/// Frames that may queue for one client before it counts as a failed delivery.
pub const OUTBOX_DEPTH: usize = 4;

/// Concurrent HTTP connections served.
pub const HTTP_WORKERS: usize = 2;

/// WebSocket accept loops: one per registry slot plus one that can take and refuse
/// the connection past the ceiling.
pub const WEBSOCKET_WORKERS: usize = MAX_CONNECTIONS + 1;

/// Lease duration handed to DHCP clients, in seconds.
pub const DHCP_LEASE_SECONDS: u32 = 3600;

/// Sent to each client right after it joins.
pub const WELCOME_MESSAGE: &str =
    r#"{"type":"message","sender":"System","content":"Welcome to the chat!"}"#;

#[cfg(feature = "wifi")]
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
#[cfg(feature = "wifi")]
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
#[cfg(feature = "wifi")]
pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(15);
#[cfg(feature = "wifi")]
pub const WEBSOCKET_KEEP_ALIVE: Duration = Duration::from_secs(30);
#[cfg(feature = "wifi")]
pub const WEBSOCKET_IDLE_TIMEOUT: Duration = Duration::from_secs(120);
#[cfg(feature = "wifi")]
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(500);
#[cfg(feature = "wifi")]
pub const CLOSE_LINGER: Duration = Duration::from_millis(100);
