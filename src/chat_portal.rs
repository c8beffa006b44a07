//! The appliance as one device: DNS spoofer, HTTP responder and WebSocket chat on a shared
//! network stack.
//!
//! ```rust,ignore
//! static CHAT_PORTAL: ChatPortalStatic = ChatPortal::new_static();
//! static CONTENT: StaticContent = StaticContent::new(&[]).with_fallback(CHAT_PAGE);
//!
//! let stack = start_access_point(pins, spawner).await?;
//! let chat_portal = ChatPortal::new(&CHAT_PORTAL, stack, &CONTENT, spawner)?;
//! info!("{} users online", chat_portal.user_count());
//! ```

#![allow(clippy::future_not_send, reason = "single-threaded")]

use defmt::info;
use embassy_executor::Spawner;
use embassy_net::{Ipv4Address, Stack};
use static_cell::StaticCell;

use crate::dns_server::dns_server_task;
use crate::http_server::{ContentSource, HttpServer};
use crate::shared_constants::{AP_IP, MAX_CONNECTIONS};
use crate::websocket::WebSocketServer;
use crate::{Error, Result};

/// Static resources for [`ChatPortal`].
pub struct ChatPortalStatic {
    websocket: WebSocketServer,
    http: StaticCell<HttpServer>,
    portal: StaticCell<ChatPortal>,
}

/// A running chat portal.
pub struct ChatPortal {
    websocket: &'static WebSocketServer,
}

impl ChatPortal {
    /// Create static resources for [`ChatPortal::new`].
    #[must_use]
    pub const fn new_static() -> ChatPortalStatic {
        ChatPortalStatic {
            websocket: WebSocketServer::new(),
            http: StaticCell::new(),
            portal: StaticCell::new(),
        }
    }

    /// Spawn the DNS, HTTP and WebSocket tasks on `stack`.
    ///
    /// # Errors
    /// Returns [`Error::TaskSpawn`] if a task pool is already used up.
    pub fn new(
        resources: &'static ChatPortalStatic,
        stack: &'static Stack<'static>,
        content: &'static dyn ContentSource,
        spawner: Spawner,
    ) -> Result<&'static Self> {
        let [a, b, c, d] = AP_IP;
        let dns_token =
            dns_server_task(stack, Ipv4Address::new(a, b, c, d)).map_err(Error::TaskSpawn)?;
        spawner.spawn(dns_token);

        resources.websocket.spawn(stack, spawner)?;

        let http: &'static HttpServer = resources
            .http
            .init(HttpServer::new(content, &resources.websocket, AP_IP));
        http.spawn(stack, spawner)?;

        info!("Chat portal up, at most {} users", MAX_CONNECTIONS);
        Ok(resources.portal.init(Self {
            websocket: &resources.websocket,
        }))
    }

    /// Users currently in the chat.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.websocket.user_count()
    }

    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.websocket.is_at_capacity()
    }
}
