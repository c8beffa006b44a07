//! Captive-portal HTTP responder.
//!
//! Serves the chat page on any path, answers the OS connectivity probes with a redirect to
//! the access point, and swaps in a "limit reached" page while the chat is full. Every
//! response closes the connection.

#![allow(clippy::future_not_send, reason = "single-threaded")]

use core::fmt::Write as _;

use heapless::String;

use crate::{Error, Result};

/// Substrings of request paths that operating systems use to detect a captive portal.
pub const CAPTIVE_PROBE_PATTERNS: [&str; 3] = ["generate_204", "connecttest.txt", "redirect"];

/// What to do with a request, decided from its path and the chat's occupancy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Route<'a> {
    /// The chat is full; serve the limit page whatever the path.
    LimitExceeded,
    /// A connectivity probe; redirect it to the portal.
    CaptivePortalProbe,
    /// Ordinary content at this path.
    Content(&'a str),
}

/// Route a request. The capacity check comes first, then the probe patterns.
#[must_use]
pub fn route(path: &str, at_capacity: bool) -> Route<'_> {
    if at_capacity {
        Route::LimitExceeded
    } else if CAPTIVE_PROBE_PATTERNS
        .iter()
        .any(|pattern| path.contains(pattern))
    {
        Route::CaptivePortalProbe
    } else {
        Route::Content(path)
    }
}

/// Response statuses this server sends.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    Ok,
    Found,
    BadRequest,
    NotFound,
    PayloadTooLarge,
}

impl Status {
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::Found => 302,
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::PayloadTooLarge => 413,
        }
    }

    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Found => "Found",
            Self::BadRequest => "Bad Request",
            Self::NotFound => "Not Found",
            Self::PayloadTooLarge => "Payload Too Large",
        }
    }
}

/// A static resource.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Page {
    pub path: &'static str,
    pub content_type: &'static str,
    pub body: &'static [u8],
}

impl Page {
    #[must_use]
    pub const fn html(path: &'static str, body: &'static [u8]) -> Self {
        Self {
            path,
            content_type: "text/html; charset=utf-8",
            body,
        }
    }
}

/// Resolves request paths to content. Shared by every HTTP worker, hence `Sync`.
pub trait ContentSource: Sync {
    /// The page for `path`, or `None` for `404`.
    fn resolve(&self, path: &str) -> Option<Page>;
}

/// A fixed page table with an optional catch-all.
#[derive(Clone, Copy, Debug)]
pub struct StaticContent {
    pages: &'static [Page],
    fallback: Option<Page>,
}

impl StaticContent {
    #[must_use]
    pub const fn new(pages: &'static [Page]) -> Self {
        Self {
            pages,
            fallback: None,
        }
    }

    /// Serve `page` for every path not in the table.
    #[must_use]
    pub const fn with_fallback(mut self, page: Page) -> Self {
        self.fallback = Some(page);
        self
    }
}

impl ContentSource for StaticContent {
    fn resolve(&self, path: &str) -> Option<Page> {
        let path = path.split(['?', '#']).next().unwrap_or(path);
        self.pages
            .iter()
            .find(|page| page.path == path)
            .copied()
            .or(self.fallback)
    }
}

/// The response to a parsed request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Reply {
    LimitExceeded,
    Redirect,
    Page(Page),
    NotFound,
}

impl Reply {
    #[must_use]
    pub const fn status(self) -> Status {
        match self {
            Self::LimitExceeded | Self::Page(_) => Status::Ok,
            Self::Redirect => Status::Found,
            Self::NotFound => Status::NotFound,
        }
    }
}

#[must_use]
pub fn reply_for(path: &str, at_capacity: bool, content: &dyn ContentSource) -> Reply {
    match route(path, at_capacity) {
        Route::LimitExceeded => Reply::LimitExceeded,
        Route::CaptivePortalProbe => Reply::Redirect,
        Route::Content(path) => content.resolve(path).map_or(Reply::NotFound, Reply::Page),
    }
}

/// Status line and headers of one response.
pub type ResponseHead = String<256>;

/// Write a response head for a body of `content_length` bytes.
///
/// # Errors
/// Returns [`Error::BufferTooSmall`] if the head does not fit.
pub fn write_response_head(
    out: &mut ResponseHead,
    status: Status,
    content_type: &str,
    content_length: usize,
) -> Result<()> {
    out.clear();
    write!(
        out,
        "HTTP/1.1 {} {}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {content_length}\r\n\
         Connection: close\r\n\
         \r\n",
        status.code(),
        status.reason()
    )
    .map_err(|_| Error::BufferTooSmall)
}

/// Write a `302` pointing at the portal root on `ap_ip`.
///
/// # Errors
/// Returns [`Error::BufferTooSmall`] if the head does not fit.
pub fn write_redirect(out: &mut ResponseHead, ap_ip: [u8; 4]) -> Result<()> {
    let [a, b, c, d] = ap_ip;
    out.clear();
    write!(
        out,
        "HTTP/1.1 302 Found\r\n\
         Location: http://{a}.{b}.{c}.{d}/\r\n\
         Content-Length: 0\r\n\
         Connection: close\r\n\
         \r\n"
    )
    .map_err(|_| Error::BufferTooSmall)
}

pub type LimitPage = String<1536>;

/// The page shown while the chat is full, naming the limit.
#[must_use]
pub fn limit_exceeded_page(max_connections: usize) -> LimitPage {
    let mut page = LimitPage::new();
    // Cannot fail: the template is well under capacity.
    let _ = write!(
        page,
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Connection Limit</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <style>
        body {{ font-family: Arial; max-width: 600px; margin: 0 auto; padding: 20px; text-align: center; }}
        .container {{ margin-top: 50px; }}
        h1 {{ color: #d32f2f; }}
        p {{ font-size: 18px; line-height: 1.6; }}
        .retry-btn {{ display: inline-block; margin-top: 20px; padding: 10px 20px; background-color: #2196f3; color: white; text-decoration: none; border-radius: 4px; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Connection Limit Reached</h1>
        <p>The chat server has reached the maximum number of simultaneous connections ({max_connections}).</p>
        <p>Please try again later when a place frees up.</p>
        <a href="/" class="retry-btn">Try Again</a>
    </div>
</body>
</html>
"#
    );
    page
}

#[cfg(feature = "wifi")]
pub use task::HttpServer;

#[cfg(feature = "wifi")]
mod task {
    use defmt::{Display2Format, debug, info, warn};
    use embassy_executor::Spawner;
    use embassy_futures::yield_now;
    use embassy_net::{Stack, tcp::TcpSocket};
    use embassy_time::Timer;
    use embedded_io_async::Write as _;

    use super::{
        ContentSource, Reply, ResponseHead, Status, limit_exceeded_page, reply_for,
        write_redirect, write_response_head,
    };
    use crate::connection::{finish_connection, read_head};
    use crate::request_head::{HeadBuffer, HeadStatus, RequestHead};
    use crate::shared_constants::{
        ACCEPT_RETRY_DELAY, CHUNK_SIZE, HTTP_PORT, HTTP_WORKERS, MAX_CONNECTIONS,
        REQUEST_BUFFER_LEN, REQUEST_TIMEOUT, SOCKET_TIMEOUT,
    };
    use crate::websocket::WebSocketServer;
    use crate::{Error, Result};

    const RX_BUFFER_LEN: usize = 1024;
    const TX_BUFFER_LEN: usize = 2048;

    /// The HTTP side of the portal: content, the chat it reports on, and the address
    /// probes are redirected to.
    pub struct HttpServer {
        content: &'static dyn ContentSource,
        websocket: &'static WebSocketServer,
        ap_ip: [u8; 4],
    }

    impl HttpServer {
        #[must_use]
        pub const fn new(
            content: &'static dyn ContentSource,
            websocket: &'static WebSocketServer,
            ap_ip: [u8; 4],
        ) -> Self {
            Self {
                content,
                websocket,
                ap_ip,
            }
        }

        /// Start [`HTTP_WORKERS`] accept loops on [`HTTP_PORT`].
        ///
        /// # Errors
        /// Returns [`Error::TaskSpawn`] if the task pool is already used up.
        pub fn spawn(
            &'static self,
            stack: &'static Stack<'static>,
            spawner: Spawner,
        ) -> Result<()> {
            for worker in 0..HTTP_WORKERS {
                let token = http_worker_task(stack, self, worker).map_err(Error::TaskSpawn)?;
                spawner.spawn(token);
            }
            Ok(())
        }

        async fn serve(&self, socket: &mut TcpSocket<'_>) -> Result<Status> {
            let mut head = HeadBuffer::<REQUEST_BUFFER_LEN>::new();
            let bytes = match read_head(socket, &mut head, REQUEST_TIMEOUT).await {
                Ok(HeadStatus::Overflow) => {
                    return send_plain(socket, Status::PayloadTooLarge).await;
                }
                Ok(_) => head.head().unwrap_or_else(|| head.as_bytes()),
                // Serve whatever request line made it before the deadline.
                Err(Error::Timeout) if !head.is_empty() => head.as_bytes(),
                Err(err) => return Err(err),
            };

            let Ok(request) = RequestHead::parse(bytes) else {
                return send_plain(socket, Status::BadRequest).await;
            };
            debug!("HTTP {} {}", request.method(), request.path());

            let reply = reply_for(
                request.path(),
                self.websocket.is_at_capacity(),
                self.content,
            );
            self.send(socket, reply).await?;
            Ok(reply.status())
        }

        async fn send(&self, socket: &mut TcpSocket<'_>, reply: Reply) -> Result<()> {
            let mut response = ResponseHead::new();
            match reply {
                Reply::LimitExceeded => {
                    let page = limit_exceeded_page(MAX_CONNECTIONS);
                    write_response_head(
                        &mut response,
                        Status::Ok,
                        "text/html; charset=utf-8",
                        page.len(),
                    )?;
                    socket.write_all(response.as_bytes()).await?;
                    stream_body(socket, page.as_bytes()).await
                }
                Reply::Redirect => {
                    write_redirect(&mut response, self.ap_ip)?;
                    socket.write_all(response.as_bytes()).await?;
                    Ok(())
                }
                Reply::Page(page) => {
                    write_response_head(
                        &mut response,
                        Status::Ok,
                        page.content_type,
                        page.body.len(),
                    )?;
                    socket.write_all(response.as_bytes()).await?;
                    stream_body(socket, page.body).await
                }
                Reply::NotFound => send_plain(socket, Status::NotFound).await.map(|_| ()),
            }
        }
    }

    async fn send_plain(socket: &mut TcpSocket<'_>, status: Status) -> Result<Status> {
        let mut response = ResponseHead::new();
        let body = status.reason();
        write_response_head(&mut response, status, "text/plain", body.len())?;
        socket.write_all(response.as_bytes()).await?;
        socket.write_all(body.as_bytes()).await?;
        Ok(status)
    }

    async fn stream_body(socket: &mut TcpSocket<'_>, body: &[u8]) -> Result<()> {
        for chunk in body.chunks(CHUNK_SIZE) {
            socket.write_all(chunk).await?;
            yield_now().await;
        }
        Ok(())
    }

    #[embassy_executor::task(pool_size = HTTP_WORKERS)]
    async fn http_worker_task(
        stack: &'static Stack<'static>,
        server: &'static HttpServer,
        worker: usize,
    ) -> ! {
        let mut rx_buffer = [0u8; RX_BUFFER_LEN];
        let mut tx_buffer = [0u8; TX_BUFFER_LEN];
        info!("HTTP worker {} listening on port {}", worker, HTTP_PORT);

        loop {
            let mut socket = TcpSocket::new(*stack, &mut rx_buffer, &mut tx_buffer);
            socket.set_timeout(Some(SOCKET_TIMEOUT));

            if let Err(err) = socket.accept(HTTP_PORT).await {
                warn!("HTTP accept error: {:?}", err);
                Timer::after(ACCEPT_RETRY_DELAY).await;
                continue;
            }

            match server.serve(&mut socket).await {
                Ok(status) => debug!("HTTP worker {} answered {}", worker, status.code()),
                Err(Error::PeerClosed | Error::Timeout) => {
                    debug!("HTTP worker {}: nothing to answer", worker);
                }
                Err(err) => warn!("HTTP worker {}: {}", worker, Display2Format(&err)),
            }
            finish_connection(&mut socket).await;
        }
    }
}
