//! TCP helpers shared by the HTTP and WebSocket accept loops.

#![allow(clippy::future_not_send, reason = "single-threaded")]

use embassy_net::tcp::TcpSocket;
use embassy_time::{Duration, Timer, with_timeout};

use crate::request_head::{HeadBuffer, HeadStatus};
use crate::shared_constants::{CLOSE_LINGER, SOCKET_TIMEOUT};
use crate::{Error, Result};

const READ_CHUNK_LEN: usize = 256;

/// Read until `head` holds a complete request head or fills up.
///
/// Never returns [`HeadStatus::Partial`]. Whatever arrived before an error stays in `head`,
/// so a caller can still act on a request cut short by [`Error::Timeout`].
///
/// # Errors
/// [`Error::Timeout`] after `timeout`, [`Error::PeerClosed`] on end of stream, or the socket
/// error.
pub async fn read_head<const N: usize>(
    socket: &mut TcpSocket<'_>,
    head: &mut HeadBuffer<N>,
    timeout: Duration,
) -> Result<HeadStatus> {
    with_timeout(timeout, async {
        let mut chunk = [0u8; READ_CHUNK_LEN];
        loop {
            let n = socket.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::PeerClosed);
            }
            match head.push(chunk.get(..n).unwrap_or_default()) {
                HeadStatus::Partial => {}
                status => return Ok(status),
            }
        }
    })
    .await?
}

/// Flush what is queued, send FIN, give the peer a moment to read it, then drop whatever
/// state is left.
pub async fn finish_connection(socket: &mut TcpSocket<'_>) {
    let _ = with_timeout(SOCKET_TIMEOUT, socket.flush()).await;
    socket.close();
    Timer::after(CLOSE_LINGER).await;
    socket.abort();
}
