//! WebSocket accept loops and per-client outboxes.
//!
//! Each upgraded connection is served by its own worker task. The shared [`BroadcastHub`]
//! sits behind a blocking mutex; delivering to a client only enqueues an encoded frame in
//! that client's outbox, and the client's worker writes it out. A full outbox fails the
//! delivery, the hub evicts the client, and the eviction signal ends its worker.

#![allow(clippy::future_not_send, reason = "single-threaded")]

use core::cell::RefCell;

use defmt::{Display2Format, debug, info, warn};
use embassy_executor::Spawner;
use embassy_futures::select::{Either3, select3};
use embassy_net::{Stack, tcp::TcpSocket};
use embassy_sync::blocking_mutex::{Mutex, raw::CriticalSectionRawMutex};
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::Timer;
use embedded_io_async::Write as _;
use heapless::Vec;

use super::frame::{FrameHeader, Opcode, encode_text_frame};
use super::handshake::{UpgradeResponse, accept_key, client_key, write_upgrade_response};
use super::inbound::{Flow, drain_frames};
use super::registry::{BroadcastHub, ClientId, FrameSink};
use crate::connection::{finish_connection, read_head};
use crate::request_head::{HeadBuffer, HeadStatus, RequestHead};
use crate::shared_constants::{
    ACCEPT_RETRY_DELAY, FRAME_BUFFER_LEN, HANDSHAKE_BUFFER_LEN, HANDSHAKE_TIMEOUT,
    MAX_CONNECTIONS, OUTBOUND_FRAME_LEN, OUTBOX_DEPTH, SOCKET_TIMEOUT, WEBSOCKET_IDLE_TIMEOUT,
    WEBSOCKET_KEEP_ALIVE, WEBSOCKET_PORT, WEBSOCKET_WORKERS, WELCOME_MESSAGE,
};
use crate::{Error, Result};

const RX_BUFFER_LEN: usize = 1536;
const TX_BUFFER_LEN: usize = 2048;
const READ_CHUNK_LEN: usize = 512;

/// One encoded server frame, ready to write.
pub type OutboundFrame = Vec<u8, OUTBOUND_FRAME_LEN>;

type FrameBuffer = Vec<u8, FRAME_BUFFER_LEN>;

struct Outbox {
    frames: Channel<CriticalSectionRawMutex, OutboundFrame, OUTBOX_DEPTH>,
    evicted: Signal<CriticalSectionRawMutex, ()>,
}

impl Outbox {
    const fn new() -> Self {
        Self {
            frames: Channel::new(),
            evicted: Signal::new(),
        }
    }
}

/// Outboxes indexed by registry slot.
pub struct Outboxes([Outbox; MAX_CONNECTIONS]);

impl Outboxes {
    const fn new() -> Self {
        Self([const { Outbox::new() }; MAX_CONNECTIONS])
    }

    fn get(&self, slot: usize) -> Result<&Outbox> {
        self.0.get(slot).ok_or(Error::ConnectionLimit)
    }
}

impl FrameSink for Outboxes {
    fn deliver(&self, slot: usize, text: &[u8]) -> Result<()> {
        let outbox = self.get(slot)?;
        let mut frame = OutboundFrame::new();
        frame
            .resize_default(OUTBOUND_FRAME_LEN)
            .map_err(|()| Error::BufferTooSmall)?;
        let len = encode_text_frame(text, &mut frame)?;
        frame.truncate(len);
        outbox.frames.try_send(frame).map_err(|_| Error::OutboxFull)
    }

    fn open(&self, slot: usize) {
        if let Ok(outbox) = self.get(slot) {
            outbox.frames.clear();
            outbox.evicted.reset();
        }
    }

    fn evict(&self, slot: usize) {
        if let Ok(outbox) = self.get(slot) {
            outbox.evicted.signal(());
        }
    }
}

/// The chat server: hub, outboxes and the accept loops on [`WEBSOCKET_PORT`].
///
/// Meant to live in a `static`:
///
/// ```rust,ignore
/// static WEBSOCKET: WebSocketServer = WebSocketServer::new();
/// WEBSOCKET.spawn(stack, spawner)?;
/// ```
pub struct WebSocketServer {
    hub: Mutex<CriticalSectionRawMutex, RefCell<BroadcastHub<MAX_CONNECTIONS>>>,
    outboxes: Outboxes,
}

impl WebSocketServer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hub: Mutex::new(RefCell::new(BroadcastHub::new())),
            outboxes: Outboxes::new(),
        }
    }

    /// Start [`WEBSOCKET_WORKERS`] accept loops.
    ///
    /// # Errors
    /// Returns [`Error::TaskSpawn`] if the task pool is already used up.
    pub fn spawn(&'static self, stack: &'static Stack<'static>, spawner: Spawner) -> Result<()> {
        for worker in 0..WEBSOCKET_WORKERS {
            let token = websocket_worker_task(stack, self, worker).map_err(Error::TaskSpawn)?;
            spawner.spawn(token);
        }
        Ok(())
    }

    /// Clients currently registered.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.hub.lock(|hub| hub.borrow().len())
    }

    /// `true` once [`MAX_CONNECTIONS`] clients are registered.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.hub.lock(|hub| hub.borrow().is_full())
    }

    fn join(&self) -> Result<ClientId> {
        self.hub.lock(|hub| {
            hub.borrow_mut()
                .join(&self.outboxes, WELCOME_MESSAGE.as_bytes())
        })
    }

    fn leave(&self, id: ClientId) -> bool {
        self.hub
            .lock(|hub| hub.borrow_mut().leave(id, &self.outboxes))
    }

    fn broadcast(&self, sender: ClientId, text: &[u8]) -> usize {
        self.hub
            .lock(|hub| hub.borrow_mut().broadcast(sender, text, &self.outboxes))
    }

    async fn serve(&self, socket: &mut TcpSocket<'_>) -> Result<()> {
        if self.is_at_capacity() {
            info!("WebSocket limit of {} reached, refusing connection", MAX_CONNECTIONS);
            return Err(Error::ConnectionLimit);
        }

        let inbound = upgrade(socket).await?;

        let id = self.join()?;
        info!(
            "WebSocket client joined in slot {}, {} connected",
            id.slot(),
            self.user_count()
        );

        socket.set_keep_alive(Some(WEBSOCKET_KEEP_ALIVE));
        socket.set_timeout(Some(WEBSOCKET_IDLE_TIMEOUT));

        let result = self.relay(socket, id, inbound).await;
        if self.leave(id) {
            info!("WebSocket client left, {} connected", self.user_count());
        }
        result
    }

    async fn relay(
        &self,
        socket: &mut TcpSocket<'_>,
        id: ClientId,
        mut inbound: FrameBuffer,
    ) -> Result<()> {
        let outbox = self.outboxes.get(id.slot())?;
        let (mut reader, mut writer) = socket.split();
        let mut chunk = [0u8; READ_CHUNK_LEN];

        loop {
            let flow = drain_frames(&mut inbound, |text| {
                let delivered = self.broadcast(id, text);
                debug!(
                    "Relayed {} bytes from slot {} to {} clients",
                    text.len(),
                    id.slot(),
                    delivered
                );
            })?;
            if flow == Flow::Close {
                let close = FrameHeader::new(Opcode::Close, 0);
                let _ = writer.write_all(close.as_bytes()).await;
                return Ok(());
            }

            let room = FRAME_BUFFER_LEN.saturating_sub(inbound.len());
            let read_into = chunk.get_mut(..room.min(READ_CHUNK_LEN)).unwrap_or_default();

            // Eviction is polled first so an evicted client never writes another frame.
            let event = select3(
                outbox.evicted.wait(),
                outbox.frames.receive(),
                reader.read(read_into),
            )
            .await;

            match event {
                Either3::First(()) => return Err(Error::Evicted),
                Either3::Second(frame) => writer.write_all(&frame).await?,
                Either3::Third(read) => {
                    let n = read?;
                    if n == 0 {
                        return Err(Error::PeerClosed);
                    }
                    let received = chunk.get(..n).unwrap_or_default();
                    inbound
                        .extend_from_slice(received)
                        .map_err(|()| Error::FrameTooLarge)?;
                }
            }
        }
    }
}

impl Default for WebSocketServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Read the upgrade request and answer it. Returns any bytes that followed the request,
/// which belong to the first frame.
async fn upgrade(socket: &mut TcpSocket<'_>) -> Result<FrameBuffer> {
    let mut head = HeadBuffer::<HANDSHAKE_BUFFER_LEN>::new();
    if read_head(socket, &mut head, HANDSHAKE_TIMEOUT).await? == HeadStatus::Overflow {
        return Err(Error::RequestTooLarge);
    }

    let request = RequestHead::parse(head.head().unwrap_or_default())?;
    let key = client_key(&request)?;
    let mut response = UpgradeResponse::new();
    write_upgrade_response(&accept_key(key), &mut response)?;
    socket.write_all(response.as_bytes()).await?;

    let mut inbound = FrameBuffer::new();
    inbound
        .extend_from_slice(head.trailing())
        .map_err(|()| Error::FrameTooLarge)?;
    Ok(inbound)
}

#[embassy_executor::task(pool_size = WEBSOCKET_WORKERS)]
async fn websocket_worker_task(
    stack: &'static Stack<'static>,
    server: &'static WebSocketServer,
    worker: usize,
) -> ! {
    let mut rx_buffer = [0u8; RX_BUFFER_LEN];
    let mut tx_buffer = [0u8; TX_BUFFER_LEN];
    info!("WebSocket worker {} listening on port {}", worker, WEBSOCKET_PORT);

    loop {
        let mut socket = TcpSocket::new(*stack, &mut rx_buffer, &mut tx_buffer);
        socket.set_timeout(Some(SOCKET_TIMEOUT));

        if let Err(err) = socket.accept(WEBSOCKET_PORT).await {
            warn!("WebSocket accept error: {:?}", err);
            Timer::after(ACCEPT_RETRY_DELAY).await;
            continue;
        }

        match server.serve(&mut socket).await {
            Ok(()) | Err(Error::PeerClosed) => debug!("WebSocket worker {} closed", worker),
            Err(err) => info!("WebSocket worker {}: {}", worker, Display2Format(&err)),
        }
        finish_connection(&mut socket).await;
    }
}
