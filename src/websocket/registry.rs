//! The authoritative set of connected chat clients and the broadcast fan-out over it.
//!
//! [`ClientRegistry`] only tracks membership. [`BroadcastHub`] owns a registry and does every
//! membership change together with the user-count announcement that must follow it, so the
//! two can never drift apart. Delivery goes through a [`FrameSink`]; on the device that is a
//! set of per-client outboxes, in tests it is a recorder.

use core::fmt::Write as _;

use heapless::{String, Vec};

use crate::{Error, Result};

/// Identity of one registered client.
///
/// The slot is reused after the client leaves; the serial is not, so a stale `ClientId`
/// never matches the slot's next occupant.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClientId {
    slot: usize,
    serial: u32,
}

impl ClientId {
    /// Registry slot, also the index of the client's outbox.
    #[must_use]
    pub const fn slot(self) -> usize {
        self.slot
    }
}

/// Fixed-capacity membership of upgraded WebSocket connections.
///
/// `len() <= N` always holds: [`register`](Self::register) refuses once no slot is free, and
/// [`unregister`](Self::unregister) of an id that is already gone changes nothing.
///
/// An evicted client stops counting as a member at once, but its slot stays reserved until
/// the task that owns the connection calls [`unregister`](Self::unregister). Until then the
/// slot's outbox still belongs to that task and cannot be handed to a newcomer.
#[derive(Debug)]
pub struct ClientRegistry<const N: usize> {
    slots: [Slot; N],
    len: usize,
    next_serial: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Slot {
    Free,
    Member(u32),
    /// Evicted; waiting for its owner to let go.
    Draining(u32),
}

impl<const N: usize> ClientRegistry<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [Slot::Free; N],
            len: 0,
            next_serial: 0,
        }
    }

    /// Members, not counting evicted clients whose slot is still reserved.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.len >= N
    }

    #[must_use]
    pub fn contains(&self, id: ClientId) -> bool {
        self.slots.get(id.slot) == Some(&Slot::Member(id.serial))
    }

    /// `true` while `id` is evicted but its owner has not yet unregistered it.
    #[must_use]
    pub fn is_draining(&self, id: ClientId) -> bool {
        self.slots.get(id.slot) == Some(&Slot::Draining(id.serial))
    }

    /// Add a client in the first free slot.
    ///
    /// # Errors
    /// Returns [`Error::ConnectionLimit`] when no slot is free, which includes slots still
    /// held by evicted clients.
    pub fn register(&mut self) -> Result<ClientId> {
        let (slot, entry) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, entry)| **entry == Slot::Free)
            .ok_or(Error::ConnectionLimit)?;

        let serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1);
        *entry = Slot::Member(serial);
        self.len = self.len.saturating_add(1);
        Ok(ClientId { slot, serial })
    }

    /// Remove a client and free its slot. Returns the new size if the client was a member,
    /// `None` if it had already been removed (evicted, or unregistered before).
    pub fn unregister(&mut self, id: ClientId) -> Option<usize> {
        let entry = self.slots.get_mut(id.slot)?;
        match *entry {
            Slot::Member(serial) if serial == id.serial => {
                *entry = Slot::Free;
                self.len = self.len.saturating_sub(1);
                Some(self.len)
            }
            Slot::Draining(serial) if serial == id.serial => {
                *entry = Slot::Free;
                None
            }
            _ => None,
        }
    }

    /// Drop a client from the membership but keep its slot reserved for its owner. Returns
    /// the new size if the client was a member.
    pub fn evict(&mut self, id: ClientId) -> Option<usize> {
        let entry = self.slots.get_mut(id.slot)?;
        if *entry != Slot::Member(id.serial) {
            return None;
        }
        *entry = Slot::Draining(id.serial);
        self.len = self.len.saturating_sub(1);
        Some(self.len)
    }

    /// Registered clients in slot order.
    pub fn members(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| match *entry {
                Slot::Member(serial) => Some(ClientId { slot, serial }),
                Slot::Free | Slot::Draining(_) => None,
            })
    }
}

impl<const N: usize> Default for ClientRegistry<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the hub sends text messages.
pub trait FrameSink {
    /// Queue one text message for the client in `slot`.
    ///
    /// # Errors
    /// Any error counts as a failed delivery and evicts the client.
    fn deliver(&self, slot: usize, text: &[u8]) -> Result<()>;

    /// `slot` was just given to a new client; drop anything left from its previous owner,
    /// which has already let go of it.
    fn open(&self, _slot: usize) {}

    /// The client in `slot` was removed because a delivery to it failed. The slot stays
    /// reserved until the client's owner leaves.
    fn evict(&self, _slot: usize) {}
}

/// `{"type":"userCount","count":N}`
pub type UserCountMessage = String<64>;

#[must_use]
pub fn user_count_message(count: usize) -> UserCountMessage {
    let mut message = UserCountMessage::new();
    // Cannot fail: the longest `usize` still fits.
    let _ = write!(message, r#"{{"type":"userCount","count":{count}}}"#);
    message
}

/// Registry plus broadcast rules.
///
/// Every net change in membership is followed by exactly one user-count broadcast carrying
/// the size at that moment. Deliveries that fail evict their client, which is itself a
/// membership change; the evictions are worked off one at a time until none are pending.
#[derive(Debug, Default)]
pub struct BroadcastHub<const N: usize> {
    registry: ClientRegistry<N>,
}

// Clients whose delivery failed and who still await eviction.
type Pending<const N: usize> = Vec<ClientId, N>;

impl<const N: usize> BroadcastHub<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            registry: ClientRegistry::new(),
        }
    }

    #[must_use]
    pub const fn registry(&self) -> &ClientRegistry<N> {
        &self.registry
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.registry.is_full()
    }

    /// Register a client that finished its handshake, announce the new count to everyone
    /// (the newcomer included), then queue `welcome` for the newcomer.
    ///
    /// # Errors
    /// Returns [`Error::ConnectionLimit`] if the registry is full, or [`Error::Evicted`] if
    /// delivering to the newcomer failed and it was removed again.
    pub fn join<S: FrameSink>(&mut self, sink: &S, welcome: &[u8]) -> Result<ClientId> {
        let id = self.registry.register()?;
        sink.open(id.slot);

        let mut pending = Pending::<N>::new();
        self.announce_count(sink, &mut pending);
        if self.registry.contains(id) && sink.deliver(id.slot, welcome).is_err() {
            mark_failed(&mut pending, id);
        }
        self.settle(sink, &mut pending);

        if self.registry.contains(id) {
            Ok(id)
        } else {
            // Nobody owns the connection yet, so the slot can go straight back.
            self.registry.unregister(id);
            Err(Error::Evicted)
        }
    }

    /// Remove a client whose connection ended and free its slot. Returns `false` if it had
    /// already been evicted, in which case nothing is announced.
    pub fn leave<S: FrameSink>(&mut self, id: ClientId, sink: &S) -> bool {
        if self.registry.unregister(id).is_none() {
            return false;
        }
        let mut pending = Pending::<N>::new();
        self.announce_count(sink, &mut pending);
        self.settle(sink, &mut pending);
        true
    }

    /// Relay a text message from `sender` to every other client. Returns how many clients
    /// accepted it; an evicted sender reaches nobody.
    pub fn broadcast<S: FrameSink>(&mut self, sender: ClientId, text: &[u8], sink: &S) -> usize {
        if !self.registry.contains(sender) {
            return 0;
        }
        let mut pending = Pending::<N>::new();
        let delivered = self.fan_out(Some(sender), text, sink, &mut pending);
        self.settle(sink, &mut pending);
        delivered
    }

    fn announce_count<S: FrameSink>(&self, sink: &S, pending: &mut Pending<N>) {
        let message = user_count_message(self.registry.len());
        self.fan_out(None, message.as_bytes(), sink, pending);
    }

    fn fan_out<S: FrameSink>(
        &self,
        except: Option<ClientId>,
        text: &[u8],
        sink: &S,
        pending: &mut Pending<N>,
    ) -> usize {
        let mut delivered = 0usize;
        for id in self.registry.members() {
            if Some(id) == except {
                continue;
            }
            if sink.deliver(id.slot, text).is_ok() {
                delivered = delivered.saturating_add(1);
            } else {
                mark_failed(pending, id);
            }
        }
        delivered
    }

    fn settle<S: FrameSink>(&mut self, sink: &S, pending: &mut Pending<N>) {
        while let Some(id) = pending.pop() {
            if self.registry.evict(id).is_some() {
                sink.evict(id.slot);
                self.announce_count(sink, pending);
            }
        }
    }
}

fn mark_failed<const N: usize>(pending: &mut Pending<N>, id: ClientId) {
    if !pending.contains(&id) {
        // Cannot fail: at most `N` distinct members are ever pending.
        let _ = pending.push(id);
    }
}
