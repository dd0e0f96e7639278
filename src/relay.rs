//! Event relay: replay buffer, deferred completion, and channel binding.
//!
//! Every outbound event for a session is appended to a bounded FIFO
//! replay buffer and, when a channel is bound, delivered immediately.
//! On (re)attachment the buffer is drained to the new channel in publish
//! order, followed by any deferred terminal event.

use std::collections::VecDeque;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::protocol::ServerEvent;

/// Non-owning handle to the currently attached duplex channel.
///
/// Wraps the outbound queue of one WebSocket connection. The channel's
/// lifecycle is independent of any session; a closed channel behaves
/// exactly like no channel.
#[derive(Debug, Clone)]
pub struct Channel(mpsc::Sender<ServerEvent>);

impl Channel {
    /// Wrap an outbound event queue.
    #[must_use]
    pub fn new(tx: mpsc::Sender<ServerEvent>) -> Self {
        Self(tx)
    }

    /// Attempt delivery. Returns `false` when the peer is gone.
    ///
    /// Delivery is best-effort: a full queue is treated the same as a
    /// closed socket, and the event survives in the replay buffer either
    /// way.
    pub fn send(&self, event: ServerEvent) -> bool {
        match self.0.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("outbound channel full, dropping live delivery");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Whether the peer has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// Per-session relay state: live buffer, deferred terminal, bound channel.
#[derive(Debug)]
pub struct RelayState {
    buffer: VecDeque<ServerEvent>,
    capacity: usize,
    deferred_terminal: Option<ServerEvent>,
    channel: Option<Channel>,
}

impl RelayState {
    /// Create empty relay state with the given buffer capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero; config validation rejects that
    /// before any session exists.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "relay buffer capacity must be non-zero");
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            deferred_terminal: None,
            channel: None,
        }
    }

    /// Append to the buffer (evicting the oldest beyond capacity) and
    /// deliver to the bound channel if one is present and open.
    pub fn publish(&mut self, event: ServerEvent) {
        self.buffer_push(event.clone());
        self.deliver(event);
    }

    /// Publish a terminal event.
    ///
    /// If a channel is attached the event is sent (and still buffered)
    /// like any other. Otherwise it goes into the single deferred
    /// terminal slot, overwriting any previous occupant, and is
    /// delivered verbatim on the next attachment — the two paths are
    /// mutually exclusive per completion, so reattachment never yields
    /// a duplicate.
    pub fn publish_terminal(&mut self, event: ServerEvent) {
        if self.channel_open() {
            self.buffer_push(event.clone());
            self.deliver(event);
        } else {
            if self.deferred_terminal.is_some() {
                debug!("overwriting previously deferred terminal event");
            }
            self.deferred_terminal = Some(event);
        }
    }

    /// Bind a channel, replay the buffer in publish order, then deliver
    /// and clear any deferred terminal event.
    pub fn attach(&mut self, channel: Channel) {
        for event in &self.buffer {
            if !channel.send(event.clone()) {
                // Peer vanished mid-replay; the buffer keeps everything
                // for the next attachment.
                self.channel = None;
                return;
            }
        }
        if let Some(terminal) = self.deferred_terminal.take() {
            if !channel.send(terminal.clone()) {
                self.deferred_terminal = Some(terminal);
                self.channel = None;
                return;
            }
        }
        self.channel = Some(channel);
    }

    /// Drop the bound channel reference, if any.
    pub fn detach(&mut self) {
        self.channel = None;
    }

    /// Whether a live, open channel is currently bound.
    #[must_use]
    pub fn channel_open(&self) -> bool {
        self.channel.as_ref().is_some_and(|c| !c.is_closed())
    }

    /// Events currently held in the replay buffer, oldest first.
    #[must_use]
    pub fn buffered(&self) -> impl Iterator<Item = &ServerEvent> {
        self.buffer.iter()
    }

    /// Number of buffered events.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether a terminal event is pending delivery.
    #[must_use]
    pub fn has_deferred_terminal(&self) -> bool {
        self.deferred_terminal.is_some()
    }

    fn buffer_push(&mut self, event: ServerEvent) {
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(event);
    }

    fn deliver(&mut self, event: ServerEvent) {
        if let Some(channel) = &self.channel {
            if !channel.send(event) {
                self.channel = None;
            }
        }
    }
}
