//! Registry of live channels keyed by subscription identifier.
//!
//! Exclusively owned and mutated by the connection task; channels never
//! touch it directly. Mass operations (resubscribe after reconnect, mass
//! disconnect) iterate in insertion order so reconnection cost is
//! predictable and deterministic.

use std::collections::HashMap;

use serde_json::Value;

use cable_core::{CableError, Identifier};

use crate::channel::{ChannelSlot, ChannelState};

#[derive(Default)]
pub(crate) struct Hub {
    slots: HashMap<Identifier, ChannelSlot>,
    order: Vec<Identifier>,
}

impl Hub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a channel under its derived identifier.
    ///
    /// The hub does not deduplicate beyond storing by identifier, but it
    /// refuses a second live registration for the same key — one wire
    /// subscription cannot back two independent channels.
    pub(crate) fn register(
        &mut self,
        identifier: Identifier,
        slot: ChannelSlot,
    ) -> Result<(), CableError> {
        if self.slots.contains_key(&identifier) {
            return Err(CableError::Config(format!(
                "already subscribed: {identifier}"
            )));
        }
        self.order.push(identifier.clone());
        self.slots.insert(identifier, slot);
        Ok(())
    }

    pub(crate) fn remove(&mut self, identifier: &Identifier) -> Option<ChannelSlot> {
        self.order.retain(|id| id != identifier);
        self.slots.remove(identifier)
    }

    pub(crate) fn get_mut(&mut self, identifier: &Identifier) -> Option<&mut ChannelSlot> {
        self.slots.get_mut(identifier)
    }

    /// Deliver a payload to the addressed channel. Unknown identifiers are
    /// logged and dropped, never an error — the server may reference
    /// subscriptions this client already forgot.
    pub(crate) fn dispatch(&self, identifier: &Identifier, payload: Value) -> bool {
        match self.slots.get(identifier) {
            Some(slot) => {
                slot.deliver(payload);
                true
            }
            None => {
                tracing::debug!(identifier = %identifier, "message for unknown channel dropped");
                false
            }
        }
    }

    /// Identifiers in insertion order.
    pub(crate) fn identifiers(&self) -> Vec<Identifier> {
        self.order.clone()
    }

    /// Close every channel (emitting `Closed`) and empty the registry.
    pub(crate) fn close_all(&mut self) {
        for slot in self.slots.values_mut() {
            slot.close(None);
        }
        self.slots.clear();
        self.order.clear();
    }

    /// Drop the connection under every channel (fatal or recoverable) and
    /// prune the ones that ended up closed.
    pub(crate) fn drop_connection_all(&mut self, allow_reconnect: bool) {
        for slot in self.slots.values_mut() {
            slot.drop_connection(allow_reconnect);
        }
        self.prune_closed();
    }

    /// Closed channels are pruned immediately; the hub never holds one.
    pub(crate) fn prune_closed(&mut self) {
        self.order.retain(|identifier| {
            match self.slots.get(identifier) {
                Some(slot) if slot.state() == ChannelState::Closed => {
                    self.slots.remove(identifier);
                    false
                }
                Some(_) => true,
                None => false,
            }
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}
