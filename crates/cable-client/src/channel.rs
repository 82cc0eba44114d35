//! Per-subscription state machine and the user-facing channel handle.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use cable_core::{CableError, Identifier};

use crate::connection::Op;

/// Channel lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Constructed, not yet told to subscribe.
    Pending,
    /// Subscribe request sent, awaiting the server's verdict.
    Subscribing,
    /// Server confirmed the subscription.
    Connected,
    /// Connection lost; stays registered and eligible for resubscription.
    Disconnected,
    /// Terminal: explicit unsubscribe, rejection, or fatal closure.
    Closed,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Subscribing => write!(f, "subscribing"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Events a channel delivers to its owner.
#[derive(Debug)]
pub enum ChannelEvent {
    /// The server confirmed the subscription. Fires again after every
    /// successful resubscribe.
    Connected,
    /// The connection dropped. With `allow_reconnect: true` the channel
    /// stays registered and resubscribes once the connection returns.
    Disconnected { allow_reconnect: bool },
    /// Terminal. Carries the rejection error when the server refused the
    /// subscription; `None` for ordinary teardown.
    Closed { error: Option<CableError> },
    /// One application payload.
    Message(Value),
}

/// Hub-side bookkeeping for one subscription. All mutation happens on the
/// connection task; the user only ever sees the emitted [`ChannelEvent`]s.
pub(crate) struct ChannelSlot {
    channel: String,
    params: Value,
    state: ChannelState,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl ChannelSlot {
    pub(crate) fn new(
        channel: String,
        params: Value,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Self {
        Self {
            channel,
            params,
            state: ChannelState::Pending,
            events,
        }
    }

    pub(crate) fn channel_name(&self) -> &str {
        &self.channel
    }

    pub(crate) fn params(&self) -> &Value {
        &self.params
    }

    pub(crate) fn state(&self) -> ChannelState {
        self.state
    }

    fn emit(&self, event: ChannelEvent) {
        // The handle may have been dropped; a full teardown will prune us.
        let _ = self.events.send(event);
    }

    /// The subscribe command went out.
    pub(crate) fn set_subscribing(&mut self) {
        if matches!(self.state, ChannelState::Pending | ChannelState::Disconnected) {
            self.state = ChannelState::Subscribing;
        }
    }

    /// Server confirmed the subscription.
    pub(crate) fn confirm(&mut self) {
        if self.state == ChannelState::Closed {
            tracing::debug!(channel = %self.channel, "confirm for closed channel ignored");
            return;
        }
        self.state = ChannelState::Connected;
        self.emit(ChannelEvent::Connected);
    }

    /// Server refused the subscription: straight to `Closed`, no
    /// `Disconnected` event first — rejection is a distinct terminal
    /// outcome, not a connection loss.
    pub(crate) fn reject(&mut self, identifier: &Identifier, reason: Option<String>) {
        if self.state == ChannelState::Closed {
            return;
        }
        self.state = ChannelState::Closed;
        self.emit(ChannelEvent::Closed {
            error: Some(CableError::SubscriptionRejected {
                identifier: identifier.to_string(),
                reason,
            }),
        });
    }

    /// Resume without a resubscribe round-trip (recoverable closure).
    pub(crate) fn restore(&mut self) {
        if matches!(
            self.state,
            ChannelState::Disconnected | ChannelState::Subscribing
        ) {
            self.state = ChannelState::Connected;
            self.emit(ChannelEvent::Connected);
        }
    }

    /// The owning connection lost its transport.
    ///
    /// Recoverable losses move the channel to `Disconnected` (a channel
    /// already there stays silent — repeated failed reconnect attempts must
    /// not re-emit the event). Non-recoverable losses end in `Closed`.
    pub(crate) fn drop_connection(&mut self, allow_reconnect: bool) {
        match self.state {
            ChannelState::Closed => {}
            ChannelState::Pending => {
                // Never announced; nothing to disconnect.
                if !allow_reconnect {
                    self.state = ChannelState::Closed;
                    self.emit(ChannelEvent::Closed { error: None });
                }
            }
            ChannelState::Disconnected => {
                if !allow_reconnect {
                    self.state = ChannelState::Closed;
                    self.emit(ChannelEvent::Closed { error: None });
                }
            }
            ChannelState::Subscribing | ChannelState::Connected => {
                self.emit(ChannelEvent::Disconnected { allow_reconnect });
                if allow_reconnect {
                    self.state = ChannelState::Disconnected;
                } else {
                    self.state = ChannelState::Closed;
                    self.emit(ChannelEvent::Closed { error: None });
                }
            }
        }
    }

    /// Explicit teardown (unsubscribe or connection close).
    pub(crate) fn close(&mut self, error: Option<CableError>) {
        if self.state == ChannelState::Closed {
            return;
        }
        self.state = ChannelState::Closed;
        self.emit(ChannelEvent::Closed { error });
    }

    /// Deliver an application payload to the handle.
    pub(crate) fn deliver(&self, payload: Value) {
        if self.state == ChannelState::Connected {
            self.emit(ChannelEvent::Message(payload));
        } else {
            tracing::debug!(
                channel = %self.channel,
                state = %self.state,
                "payload for non-connected channel dropped"
            );
        }
    }
}

/// Handle to one logical subscription.
///
/// Obtained from `Connection::subscribe`. Events arrive in order on
/// [`next_event`](Channel::next_event); `perform` and `unsubscribe` are
/// forwarded to the owning connection. Dropping the handle unsubscribes.
pub struct Channel {
    identifier: Identifier,
    ops: mpsc::UnboundedSender<Op>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    detached: bool,
}

impl Channel {
    pub(crate) fn new(
        identifier: Identifier,
        ops: mpsc::UnboundedSender<Op>,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> Self {
        Self {
            identifier,
            ops,
            events,
            detached: false,
        }
    }

    /// The canonical identifier this subscription is keyed by.
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Next lifecycle or message event, in arrival order. `None` once the
    /// connection task is gone and the buffer is drained.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Non-blocking variant of [`next_event`](Channel::next_event).
    pub fn try_next_event(&mut self) -> Option<ChannelEvent> {
        self.events.try_recv().ok()
    }

    /// Run an application action on the server. Resolves once the command
    /// is handed to the transport; fails when the connection or this
    /// channel is not currently connected.
    pub async fn perform(&self, action: &str, payload: Value) -> Result<(), CableError> {
        let (reply, outcome) = oneshot::channel();
        self.ops
            .send(Op::Perform {
                identifier: self.identifier.clone(),
                action: action.to_owned(),
                payload,
                reply,
            })
            .map_err(|_| CableError::Closed)?;
        outcome.await.map_err(|_| CableError::Closed)?
    }

    /// Unsubscribe and discard the handle. The wire command is best-effort;
    /// the channel ends `Closed` regardless.
    pub fn unsubscribe(mut self) {
        self.detached = true;
        let _ = self.ops.send(Op::Unsubscribe {
            identifier: self.identifier.clone(),
        });
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if !self.detached {
            let _ = self.ops.send(Op::Unsubscribe {
                identifier: self.identifier.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn slot() -> (ChannelSlot, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelSlot::new("Room".into(), json!({"id": "1"}), tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> Vec<ChannelEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn happy_path_transitions() {
        let (mut slot, mut rx) = slot();
        assert_eq!(slot.state(), ChannelState::Pending);

        slot.set_subscribing();
        assert_eq!(slot.state(), ChannelState::Subscribing);

        slot.confirm();
        assert_eq!(slot.state(), ChannelState::Connected);
        assert!(matches!(rx.try_recv().unwrap(), ChannelEvent::Connected));
    }

    #[test]
    fn rejection_closes_without_disconnect() {
        let (mut slot, mut rx) = slot();
        slot.set_subscribing();
        slot.reject(&Identifier::from_raw("x"), Some("forbidden".into()));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ChannelEvent::Closed {
                error: Some(CableError::SubscriptionRejected { .. })
            }
        ));
        assert_eq!(slot.state(), ChannelState::Closed);
    }

    #[test]
    fn recoverable_loss_keeps_channel_alive() {
        let (mut slot, mut rx) = slot();
        slot.set_subscribing();
        slot.confirm();
        slot.drop_connection(true);

        assert_eq!(slot.state(), ChannelState::Disconnected);
        let events = drain(&mut rx);
        assert!(matches!(
            events.last().unwrap(),
            ChannelEvent::Disconnected {
                allow_reconnect: true
            }
        ));

        // A second failed reconnect attempt must not re-emit the event.
        slot.drop_connection(true);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn fatal_loss_emits_disconnect_then_close() {
        let (mut slot, mut rx) = slot();
        slot.set_subscribing();
        slot.confirm();
        drain(&mut rx);

        slot.drop_connection(false);
        let events = drain(&mut rx);
        assert!(matches!(
            events[0],
            ChannelEvent::Disconnected {
                allow_reconnect: false
            }
        ));
        assert!(matches!(events[1], ChannelEvent::Closed { error: None }));
        assert_eq!(slot.state(), ChannelState::Closed);
    }

    #[test]
    fn closed_is_terminal() {
        let (mut slot, mut rx) = slot();
        slot.close(None);
        drain(&mut rx);

        slot.confirm();
        slot.set_subscribing();
        slot.drop_connection(true);
        slot.close(None);
        slot.deliver(json!({"body": "hi"}));

        assert_eq!(slot.state(), ChannelState::Closed);
        assert!(drain(&mut rx).is_empty(), "closed channels emit nothing");
    }

    #[test]
    fn messages_only_delivered_while_connected() {
        let (mut slot, mut rx) = slot();
        slot.deliver(json!(1));
        assert!(drain(&mut rx).is_empty());

        slot.set_subscribing();
        slot.confirm();
        drain(&mut rx);

        slot.deliver(json!({"n": 2}));
        assert!(matches!(rx.try_recv().unwrap(), ChannelEvent::Message(_)));
    }

    #[test]
    fn restore_skips_resubscribe_round_trip() {
        let (mut slot, mut rx) = slot();
        slot.set_subscribing();
        slot.confirm();
        slot.drop_connection(true);
        drain(&mut rx);

        slot.restore();
        assert_eq!(slot.state(), ChannelState::Connected);
        assert!(matches!(rx.try_recv().unwrap(), ChannelEvent::Connected));
    }
}
