//! Callback-style adapter over the event-stream channel API.
//!
//! Some applications prefer registering handlers to draining an event
//! stream. [`attach_hooks`] bridges the two: a background task drains the
//! channel and invokes whichever hooks are set.

use serde_json::Value;
use tokio::task::JoinHandle;

use cable_core::CableError;

use crate::channel::{Channel, ChannelEvent};

/// Per-channel callbacks. Unset hooks are skipped silently.
///
/// A rejected subscription goes to `on_rejected` when set, otherwise to
/// `on_closed` with the rejection error.
#[derive(Default)]
pub struct ChannelHooks {
    connected: Option<Box<dyn FnMut() + Send>>,
    disconnected: Option<Box<dyn FnMut(bool) + Send>>,
    rejected: Option<Box<dyn FnMut(Option<String>) + Send>>,
    received: Option<Box<dyn FnMut(Value) + Send>>,
    closed: Option<Box<dyn FnMut(Option<CableError>) + Send>>,
}

impl ChannelHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoked on every confirmed (re)subscription.
    pub fn on_connected(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.connected = Some(Box::new(hook));
        self
    }

    /// Invoked when the connection under the channel drops; the argument is
    /// `allow_reconnect`.
    pub fn on_disconnected(mut self, hook: impl FnMut(bool) + Send + 'static) -> Self {
        self.disconnected = Some(Box::new(hook));
        self
    }

    /// Invoked when the server refuses the subscription, with the server's
    /// reason when it gave one.
    pub fn on_rejected(mut self, hook: impl FnMut(Option<String>) + Send + 'static) -> Self {
        self.rejected = Some(Box::new(hook));
        self
    }

    /// Invoked for every application payload.
    pub fn on_received(mut self, hook: impl FnMut(Value) + Send + 'static) -> Self {
        self.received = Some(Box::new(hook));
        self
    }

    /// Invoked once, when the channel reaches its terminal state.
    pub fn on_closed(
        mut self,
        hook: impl FnMut(Option<CableError>) + Send + 'static,
    ) -> Self {
        self.closed = Some(Box::new(hook));
        self
    }
}

/// Drive `channel` with `hooks` on a background task.
///
/// The task ends when the channel closes or its connection goes away;
/// aborting the returned handle drops the channel (and thereby
/// unsubscribes).
pub fn attach_hooks(mut channel: Channel, mut hooks: ChannelHooks) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = channel.next_event().await {
            match event {
                ChannelEvent::Connected => {
                    if let Some(hook) = hooks.connected.as_mut() {
                        hook();
                    }
                }
                ChannelEvent::Disconnected { allow_reconnect } => {
                    if let Some(hook) = hooks.disconnected.as_mut() {
                        hook(allow_reconnect);
                    }
                }
                ChannelEvent::Message(payload) => {
                    if let Some(hook) = hooks.received.as_mut() {
                        hook(payload);
                    }
                }
                ChannelEvent::Closed { error } => {
                    match (error, hooks.rejected.as_mut()) {
                        (
                            Some(CableError::SubscriptionRejected { reason, .. }),
                            Some(hook),
                        ) => hook(reason),
                        (error, _) => {
                            if let Some(hook) = hooks.closed.as_mut() {
                                hook(error);
                            }
                        }
                    }
                    return;
                }
            }
        }
    })
}
