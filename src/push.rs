//! Host-side callbacks the VM pushes into, e.g. chat messages.
//!
//! These are installed by the host (the JVM) rather than by the program, and
//! survive a VM shutdown.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

pub type ChatSink = Arc<dyn Fn(i64, &str) + Send + Sync>;

#[derive(Default)]
pub struct HostCallbacks {
    send_chat: RwLock<Option<ChatSink>>,
}

impl HostCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or (with `None`) remove the chat sink.
    pub fn set_send_chat(&self, sink: Option<ChatSink>) {
        debug!(installed = sink.is_some(), "chat sink");
        *self.send_chat.write().unwrap_or_else(PoisonError::into_inner) = sink;
    }

    pub fn has_send_chat(&self) -> bool {
        self.send_chat.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Deliver `message` to `player_id`. Dropped with a warning when no sink
    /// is installed.
    pub fn send_chat(&self, player_id: i64, message: &str) -> bool {
        let sink = self.send_chat.read().unwrap_or_else(PoisonError::into_inner).clone();
        match sink {
            Some(sink) => {
                sink(player_id, message);
                true
            }
            None => {
                warn!(player_id, "no chat sink installed; dropping message");
                false
            }
        }
    }
}
