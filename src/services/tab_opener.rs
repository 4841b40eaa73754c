//! Tab Opener — the host boundary that turns a due snooze back into a tab.
//!
//! The core never creates tabs itself. [`HostEventOpener`] forwards each
//! request as a [`HostEvent`] on a channel; the RPC server prints those events
//! to stdout where the host application picks them up.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::types::errors::ReopenError;

#[async_trait]
pub trait TabOpener: Send + Sync {
    async fn open_tab(&self, url: &str) -> Result<(), ReopenError>;
}

/// Notification pushed from the core to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event")]
pub enum HostEvent {
    #[serde(rename = "tab.open")]
    OpenTab { url: String },
}

/// Opener that hands tab creation to whoever drains the event channel.
pub struct HostEventOpener {
    events: mpsc::UnboundedSender<HostEvent>,
}

impl HostEventOpener {
    pub fn new(events: mpsc::UnboundedSender<HostEvent>) -> Self {
        Self { events }
    }

    /// Opener plus the receiving end of its event channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl TabOpener for HostEventOpener {
    async fn open_tab(&self, url: &str) -> Result<(), ReopenError> {
        self.events
            .send(HostEvent::OpenTab {
                url: url.to_string(),
            })
            .map_err(|_| ReopenError::ChannelClosed(url.to_string()))
    }
}
