//! Change notifications.

use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::record::Resource;
use crate::types::ObjectKey;

/// A change to one record, carrying the record as it was after the change
/// (or, for `Deleted`, as it was when removed).
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<R> {
    Added(R),
    Modified(R),
    Deleted(R),
}

impl<R: Resource> WatchEvent<R> {
    /// The record this event is about.
    pub const fn object(&self) -> &R {
        match self {
            Self::Added(r) | Self::Modified(r) | Self::Deleted(r) => r,
        }
    }

    /// Identity of the record this event is about.
    pub fn key(&self) -> ObjectKey {
        self.object().key()
    }

    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Modified(_) => "modified",
            Self::Deleted(_) => "deleted",
        }
    }
}

/// Subscription handle for receiving change notifications.
pub struct WatchStream<R> {
    receiver: broadcast::Receiver<WatchEvent<R>>,
}

impl<R: Resource> WatchStream<R> {
    pub(crate) const fn new(receiver: broadcast::Receiver<WatchEvent<R>>) -> Self {
        Self { receiver }
    }

    /// Receive the next event.
    ///
    /// Returns `Error::Lagged` once if the subscriber fell behind and events
    /// were dropped; the stream stays usable and the caller should relist.
    pub async fn recv(&mut self) -> Result<WatchEvent<R>> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Lagged(skipped) => Error::Lagged { skipped },
            broadcast::error::RecvError::Closed => Error::ChannelClosed,
        })
    }
}
