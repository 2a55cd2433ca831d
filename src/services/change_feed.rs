//! Change-feed contract and the in-process hub implementation.
//!
//! The hub only reaches sessions in this process. Changes from other processes
//! arrive through a change-log relay (SQLite) or the hosted realtime socket.
//!
//! A feed hands out named channels. Each channel has an inbox that first receives
//! the subscribe confirmation and then every row change on the `bookmarks` table.
//! Changes are not filtered by owner.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::types::change::{ChangePayload, FeedMessage};
use crate::types::errors::FeedError;

/// An open channel: its name plus the inbox its messages arrive on.
#[derive(Debug)]
pub struct Subscription {
    pub channel: String,
    pub inbox: mpsc::UnboundedReceiver<FeedMessage>,
}

/// Trait defining the change-feed collaborator.
pub trait ChangeFeed: Send + Sync {
    /// Opens `channel`. Confirmation arrives later as the first inbox message.
    fn subscribe(&self, channel: &str) -> Result<Subscription, FeedError>;
    /// Releases `channel`. Must be called exactly once per successful subscribe.
    fn unsubscribe(&self, channel: &str);
}

impl<T: ChangeFeed + ?Sized> ChangeFeed for Arc<T> {
    fn subscribe(&self, channel: &str) -> Result<Subscription, FeedError> {
        (**self).subscribe(channel)
    }

    fn unsubscribe(&self, channel: &str) {
        (**self).unsubscribe(channel)
    }
}

/// Releases remembered for [`ChangeHub::release_count`]. Older ones are forgotten.
pub const RELEASE_HISTORY: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-process feed: every published change goes to every open channel.
#[derive(Debug, Default)]
pub struct ChangeHub {
    channels: Mutex<HashMap<String, mpsc::UnboundedSender<FeedMessage>>>,
    releases: Mutex<VecDeque<String>>,
    refusal: Mutex<Option<String>>,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a change to all open channels. Returns how many received it.
    pub fn publish(&self, payload: ChangePayload) -> usize {
        let mut channels = lock(&self.channels);
        channels.retain(|name, tx| {
            let alive = tx.send(FeedMessage::Change(payload.clone())).is_ok();
            if !alive {
                debug!(channel = %name, "dropping channel whose inbox is gone");
            }
            alive
        });
        channels.len()
    }

    /// Reports a failure on one channel. Returns `false` if it is not open.
    pub fn fail_channel(&self, channel: &str, reason: &str) -> bool {
        match lock(&self.channels).get(channel) {
            Some(tx) => tx.send(FeedMessage::Error(reason.to_string())).is_ok(),
            None => false,
        }
    }

    /// Reports a failure on every open channel. Returns how many received it.
    pub fn fail_all(&self, reason: &str) -> usize {
        let channels = lock(&self.channels);
        channels
            .values()
            .filter(|tx| tx.send(FeedMessage::Error(reason.to_string())).is_ok())
            .count()
    }

    /// Makes later subscriptions confirm with an error, or restores normal
    /// confirmation when `reason` is `None`.
    pub fn refuse_subscriptions(&self, reason: Option<&str>) {
        *lock(&self.refusal) = reason.map(str::to_string);
    }

    /// Names of the channels currently open.
    pub fn active_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.channels).keys().cloned().collect();
        names.sort();
        names
    }

    /// How many times `channel` has been released, among the last
    /// [`RELEASE_HISTORY`] releases.
    pub fn release_count(&self, channel: &str) -> usize {
        lock(&self.releases).iter().filter(|name| *name == channel).count()
    }
}

impl ChangeFeed for ChangeHub {
    fn subscribe(&self, channel: &str) -> Result<Subscription, FeedError> {
        let mut channels = lock(&self.channels);
        if channels.contains_key(channel) {
            return Err(FeedError::SubscribeFailed(format!(
                "channel already open: {}",
                channel
            )));
        }

        let (tx, inbox) = mpsc::unbounded_channel();
        let confirmation = match lock(&self.refusal).clone() {
            Some(reason) => Err(reason),
            None => Ok(()),
        };
        // The receiver is still in scope, so this send cannot fail.
        let _ = tx.send(FeedMessage::Confirmed(confirmation));
        channels.insert(channel.to_string(), tx);

        debug!(channel, "channel opened");
        Ok(Subscription {
            channel: channel.to_string(),
            inbox,
        })
    }

    fn unsubscribe(&self, channel: &str) {
        let removed = lock(&self.channels).remove(channel).is_some();
        {
            let mut releases = lock(&self.releases);
            if releases.len() == RELEASE_HISTORY {
                releases.pop_front();
            }
            releases.push_back(channel.to_string());
        }
        if removed {
            debug!(channel, "channel released");
        } else {
            warn!(channel, "release of a channel that is not open");
        }
    }
}
