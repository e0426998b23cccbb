/// Channel directory: the ordered list of conversations shown in the selector
///
/// Group and notes entries are implicit and always come first. Everything after
/// them is either pushed by the server on login or created on first contact.
use crate::model::{
    Channel, ChatId, PublicIdentity, UserId, GROUP_CHANNEL_TITLE, GROUP_CHAT_ID,
    NOTES_CHANNEL_TITLE,
};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ChannelDirectory {
    channels: Vec<Channel>,
}

impl ChannelDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a selector title to a channel id, falling back to the group channel
    pub fn resolve_id(&self, title: &str, viewer_id: Option<UserId>) -> ChatId {
        if title == GROUP_CHANNEL_TITLE {
            return GROUP_CHAT_ID;
        }
        if title == NOTES_CHANNEL_TITLE {
            if let Some(id) = viewer_id {
                return id;
            }
        }
        self.channels
            .iter()
            .find(|c| c.title == title)
            .map(|c| c.id)
            .unwrap_or(GROUP_CHAT_ID)
    }

    /// Reverse of [`resolve_id`](Self::resolve_id), used to highlight the open channel
    pub fn title_of(&self, id: ChatId, viewer_id: Option<UserId>) -> Option<String> {
        if id == GROUP_CHAT_ID {
            return Some(GROUP_CHANNEL_TITLE.to_string());
        }
        if Some(id) == viewer_id {
            return Some(NOTES_CHANNEL_TITLE.to_string());
        }
        self.channels
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.title.clone())
    }

    pub fn contains(&self, id: ChatId) -> bool {
        self.channels.iter().any(|c| c.id == id)
    }

    /// Append an ad-hoc channel for `identity` unless it is already known.
    /// Returns true when a new entry was added.
    pub fn ensure_channel(&mut self, identity: &PublicIdentity, viewer_id: Option<UserId>) -> bool {
        if Some(identity.id) == viewer_id || identity.id == GROUP_CHAT_ID {
            return false;
        }
        if self.contains(identity.id) {
            return false;
        }
        debug!("Adding ad-hoc channel {}", identity);
        self.channels.push(Channel::from(identity));
        true
    }

    /// Replace everything after the implicit entries with the server's list.
    /// Entries that collide with the implicit ones or repeat an id are dropped.
    pub fn replace_all(&mut self, channels: Vec<Channel>, viewer_id: Option<UserId>) {
        let mut next: Vec<Channel> = Vec::with_capacity(channels.len());
        for channel in channels {
            if channel.id == GROUP_CHAT_ID || Some(channel.id) == viewer_id {
                continue;
            }
            if next.iter().any(|c| c.id == channel.id) {
                continue;
            }
            next.push(channel);
        }
        self.channels = next;
    }

    /// Selector titles in display order
    pub fn titles(&self) -> Vec<String> {
        let mut titles = Vec::with_capacity(self.channels.len() + 2);
        titles.push(GROUP_CHANNEL_TITLE.to_string());
        titles.push(NOTES_CHANNEL_TITLE.to_string());
        titles.extend(self.channels.iter().map(|c| c.title.clone()));
        titles
    }

    pub fn len(&self) -> usize {
        self.channels.len() + 2
    }

    /// Always false, the implicit entries are always present
    pub fn is_empty(&self) -> bool {
        false
    }
}
