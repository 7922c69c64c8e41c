use std::fmt;

/// Channel used when a key carries no explicit channel.
pub const DEFAULT_CHANNEL: &str = "default";

/// Wildcard value, valid both as a channel and as an event.
pub const WILDCARD: &str = "*";

/// A resolved `channel.event` key.
///
/// Keys are split on the first `.` only, so `"a.b.c"` addresses event `"b.c"`
/// on channel `"a"`. A key without any `.` lives on the [`DEFAULT_CHANNEL`].
///
/// Note that `"event.*"` does not mean "this event on any channel": it parses
/// to channel `"event"`, event `"*"`, i.e. every event on a channel literally
/// named `event`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelEvent {
    pub channel: String,
    pub event: String,
}

impl ChannelEvent {
    pub fn new(channel: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            event: event.into(),
        }
    }

    /// Parse a dotted key. Never fails: any string is a valid key.
    pub fn parse(key: &str) -> Self {
        match key.split_once('.') {
            Some((channel, event)) => Self::new(channel, event),
            None => Self::new(DEFAULT_CHANNEL, key),
        }
    }

    /// The global catch-all key, `*.*`.
    pub fn catch_all() -> Self {
        Self::new(WILDCARD, WILDCARD)
    }

    pub fn is_channel_wildcard(&self) -> bool {
        self.channel == WILDCARD
    }

    pub fn is_event_wildcard(&self) -> bool {
        self.event == WILDCARD
    }
}

impl fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.channel, self.event)
    }
}

impl From<&str> for ChannelEvent {
    fn from(key: &str) -> Self {
        Self::parse(key)
    }
}
