//! In-process publish/subscribe broker with `channel.event` keys, wildcard
//! subscriptions, fire-and-forget `trigger` and reply-collecting `request`.

mod broker;
mod config;
mod error;
mod key;
mod paths;
pub mod plugin;
mod reply;
mod token;

pub use broker::{Broker, Pending};
pub use config::{RequestConfig, SyncFailure, VentConfig};
pub use error::{HandlerError, Result, VentError};
pub use key::{ChannelEvent, DEFAULT_CHANNEL, WILDCARD};
pub use paths::{vent_config_path, vent_home_dir};
pub use plugin::{Binding, Component, ComponentId, Host, Listeners, VentPlugin};
pub use reply::{Handler, HandlerResult, Reply};
pub use token::Token;
