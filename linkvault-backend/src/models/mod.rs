mod channel_rule;
mod message;
mod provider;

pub use channel_rule::{normalize_channel, ChannelRule, ChannelRuleRequest, MonitoredChannel};
pub use message::{IngestStats, ParsedMessage, StoredMessage, UpsertOutcome, UpsertPolicy};
pub use provider::{LinkMap, Provider};
