//! Mention-handling runtime: turns a mention notification into a posted reply
//! and drives the polling bridge that discovers those notifications.

pub mod bridge_runtime;
pub mod bridge_state_store;
pub mod notification_handler;
pub mod response_generator;

pub use bridge_runtime::{run_mention_bridge, MentionBridge, MentionBridgeConfig, PollCycleReport};
pub use bridge_state_store::{BridgeStateStore, BRIDGE_STATE_SCHEMA_VERSION};
pub use notification_handler::{
    HandlerOutcome, HandlerSettings, NotificationHandler, DEFAULT_REPLY_MAX_CHARS,
};
pub use response_generator::{clean_completion_text, GenerationSettings, ResponseGenerator};
