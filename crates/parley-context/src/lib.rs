//! Conversation-context assembly for the Parley bot.
//!
//! Turns a topic's raw posts into a bounded, role-tagged transcript: directive
//! lines are split from prose, per-topic instruction overrides are applied,
//! the oldest messages are trimmed to fit the budget, and generated replies
//! are defused before posting.

pub mod author_name;
pub mod context_budget;
pub mod context_collector;
pub mod directive_parser;
pub mod instruction_store;
pub mod reply_sanitizer;

pub use author_name::{sanitize_author_name, ANONYMOUS_AUTHOR_NAME, MAX_AUTHOR_NAME_CHARS};
pub use context_budget::{total_characters, ContextBudget};
pub use context_collector::{
    fold_thread, CollectedContext, ContextCollector, InstructionWrite, ThreadPost,
};
pub use directive_parser::{
    directives_in_line, is_directive_line, parse_directive_line, split_prose_and_directives,
    Directive, SplitText, DIRECTIVE_MARKER,
};
pub use instruction_store::{
    FileInstructionBackend, InMemoryInstructionBackend, InstructionBackend, TopicInstructionStore,
};
pub use reply_sanitizer::{sanitize_reply, ZERO_WIDTH_SPACE};
