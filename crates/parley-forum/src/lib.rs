//! Forum-side collaborators for the Parley bot.
//!
//! Defines the `ForumProvider` seam the pipeline talks to, a NodeBB HTTP
//! implementation of it with retry and crawl-delay pacing, and the
//! HTML-to-text normalizer applied to post bodies before they become chat
//! messages.

pub mod html_normalizer;
pub mod nodebb_client;
pub mod provider;
mod request_policy;

pub use html_normalizer::normalize_post_html;
pub use nodebb_client::{NodeBbClient, NodeBbConfig, FORUM_USER_AGENT};
pub use provider::{ForumPost, ForumProvider, ForumUser, MentionNotification};
