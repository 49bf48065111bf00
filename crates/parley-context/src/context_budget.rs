use parley_ai::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Ceiling on transcript size, measured in characters of message content.
pub struct ContextBudget {
    pub max_characters: usize,
    pub min_message_count: usize,
}

impl ContextBudget {
    pub const fn new(max_characters: usize, min_message_count: usize) -> Self {
        Self {
            max_characters,
            min_message_count,
        }
    }

    /// Drops the oldest messages while the transcript is over budget and
    /// longer than `min_message_count`.
    pub fn apply(&self, mut messages: Vec<Message>) -> Vec<Message> {
        let mut total = total_characters(&messages);
        let mut dropped = 0_usize;
        while total > self.max_characters
            && messages.len().saturating_sub(dropped) > self.min_message_count
        {
            total = total.saturating_sub(messages[dropped].char_len());
            dropped = dropped.saturating_add(1);
        }
        if dropped > 0 {
            tracing::debug!(
                dropped,
                remaining = messages.len() - dropped,
                remaining_characters = total,
                "trimmed conversation context to budget"
            );
            messages.drain(..dropped);
        }
        messages
    }
}

pub fn total_characters(messages: &[Message]) -> usize {
    messages.iter().map(Message::char_len).sum()
}

#[cfg(test)]
mod tests {
    use parley_ai::Message;
    use proptest::prelude::*;

    use super::{total_characters, ContextBudget};

    fn message_of(len: usize, tag: char) -> Message {
        Message::user(tag.to_string().repeat(len))
    }

    #[test]
    fn functional_six_large_posts_keep_five_newest() {
        let messages = ('a'..='f')
            .map(|tag| message_of(10_000, tag))
            .collect::<Vec<_>>();
        let trimmed = ContextBudget::new(25_000, 5).apply(messages);
        assert_eq!(trimmed.len(), 5);
        assert!(trimmed[0].content.starts_with('b'));
        assert!(trimmed[4].content.starts_with('f'));
    }

    #[test]
    fn unit_trims_until_under_ceiling() {
        let messages = vec![message_of(10, 'a'), message_of(10, 'b'), message_of(5, 'c')];
        let trimmed = ContextBudget::new(15, 0).apply(messages);
        assert_eq!(trimmed.len(), 2);
        assert_eq!(total_characters(&trimmed), 15);
    }

    #[test]
    fn unit_counts_characters_not_bytes() {
        let messages = vec![Message::user("ééé"), Message::user("ü")];
        assert_eq!(total_characters(&messages), 4);
        assert_eq!(ContextBudget::new(4, 0).apply(messages).len(), 2);
    }

    #[test]
    fn regression_min_message_count_wins_over_ceiling() {
        let messages = vec![message_of(100, 'a'), message_of(100, 'b')];
        let trimmed = ContextBudget::new(10, 2).apply(messages);
        assert_eq!(trimmed.len(), 2);
    }

    proptest! {
        #[test]
        fn property_budget_is_idempotent_and_respects_floor(
            lengths in proptest::collection::vec(0usize..200, 0..20),
            max_characters in 0usize..2_000,
            min_message_count in 0usize..8,
        ) {
            let messages = lengths.iter().map(|len| message_of(*len, 'x')).collect::<Vec<_>>();
            let original_len = messages.len();
            let budget = ContextBudget::new(max_characters, min_message_count);
            let once = budget.apply(messages);
            let twice = budget.apply(once.clone());
            prop_assert_eq!(&once, &twice);
            prop_assert!(once.len() >= original_len.min(min_message_count));
            prop_assert!(total_characters(&once) <= max_characters || once.len() <= min_message_count);
        }
    }
}
