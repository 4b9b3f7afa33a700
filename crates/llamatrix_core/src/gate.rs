//! Prompt gate: decides which chat events become prompts.

use crate::types::{ChatEvent, MessageContent, RoomKind, UserId};

/// Default command prefix for multi-party rooms.
pub const DEFAULT_COMMAND_PREFIX: &str = "!llama";

/// Suffix appended to the prefix for the context-clear command.
const CLEAR_SUFFIX: &str = "clear";

/// Why an event did not become a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    OwnMessage,
    NotText,
    MissingPrefix,
    EmptyPrompt,
    NotAMessage,
}

/// Outcome of evaluating a chat event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Eligible; carries the prompt text with the prefix stripped
    Prompt(String),
    /// The context-clear command
    ClearContext,
    /// Not for us
    Ignored(IgnoreReason),
}

impl GateDecision {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Prompt(_))
    }
}

/// Stateless filter over incoming chat events.
#[derive(Debug, Clone)]
pub struct PromptGate {
    bot_user: UserId,
    prefix: String,
}

impl PromptGate {
    pub fn new(bot_user: UserId, prefix: impl Into<String>) -> Self {
        Self {
            bot_user,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn bot_user(&self) -> &UserId {
        &self.bot_user
    }

    /// Evaluate an event against the membership kind of its room.
    pub fn evaluate(&self, event: &ChatEvent, kind: RoomKind) -> GateDecision {
        let ChatEvent::Message {
            sender, content, ..
        } = event
        else {
            return GateDecision::Ignored(IgnoreReason::NotAMessage);
        };

        if *sender == self.bot_user {
            return GateDecision::Ignored(IgnoreReason::OwnMessage);
        }

        let MessageContent::Text(body) = content else {
            return GateDecision::Ignored(IgnoreReason::NotText);
        };

        let body = body.trim();
        let stripped = body.strip_prefix(self.prefix.as_str());

        if stripped.map(str::trim) == Some(CLEAR_SUFFIX) {
            return GateDecision::ClearContext;
        }

        let prompt = match (kind, stripped) {
            (_, Some(rest)) => rest.trim_start(),
            (RoomKind::Direct, None) => body,
            (RoomKind::MultiParty, None) => {
                return GateDecision::Ignored(IgnoreReason::MissingPrefix)
            }
        };

        if prompt.is_empty() {
            return GateDecision::Ignored(IgnoreReason::EmptyPrompt);
        }

        GateDecision::Prompt(prompt.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoomId;

    const BOT: &str = "@llama:example.org";
    const ALICE: &str = "@alice:example.org";

    fn gate() -> PromptGate {
        PromptGate::new(UserId::new(BOT), DEFAULT_COMMAND_PREFIX)
    }

    fn text(sender: &str, body: &str) -> ChatEvent {
        ChatEvent::text("!room:example.org", sender, body)
    }

    #[test]
    fn test_direct_room_every_text_is_eligible() {
        let decision = gate().evaluate(&text(ALICE, "hello"), RoomKind::Direct);
        assert_eq!(decision, GateDecision::Prompt("hello".to_string()));
    }

    #[test]
    fn test_direct_room_strips_prefix_when_present() {
        let decision = gate().evaluate(&text(ALICE, "!llama hello"), RoomKind::Direct);
        assert_eq!(decision, GateDecision::Prompt("hello".to_string()));
    }

    #[test]
    fn test_public_room_without_prefix_is_ignored() {
        let decision = gate().evaluate(&text(ALICE, "hello"), RoomKind::MultiParty);
        assert_eq!(decision, GateDecision::Ignored(IgnoreReason::MissingPrefix));
        assert!(!decision.is_eligible());
    }

    #[test]
    fn test_public_room_with_prefix_strips_it() {
        let decision = gate().evaluate(&text(ALICE, "!llama hello"), RoomKind::MultiParty);
        assert_eq!(decision, GateDecision::Prompt("hello".to_string()));
    }

    #[test]
    fn test_prefix_in_the_middle_does_not_count() {
        let decision = gate().evaluate(&text(ALICE, "say !llama hello"), RoomKind::MultiParty);
        assert_eq!(decision, GateDecision::Ignored(IgnoreReason::MissingPrefix));
    }

    #[test]
    fn test_bare_prefix_is_an_empty_prompt() {
        let decision = gate().evaluate(&text(ALICE, "!llama   "), RoomKind::MultiParty);
        assert_eq!(decision, GateDecision::Ignored(IgnoreReason::EmptyPrompt));
    }

    #[test]
    fn test_own_messages_are_ignored() {
        let decision = gate().evaluate(&text(BOT, "!llama hello"), RoomKind::Direct);
        assert_eq!(decision, GateDecision::Ignored(IgnoreReason::OwnMessage));
    }

    #[test]
    fn test_non_text_is_ignored() {
        let event = ChatEvent::Message {
            room: RoomId::new("!room:example.org"),
            sender: UserId::new(ALICE),
            content: MessageContent::Other("m.reaction".to_string()),
        };
        assert_eq!(
            gate().evaluate(&event, RoomKind::Direct),
            GateDecision::Ignored(IgnoreReason::NotText)
        );
    }

    #[test]
    fn test_non_message_events_are_ignored() {
        let event = ChatEvent::Left {
            room: RoomId::new("!room:example.org"),
        };
        assert_eq!(
            gate().evaluate(&event, RoomKind::Direct),
            GateDecision::Ignored(IgnoreReason::NotAMessage)
        );
    }

    #[test]
    fn test_clear_command() {
        for body in ["!llamaclear", "!llama clear", "  !llamaclear  "] {
            assert_eq!(
                gate().evaluate(&text(ALICE, body), RoomKind::MultiParty),
                GateDecision::ClearContext,
                "body: {body:?}"
            );
        }
        assert_eq!(
            gate().evaluate(&text(ALICE, "!llama clear the table"), RoomKind::MultiParty),
            GateDecision::Prompt("clear the table".to_string())
        );
    }

    #[test]
    fn test_custom_prefix() {
        let gate = PromptGate::new(UserId::new(BOT), "?ai");
        assert_eq!(
            gate.evaluate(&text(ALICE, "?ai what is rust"), RoomKind::MultiParty),
            GateDecision::Prompt("what is rust".to_string())
        );
        assert!(!gate
            .evaluate(&text(ALICE, "!llama hello"), RoomKind::MultiParty)
            .is_eligible());
    }
}
