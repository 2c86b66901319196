//! Prompt rendering and response cleanup for the generation adapter.

use crate::defaults::{FALLBACK_RESPONSE, NON_SPEECH_MARKERS};
use crate::document::DocumentChunk;
use crate::session::ConversationTurn;
use std::sync::Arc;

const USER_MARKER: &str = "User:";
const ASSISTANT_MARKER: &str = "Assistant:";

/// A retrieved passage handed to the generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextChunk {
    pub section: String,
    pub text: String,
}

impl From<&DocumentChunk> for ContextChunk {
    fn from(chunk: &DocumentChunk) -> Self {
        Self {
            section: chunk.section().to_string(),
            text: chunk.text().to_string(),
        }
    }
}

/// Everything the generator sees for one turn.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    /// What the user just said.
    pub user_text: String,
    /// Retrieved document passages, best match first.
    pub chunks: Vec<ContextChunk>,
    /// Earlier turns, oldest first.
    pub history: Vec<Arc<ConversationTurn>>,
}

impl PromptContext {
    pub fn new(user_text: impl Into<String>) -> Self {
        Self {
            user_text: user_text.into(),
            ..Self::default()
        }
    }

    pub fn with_chunks(mut self, chunks: Vec<ContextChunk>) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn with_history(mut self, history: Vec<Arc<ConversationTurn>>) -> Self {
        self.history = history;
        self
    }

    /// Renders a plain-text completion prompt.
    ///
    /// ```text
    /// User: earlier question
    /// Assistant: earlier answer
    ///
    /// Document: passage one
    ///
    /// passage two
    ///
    /// User: current question
    /// Assistant:
    /// ```
    pub fn render(&self) -> String {
        let mut prompt = String::new();

        for turn in &self.history {
            let marker = if turn.is_user() {
                USER_MARKER
            } else {
                ASSISTANT_MARKER
            };
            prompt.push_str(marker);
            prompt.push(' ');
            prompt.push_str(turn.text());
            prompt.push('\n');
        }
        if !self.history.is_empty() {
            prompt.push('\n');
        }

        if !self.chunks.is_empty() {
            let passages: Vec<&str> = self.chunks.iter().map(|c| c.text.as_str()).collect();
            prompt.push_str("Document: ");
            prompt.push_str(&passages.join("\n\n"));
            prompt.push_str("\n\n");
        }

        prompt.push_str(USER_MARKER);
        prompt.push(' ');
        prompt.push_str(self.user_text.trim());
        prompt.push('\n');
        prompt.push_str(ASSISTANT_MARKER);
        prompt
    }
}

/// Extracts the reply from raw generator output.
///
/// Generators that echo the prompt leave the reply after the last
/// `Assistant:` marker; anything from a following `User:` on is the model
/// continuing the dialogue by itself and is cut. An empty result becomes
/// the fixed fallback reply.
pub fn clean_response(raw: &str) -> String {
    let reply = raw
        .rsplit_once(ASSISTANT_MARKER)
        .map(|(_, after)| after)
        .unwrap_or(raw);
    let reply = reply
        .split_once(USER_MARKER)
        .map(|(before, _)| before)
        .unwrap_or(reply)
        .trim();

    if reply.is_empty() {
        FALLBACK_RESPONSE.to_string()
    } else {
        reply.to_string()
    }
}

/// True if a transcript holds no actual words.
///
/// Empty text, punctuation and recognizer markers such as `[BLANK_AUDIO]`
/// all count as non-speech.
pub fn is_non_speech(text: &str) -> bool {
    let mut remaining = text.to_lowercase();
    for marker in NON_SPEECH_MARKERS {
        remaining = remaining.replace(marker, " ");
    }
    !remaining.chars().any(char::is_alphanumeric)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(text: &str) -> Arc<ConversationTurn> {
        Arc::new(ConversationTurn::User {
            text: text.to_string(),
        })
    }

    fn assistant(text: &str) -> Arc<ConversationTurn> {
        Arc::new(ConversationTurn::Assistant {
            text: text.to_string(),
            audio: None,
        })
    }

    #[test]
    fn test_render_without_document() {
        let prompt = PromptContext::new("  What is osmosis? ").render();
        assert_eq!(prompt, "User: What is osmosis?\nAssistant:");
    }

    #[test]
    fn test_render_with_document_and_history() {
        let prompt = PromptContext::new("And the light stage?")
            .with_history(vec![user("Hi"), assistant("Hello!")])
            .with_chunks(vec![
                ContextChunk {
                    section: "Light".to_string(),
                    text: "Light drives it.".to_string(),
                },
                ContextChunk {
                    section: "Dark".to_string(),
                    text: "Sugar is built.".to_string(),
                },
            ])
            .render();

        assert_eq!(
            prompt,
            "User: Hi\nAssistant: Hello!\n\n\
             Document: Light drives it.\n\nSugar is built.\n\n\
             User: And the light stage?\nAssistant:"
        );
    }

    #[test]
    fn test_clean_response_strips_prompt_echo() {
        let raw = "User: hi\nAssistant: Hello there.";
        assert_eq!(clean_response(raw), "Hello there.");
    }

    #[test]
    fn test_clean_response_cuts_invented_user_turn() {
        let raw = " Plants use light.\nUser: thanks\nAssistant: welcome";
        assert_eq!(clean_response(raw), "welcome");

        let raw = " Plants use light.\nUser: thanks";
        assert_eq!(clean_response(raw), "Plants use light.");
    }

    #[test]
    fn test_clean_response_falls_back_when_empty() {
        assert_eq!(clean_response("   "), FALLBACK_RESPONSE);
        assert_eq!(clean_response("Assistant:"), FALLBACK_RESPONSE);
    }

    #[test]
    fn test_non_speech_markers() {
        assert!(is_non_speech(""));
        assert!(is_non_speech("  ...  "));
        assert!(is_non_speech("[BLANK_AUDIO]"));
        assert!(is_non_speech("(silence) [Music]"));
        assert!(!is_non_speech("[MUSIC] hello"));
        assert!(!is_non_speech("okay"));
    }
}
