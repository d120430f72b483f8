//! Message types for LLM conversations.
//!
//! Provides the [`Role`] enum and [`Message`] struct that represent
//! conversation messages sent to completion endpoints, together with
//! attachments and the synthetic function-result messages the agent loop
//! feeds back to the model.

use serde::{Deserialize, Serialize};

use crate::tools::FunctionCallResult;

/// Role of a message in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions for the model.
    System,
    /// User input.
    User,
    /// Model response.
    Assistant,
}

impl Role {
    /// Wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Extra material attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Attachment {
    /// An inline image, sent to multimodal models as a `data:` URL.
    Image {
        /// MIME type, e.g. `image/png`.
        media_type: String,
        /// Base64-encoded image bytes.
        data_base64: String,
    },
    /// Pre-resolved context text (retrieval results, file excerpts).
    Source {
        /// Short label for the source.
        title: String,
        /// Source text.
        text: String,
    },
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// The role of this message.
    pub role: Role,
    /// The text content of this message.
    pub content: String,
    /// Attached images and sources.
    pub attachments: Vec<Attachment>,
    /// Function results carried by a synthetic follow-up message.
    ///
    /// Kept structured so the agent loop can shrink them when the context
    /// window overflows; rendered into text by [`Message::text`].
    pub function_results: Option<Vec<FunctionCallResult>>,
}

impl Message {
    /// Create a new message with the given role and content.
    ///
    /// # Examples
    ///
    /// ```
    /// use ember_core::message::{Message, Role};
    ///
    /// let msg = Message::new(Role::User, "Hello!");
    /// assert_eq!(msg.role, Role::User);
    /// assert_eq!(msg.content, "Hello!");
    /// ```
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            attachments: Vec::new(),
            function_results: None,
        }
    }

    /// Create a user message carrying function results followed by a
    /// steering instruction.
    pub fn function_results(results: Vec<FunctionCallResult>, steering: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: steering.into(),
            attachments: Vec::new(),
            function_results: Some(results),
        }
    }

    /// Attach an image or source to this message.
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Images attached to this message.
    pub fn images(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attachments.iter().filter_map(|a| match a {
            Attachment::Image {
                media_type,
                data_base64,
            } => Some((media_type.as_str(), data_base64.as_str())),
            Attachment::Source { .. } => None,
        })
    }

    /// Full text sent to the model: sources, function results, then content.
    pub fn text(&self) -> String {
        let mut out = String::new();

        for attachment in &self.attachments {
            if let Attachment::Source { title, text } = attachment {
                out.push_str(&format!("<source title=\"{title}\">\n{text}\n</source>\n\n"));
            }
        }

        if let Some(results) = &self.function_results {
            out.push_str("Below are the results of the functions you called:\n\n");
            for result in results {
                out.push_str(&result.render());
                out.push_str("\n\n");
            }
        }

        out.push_str(&self.content);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::FunctionCallKind;

    #[test]
    fn test_message_new_with_str() {
        let msg = Message::new(Role::User, "Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello");
        assert!(msg.attachments.is_empty());
        assert!(msg.function_results.is_none());
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[test]
    fn test_role_as_str_matches_serde() {
        for role in [Role::System, Role::User, Role::Assistant] {
            assert_eq!(
                serde_json::to_string(&role).unwrap(),
                format!("\"{}\"", role.as_str())
            );
        }
    }

    #[test]
    fn test_text_without_extras_is_content() {
        let msg = Message::new(Role::User, "plain");
        assert_eq!(msg.text(), "plain");
    }

    #[test]
    fn test_text_renders_sources_first() {
        let msg = Message::new(Role::User, "Summarise this.").with_attachment(Attachment::Source {
            title: "notes.md".to_string(),
            text: "alpha beta".to_string(),
        });
        let text = msg.text();
        assert!(text.starts_with("<source title=\"notes.md\">"));
        assert!(text.contains("alpha beta"));
        assert!(text.ends_with("Summarise this."));
    }

    #[test]
    fn test_images_skip_sources() {
        let msg = Message::new(Role::User, "look")
            .with_attachment(Attachment::Source {
                title: "t".to_string(),
                text: "x".to_string(),
            })
            .with_attachment(Attachment::Image {
                media_type: "image/png".to_string(),
                data_base64: "AAAA".to_string(),
            });
        let images: Vec<_> = msg.images().collect();
        assert_eq!(images, vec![("image/png", "AAAA")]);
    }

    #[test]
    fn test_function_results_message() {
        let msg = Message::function_results(
            vec![FunctionCallResult {
                call: "get_weather(city: \"Oslo\")".to_string(),
                result: "rain".to_string(),
                kind: FunctionCallKind::Result,
            }],
            "Call another function.",
        );
        assert_eq!(msg.role, Role::User);
        let text = msg.text();
        assert!(text.contains("get_weather(city: \"Oslo\")"));
        assert!(text.contains("rain"));
        assert!(text.ends_with("Call another function."));
    }
}
