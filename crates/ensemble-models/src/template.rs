//! Chat templates for text-generation endpoints.
//!
//! The watsonx generation API takes a single `input` string, so a chat
//! history has to be rendered into the prompt format the model was
//! instruction-tuned on.

use ensemble_abstraction::ChatMessage;
use std::fmt::Write;

/// Prompt format used to flatten a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatTemplate {
    /// Llama 3 header-token format.
    Llama3,
    /// `Role: content` transcript ending in an open assistant turn.
    Plain,
}

impl ChatTemplate {
    /// Picks the template matching a model identifier.
    pub fn for_model(model_id: &str) -> Self {
        let id = model_id.to_lowercase();
        if id.contains("llama-3") || id.contains("llama3") {
            Self::Llama3
        } else {
            Self::Plain
        }
    }

    /// Renders `messages` into a single prompt string.
    pub fn render(self, messages: &[ChatMessage]) -> String {
        let mut prompt = String::new();
        match self {
            Self::Llama3 => {
                prompt.push_str("<|begin_of_text|>");
                for message in messages {
                    let _ = write!(
                        prompt,
                        "<|start_header_id|>{}<|end_header_id|>\n\n{}<|eot_id|>",
                        message.role, message.content
                    );
                }
                prompt.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
            }
            Self::Plain => {
                for message in messages {
                    let _ = write!(prompt, "{}: {}\n\n", display_role(&message.role), message.content);
                }
                prompt.push_str("Assistant:");
            }
        }
        prompt
    }
}

fn display_role(role: &str) -> String {
    let mut chars = role.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_selection() {
        assert_eq!(ChatTemplate::for_model("meta-llama/llama-3-70b-instruct"), ChatTemplate::Llama3);
        assert_eq!(ChatTemplate::for_model("ibm/granite-13b-instruct-v2"), ChatTemplate::Plain);
    }

    #[test]
    fn test_llama3_render() {
        let prompt = ChatTemplate::Llama3.render(&[
            ChatMessage::system("You are terse."),
            ChatMessage::user("Hi"),
        ]);
        assert_eq!(
            prompt,
            "<|begin_of_text|>\
             <|start_header_id|>system<|end_header_id|>\n\nYou are terse.<|eot_id|>\
             <|start_header_id|>user<|end_header_id|>\n\nHi<|eot_id|>\
             <|start_header_id|>assistant<|end_header_id|>\n\n"
        );
    }

    #[test]
    fn test_plain_render() {
        let prompt = ChatTemplate::Plain.render(&[
            ChatMessage::system("Rules"),
            ChatMessage::user("Question"),
            ChatMessage::assistant("Partial"),
        ]);
        assert_eq!(prompt, "System: Rules\n\nUser: Question\n\nAssistant: Partial\n\nAssistant:");
    }
}
