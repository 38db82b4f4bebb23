//! Prompt templates used by the chat engines.
//!
//! Templates use `{name}` placeholders filled by [`render`].

use std::sync::LazyLock;

use regex::{Captures, Regex};

use ragchat_core::types::{ChatMessage, RetrievedChunk};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("Invalid placeholder regex"));

/// System prompt for condense-plus-context mode.
pub const CONDENSE_PLUS_CONTEXT_TEMPLATE: &str = "You are a chatbot, able to have normal interactions, \
Here are the relevant documents for the context:\n{context_str}\nInstruction: Use the previous \
chat history, or the context above, to interact and help the user.";

/// System prompt for context mode.
pub const CONTEXT_TEMPLATE: &str = "Context information is below.\n\
--------------------\n{context_str}\n--------------------\n";

pub const CONDENSE_QUESTION_TEMPLATE: &str = "Given a conversation (between Human and Assistant) \
and a follow up message from Human, rewrite the message to be a standalone question that \
captures all relevant context from the conversation.\n\n<Chat History>\n{chat_history}\n\n\
<Follow Up Message>\n{question}\n\n<Standalone question>\n";

/// Single-shot question answering over retrieved context.
pub const QA_TEMPLATE: &str = "Context information is below.\n---------------------\n\
{context_str}\n---------------------\nGiven the context information and not prior knowledge, \
answer the query.\nQuery: {query_str}\nAnswer: ";

pub const AGENT_SYSTEM_TEMPLATE: &str = "You are designed to help with a variety of tasks, from \
answering questions to providing summaries of the uploaded documents.\n\n\
## Tools\nYou have access to one tool:\n\
> query_engine: answers questions about the uploaded documents. Its input is a plain-text \
question.\n\n\
## Output Format\nTo use the tool, reply with exactly:\n\n\
Thought: I need to use a tool to help me answer the question.\n\
Action: query_engine\nAction Input: <question>\n\n\
You will then receive a message starting with `Observation:`. Repeat until you can answer \
without the tool, then reply with:\n\n\
Thought: I can answer without using any more tools.\nAnswer: <answer>\n";

pub const AGENT_FINAL_INSTRUCTION: &str =
    "You have used the tool enough times. Reply now with your final Answer.";

/// Replace each `{name}` placeholder with its value in one pass.
///
/// Substituted text is never rescanned, and unknown placeholders are kept.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            values
                .iter()
                .find(|(name, _)| *name == &caps[1])
                .map(|(_, value)| value.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Format retrieved chunks as the `{context_str}` block.
pub fn context_str(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| format!("file_name: {}\n\n{}", c.file_name, c.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Format history as `role: content` lines for the condense prompt.
pub fn chat_history_str(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_fills_placeholders() {
        let out = render(QA_TEMPLATE, &[("context_str", "CTX"), ("query_str", "Q?")]);
        assert!(out.contains("CTX"));
        assert!(out.contains("Query: Q?"));
        assert!(!out.contains('{'));
    }

    #[test]
    fn test_render_leaves_placeholders_inside_values() {
        let context = "see {query_str} and {chat_history}";
        let out = render(QA_TEMPLATE, &[("context_str", context), ("query_str", "Q?")]);
        assert!(out.contains("see {query_str} and {chat_history}"));
        assert!(out.contains("Query: Q?"));
        assert_eq!(render("{unknown} {x}", &[("x", "1")]), "{unknown} 1");
    }

    #[test]
    fn test_condense_plus_context_template_text() {
        let out = render(CONDENSE_PLUS_CONTEXT_TEMPLATE, &[("context_str", "doc")]);
        assert_eq!(
            out,
            "You are a chatbot, able to have normal interactions, Here are the relevant documents \
             for the context:\ndoc\nInstruction: Use the previous chat history, or the context \
             above, to interact and help the user."
        );
    }

    #[test]
    fn test_context_str_labels_files() {
        let chunks = vec![
            RetrievedChunk {
                file_name: "a.txt".to_string(),
                text: "alpha".to_string(),
                score: 0.9,
            },
            RetrievedChunk {
                file_name: "b.txt".to_string(),
                text: "beta".to_string(),
                score: 0.5,
            },
        ];
        let ctx = context_str(&chunks);
        assert!(ctx.starts_with("file_name: a.txt"));
        assert!(ctx.contains("beta"));
    }

    #[test]
    fn test_chat_history_str() {
        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        assert_eq!(chat_history_str(&history), "user: hi\nassistant: hello");
    }
}
