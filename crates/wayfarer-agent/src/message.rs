use serde::{Deserialize, Serialize};

/// Conversation message: `{role, content, optional tool_calls, optional
/// tool_call_id}`. `content` is a plain `String`, never `Option<String>` —
/// no-null-content is enforced by the type itself; the replace-null-with-
/// empty-string repair happens at the LLM-response boundary, before a
/// message is ever constructed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ConversationMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    fn has_tool_calls(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }
}

const INTERRUPTED_PLACEHOLDER: &str = "unavailable (interrupted)";

/// Repair history into a provider-safe shape. Null-content replacement is
/// enforced by [`ConversationMessage::content`]'s type and doesn't need a
/// pass here.
///
/// Walks the history once, pairing every assistant-with-tool_calls message
/// with its tool results wherever they are found in the stream (step 5:
/// reordering), synthesizing a placeholder for any call whose result never
/// arrived (step 4), and dropping an assistant call entirely only when
/// *none* of its results exist (step 3) — plus any leftover tool message
/// that never matches a parent (step 2).
pub fn sanitize_history(messages: Vec<ConversationMessage>) -> Vec<ConversationMessage> {
    let mut tool_results: std::collections::HashMap<String, ConversationMessage> = Default::default();
    for message in &messages {
        if message.role == Role::Tool {
            if let Some(id) = &message.tool_call_id {
                tool_results.entry(id.clone()).or_insert_with(|| message.clone());
            }
        }
    }

    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        if message.role == Role::Tool {
            continue; // re-inserted in order right after its parent, below
        }
        if message.has_tool_calls() {
            let any_result_present = message
                .tool_calls
                .iter()
                .any(|call| tool_results.contains_key(&call.id));
            if !any_result_present {
                continue; // step 3: orphan assistant call, all results missing
            }
            let tool_calls = message.tool_calls.clone();
            out.push(message);
            for call in &tool_calls {
                match tool_results.get(&call.id) {
                    Some(result) => out.push(result.clone()),
                    None => out.push(ConversationMessage::tool_result(
                        call.id.clone(),
                        INTERRUPTED_PLACEHOLDER,
                    )),
                }
            }
        } else {
            out.push(message);
        }
    }
    out
}

/// A block is the smallest unit trimming may cut at: either one ordinary
/// message, or an assistant-with-tool_calls message plus every tool result
/// immediately following it, so trimming never orphans a tool-call
/// sequence by cutting in the middle of it. Assumes
/// `messages` has already been through [`sanitize_history`].
fn to_blocks(messages: Vec<ConversationMessage>) -> Vec<Vec<ConversationMessage>> {
    let mut blocks = Vec::new();
    let mut iter = messages.into_iter().peekable();
    while let Some(message) = iter.next() {
        if message.has_tool_calls() {
            let expected: std::collections::HashSet<_> =
                message.tool_calls.iter().map(|c| c.id.clone()).collect();
            let mut block = vec![message];
            while let Some(next) = iter.peek() {
                let matches = next.role == Role::Tool
                    && next
                        .tool_call_id
                        .as_ref()
                        .is_some_and(|id| expected.contains(id));
                if !matches {
                    break;
                }
                block.push(iter.next().unwrap());
            }
            blocks.push(block);
        } else {
            blocks.push(vec![message]);
        }
    }
    blocks
}

/// Harder repair than [`sanitize_history`] for a provider that rejects the
/// `tool_call_id` pairing outright: rather than trying to fix pairing,
/// drops every tool-role message and strips `tool_calls` from the
/// assistant messages that introduced them, collapsing the exchange to
/// plain text.
pub fn strip_tool_call_metadata(messages: Vec<ConversationMessage>) -> Vec<ConversationMessage> {
    messages
        .into_iter()
        .filter(|m| m.role != Role::Tool)
        .map(|mut m| {
            m.tool_calls.clear();
            m
        })
        .collect()
}

/// Keep the most recent `max_history_messages` entries, never splitting a
/// tool-call block.
pub fn trim_history(messages: Vec<ConversationMessage>, max_history_messages: usize) -> Vec<ConversationMessage> {
    let blocks = to_blocks(messages);
    let mut kept = Vec::new();
    let mut total = 0;
    for block in blocks.into_iter().rev() {
        if total >= max_history_messages && !kept.is_empty() {
            break;
        }
        total += block.len();
        kept.push(block);
    }
    kept.reverse();
    kept.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "t".to_string(),
            arguments: serde_json::json!({}),
        }
    }

    #[test]
    fn sanitize_strips_orphan_tool_message() {
        let messages = vec![
            ConversationMessage::user("hi"),
            ConversationMessage::tool_result("call_1", "orphaned"),
        ];
        let sanitized = sanitize_history(messages);
        assert_eq!(sanitized.len(), 1);
        assert_eq!(sanitized[0].role, Role::User);
    }

    #[test]
    fn sanitize_strips_assistant_call_with_no_results_at_all() {
        let messages = vec![ConversationMessage::assistant_with_tool_calls(
            "",
            vec![call("call_1")],
        )];
        let sanitized = sanitize_history(messages);
        assert!(sanitized.is_empty());
    }

    #[test]
    fn sanitize_synthesizes_missing_result_for_partial_sequence() {
        let messages = vec![ConversationMessage::assistant_with_tool_calls(
            "",
            vec![call("call_1"), call("call_2")],
        ), ConversationMessage::tool_result("call_1", "ok")];
        let sanitized = sanitize_history(messages);
        assert_eq!(sanitized.len(), 3);
        assert_eq!(sanitized[1].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(sanitized[2].tool_call_id.as_deref(), Some("call_2"));
        assert_eq!(sanitized[2].content, INTERRUPTED_PLACEHOLDER);
    }

    #[test]
    fn sanitize_reorders_scattered_tool_results_to_be_contiguous() {
        let messages = vec![
            ConversationMessage::assistant_with_tool_calls("", vec![call("call_1")]),
            ConversationMessage::user("unrelated interjection"),
            ConversationMessage::tool_result("call_1", "ok"),
        ];
        let sanitized = sanitize_history(messages);
        assert_eq!(sanitized.len(), 3);
        assert!(sanitized[0].has_tool_calls());
        assert_eq!(sanitized[1].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(sanitized[2].role, Role::User);
    }

    #[test]
    fn strip_tool_call_metadata_drops_tool_messages_and_calls() {
        let messages = vec![
            ConversationMessage::user("q1"),
            ConversationMessage::assistant_with_tool_calls("", vec![call("call_1")]),
            ConversationMessage::tool_result("call_1", "ok"),
            ConversationMessage::assistant("final"),
        ];
        let stripped = strip_tool_call_metadata(messages);
        assert_eq!(stripped.len(), 3);
        assert!(stripped.iter().all(|m| m.role != Role::Tool));
        assert!(stripped.iter().all(|m| m.tool_calls.is_empty()));
    }

    #[test]
    fn trim_never_orphans_a_tool_sequence() {
        let messages = vec![
            ConversationMessage::system("sys"),
            ConversationMessage::user("q1"),
            ConversationMessage::assistant_with_tool_calls("", vec![call("call_1")]),
            ConversationMessage::tool_result("call_1", "ok"),
            ConversationMessage::assistant("final"),
        ];
        // max=2 would normally cut mid-block (tool_result, assistant) if
        // blocks weren't respected; the block before it must be pulled in whole.
        let trimmed = trim_history(messages, 2);
        assert_eq!(trimmed.len(), 3);
        assert!(trimmed[0].has_tool_calls());
        assert_eq!(trimmed[1].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(trimmed[2].content, "final");
    }

    #[test]
    fn trim_keeps_most_recent_whole_blocks_up_to_limit() {
        let messages = vec![
            ConversationMessage::user("q1"),
            ConversationMessage::assistant("a1"),
            ConversationMessage::user("q2"),
            ConversationMessage::assistant("a2"),
        ];
        let trimmed = trim_history(messages, 2);
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed[0].content, "q2");
        assert_eq!(trimmed[1].content, "a2");
    }
}
