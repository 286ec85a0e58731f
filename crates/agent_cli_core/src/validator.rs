//! Stream Validator (component B): tracks `tool_use`/`tool_result`
//! pairing across one response stream. Advisory only — it never fails
//! the stream, it only accumulates diagnostics the caller can inspect.

use std::collections::HashSet;

use crate::content::ContentBlock;
use crate::message::Envelope;

/// Diagnostics collected over the lifetime of one response stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatorReport {
    pub messages_seen: u64,
    pub tool_uses_seen: u64,
    pub tool_results_seen: u64,
    pub result_observed: bool,
    pub unresolved_tool_use_ids: Vec<String>,
}

/// Owned by the Router, fed every data envelope post-parse,
/// pre-dispatch (§4.B).
#[derive(Debug, Default)]
pub struct ToolPairTracker {
    open: HashSet<String>,
    messages_seen: u64,
    tool_uses_seen: u64,
    tool_results_seen: u64,
    result_observed: bool,
}

impl ToolPairTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe one data envelope. Control envelopes are not meaningful
    /// here and are silently ignored (the Router never calls this for
    /// them in practice).
    pub fn observe(&mut self, envelope: &Envelope) {
        self.messages_seen += 1;
        match envelope {
            Envelope::Assistant(msg) => {
                for block in msg.message.content.as_blocks() {
                    if let ContentBlock::ToolUse { id, .. } = block {
                        self.tool_uses_seen += 1;
                        self.open.insert(id);
                    }
                }
            }
            Envelope::User(msg) => {
                for block in msg.message.content.as_blocks() {
                    if let ContentBlock::ToolResult { tool_use_id, .. } = block {
                        self.tool_results_seen += 1;
                        self.open.remove(&tool_use_id);
                    }
                }
            }
            Envelope::Result(_) => {
                self.result_observed = true;
            }
            _ => {}
        }
    }

    /// Snapshot the current diagnostics. Called at stream-end
    /// (ResultMessage received or transport closed).
    pub fn report(&self) -> ValidatorReport {
        let mut unresolved: Vec<String> = self.open.iter().cloned().collect();
        unresolved.sort();
        ValidatorReport {
            messages_seen: self.messages_seen,
            tool_uses_seen: self.tool_uses_seen,
            tool_results_seen: self.tool_results_seen,
            result_observed: self.result_observed,
            unresolved_tool_use_ids: unresolved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::MessageContent;
    use crate::message::{
        AssistantMessage, AssistantMessageBody, ResultMessage, UserMessage, UserMessageBody,
    };

    fn assistant_tool_use(id: &str) -> Envelope {
        Envelope::Assistant(AssistantMessage {
            message: AssistantMessageBody {
                content: MessageContent::Blocks(vec![ContentBlock::ToolUse {
                    id: id.to_string(),
                    name: "Bash".to_string(),
                    input: Default::default(),
                }]),
                model: "test-model".to_string(),
                error: None,
            },
            uuid: None,
            parent_tool_use_id: None,
        })
    }

    fn user_tool_result(id: &str) -> Envelope {
        Envelope::User(UserMessage {
            message: UserMessageBody {
                content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                    tool_use_id: id.to_string(),
                    content: crate::content::ToolResultContent::Text("ok".to_string()),
                    is_error: None,
                }]),
            },
            uuid: None,
            parent_tool_use_id: None,
            tool_use_result: None,
        })
    }

    #[test]
    fn matched_pair_leaves_nothing_unresolved() {
        let mut tracker = ToolPairTracker::new();
        tracker.observe(&assistant_tool_use("tu_1"));
        tracker.observe(&user_tool_result("tu_1"));
        let report = tracker.report();
        assert!(report.unresolved_tool_use_ids.is_empty());
        assert_eq!(report.tool_uses_seen, 1);
        assert_eq!(report.tool_results_seen, 1);
    }

    #[test]
    fn unmatched_tool_use_is_reported_not_fatal() {
        let mut tracker = ToolPairTracker::new();
        tracker.observe(&assistant_tool_use("tu_1"));
        let report = tracker.report();
        assert_eq!(report.unresolved_tool_use_ids, vec!["tu_1".to_string()]);
    }

    #[test]
    fn result_message_sets_observed_flag() {
        let mut tracker = ToolPairTracker::new();
        tracker.observe(&Envelope::Result(ResultMessage {
            subtype: "final".to_string(),
            duration_ms: 1,
            duration_api_ms: 1,
            is_error: false,
            num_turns: 1,
            session_id: "s1".to_string(),
            total_cost_usd: None,
            usage: None,
            result: None,
            structured_output: None,
        }));
        assert!(tracker.report().result_observed);
    }
}
