//! Prompt assembly: system-message refresh and history truncation.
//!
//! The in-memory history is never cut; only the list handed to the LLM is.
//! Truncation keeps the system message, the original user input and the most
//! recent `max_call_stack` complete (assistant, user) interaction cycles,
//! inserting a single notice message where older cycles were dropped.

use crate::message::{Message, Role};

/// Replaces the leading system message with a freshly rendered prompt, or
/// inserts one (plus the original user input on a brand-new conversation).
/// Returns the full message list and whether it was newly initialized.
pub fn reformat_messages(
    messages: &[Message],
    user_input: &str,
    system_prompt: &str,
) -> (Vec<Message>, bool) {
    if messages.is_empty() {
        return (
            vec![Message::system(system_prompt), Message::user(user_input)],
            true,
        );
    }
    let mut full = messages.to_vec();
    if matches!(full.first().map(|m| m.role), Some(Role::System)) {
        full[0] = Message::system(system_prompt);
    } else {
        full.insert(0, Message::system(system_prompt));
    }
    (full, false)
}

/// Truncates `full_messages` for LLM consumption.
pub fn truncate_history(full_messages: &[Message], max_call_stack: usize) -> Vec<Message> {
    if full_messages.len() <= 2 {
        return full_messages.to_vec();
    }

    let conversation = &full_messages[2..];
    // An odd tail means an interaction cycle is mid-flight; keep the extra
    // message on top of the configured cycle count.
    let incomplete_cycle = conversation.len() % 2 != 0;
    let complete_cycles = conversation.len() / 2;
    if complete_cycles <= max_call_stack {
        return full_messages.to_vec();
    }

    let mut keep = max_call_stack * 2;
    if incomplete_cycle {
        keep += 1;
    }
    let keep = keep.min(conversation.len());
    let dropped = conversation.len() - keep;
    let kept_cycles = keep / 2;

    let notice = Message::user(format!(
        "[System Notice: Truncated {dropped} older messages to preserve context length. \
         Kept {kept_cycles} recent interaction cycles. Use analysis of recent interactions \
         to gain context about prior work.]"
    ));

    let mut out = Vec::with_capacity(keep + 3);
    out.push(full_messages[0].clone());
    out.push(full_messages[1].clone());
    out.push(notice);
    out.extend_from_slice(&conversation[conversation.len() - keep..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle(n: usize) -> Vec<Message> {
        let mut msgs = vec![Message::system("sys"), Message::user("input")];
        for i in 0..n {
            msgs.push(Message::assistant(&format!("thought {i}"), &[]));
            msgs.push(Message::user(format!("result {i}")));
        }
        msgs
    }

    /// **Scenario**: with 8 complete cycles and max_call_stack=3, the LLM input
    /// is system + user input + notice + 6 messages; the full history is
    /// untouched.
    #[test]
    fn truncates_to_recent_cycles() {
        let full = cycle(8);
        assert_eq!(full.len(), 18);
        let truncated = truncate_history(&full, 3);
        assert_eq!(truncated.len(), 9);
        assert!(matches!(truncated[0].role, Role::System));
        assert!(truncated[2].content.text().contains("Truncated 10 older messages"));
        assert_eq!(truncated[3].content.text(), "thought 5");
        // Original list untouched.
        assert_eq!(full.len(), 18);
    }

    /// **Scenario**: at or under the cycle budget nothing is dropped and no
    /// notice is inserted.
    #[test]
    fn no_truncation_under_budget() {
        let full = cycle(3);
        let truncated = truncate_history(&full, 3);
        assert_eq!(truncated.len(), full.len());
        assert!(!truncated.iter().any(|m| m.content.text().contains("System Notice")));
    }

    /// **Scenario**: an odd (mid-cycle) tail keeps the extra message.
    #[test]
    fn odd_tail_kept() {
        let mut full = cycle(5);
        full.push(Message::assistant("dangling", &[]));
        let truncated = truncate_history(&full, 3);
        // system + input + notice + 3 cycles + dangling
        assert_eq!(truncated.len(), 10);
        assert_eq!(truncated.last().unwrap().content.text(), "dangling");
    }

    /// **Scenario**: reformat replaces an existing system message and initializes
    /// a fresh conversation.
    #[test]
    fn reformat_replaces_or_initializes() {
        let (fresh, initialized) = reformat_messages(&[], "do it", "prompt v1");
        assert!(initialized);
        assert_eq!(fresh.len(), 2);
        assert_eq!(fresh[0].content.text(), "prompt v1");

        let (updated, initialized) = reformat_messages(&fresh, "do it", "prompt v2");
        assert!(!initialized);
        assert_eq!(updated[0].content.text(), "prompt v2");
        assert_eq!(updated.len(), 2);
    }
}
