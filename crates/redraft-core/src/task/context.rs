//! Conversation assembly for the task loop.
//!
//! Renders the chunk payload, the protocol brief, and every corrective
//! instruction the loop may need to append. Business prompt copy (what the
//! transformation should do) is supplied by the caller through
//! [`TaskPrompt`]; this module owns only the protocol framing.

use crate::ai::types::ModelMessage;
use crate::document::Chunk;
use crate::protocol::{TaskKind, TaskStatus};

/// Caller-supplied prompt copy.
#[derive(Debug, Clone)]
pub struct TaskPrompt {
    /// System prompt establishing the transformation (language pair, tone,
    /// editorial rules).
    pub system: String,
    /// Per-chunk instruction prefix shown above the paragraphs.
    pub instructions: String,
}

/// Seed conversation for a fresh chunk attempt.
pub(crate) fn initial_messages(
    prompt: &TaskPrompt,
    chunk: &Chunk,
    kind: TaskKind,
) -> Vec<ModelMessage> {
    vec![
        ModelMessage::system(prompt.system.as_str()),
        ModelMessage::user(chunk_message(prompt, chunk, kind)),
    ]
}

fn chunk_message(prompt: &TaskPrompt, chunk: &Chunk, kind: TaskKind) -> String {
    let mut message = String::new();
    message.push_str(&prompt.instructions);
    message.push_str("\n\nParagraphs to process:\n");
    for (index, unit) in chunk.units().iter().enumerate() {
        message.push_str(&format!("{index}. [{}] {}\n", unit.id, unit.text));
    }
    message.push('\n');
    message.push_str(&protocol_brief(kind));
    message
}

/// The wire-protocol rules, phrased for the model.
fn protocol_brief(kind: TaskKind) -> String {
    let mut brief = String::from(
        "Respond on every turn with a single JSON object:\n\
         {\"status\": \"...\", \"paragraphs\": [{\"id\": \"...\", \"text\": \"...\"}], \"title\": \"...\"}\n\
         Rules:\n\
         - \"status\" is required",
    );
    if kind.review {
        brief.push_str(
            ": \"planning\" while you gather context, \"working\" while you deliver \
             paragraphs, \"review\" once you believe the batch is complete, \"end\" to finish.\n\
             - From \"review\" you may return to \"working\" or declare \"end\".\n",
        );
    } else {
        brief.push_str(
            ": \"planning\" while you gather context, \"working\" while you deliver \
             paragraphs, \"end\" to finish. Do not use \"review\".\n",
        );
    }
    brief.push_str(
        "- \"paragraphs\" and \"title\" may only appear while status is \"working\".\n\
         - Reference paragraphs by their bracketed id, or by \"index\" into the list above.\n",
    );
    if kind.changed_only {
        brief.push_str("- Report only the paragraphs you actually changed.\n");
    } else {
        brief.push_str("- Every listed paragraph needs a result before you finish.\n");
    }
    brief.push_str("- Use tools only while planning, and only those provided.");
    brief
}

// ── Corrective instructions ────────────────────────────────────────────

pub(crate) fn transition_correction(
    declared: TaskStatus,
    current: TaskStatus,
    kind: TaskKind,
) -> String {
    let next = kind.next_statuses(current);
    let options = next
        .iter()
        .map(|s| format!("\"{s}\""))
        .collect::<Vec<_>>()
        .join(" or ");
    format!(
        "Your last turn declared status \"{declared}\", which is not valid after \
         \"{current}\". Repeat the turn with status {options} (or \"{current}\" to continue)."
    )
}

pub(crate) fn content_correction(status: TaskStatus) -> String {
    format!(
        "Your last turn included paragraph or title content while status was \
         \"{status}\". Content is only accepted while status is \"working\". \
         Repeat the turn accordingly."
    )
}

pub(crate) fn parse_correction(reason: &str) -> String {
    format!(
        "Your last turn could not be processed: {reason}. Respond with exactly one \
         JSON object of the form {{\"status\": ..., \"paragraphs\": [...], \"title\": ...}}."
    )
}

pub(crate) fn missing_units_correction(missing: &[&str]) -> String {
    format!(
        "The batch is not complete. These paragraphs still have no result: {}. \
         Return to status \"working\" and deliver them.",
        missing.join(", ")
    )
}

pub(crate) fn stall_directive(status: TaskStatus, kind: TaskKind) -> String {
    match status {
        TaskStatus::Planning => "You have spent several turns planning without progress. \
             Move to status \"working\" now and start delivering paragraphs."
            .to_string(),
        TaskStatus::Working => "Your last turns carried no paragraphs. Deliver the next \
             batch of results in this turn, without further delay."
            .to_string(),
        TaskStatus::Review => {
            if kind.permits(TaskStatus::Review, TaskStatus::End) {
                "Conclude the review: either return to \"working\" with the remaining \
                 paragraphs or declare status \"end\"."
                    .to_string()
            } else {
                "Declare status \"end\" to finish this batch.".to_string()
            }
        }
        TaskStatus::End => String::new(),
    }
}
