//! Status envelope parser
//!
//! Extracts the structured `{status, paragraphs?, title?}` envelope from raw
//! model text. Only the first well-formed JSON object in the text is
//! considered; surrounding prose is ignored. Malformed input never panics —
//! every failure becomes a `ParseOutcome::Failed` the task loop turns into a
//! corrective instruction.

use serde::Deserialize;
use serde_json::Value;

use crate::protocol::TaskStatus;

/// A parsed, reference-resolved envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub status: TaskStatus,
    pub paragraphs: Vec<ParagraphPatch>,
    pub title: Option<String>,
}

impl Envelope {
    pub fn has_content(&self) -> bool {
        !self.paragraphs.is_empty() || self.title.is_some()
    }
}

/// One unit's replacement text, with the wire reference resolved to an id.
#[derive(Debug, Clone, PartialEq)]
pub struct ParagraphPatch {
    pub unit_id: String,
    pub text: String,
}

/// Tagged parse result; the loop treats `Failed` as a retry outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(Envelope),
    Failed { reason: String },
}

impl ParseOutcome {
    fn failed(reason: impl Into<String>) -> Self {
        ParseOutcome::Failed {
            reason: reason.into(),
        }
    }
}

#[derive(Deserialize)]
struct WireEnvelope {
    status: Option<String>,
    #[serde(default)]
    paragraphs: Vec<WireParagraph>,
    #[serde(default)]
    title: Option<String>,
}

/// Wire references are either explicit ids or integer positions into the
/// chunk's ordered id list (compact encoding).
#[derive(Deserialize)]
struct WireParagraph {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    index: Option<i64>,
    text: Option<String>,
}

/// Parse the first well-formed JSON object out of `text` and resolve its
/// paragraph references against `unit_ids`, the current chunk's ordered id
/// list.
pub fn parse_envelope(text: &str, unit_ids: &[String]) -> ParseOutcome {
    let Some(raw) = first_json_object(text) else {
        return ParseOutcome::failed("no structured envelope found in output");
    };

    let wire: WireEnvelope = match serde_json::from_value(raw) {
        Ok(wire) => wire,
        Err(e) => return ParseOutcome::failed(format!("malformed envelope: {e}")),
    };

    let Some(status_str) = wire.status else {
        return ParseOutcome::failed("envelope is missing the required \"status\" field");
    };
    let Some(status) = TaskStatus::parse(&status_str) else {
        return ParseOutcome::failed(format!(
            "\"{status_str}\" is not a valid status (expected planning, working, review or end)"
        ));
    };

    let mut paragraphs = Vec::with_capacity(wire.paragraphs.len());
    for (pos, paragraph) in wire.paragraphs.into_iter().enumerate() {
        let Some(text) = paragraph.text else {
            return ParseOutcome::failed(format!("paragraph entry {pos} is missing \"text\""));
        };

        let unit_id = match (paragraph.id, paragraph.index) {
            (Some(id), _) => {
                if !unit_ids.iter().any(|known| *known == id) {
                    return ParseOutcome::failed(format!(
                        "paragraph id \"{id}\" is not part of the current chunk"
                    ));
                }
                id
            }
            (None, Some(index)) => {
                let Ok(index) = usize::try_from(index) else {
                    return ParseOutcome::failed(format!("paragraph index {index} is negative"));
                };
                match unit_ids.get(index) {
                    Some(id) => id.clone(),
                    None => {
                        return ParseOutcome::failed(format!(
                            "paragraph index {index} is out of range (chunk has {} units)",
                            unit_ids.len()
                        ))
                    }
                }
            }
            (None, None) => {
                return ParseOutcome::failed(format!(
                    "paragraph entry {pos} has neither \"id\" nor \"index\""
                ))
            }
        };

        paragraphs.push(ParagraphPatch { unit_id, text });
    }

    ParseOutcome::Parsed(Envelope {
        status,
        paragraphs,
        title: wire.title,
    })
}

/// First complete JSON object embedded anywhere in `text`. Candidate start
/// positions are every `{`; the serde stream deserializer tolerates trailing
/// prose after the object.
fn first_json_object(text: &str) -> Option<Value> {
    for (pos, _) in text.char_indices().filter(|(_, c)| *c == '{') {
        let mut stream = serde_json::Deserializer::from_str(&text[pos..]).into_iter::<Value>();
        if let Some(Ok(value)) = stream.next() {
            if value.is_object() {
                return Some(value);
            }
        }
    }
    None
}
