//! Degenerated-output detection.
//!
//! Generation models occasionally collapse into repeating a character or a
//! tiny alphabet forever. The guard compares the accumulated generated text
//! of a chunk attempt against the chunk's source text and flags output whose
//! repetition is disproportionate to anything the source contains. Detection
//! abandons the attempt; the orchestrator retries the whole chunk a bounded
//! number of times.

/// Longest same-char run tolerated regardless of source.
const RUN_FLOOR: usize = 32;

/// Generated runs may exceed the source's longest run by this factor before
/// they count as degenerate.
const RUN_FACTOR: usize = 4;

/// Output longer than source × factor + slack with a tiny alphabet is
/// degenerate even without a single long run.
const BLOAT_FACTOR: usize = 4;
const BLOAT_SLACK: usize = 400;
const BLOAT_MIN_ALPHABET: usize = 12;

/// Why the output was judged degenerate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegenerationSignal {
    pub reason: String,
}

/// Inspect `generated` against `source`. Returns a signal when the output
/// shows pathological repetition the source cannot explain.
pub fn detect_degeneration(generated: &str, source: &str) -> Option<DegenerationSignal> {
    if generated.is_empty() {
        return None;
    }

    let generated_run = longest_run(generated);
    let source_run = longest_run(source);
    let run_limit = RUN_FLOOR.max(source_run.saturating_mul(RUN_FACTOR));
    if generated_run > run_limit {
        return Some(DegenerationSignal {
            reason: format!(
                "a single character repeats {generated_run} times (source maximum is {source_run})"
            ),
        });
    }

    let generated_len = generated.chars().count();
    let source_len = source.chars().count();
    if generated_len > source_len.saturating_mul(BLOAT_FACTOR) + BLOAT_SLACK
        && alphabet_size(generated) < BLOAT_MIN_ALPHABET
    {
        return Some(DegenerationSignal {
            reason: format!(
                "output grew to {generated_len} chars over a {}-char alphabet for a {source_len}-char source",
                alphabet_size(generated)
            ),
        });
    }

    None
}

fn longest_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut last: Option<char> = None;
    for c in text.chars() {
        if Some(c) == last {
            current += 1;
        } else {
            last = Some(c);
            current = 1;
        }
        longest = longest.max(current);
    }
    longest
}

fn alphabet_size(text: &str) -> usize {
    let mut seen = std::collections::HashSet::new();
    for c in text.chars() {
        seen.insert(c);
        if seen.len() >= BLOAT_MIN_ALPHABET {
            break;
        }
    }
    seen.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_translation_passes() {
        let source = "The quick brown fox jumps over the lazy dog.";
        let generated = "Der schnelle braune Fuchs springt über den faulen Hund.";
        assert_eq!(detect_degeneration(generated, source), None);
    }

    #[test]
    fn long_character_run_is_flagged() {
        let source = "A short paragraph.";
        let generated = format!("Der kurze Absatz{}", "!".repeat(120));
        assert!(detect_degeneration(&generated, source).is_some());
    }

    #[test]
    fn runs_present_in_source_are_tolerated() {
        // ASCII art in the source legitimizes comparable runs in the output.
        let source = format!("Divider: {}", "=".repeat(40));
        let generated = format!("Trenner: {}", "=".repeat(60));
        assert_eq!(detect_degeneration(&generated, &source), None);
    }

    #[test]
    fn tiny_alphabet_bloat_is_flagged() {
        let source = "Short.";
        let generated = "ababab".repeat(200);
        assert!(detect_degeneration(&generated, source).is_some());
    }

    #[test]
    fn long_but_diverse_output_passes() {
        let source = "Summarize.";
        let generated: String = (0..500)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect();
        assert_eq!(detect_degeneration(&generated, source), None);
    }

    #[test]
    fn empty_output_passes() {
        assert_eq!(detect_degeneration("", "anything"), None);
    }
}
