//! Turns raw worker output into state signals.
//!
//! Scanning is pure: [`scan_chunk`] only reports what it saw, and
//! [`Session::apply`](super::state::Session::apply) performs the mutation.

use serde_json::Value;

use crate::protocol::parse::decode_records;

/// Printed by the worker when every task in the PRD has passed.
pub const COMPLETION_MARKER: &str = "Unpossible completed all tasks";
/// Printed by the worker when it gives up after its last iteration.
pub const MAX_ITERATIONS_MARKER: &str = "reached max iterations";

const ITERATION_PREFIX: &str = "Iteration ";
const BRANCH_PREFIX: &str = "Target branch: ";
const STORY_PREFIX: &str = "Selected story: ";

/// Something the worker's output told us about the run.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Iteration { current: u32, max: u32 },
    Branch(String),
    Story(String),
    MaxIterationsReached,
    Completed,
    /// A structured agent record embedded as its own line.
    Record(Value),
}

/// Scan one chunk of output.
///
/// Chunks are whatever the pipe delivered, so a marker split across two reads
/// is missed, same as any line-oblivious reader. Signals come back in a fixed
/// order: iteration, branch, story, max-iterations, completion, then records.
/// Completion is reported after max-iterations so a chunk that carries the
/// completion marker always leaves the run complete.
pub fn scan_chunk(text: &str) -> Vec<Signal> {
    let mut signals = Vec::new();

    if let Some((current, max)) = find_iteration(text) {
        signals.push(Signal::Iteration { current, max });
    }
    if let Some(branch) = find_rest_of_line(text, BRANCH_PREFIX) {
        signals.push(Signal::Branch(branch.to_string()));
    }
    if let Some(story) =
        find_rest_of_line(text, STORY_PREFIX).and_then(|rest| rest.split_whitespace().next())
    {
        signals.push(Signal::Story(story.to_string()));
    }
    if text.contains(MAX_ITERATIONS_MARKER) {
        signals.push(Signal::MaxIterationsReached);
    }
    if text.contains(COMPLETION_MARKER) {
        signals.push(Signal::Completed);
    }

    signals.extend(decode_records(text).into_iter().map(Signal::Record));
    signals
}

/// Find the first `Iteration N of M` in `text`.
fn find_iteration(text: &str) -> Option<(u32, u32)> {
    let mut rest = text;
    while let Some(pos) = rest.find(ITERATION_PREFIX) {
        rest = &rest[pos + ITERATION_PREFIX.len()..];
        if let Some(found) = parse_n_of_m(rest) {
            return Some(found);
        }
    }
    None
}

fn parse_n_of_m(text: &str) -> Option<(u32, u32)> {
    let (current, rest) = leading_number(text)?;
    let rest = rest.strip_prefix(" of ")?;
    let (max, _) = leading_number(rest)?;
    Some((current, max))
}

fn leading_number(text: &str) -> Option<(u32, &str)> {
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    if end == 0 {
        return None;
    }
    let value = text[..end].parse().ok()?;
    Some((value, &text[end..]))
}

/// Text following the first occurrence of `prefix`, up to the end of its line.
fn find_rest_of_line<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let start = text.find(prefix)? + prefix.len();
    let rest = &text[start..];
    let end = rest.find(['\r', '\n']).unwrap_or(rest.len());
    let value = &rest[..end];
    (!value.is_empty()).then_some(value)
}
