//! Structured records the agent embeds in the worker's text output.

pub mod parse;
pub mod types;
