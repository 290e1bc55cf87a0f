//! Embedded prompts
//!
//! Compiled into the binary from .pmt files at build time.

/// Default executor prompt (no scenario)
pub const EXECUTOR: &str = include_str!("../../prompts/executor.pmt");

/// Default planner prompt (no scenario); includes the external context block
pub const PLANNER: &str = include_str!("../../prompts/planner.pmt");

/// Intent analysis prompt
pub const ANALYZE: &str = include_str!("../../prompts/analyze.pmt");

/// Step decomposition prompt
pub const DECOMPOSE: &str = include_str!("../../prompts/decompose.pmt");

/// Strawman proposal prompt
pub const PROPOSALS: &str = include_str!("../../prompts/proposals.pmt");

/// All embedded templates by name
pub const ALL: &[(&str, &str)] = &[
    ("executor", EXECUTOR),
    ("planner", PLANNER),
    ("analyze", ANALYZE),
    ("decompose", DECOMPOSE),
    ("proposals", PROPOSALS),
];

/// Get the embedded prompt by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    ALL.iter().find(|(n, _)| *n == name).map(|(_, t)| *t)
}
