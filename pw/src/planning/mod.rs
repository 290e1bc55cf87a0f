//! Planning phase: intent analysis, proposals and decomposition

mod parse;
mod planner;

pub use parse::{
    Decoded, Decomposition, FALLBACK_TASK, IntentAnalysis, parse_analysis, parse_decomposition, parse_proposals,
    strip_code_fences,
};
pub use planner::{EXTRACTED_CONSTRAINT, Planner, PlannerError};
