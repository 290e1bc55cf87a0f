//! Identifier generation
//!
//! Session ids use the format `proj_{32-hex}` built from a UUIDv7, so ids
//! sort by creation time. Question and proposal ids are plain UUIDv7 strings.

use uuid::Uuid;

/// Prefix shared by every session id
pub const SESSION_PREFIX: &str = "proj_";

/// Generate a new session id
pub fn generate_session_id() -> String {
    format!("{}{}", SESSION_PREFIX, Uuid::now_v7().simple())
}

/// Generate an id for a question, proposal or context entry
pub fn generate_item_id() -> String {
    Uuid::now_v7().to_string()
}

/// Resolve a possibly abbreviated session id against a list of known ids
///
/// Accepts the full id, the id without its `proj_` prefix, or any unique
/// prefix of either. Returns `None` when nothing or more than one id matches.
pub fn resolve_session_id<'a>(input: &str, known: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    let needle = input.strip_prefix(SESSION_PREFIX).unwrap_or(input);
    if needle.is_empty() {
        return None;
    }

    let mut found = None;
    let mut ambiguous = false;
    for id in known {
        let bare = id.strip_prefix(SESSION_PREFIX).unwrap_or(id);
        if id == input {
            return Some(id);
        }
        if bare.starts_with(needle) {
            ambiguous |= found.is_some();
            found = Some(id);
        }
    }
    if ambiguous { None } else { found }
}
