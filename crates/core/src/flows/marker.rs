use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::flows::states::ConversationState;

fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[STATE:([A-Z_]+)\]").expect("state marker pattern"))
}

/// A `[STATE:<NAME>]` token found in generated text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateMarker {
    pub name: String,
    pub state: Option<ConversationState>,
}

/// Returns the last marker in `text`; earlier markers are superseded.
pub fn extract_state_marker(text: &str) -> Option<StateMarker> {
    let name = marker_pattern().captures_iter(text).last()?.get(1)?.as_str().to_owned();
    let state = ConversationState::from_str(&name).ok();
    Some(StateMarker { name, state })
}

/// Removes every marker, trailing or mid-sentence, so none reaches the end
/// user. Spaces in front of a marker go with it.
pub fn strip_state_markers(text: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"[ \t]*\[STATE:[A-Z_]+\]").expect("state marker strip pattern"));
    pattern.replace_all(text, "").trim().to_owned()
}
