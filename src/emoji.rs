//! Emoji codec between Matrix reaction keys (Unicode) and Mattermost
//! reaction names (canonical ASCII identifiers), per §4.E.
//!
//! A fixed bidirectional table covers ~20 common emoji. Unicode outside
//! the table passes through unchanged (Mattermost accepts raw Unicode
//! emoji names in practice). A colon-wrapped custom name `:x:` has its
//! colons stripped when the inner name is at least one character (total
//! length ≥ 3, i.e. `:x:`); everything else passes through verbatim.

/// `(unicode, canonical name)` pairs. `thumbsup`/`thumbsdown` are the
/// documented synonyms for `+1`/`-1` — both names map to the same emoji on
/// decode, but the table's primary (and therefore encode-preferred) name
/// is `+1`/`-1`, matching Mattermost's own naming.
const TABLE: &[(&str, &str)] = &[
    ("👍", "+1"),
    ("👎", "-1"),
    ("😀", "grinning"),
    ("😄", "smile"),
    ("😂", "joy"),
    ("😊", "blush"),
    ("😍", "heart_eyes"),
    ("😢", "cry"),
    ("😡", "rage"),
    ("😮", "open_mouth"),
    ("🎉", "tada"),
    ("❤️", "heart"),
    ("🔥", "fire"),
    ("✅", "white_check_mark"),
    ("❌", "x"),
    ("👀", "eyes"),
    ("🙏", "pray"),
    ("🤔", "thinking_face"),
    ("💯", "100"),
    ("🚀", "rocket"),
    ("👏", "clap"),
];

/// Synonym names that decode to the same emoji as the table's primary
/// name, but are never produced by [`name_to_emoji`]'s reverse lookup.
const SYNONYMS: &[(&str, &str)] = &[("thumbsup", "+1"), ("thumbsdown", "-1")];

/// Convert a Matrix reaction key (Unicode emoji, typically) to a
/// Mattermost reaction name.
///
/// Unicode outside the table passes through unchanged. A colon-wrapped
/// custom name (`:partyparrot:`) has its colons stripped when the inner
/// name is non-empty; anything else passes through verbatim.
#[must_use]
pub fn emoji_to_name(key: &str) -> String {
    if let Some((_, name)) = TABLE.iter().find(|(emoji, _)| *emoji == key) {
        return (*name).to_string();
    }
    if key.len() >= 3 && key.starts_with(':') && key.ends_with(':') {
        let inner = &key[1..key.len() - 1];
        if !inner.is_empty() {
            return inner.to_string();
        }
    }
    key.to_string()
}

/// Convert a Mattermost reaction name back to the Matrix Unicode emoji.
///
/// Recognises both a table's primary name and its documented synonyms.
/// Names outside the table pass through unchanged, matching
/// [`emoji_to_name`]'s "unknown passes through" rule.
#[must_use]
pub fn name_to_emoji(name: &str) -> String {
    if let Some((emoji, _)) = TABLE.iter().find(|(_, n)| *n == name) {
        return (*emoji).to_string();
    }
    if let Some((_, canonical)) = SYNONYMS.iter().find(|(syn, _)| *syn == name) {
        if let Some((emoji, _)) = TABLE.iter().find(|(_, n)| n == canonical) {
            return (*emoji).to_string();
        }
    }
    name.to_string()
}
