//! Bijective ID codecs between domain identifiers and the framework's
//! opaque ID newtypes.
//!
//! Channel, user, post and emoji IDs all round-trip as plain strings — the
//! remote API already hands out opaque identifiers, so encoding is the
//! identity function wrapped in a typed newtype. The one genuinely
//! nontrivial codec is the multi-part message index, where the framework's
//! convention for "first/sole part" is the empty string rather than `"0"`.

use std::fmt;

macro_rules! opaque_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw remote identifier.
            #[must_use]
            pub fn encode(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Unwrap back to the raw remote identifier.
            #[must_use]
            pub fn decode(self) -> String {
                self.0
            }

            /// Borrow the raw identifier without consuming the wrapper.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }
    };
}

opaque_id!(ChannelId, "A remote channel identifier (portal ID).");
opaque_id!(RemoteUserId, "A remote (Mattermost-side) user identifier.");
opaque_id!(PostId, "A remote post (message) identifier.");
opaque_id!(EmojiId, "A canonical remote emoji name.");

/// Encode a zero-based part index for a multi-part message.
///
/// Part 0 (the first or only part) encodes as the empty string, matching
/// the framework's "first/sole part" convention; all other indices encode
/// as their decimal string.
#[must_use]
pub fn encode_part_id(index: u32) -> String {
    if index == 0 {
        String::new()
    } else {
        index.to_string()
    }
}

/// Decode a part-ID string back into its zero-based index.
///
/// The empty string decodes to `0`; any other value must be a valid
/// non-negative decimal integer, or `None` is returned.
#[must_use]
pub fn decode_part_id(raw: &str) -> Option<u32> {
    if raw.is_empty() {
        Some(0)
    } else {
        raw.parse().ok()
    }
}
