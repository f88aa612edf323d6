//! The remote (Mattermost) API boundary: REST client, streaming
//! connection, and the wire-shaped domain types both sides trade in.
//!
//! Everything here is an opaque third-party protocol per §6 — the only
//! bit-exact formats this crate owns are the format transcoders
//! ([`crate::format`]) and the emoji table ([`crate::emoji`]).

mod client;
mod stream;
mod types;

pub use client::RestClient;
pub use stream::{connect, Broadcast, Envelope, StreamHandle};
pub use types::{
    ChannelMember, ChannelType, FileInfo, FileKind, MessagePart, PostMetadata, Reaction, RemoteChannel, RemotePost, RemoteUser,
    Team,
};
