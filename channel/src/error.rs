//! Error kinds raised by the channel crate, one variant per row of the
//! error-handling table (spec §7) that applies to shared memory, the
//! semaphore, and the publisher/subscriber protocol.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChannelError>;

#[derive(Error, Debug)]
pub enum ChannelError {
    /// Channel name violates the grammar of §3: no slashes, no backslash,
    /// no `*`/`?`, must not start with `_`.
    #[error("invalid channel name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// `create-exclusive` on a shared-memory object that already exists.
    #[error("shared-memory object {name:?} already exists ({hint})")]
    ResourceExists { name: String, hint: &'static str },

    /// `open-existing` on a name the OS does not know.
    #[error("shared-memory object {name:?} does not exist")]
    ResourceMissing { name: String },

    /// Opened object has the wrong size or wrong magic.
    #[error("shared-memory object {name:?} mismatch: {reason}")]
    ResourceMismatch { name: String, reason: String },

    /// All `SLOTS` subscriber slots are occupied.
    #[error("no free subscriber slot on channel {channel:?}")]
    NoSlot { channel: String },

    /// The publisher has deactivated (`magic == 0`), or the fat-pipe peer
    /// sent an end-of-stream byte. Not a failure: callers should treat this
    /// as a normal end-of-stream, not propagate it as an error, unless they
    /// are explicitly checking "did this raise".
    #[error("peer for channel {channel:?} is gone")]
    PeerGone { channel: String },

    /// A mutex-holding remap of the data segment failed; catastrophic
    /// because the mutex may now be held forever.
    #[error("failed to remap data segment for channel {channel:?}: {source}")]
    RemapFailed {
        channel: String,
        #[source]
        source: std::io::Error,
    },

    /// A raw OS call failed outside of the cases above.
    #[error("io error in channel {channel:?}: {source}")]
    Io {
        channel: String,
        #[source]
        source: std::io::Error,
    },
}

impl ChannelError {
    pub fn io(channel: impl Into<String>, source: std::io::Error) -> Self {
        ChannelError::Io {
            channel: channel.into(),
            source,
        }
    }
}
