//! Error kinds for the fat pipe (§7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FatPipeError>;

#[derive(Error, Debug)]
pub enum FatPipeError {
    /// The peer closed its end, or sent the end-of-stream byte (`x`).
    /// Callers should treat this as a normal end-of-stream.
    #[error("fat pipe peer is gone")]
    PeerGone,

    /// The shared-memory or semaphore layer returned an error.
    #[error(transparent)]
    Channel(#[from] channel::ChannelError),

    /// A raw OS call (socketpair, sendmsg, recvmsg, poll) failed.
    #[error("fat pipe io error: {0}")]
    Io(#[from] std::io::Error),
}
