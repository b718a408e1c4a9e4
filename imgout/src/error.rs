//! Error kinds for the fan-out layer (§7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ImgOutError>;

#[derive(Error, Debug)]
pub enum ImgOutError {
    #[error("publisher error: {0}")]
    Publish(#[from] channel::error::ChannelError),

    #[error("fat pipe error: {0}")]
    FatPipe(#[from] fatpipe::error::FatPipeError),

    #[error("name must not contain a path separator: {0}")]
    NameHasSeparator(String),
}
