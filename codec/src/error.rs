//! Error kinds for the codec layer (§7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CodecError>;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("bitstream underflow")]
    BitstreamUnderflow,

    #[error("invalid rtp packet: {0}")]
    InvalidRtp(String),

    #[error("invalid rtp/jpeg packet: {0}")]
    InvalidRtpJpeg(String),

    #[error("invalid rtp/avc packet: {0}")]
    InvalidRtpAvc(String),

    #[error("invalid sps: {0}")]
    InvalidSps(String),

    #[error("invalid pps: {0}")]
    InvalidPps(String),
}
