//! RTP depacketization, H.264 parameter-set decoding, JFIF synthesis, and
//! image-type sniffing (§4.6): the pure parsing and reassembly logic that
//! sits between a raw network capture and the shared-memory image types
//! the rest of the pipeline publishes.

pub mod bitstream;
pub mod error;
pub mod expgolomb;
pub mod h264_depacket;
pub mod h264_pps;
pub mod h264_sps;
pub mod jpeg_depacket;
pub mod rbsp;
pub mod rtp;
pub mod sniff;

pub use error::{CodecError, Result};
pub use h264_depacket::AvcReassembler;
pub use h264_pps::Pps;
pub use h264_sps::Sps;
pub use jpeg_depacket::JpegReassembler;
pub use rtp::{RtpHeader, RtpPacket};
pub use sniff::sniff;
