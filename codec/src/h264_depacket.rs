//! RTP/H.264 depacketizer (§4.6.4), RFC 6184.

use crate::error::{CodecError, Result};
use crate::rbsp;
use crate::rtp::RtpPacket;

const FU_A: u8 = 28;
const FU_B: u8 = 29;

struct AvcHeader<'a> {
    bytes: &'a [u8],
}

impl<'a> AvcHeader<'a> {
    fn parse(bytes: &'a [u8]) -> Result<AvcHeader<'a>> {
        if bytes.is_empty() {
            return Err(CodecError::InvalidRtpAvc("empty payload".into()));
        }
        let h = AvcHeader { bytes };
        if bytes[0] & 0x80 != 0 {
            return Err(CodecError::InvalidRtpAvc("forbidden zero bit set".into()));
        }
        if h.nalu_type() == 0 {
            return Err(CodecError::InvalidRtpAvc("invalid nalu type".into()));
        }
        if h.is_fu() {
            if bytes.len() < 2 {
                return Err(CodecError::InvalidRtpAvc("fragmentation unit too small".into()));
            }
            if h.fu_start() && h.fu_end() {
                return Err(CodecError::InvalidRtpAvc("fragmentation unit is both start and end".into()));
            }
        } else if (24..=27).contains(&h.nalu_type()) {
            return Err(CodecError::InvalidRtpAvc("aggregation packets not implemented".into()));
        }
        if bytes.len() <= h.payload_offset() {
            return Err(CodecError::InvalidRtpAvc("payload offset exceeds packet size".into()));
        }
        Ok(h)
    }

    fn nalu_type(&self) -> u8 {
        self.bytes[0] & 0x1f
    }
    fn nri(&self) -> u8 {
        (self.bytes[0] >> 5) & 3
    }
    fn is_fu(&self) -> bool {
        matches!(self.nalu_type(), FU_A | FU_B)
    }
    fn fu_start(&self) -> bool {
        self.bytes[1] & 0x80 != 0
    }
    fn fu_end(&self) -> bool {
        self.bytes[1] & 0x40 != 0
    }
    fn fu_type(&self) -> u8 {
        self.bytes[1] & 0x1f
    }

    fn payload_offset(&self) -> usize {
        if self.is_fu() {
            let header_len = if self.nalu_type() == FU_B { 4 } else { 2 };
            if self.fu_start() {
                header_len - 1
            } else {
                header_len
            }
        } else {
            0
        }
    }

    /// The reconstructed NALU header byte: for the first fragment of a
    /// fragmentation unit this rebuilds the original `nal_unit_header`
    /// from the FU indicator's `nri` and the FU header's `fu_type`;
    /// otherwise it is simply the byte already sitting at the payload
    /// offset.
    fn payload_first(&self) -> u8 {
        if self.is_fu() && self.fu_start() {
            (self.bytes[0] & 0xe0) | self.fu_type()
        } else {
            self.bytes[self.payload_offset()]
        }
    }

    fn payload(&self) -> &'a [u8] {
        &self.bytes[self.payload_offset()..]
    }
}

fn contiguous(seq_list: &[u16]) -> bool {
    let mut iter = seq_list.iter();
    let mut old = match iter.next() {
        Some(&v) => v,
        None => return true,
    };
    for &s in iter {
        let ok = s == old.wrapping_add(1) || (s == 0 && old != 0);
        if !ok {
            return false;
        }
        old = s;
    }
    true
}

/// Reassembles RTP/H.264 fragmentation units (and passes single NALUs
/// through) into Annex-B start-code-delimited NALUs, keyed on RTP
/// timestamp.
#[derive(Default)]
pub struct AvcReassembler {
    timestamp: u32,
    seq_list: Vec<u16>,
    buffer: Vec<u8>,
}

impl AvcReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.seq_list.clear();
        self.timestamp = 0;
    }

    /// Feeds one RTP packet carrying an RTP/H.264 payload. Returns a
    /// complete start-code-prefixed NALU once it is fully assembled.
    pub fn add(&mut self, rtp: &RtpPacket, avc_payload: &[u8]) -> Result<Option<Vec<u8>>> {
        let header = AvcHeader::parse(avc_payload)?;

        if !header.is_fu() {
            self.clear();
            self.buffer.extend_from_slice(header.payload());
            self.buffer[0] = header.payload_first();
            self.seq_list.push(rtp.header.sequence_number);
            return Ok(Some(self.commit()));
        }

        if header.fu_start() {
            self.clear();
            self.timestamp = rtp.header.timestamp;
            self.buffer.extend_from_slice(header.payload());
            self.buffer[0] = header.payload_first();
            self.seq_list.push(rtp.header.sequence_number);
            return Ok(None);
        }

        if rtp.header.timestamp != self.timestamp {
            tracing::warn!("ignoring out-of-sequence rtp/avc packet");
            self.clear();
            return Ok(None);
        }

        let pos = self.buffer.len();
        self.buffer.extend_from_slice(header.payload());
        self.buffer[pos] = header.payload_first();
        self.seq_list.push(rtp.header.sequence_number);

        if !header.fu_end() {
            return Ok(None);
        }

        if contiguous(&self.seq_list) {
            Ok(Some(self.commit()))
        } else {
            tracing::warn!("ignoring rtp/avc nalu with missing fragments");
            self.clear();
            Ok(None)
        }
    }

    fn commit(&mut self) -> Vec<u8> {
        let mut nalu = Vec::with_capacity(rbsp::START_CODE.len() + self.buffer.len());
        nalu.extend_from_slice(&rbsp::START_CODE);
        nalu.append(&mut self.buffer);
        self.seq_list.clear();
        nalu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtp_packet_bytes(marker: bool, seq: u16, ts: u32, payload: &[u8]) -> Vec<u8> {
        let mut p = vec![0x80, if marker { 0x80 } else { 0 } | 96];
        p.extend_from_slice(&seq.to_be_bytes());
        p.extend_from_slice(&ts.to_be_bytes());
        p.extend_from_slice(&0u32.to_be_bytes());
        p.extend_from_slice(payload);
        p
    }

    #[test]
    fn single_nalu_commits_immediately() {
        let mut reasm = AvcReassembler::new();
        let nalu = [0x67, 0x42, 0x00, 0x1e];
        let rtp = RtpPacket::parse(&rtp_packet_bytes(true, 1, 100, &nalu)).unwrap();
        let out = reasm.add(&rtp, rtp.payload()).unwrap().expect("single nalu commits");
        assert_eq!(&out[0..4], &rbsp::START_CODE);
        assert_eq!(&out[4..], &nalu);
    }

    #[test]
    fn fragmented_nalu_reassembles_and_rebuilds_header() {
        let mut reasm = AvcReassembler::new();
        // Original NALU header: nri=3, type=5 (IDR) -> 0x65
        let fu_indicator = (3 << 5) | FU_A;
        let start_header = [fu_indicator, 0x80 | 5];
        let mut start_payload = start_header.to_vec();
        start_payload.extend_from_slice(b"AAAA");
        let rtp1 = RtpPacket::parse(&rtp_packet_bytes(false, 5, 500, &start_payload)).unwrap();
        assert!(reasm.add(&rtp1, rtp1.payload()).unwrap().is_none());

        let cont_header = [fu_indicator, 0x40 | 5];
        let mut cont_payload = cont_header.to_vec();
        cont_payload.extend_from_slice(b"BBBB");
        let rtp2 = RtpPacket::parse(&rtp_packet_bytes(true, 6, 500, &cont_payload)).unwrap();
        let out = reasm.add(&rtp2, rtp2.payload()).unwrap().expect("fu-end commits");

        assert_eq!(&out[0..4], &rbsp::START_CODE);
        assert_eq!(out[4], 0x65);
        assert!(out.windows(4).any(|w| w == b"AAAA"));
        assert!(out.windows(4).any(|w| w == b"BBBB"));
    }

    #[test]
    fn rejects_fu_that_is_both_start_and_end() {
        let fu_indicator = (0 << 5) | FU_A;
        let bad = [fu_indicator, 0x80 | 0x40 | 5, 0, 0];
        assert!(AvcHeader::parse(&bad).is_err());
    }

    #[test]
    fn rejects_aggregation_packets() {
        let stap_a = [24u8, 0, 0, 0];
        assert!(AvcHeader::parse(&stap_a).is_err());
    }
}
