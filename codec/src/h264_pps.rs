//! H.264 Picture Parameter Set parser (§4.6.6), ISO/IEC 14496-10 §7.3.2.2.

use crate::bitstream::BitReader;
use crate::error::{CodecError, Result};
use crate::rbsp;

#[derive(Debug, Clone, PartialEq)]
pub struct Pps {
    pub pic_parameter_set_id: u32,
    pub seq_parameter_set_id: u32,
    pub entropy_coding_mode_flag: bool,
    pub bottom_field_pic_order_in_frame_present_flag: bool,
    pub num_ref_idx_l0_default_active_minus1: u32,
    pub num_ref_idx_l1_default_active_minus1: u32,
    pub weighted_pred_flag: bool,
    pub weighted_bipred_idc: u32,
    pub pic_init_qp_minus26: i32,
    pub pic_init_qs_minus26: i32,
    pub chroma_qp_index_offset: i32,
    pub deblocking_filter_control_present_flag: bool,
    pub constrained_intra_pred_flag: bool,
    pub redundant_pic_cnt_present_flag: bool,
    pub transform_8x8_mode_flag: bool,
    pub pic_scaling_matrix_present_flag: bool,
    pub second_chroma_qp_index_offset: i32,
}

impl Pps {
    /// Parses a byte-stuffed PPS RBSP. `sps_chroma_format_idc` is the
    /// referenced SPS's `chroma_format_idc`, needed only to interpret an
    /// optional picture scaling matrix; pass `None` if the SPS is not yet
    /// known (the picture scaling matrix is then rejected as invalid
    /// rather than silently misparsed).
    pub fn parse(pps_in: &[u8], sps_chroma_format_idc: Option<u32>) -> Result<Pps> {
        let pps = rbsp::remove_byte_stuffing(pps_in);
        let stop_bit = rbsp::find_stop_bit(&pps, 0);
        let mut r = BitReader::new(&pps);
        let mut reasons: Vec<String> = Vec::new();

        let nalu_type = (r.get_byte() & 0x1f) as u32;
        let pic_parameter_set_id = r.get_unsigned_golomb();
        let seq_parameter_set_id = r.get_unsigned_golomb();
        let entropy_coding_mode_flag = r.get_bool();
        let bottom_field_pic_order_in_frame_present_flag = r.get_bool();
        let num_slice_groups_minus1 = r.get_unsigned_golomb();
        if num_slice_groups_minus1 > 0 {
            reasons.push("slice group parsing not yet implemented".into());
        }
        let num_ref_idx_l0_default_active_minus1 = r.get_unsigned_golomb();
        let num_ref_idx_l1_default_active_minus1 = r.get_unsigned_golomb();
        let weighted_pred_flag = r.get_bool();
        let weighted_bipred_idc = r.get(2) as u32;
        let pic_init_qp_minus26 = r.get_signed_golomb();
        let pic_init_qs_minus26 = r.get_signed_golomb();
        let chroma_qp_index_offset = r.get_signed_golomb();
        let deblocking_filter_control_present_flag = r.get_bool();
        let constrained_intra_pred_flag = r.get_bool();
        let redundant_pic_cnt_present_flag = r.get_bool();

        let mut transform_8x8_mode_flag = false;
        let mut pic_scaling_matrix_present_flag = false;
        let mut second_chroma_qp_index_offset = 0i32;
        if r.tellg() < stop_bit {
            transform_8x8_mode_flag = r.get_bool();
            pic_scaling_matrix_present_flag = r.get_bool();
            if pic_scaling_matrix_present_flag {
                match sps_chroma_format_idc {
                    None => reasons.push("invalid chroma format idc when parsing pps".into()),
                    Some(chroma_format_idc) => {
                        let n = 6 + if chroma_format_idc != 3 { 2 } else { 6 } * u32::from(transform_8x8_mode_flag);
                        for _ in 0..n {
                            if r.get_bool() {
                                reasons.push("pic_scaling_list_present_flag not yet implemented".into());
                                break;
                            }
                        }
                    }
                }
            }
            second_chroma_qp_index_offset = r.get_signed_golomb();
        }

        if rbsp::has_markers(pps_in) {
            reasons.push("byte stuffing error".into());
        }
        if !r.good() {
            reasons.push("premature end of pps data".into());
        }
        if r.tellg() != stop_bit {
            reasons.push("parsing did not finish at the stop bit".into());
        }
        if nalu_type != 8 {
            reasons.push(format!("invalid nalu type ({nalu_type})"));
        }

        if !reasons.is_empty() {
            return Err(CodecError::InvalidPps(reasons.join(": ")));
        }

        Ok(Pps {
            pic_parameter_set_id,
            seq_parameter_set_id,
            entropy_coding_mode_flag,
            bottom_field_pic_order_in_frame_present_flag,
            num_ref_idx_l0_default_active_minus1,
            num_ref_idx_l1_default_active_minus1,
            weighted_pred_flag,
            weighted_bipred_idc,
            pic_init_qp_minus26,
            pic_init_qs_minus26,
            chroma_qp_index_offset,
            deblocking_filter_control_present_flag,
            constrained_intra_pred_flag,
            redundant_pic_cnt_present_flag,
            transform_8x8_mode_flag,
            pic_scaling_matrix_present_flag,
            second_chroma_qp_index_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // pps_id=0, sps_id=0, cavlc, no bottom-field flag, one slice group,
    // default ref idx counts, unweighted prediction, qp/qs deltas zero,
    // no extra rbsp data beyond the stop bit.
    const MINIMAL_PPS: [u8; 4] = [0x68, 0xce, 0x38, 0x80];

    #[test]
    fn parses_a_minimal_pps() {
        let pps = Pps::parse(&MINIMAL_PPS, None).unwrap();
        assert_eq!(pps.pic_parameter_set_id, 0);
        assert_eq!(pps.seq_parameter_set_id, 0);
        assert!(!pps.entropy_coding_mode_flag);
        assert_eq!(pps.pic_init_qp_minus26, 0);
        assert!(!pps.transform_8x8_mode_flag);
    }

    #[test]
    fn rejects_wrong_nalu_type() {
        let mut bad = MINIMAL_PPS;
        bad[0] = 0x67;
        assert!(Pps::parse(&bad, None).is_err());
    }
}
