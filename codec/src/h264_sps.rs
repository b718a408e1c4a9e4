//! H.264 Sequence Parameter Set parser (§4.6.5), ISO/IEC 14496-10 §7.3.2.1.1.

use crate::bitstream::BitReader;
use crate::error::{CodecError, Result};
use crate::rbsp;

const EXTENDED_PROFILES: [u32; 9] = [100, 110, 122, 244, 44, 83, 86, 118, 128];

#[derive(Debug, Clone, PartialEq)]
pub struct Sps {
    pub profile_idc: u32,
    pub constraint_set0_flag: bool,
    pub constraint_set1_flag: bool,
    pub constraint_set2_flag: bool,
    pub constraint_set3_flag: bool,
    pub constraint_set4_flag: bool,
    pub constraint_set5_flag: bool,
    pub level_idc: u32,
    pub sequence_parameter_set_id: u32,
    pub chroma_format_idc: u32,
    pub separate_colour_plane_flag: bool,
    pub bit_depth_luma_minus8: u32,
    pub bit_depth_chroma_minus8: u32,
    pub qpprime_y_zero_transform_bypass_flag: bool,
    pub log2_max_frame_num_minus4: u32,
    pub pic_order_cnt_type: u32,
    pub log2_max_pic_order_cnt_lsb_minus4: u32,
    pub delta_pic_order_always_zero_flag: bool,
    pub offset_for_non_ref_pic: i32,
    pub offset_for_top_to_bottom_field: i32,
    pub num_ref_frames_in_pic_order_cnt_cycle: u32,
    pub max_num_ref_frames: u32,
    pub gaps_in_frame_num_value_allowed_flag: bool,
    pub pic_width_in_mbs_minus1: u32,
    pub pic_height_in_map_units_minus1: u32,
    pub frame_mbs_only_flag: bool,
    pub mb_adaptive_frame_field_flag: bool,
    pub direct_8x8_inference_flag: bool,
    pub frame_cropping_flag: bool,
    pub frame_crop_left_offset: u32,
    pub frame_crop_right_offset: u32,
    pub frame_crop_top_offset: u32,
    pub frame_crop_bottom_offset: u32,
    pub vui_parameters_present_flag: bool,
}

impl Sps {
    /// Parses a byte-stuffed SPS RBSP, as delivered by a single-NALU or
    /// reassembled rtp/avc payload whose NALU header byte indicates type 7.
    pub fn parse(sps_in: &[u8]) -> Result<Sps> {
        let sps = rbsp::remove_byte_stuffing(sps_in);
        let stop_bit = rbsp::find_stop_bit(&sps, 0);
        let mut r = BitReader::new(&sps);
        let mut reasons: Vec<String> = Vec::new();

        let nalu_type = (r.get_byte() & 0x1f) as u32;
        let profile_idc = r.get_byte() as u32;
        let constraint_set0_flag = r.get_bool();
        let constraint_set1_flag = r.get_bool();
        let constraint_set2_flag = r.get_bool();
        let constraint_set3_flag = r.get_bool();
        let constraint_set4_flag = r.get_bool();
        let constraint_set5_flag = r.get_bool();
        let zero = r.get(2) as u32;
        let level_idc = r.get_byte() as u32;
        let sequence_parameter_set_id = r.get_unsigned_golomb();

        let extended_profile = EXTENDED_PROFILES.contains(&profile_idc);
        let mut chroma_format_idc = 0u32;
        let mut separate_colour_plane_flag = false;
        let mut bit_depth_luma_minus8 = 0u32;
        let mut bit_depth_chroma_minus8 = 0u32;
        let mut qpprime_y_zero_transform_bypass_flag = false;
        let mut seq_scaling_matrix_present_flag = false;
        if extended_profile {
            chroma_format_idc = r.get_unsigned_golomb();
            separate_colour_plane_flag = if chroma_format_idc == 3 { r.get_bool() } else { false };
            bit_depth_luma_minus8 = r.get_unsigned_golomb();
            bit_depth_chroma_minus8 = r.get_unsigned_golomb();
            qpprime_y_zero_transform_bypass_flag = r.get_bool();
            seq_scaling_matrix_present_flag = r.get_bool();
            // scaling list parsing is not implemented; flagged as invalid below.
        }

        let log2_max_frame_num_minus4 = r.get_unsigned_golomb();
        let pic_order_cnt_type = r.get_unsigned_golomb();

        let mut log2_max_pic_order_cnt_lsb_minus4 = 0u32;
        let mut delta_pic_order_always_zero_flag = false;
        let mut offset_for_non_ref_pic = 0i32;
        let mut offset_for_top_to_bottom_field = 0i32;
        let mut num_ref_frames_in_pic_order_cnt_cycle = 0u32;
        if pic_order_cnt_type == 0 {
            log2_max_pic_order_cnt_lsb_minus4 = r.get_unsigned_golomb();
        } else if pic_order_cnt_type == 1 {
            delta_pic_order_always_zero_flag = r.get_bool();
            offset_for_non_ref_pic = r.get_signed_golomb();
            offset_for_top_to_bottom_field = r.get_signed_golomb();
            num_ref_frames_in_pic_order_cnt_cycle = r.get_unsigned_golomb();
            for _ in 0..num_ref_frames_in_pic_order_cnt_cycle {
                let _ = r.get_signed_golomb();
            }
        }

        let max_num_ref_frames = r.get_unsigned_golomb();
        let gaps_in_frame_num_value_allowed_flag = r.get_bool();
        let pic_width_in_mbs_minus1 = r.get_unsigned_golomb();
        let pic_height_in_map_units_minus1 = r.get_unsigned_golomb();

        let frame_mbs_only_flag = r.get_bool();
        let mb_adaptive_frame_field_flag = if frame_mbs_only_flag { false } else { r.get_bool() };

        let direct_8x8_inference_flag = r.get_bool();

        let frame_cropping_flag = r.get_bool();
        let (frame_crop_left_offset, frame_crop_right_offset, frame_crop_top_offset, frame_crop_bottom_offset) = if frame_cropping_flag
        {
            (r.get_unsigned_golomb(), r.get_unsigned_golomb(), r.get_unsigned_golomb(), r.get_unsigned_golomb())
        } else {
            (0, 0, 0, 0)
        };

        let vui_parameters_present_flag = r.get_bool();
        let mut nal_hrd_parameters_present_flag = false;
        let mut vcl_hrd_parameters_present_flag = false;
        if vui_parameters_present_flag {
            parse_vui(&mut r, &mut nal_hrd_parameters_present_flag, &mut vcl_hrd_parameters_present_flag);
        }

        if rbsp::has_markers(sps_in) {
            reasons.push("byte stuffing error".into());
        }
        if !r.good() {
            reasons.push("premature end of data".into());
        }
        if r.tellg() != stop_bit {
            reasons.push("parsing did not finish at the stop bit".into());
        }
        if nalu_type != 7 {
            reasons.push(format!("invalid nalu type ({nalu_type})"));
        }
        if zero != 0 {
            reasons.push(format!("invalid zero field ({zero})"));
        }
        if pic_order_cnt_type > 1 {
            reasons.push(format!("invalid pic_order_cnt_type ({pic_order_cnt_type})"));
        }
        if seq_scaling_matrix_present_flag {
            reasons.push("seq_scaling_matrix_present_flag not yet implemented".into());
        }
        if nal_hrd_parameters_present_flag {
            reasons.push("nal_hrd_parameters_present_flag not yet implemented".into());
        }
        if vcl_hrd_parameters_present_flag {
            reasons.push("vcl_hrd_parameters_present_flag not yet implemented".into());
        }

        if !reasons.is_empty() {
            return Err(CodecError::InvalidSps(reasons.join(": ")));
        }

        Ok(Sps {
            profile_idc,
            constraint_set0_flag,
            constraint_set1_flag,
            constraint_set2_flag,
            constraint_set3_flag,
            constraint_set4_flag,
            constraint_set5_flag,
            level_idc,
            sequence_parameter_set_id,
            chroma_format_idc,
            separate_colour_plane_flag,
            bit_depth_luma_minus8,
            bit_depth_chroma_minus8,
            qpprime_y_zero_transform_bypass_flag,
            log2_max_frame_num_minus4,
            pic_order_cnt_type,
            log2_max_pic_order_cnt_lsb_minus4,
            delta_pic_order_always_zero_flag,
            offset_for_non_ref_pic,
            offset_for_top_to_bottom_field,
            num_ref_frames_in_pic_order_cnt_cycle,
            max_num_ref_frames,
            gaps_in_frame_num_value_allowed_flag,
            pic_width_in_mbs_minus1,
            pic_height_in_map_units_minus1,
            frame_mbs_only_flag,
            mb_adaptive_frame_field_flag,
            direct_8x8_inference_flag,
            frame_cropping_flag,
            frame_crop_left_offset,
            frame_crop_right_offset,
            frame_crop_top_offset,
            frame_crop_bottom_offset,
            vui_parameters_present_flag,
        })
    }

    /// Picture width in pixels (libav-compatible; ignores `frame_crop_left_offset`).
    pub fn dx(&self) -> u32 {
        let mb_width = self.pic_width_in_mbs_minus1 + 1;
        if self.chroma_format_idc == 3 {
            16 * mb_width - self.frame_crop_right_offset.min(15)
        } else {
            16 * mb_width - 2 * self.frame_crop_right_offset.min(7)
        }
    }

    /// Picture height in pixels (libav-compatible; ignores `frame_crop_top_offset`).
    pub fn dy(&self) -> u32 {
        let mb_height = self.pic_height_in_map_units_minus1 + 1;
        let chroma_y_shift: u32 = if self.chroma_format_idc <= 1 { 1 } else { 0 };
        let lim = (0x10u32 >> chroma_y_shift) - 1;
        if self.frame_mbs_only_flag {
            16 * mb_height - (1 << chroma_y_shift) * self.frame_crop_bottom_offset.min(lim)
        } else {
            16 * mb_height - (2 << chroma_y_shift) * self.frame_crop_bottom_offset.min(lim)
        }
    }
}

fn parse_vui(r: &mut BitReader, nal_hrd_present: &mut bool, vcl_hrd_present: &mut bool) {
    if r.get_bool() {
        // aspect_ratio_info_present_flag
        let aspect_ratio_idc = r.get_byte();
        if aspect_ratio_idc == 255 {
            let _ = r.get_word(); // sar_width
            let _ = r.get_word(); // sar_height
        }
    }
    if r.get_bool() {
        // overscan_info_present_flag
        let _ = r.get_bool(); // overscan_appropriate_flag
    }
    if r.get_bool() {
        // video_signal_type_present_flag
        let _ = r.get(3); // video_format
        let _ = r.get_bool(); // video_full_range_flag
        if r.get_bool() {
            // colour_description_present_flag
            let _ = r.get_byte(); // colour_primaries
            let _ = r.get_byte(); // transfer_characteristics
            let _ = r.get_byte(); // matrix_coefficients
        }
    }
    if r.get_bool() {
        // chroma_loc_info_present_flag
        let _ = r.get_unsigned_golomb();
        let _ = r.get_unsigned_golomb();
    }
    if r.get_bool() {
        // timing_info_present_flag
        let _ = r.get_dword(); // num_units_in_tick
        let _ = r.get_dword(); // time_scale
        let _ = r.get_bool(); // fixed_frame_rate_flag
    }
    *nal_hrd_present = r.get_bool();
    // hrd_parameters() itself is not implemented.
    *vcl_hrd_present = r.get_bool();
    if *nal_hrd_present || *vcl_hrd_present {
        let _ = r.get_bool(); // low_delay_hrd_flag
    }
    let _pic_struct_present_flag = r.get_bool();
    if r.get_bool() {
        // bitstream_restriction_flag
        let _ = r.get_bool(); // motion_vectors_over_pic_boundaries_flag
        for _ in 0..6 {
            let _ = r.get_unsigned_golomb();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Baseline profile, 1x1 macroblock (16x16), progressive, no VUI.
    const MINIMAL_SPS: [u8; 6] = [0x67, 0x42, 0x00, 0x1e, 0xf4, 0xe2];

    #[test]
    fn parses_a_minimal_baseline_sps() {
        let sps = Sps::parse(&MINIMAL_SPS).unwrap();
        assert_eq!(sps.profile_idc, 66);
        assert_eq!(sps.level_idc, 30);
        assert_eq!(sps.pic_order_cnt_type, 0);
        assert!(sps.frame_mbs_only_flag);
        assert_eq!(sps.dx(), 16);
        assert_eq!(sps.dy(), 16);
    }

    #[test]
    fn rejects_wrong_nalu_type() {
        let mut bad = MINIMAL_SPS;
        bad[0] = 0x68; // pps nalu type
        assert!(Sps::parse(&bad).is_err());
    }

    #[test]
    fn rejects_truncated_input() {
        assert!(Sps::parse(&MINIMAL_SPS[..4]).is_err());
    }
}
