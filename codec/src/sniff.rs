//! Image-type sniffing from magic bytes and headers (§4.6.1).

use shared::ImageType;

/// Identifies the format of a buffer from its leading bytes and, where the
/// format carries self-describing dimensions, extracts them. Returns
/// `None` when nothing recognizable is found.
pub fn sniff(bytes: &[u8]) -> Option<ImageType> {
    if bytes.len() <= 4 {
        return None;
    }
    if bytes[0..3] == [0xff, 0xd8, 0xff] {
        return sniff_jpeg(bytes);
    }
    if bytes[0..4] == [0x89, b'P', b'N', b'G'] {
        return sniff_png(bytes);
    }
    if bytes[0] == b'P' && (b'1'..=b'6').contains(&bytes[1]) && matches!(bytes[2], b' ' | b'\n' | b'\r' | b'\t') {
        return sniff_pnm(bytes);
    }
    None
}

/// Scans SOF0-SOF3 marker segments for the frame dimensions and component
/// count; the RTP/JPEG in-band fragments this crate reassembles never carry
/// a JFIF header of their own, so this only matters for whole files handed
/// in from outside the pipeline (e.g. disk fan-out readback).
fn sniff_jpeg(bytes: &[u8]) -> Option<ImageType> {
    let mut i = 2usize;
    while i + 4 <= bytes.len() {
        if bytes[i] != 0xff {
            i += 1;
            continue;
        }
        let marker = bytes[i + 1];
        if marker == 0xd8 || marker == 0x01 || (0xd0..=0xd9).contains(&marker) {
            i += 2;
            continue;
        }
        if i + 4 > bytes.len() {
            break;
        }
        let seg_len = u16::from_be_bytes([bytes[i + 2], bytes[i + 3]]) as usize;
        if matches!(marker, 0xc0 | 0xc1 | 0xc2 | 0xc3) {
            if i + 2 + seg_len > bytes.len() || seg_len < 8 {
                return None;
            }
            let height = u16::from_be_bytes([bytes[i + 5], bytes[i + 6]]) as u32;
            let width = u16::from_be_bytes([bytes[i + 7], bytes[i + 8]]) as u32;
            let channels = bytes[i + 9];
            return Some(ImageType::jpeg(width, height, channels));
        }
        if marker == 0xda || seg_len < 2 {
            break;
        }
        i += 2 + seg_len;
    }
    None
}

fn sniff_png(bytes: &[u8]) -> Option<ImageType> {
    if bytes.len() <= 29 || &bytes[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
    let height = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
    Some(ImageType::png(width, height, 3))
}

fn sniff_pnm(bytes: &[u8]) -> Option<ImageType> {
    if bytes[0] != b'P' {
        return None;
    }
    let pn = bytes[1];
    if !(b'1'..=b'6').contains(&pn) {
        return None;
    }
    let mut pos = 2usize;
    let dx = read_pnm_uint(bytes, &mut pos)?;
    let dy = read_pnm_uint(bytes, &mut pos)?;
    if !matches!(pn, b'1' | b'4') {
        read_pnm_uint(bytes, &mut pos)?;
    }
    let channels = if matches!(pn, b'3' | b'6') { 3 } else { 1 };
    Some(ImageType::pnm(dx, dy, channels))
}

/// Skips PNM whitespace, treating `#` as starting a comment that runs to
/// end of line.
fn skip_pnm_whitespace(bytes: &[u8], pos: &mut usize) {
    loop {
        while *pos < bytes.len() && matches!(bytes[*pos], b' ' | b'\t' | b'\n' | b'\r') {
            *pos += 1;
        }
        if *pos < bytes.len() && bytes[*pos] == b'#' {
            while *pos < bytes.len() && bytes[*pos] != b'\n' {
                *pos += 1;
            }
            continue;
        }
        break;
    }
}

fn read_pnm_uint(bytes: &[u8], pos: &mut usize) -> Option<u32> {
    skip_pnm_whitespace(bytes, pos);
    let start = *pos;
    while *pos < bytes.len() && bytes[*pos].is_ascii_digit() {
        *pos += 1;
    }
    if *pos == start {
        return None;
    }
    std::str::from_utf8(&bytes[start..*pos]).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_png_dimensions() {
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        bytes.extend_from_slice(&[0, 0, 0, 13]); // IHDR length
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&100u32.to_be_bytes());
        bytes.extend_from_slice(&50u32.to_be_bytes());
        bytes.extend_from_slice(&[8, 2, 0, 0, 0]);
        let t = sniff(&bytes).expect("png recognized");
        assert!(t.is_png());
        assert_eq!(t.dx, 100);
        assert_eq!(t.dy, 50);
    }

    #[test]
    fn sniffs_pnm_header() {
        let bytes = b"P5 10 20 255\n\x00".to_vec();
        let t = sniff(&bytes).expect("pnm recognized");
        assert!(t.is_pnm());
        assert_eq!(t.dx, 10);
        assert_eq!(t.dy, 20);
        assert_eq!(t.channels, 1);
    }

    #[test]
    fn pnm_header_skips_comments() {
        let bytes = b"P6\n# a comment\n4 3 255\n".to_vec();
        let t = sniff(&bytes).expect("pnm recognized");
        assert_eq!(t.dx, 4);
        assert_eq!(t.dy, 3);
        assert_eq!(t.channels, 3);
    }

    #[test]
    fn sniffs_jpeg_sof0_dimensions() {
        let mut bytes = vec![0xff, 0xd8, 0xff, 0xe0, 0, 16];
        bytes.extend_from_slice(&[0u8; 14]);
        bytes.extend_from_slice(&[0xff, 0xc0, 0, 17, 8]);
        bytes.extend_from_slice(&64u16.to_be_bytes());
        bytes.extend_from_slice(&48u16.to_be_bytes());
        bytes.push(3);
        bytes.extend_from_slice(&[0u8; 9]);
        let t = sniff(&bytes).expect("jpeg recognized");
        assert!(t.is_jpeg());
        assert_eq!(t.dx, 48);
        assert_eq!(t.dy, 64);
        assert_eq!(t.channels, 3);
    }

    #[test]
    fn rejects_unrecognized_bytes() {
        assert!(sniff(b"not an image, just text").is_none());
    }

    #[test]
    fn rejects_too_short_buffer() {
        assert!(sniff(&[0x89, b'P', b'N', b'G']).is_none());
    }
}
