//! Calendar-organized fan-out path derivation (§4.7).

use shared::{EpochTime, ImageType};
use std::path::PathBuf;

/// Derives the on-disk path for one frame: `<base>/YYYY/MM/DD/HH/MM/<name>.SS.<ext>`
/// in normal mode, or `<base>/YYYY/MM/DD/HH/MM/SS/<name>.NNN.<ext>` in fast
/// mode, where `NNN` is the microsecond remainder right-shifted by 10 (0..976).
///
/// `test_mode` pins the date to 2000-01-01/02 for reproducible fixtures.
pub fn derive_path(base_dir: &str, name: &str, time: EpochTime, image_type: &ImageType, fast: bool, tz_offset: i32, test_mode: bool) -> PathBuf {
    let mut bd = time.broken_down(tz_offset);
    if test_mode {
        bd.pin_for_test_mode();
    }

    let mut out = PathBuf::from(base_dir);
    out.push(format!("{:04}", bd.year));
    out.push(format!("{:02}", bd.month));
    out.push(format!("{:02}", bd.day));
    out.push(format!("{:02}", bd.hour));
    out.push(format!("{:02}", bd.minute));

    let stem = if name.is_empty() { String::new() } else { format!("{name}.") };
    let ext = extension(image_type);

    if fast {
        out.push(format!("{:02}", bd.second));
        let frac = time.us >> 10;
        out.push(format!("{stem}{frac:03}{ext}"));
    } else {
        out.push(format!("{stem}{:02}{ext}", bd.second));
    }

    out
}

fn extension(image_type: &ImageType) -> &'static str {
    if image_type.is_jpeg() {
        ".jpg"
    } else if image_type.is_raw() {
        if image_type.channels == 1 {
            ".pgm"
        } else {
            ".ppm"
        }
    } else {
        ".dat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_mode_path_layout() {
        let t = EpochTime::new(981173106, 500_000); // 2001-02-03 04:05:06 UTC
        let p = derive_path("/base", "cam1", t, &ImageType::jpeg(640, 480, 3), false, 0, false);
        assert_eq!(p, PathBuf::from("/base/2001/02/03/04/05/cam1.06.jpg"));
    }

    #[test]
    fn fast_mode_path_layout_uses_microsecond_fraction() {
        let t = EpochTime::new(981173106, 500_000);
        let p = derive_path("/base", "cam1", t, &ImageType::raw(640, 480, 1), true, 0, false);
        assert_eq!(p, PathBuf::from("/base/2001/02/03/04/05/06/cam1.488.pgm"));
    }

    #[test]
    fn empty_name_elides_leading_dot() {
        let t = EpochTime::new(981173106, 0);
        let p = derive_path("/base", "", t, &ImageType::raw(640, 480, 3), false, 0, false);
        assert_eq!(p, PathBuf::from("/base/2001/02/03/04/05/06.ppm"));
    }

    #[test]
    fn test_mode_pins_the_date() {
        let t = EpochTime::new(981173106, 0);
        let p = derive_path("/base", "x", t, &ImageType::other("application/json"), false, 0, true);
        assert_eq!(p, PathBuf::from("/base/2000/01/01/04/05/x.06.dat"));
    }

    #[test]
    fn raw_extension_depends_on_channel_count() {
        let t = EpochTime::new(981173106, 0);
        let mono = derive_path("/b", "n", t, &ImageType::raw(1, 1, 1), false, 0, false);
        let color = derive_path("/b", "n", t, &ImageType::raw(1, 1, 3), false, 0, false);
        assert!(mono.to_string_lossy().ends_with(".pgm"));
        assert!(color.to_string_lossy().ends_with(".ppm"));
    }
}
