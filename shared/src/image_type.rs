//! Image type descriptor: `(format, dx, dy, channels)`, serialized as
//! `image/<name>;xsize=<dx>x<dy>x<c>` (§3).
//!
//! A non-image payload (e.g. a JSON blob fanned out alongside video frames)
//! is represented as `ImageFormat::Other(free_form_string)` with no size
//! suffix; such a type string is always `valid() == false` but is not an
//! error, it is a legitimate non-image tag.

use std::fmt;

/// The wire-level container format of an image, or a free-form string for
/// non-image payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    /// Portable-anymap (PGM/PPM), RFC-free "pnm" framing.
    Pnm,
    /// Unheadered packed pixels, row-major, 8 bpp per channel.
    Raw,
    /// A non-image (or not-yet-understood) content type, carried verbatim.
    Other(String),
}

impl ImageFormat {
    fn wire_name(&self) -> Option<&'static str> {
        match self {
            ImageFormat::Jpeg => Some("jpeg"),
            ImageFormat::Png => Some("png"),
            ImageFormat::Pnm => Some("x-portable-anymap"),
            ImageFormat::Raw => Some("x.raw"),
            ImageFormat::Other(_) => None,
        }
    }
}

/// An image type descriptor: a format tag plus the dimensions needed to
/// interpret a raw or PNM buffer without a self-describing header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageType {
    pub format: ImageFormat,
    pub dx: u32,
    pub dy: u32,
    pub channels: u8,
}

impl ImageType {
    pub fn new(format: ImageFormat, dx: u32, dy: u32, channels: u8) -> Self {
        Self {
            format,
            dx,
            dy,
            channels,
        }
    }

    pub fn jpeg(dx: u32, dy: u32, channels: u8) -> Self {
        Self::new(ImageFormat::Jpeg, dx, dy, channels)
    }

    pub fn png(dx: u32, dy: u32, channels: u8) -> Self {
        Self::new(ImageFormat::Png, dx, dy, channels)
    }

    pub fn pnm(dx: u32, dy: u32, channels: u8) -> Self {
        Self::new(ImageFormat::Pnm, dx, dy, channels)
    }

    pub fn raw(dx: u32, dy: u32, channels: u8) -> Self {
        Self::new(ImageFormat::Raw, dx, dy, channels)
    }

    /// A free-form, non-image type string such as `application/json`.
    pub fn other(type_str: impl Into<String>) -> Self {
        Self::new(ImageFormat::Other(type_str.into()), 0, 0, 0)
    }

    /// `dx>0 ∧ dy>0 ∧ channels∈{1,3}` — anything else (including every
    /// `Other` variant) is legitimately non-image.
    pub fn valid(&self) -> bool {
        self.dx > 0 && self.dy > 0 && (self.channels == 1 || self.channels == 3)
    }

    pub fn is_jpeg(&self) -> bool {
        matches!(self.format, ImageFormat::Jpeg)
    }

    pub fn is_png(&self) -> bool {
        matches!(self.format, ImageFormat::Png)
    }

    pub fn is_raw(&self) -> bool {
        matches!(self.format, ImageFormat::Raw)
    }

    pub fn is_pnm(&self) -> bool {
        matches!(self.format, ImageFormat::Pnm)
    }

    /// Total payload size for a raw/pnm buffer of this type.
    pub fn size(&self) -> usize {
        self.dx as usize * self.dy as usize * self.channels as usize
    }

    /// Bytes per row for a raw/pnm buffer of this type.
    pub fn rowsize(&self) -> usize {
        self.dx as usize * self.channels as usize
    }

    /// Serializes to the wire string `image/<name>;xsize=<dx>x<dy>x<c>`, or
    /// the verbatim free-form string for `Other`.
    pub fn to_wire_string(&self) -> String {
        match self.format.wire_name() {
            Some(name) => format!("image/{name};xsize={}x{}x{}", self.dx, self.dy, self.channels),
            None => match &self.format {
                ImageFormat::Other(s) => s.clone(),
                _ => unreachable!(),
            },
        }
    }

    /// Parses a wire type string. Unknown `image/...` prefixes and any
    /// string without an `image/` prefix are returned as `Other`, never as
    /// an error: per §3, a non-image payload tagged with a free-form string
    /// is a legitimate (if `!valid()`) value.
    pub fn parse(s: &str) -> ImageType {
        let mut parts = s.splitn(2, ';');
        let base = parts.next().unwrap_or("");
        let rest = parts.next();

        let format = match base {
            "image/jpeg" => ImageFormat::Jpeg,
            "image/png" => ImageFormat::Png,
            "image/x-portable-anymap" => ImageFormat::Pnm,
            "image/x.raw" => ImageFormat::Raw,
            _ => ImageFormat::Other(s.to_string()),
        };

        if matches!(format, ImageFormat::Other(_)) {
            return ImageType::new(format, 0, 0, 0);
        }

        let (dx, dy, channels) = rest.and_then(parse_xsize).unwrap_or((0, 0, 0));
        ImageType::new(format, dx, dy, channels)
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_wire_string())
    }
}

/// Parses the `xsize=<dx>[x_,]<dy>[x_,]<c>` grammar out of the `;`-delimited
/// tail of a type string. Digit runs are read greedily and a single
/// non-digit separator is skipped between fields, mirroring a manual
/// digit-by-digit `atoi` that stops at the first non-digit rather than a
/// strict format string.
fn parse_xsize(tail: &str) -> Option<(u32, u32, u8)> {
    let tail = tail.strip_prefix("xsize=")?;
    let bytes = tail.as_bytes();
    let mut i = 0usize;

    let dx = read_uint(bytes, &mut i)?;
    skip_one_separator(bytes, &mut i);
    let dy = read_uint(bytes, &mut i)?;
    skip_one_separator(bytes, &mut i);
    let c = read_uint(bytes, &mut i)?;

    Some((dx, dy, c as u8))
}

fn read_uint(bytes: &[u8], i: &mut usize) -> Option<u32> {
    let start = *i;
    while *i < bytes.len() && bytes[*i].is_ascii_digit() {
        *i += 1;
    }
    if *i == start {
        return None;
    }
    std::str::from_utf8(&bytes[start..*i]).ok()?.parse().ok()
}

fn skip_one_separator(bytes: &[u8], i: &mut usize) {
    if *i < bytes.len() && !bytes[*i].is_ascii_digit() {
        *i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_formats() {
        for (dx, dy, c) in [(1u32, 1u32, 1u8), (1920, 1080, 3), (65535, 65535, 3)] {
            for ctor in [ImageType::jpeg, ImageType::png, ImageType::pnm, ImageType::raw] {
                let t = ctor(dx, dy, c);
                let s = t.to_wire_string();
                let parsed = ImageType::parse(&s);
                assert_eq!(parsed, t);
                assert_eq!(parsed.to_wire_string(), s);
            }
        }
    }

    #[test]
    fn other_is_never_valid_but_round_trips_verbatim() {
        let t = ImageType::other("application/json");
        assert!(!t.valid());
        assert_eq!(t.to_wire_string(), "application/json");
        assert_eq!(ImageType::parse("application/json"), t);
    }

    #[test]
    fn unknown_image_prefix_is_other() {
        let parsed = ImageType::parse("image/tiff;xsize=1x1x1");
        assert!(matches!(parsed.format, ImageFormat::Other(_)));
        assert!(!parsed.valid());
    }

    #[test]
    fn valid_requires_positive_dims_and_1_or_3_channels() {
        assert!(ImageType::raw(1, 1, 1).valid());
        assert!(ImageType::raw(1, 1, 3).valid());
        assert!(!ImageType::raw(0, 1, 1).valid());
        assert!(!ImageType::raw(1, 1, 2).valid());
    }

    #[test]
    fn size_and_rowsize() {
        let t = ImageType::raw(4, 3, 3);
        assert_eq!(t.rowsize(), 12);
        assert_eq!(t.size(), 36);
    }

    #[test]
    fn parser_accepts_flexible_separators() {
        assert_eq!(parse_xsize("xsize=4x3x1"), Some((4, 3, 1)));
        assert_eq!(parse_xsize("xsize=4_3_1"), Some((4, 3, 1)));
        assert_eq!(parse_xsize("xsize=4,3,1"), Some((4, 3, 1)));
    }
}
