//! An [`Image`] is a read-only view of a buffer plus a type descriptor (§3).
//!
//! The buffer itself is a small enum rather than a single `Vec<u8>` so that
//! row-major sources (e.g. a camera ring buffer that never copies rows into
//! one contiguous allocation) can hand over their data without a copy; the
//! codec and fan-out layers only ever need `size_of` and the ability to
//! iterate chunks in order.

use crate::image_type::ImageType;

/// An ordered sequence of byte chunks making up one image's payload.
#[derive(Debug, Clone)]
pub enum ImageBuffer {
    /// A single contiguous allocation.
    Contiguous(Vec<u8>),
    /// One chunk per row, in row order.
    Rows(Vec<Vec<u8>>),
}

impl ImageBuffer {
    pub fn size_of(&self) -> usize {
        match self {
            ImageBuffer::Contiguous(b) => b.len(),
            ImageBuffer::Rows(rows) => rows.iter().map(Vec::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size_of() == 0
    }

    /// Iterates the chunks in order without flattening them.
    pub fn chunks(&self) -> Box<dyn Iterator<Item = &[u8]> + '_> {
        match self {
            ImageBuffer::Contiguous(b) => Box::new(std::iter::once(b.as_slice())),
            ImageBuffer::Rows(rows) => Box::new(rows.iter().map(Vec::as_slice)),
        }
    }

    /// Flattens into one contiguous allocation. Callers on the hot path
    /// (publish, fat-pipe send, file write) all ultimately need one
    /// contiguous slice to hand to a `memcpy`/`write`, so this is the usual
    /// last step before crossing a component boundary.
    pub fn to_vec(&self) -> Vec<u8> {
        match self {
            ImageBuffer::Contiguous(b) => b.clone(),
            ImageBuffer::Rows(_) => {
                let mut out = Vec::with_capacity(self.size_of());
                for chunk in self.chunks() {
                    out.extend_from_slice(chunk);
                }
                out
            }
        }
    }
}

impl From<Vec<u8>> for ImageBuffer {
    fn from(v: Vec<u8>) -> Self {
        ImageBuffer::Contiguous(v)
    }
}

/// A shared, read-only reference to an image buffer plus its type.
#[derive(Debug, Clone)]
pub struct Image {
    buffer: Option<ImageBuffer>,
    image_type: ImageType,
}

impl Image {
    pub fn new(buffer: ImageBuffer, image_type: ImageType) -> Self {
        Self {
            buffer: Some(buffer),
            image_type,
        }
    }

    /// An image with no buffer at all (distinct from a zero-length one).
    pub fn empty() -> Self {
        Self {
            buffer: None,
            image_type: ImageType::other(""),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_none()
    }

    /// Non-empty and carrying a valid image type descriptor. A non-empty
    /// image with an invalid type (e.g. a JSON blob) is neither empty nor
    /// valid, which is intentional per §3.
    pub fn is_valid(&self) -> bool {
        !self.is_empty() && self.image_type.valid()
    }

    pub fn buffer(&self) -> Option<&ImageBuffer> {
        self.buffer.as_ref()
    }

    pub fn image_type(&self) -> &ImageType {
        &self.image_type
    }

    pub fn size_of(&self) -> usize {
        self.buffer.as_ref().map_or(0, ImageBuffer::size_of)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_type::ImageType;

    #[test]
    fn empty_image_is_empty_and_invalid() {
        let img = Image::empty();
        assert!(img.is_empty());
        assert!(!img.is_valid());
    }

    #[test]
    fn non_empty_with_invalid_type_is_neither_empty_nor_valid() {
        let img = Image::new(vec![1, 2, 3].into(), ImageType::other("application/json"));
        assert!(!img.is_empty());
        assert!(!img.is_valid());
    }

    #[test]
    fn non_empty_with_valid_type_is_valid() {
        let img = Image::new(vec![0u8; 12].into(), ImageType::raw(4, 3, 1));
        assert!(img.is_valid());
        assert_eq!(img.size_of(), 12);
    }

    #[test]
    fn row_buffer_size_is_sum_of_chunks() {
        let buf = ImageBuffer::Rows(vec![vec![0u8; 4], vec![0u8; 4], vec![0u8; 4]]);
        assert_eq!(buf.size_of(), 12);
        assert_eq!(buf.to_vec().len(), 12);
    }
}
