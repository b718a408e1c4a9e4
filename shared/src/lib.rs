//! Data-model types shared across the video pipeline toolkit.
//!
//! This crate holds the pieces of the pipeline's data model that have no
//! opinion about shared memory, sockets, or the wire: the image type
//! descriptor, the image buffer abstraction, and epoch-time handling used
//! for both the data-segment timestamp and the fan-out path derivation.

pub mod epoch_time;
pub mod image;
pub mod image_type;

pub use epoch_time::EpochTime;
pub use image::{Image, ImageBuffer};
pub use image_type::{ImageFormat, ImageType};
