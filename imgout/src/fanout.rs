//! Frame fan-out: publish, forward, and mirror to disk (§4.7).

use crate::error::Result;
use crate::path::derive_path;
use channel::Publisher;
use fatpipe::FatPipeParent;
use shared::{EpochTime, ImageType};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// Combines the three optional fan-out legs a frame can be sent down: a
/// shared-memory channel, a fat pipe to a forked child, and a
/// calendar-organized directory tree on disk. Any combination (including
/// none) may be active at once.
pub struct FanOut {
    publisher: Option<Publisher>,
    fat_pipe: Option<FatPipeParent>,
    base_dir: Option<String>,
    name: String,
    fast: bool,
    tz_offset: i32,
    test_mode: bool,
    last_path: Option<PathBuf>,
    last_dir: Option<PathBuf>,
}

impl FanOut {
    pub fn new() -> Self {
        Self {
            publisher: None,
            fat_pipe: None,
            base_dir: None,
            name: String::new(),
            fast: false,
            tz_offset: 0,
            test_mode: false,
            last_path: None,
            last_dir: None,
        }
    }

    pub fn with_publisher(mut self, publisher: Publisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_fat_pipe(mut self, fat_pipe: FatPipeParent) -> Self {
        self.fat_pipe = Some(fat_pipe);
        self
    }

    /// Configures the directory-mirroring leg. `name` must not contain a
    /// path separator; it forms the filename stem.
    pub fn save_to(mut self, base_dir: impl Into<String>, name: impl Into<String>, fast: bool, tz_offset: i32, test_mode: bool) -> Result<Self> {
        let name = name.into();
        if name.contains('/') || name.contains('\\') {
            return Err(crate::error::ImgOutError::NameHasSeparator(name));
        }
        self.base_dir = Some(base_dir.into());
        self.name = name;
        self.fast = fast;
        self.tz_offset = tz_offset;
        self.test_mode = test_mode;
        Ok(self)
    }

    /// Sends one frame down every configured leg. The directory leg's
    /// write failure is logged, not propagated: a disk hiccup must not
    /// take down the publisher or fat-pipe legs that already succeeded.
    pub fn send(&mut self, payload: &[u8], image_type: &ImageType, time: EpochTime) -> Result<Option<PathBuf>> {
        let type_str = image_type.to_wire_string();

        if let Some(publisher) = &mut self.publisher {
            publisher.publish(payload, &type_str)?;
        }
        if let Some(fat_pipe) = &mut self.fat_pipe {
            fat_pipe.send(payload, &type_str)?;
        }

        if self.base_dir.is_none() {
            return Ok(None);
        }

        let time = if time.is_zero() { EpochTime::now() } else { time };
        Ok(self.save(payload, image_type, time))
    }

    fn save(&mut self, payload: &[u8], image_type: &ImageType, time: EpochTime) -> Option<PathBuf> {
        let base_dir = self.base_dir.as_ref().expect("checked by caller");
        let path = derive_path(base_dir, &self.name, time, image_type, self.fast, self.tz_offset, self.test_mode);

        if self.last_path.as_ref() == Some(&path) {
            return None;
        }

        if let Some(dir) = path.parent() {
            if self.last_dir.as_deref() != Some(dir) {
                if fs::create_dir_all(dir).is_ok() {
                    self.last_dir = Some(dir.to_path_buf());
                }
            }
        }

        match fs::File::create(&path) {
            Ok(mut file) => {
                let write_result = (|| -> std::io::Result<()> {
                    if image_type.is_raw() {
                        let header = if image_type.channels == 1 { "P5" } else { "P6" };
                        write!(file, "{header}\n{} {}\n255\n", image_type.dx, image_type.dy)?;
                    }
                    file.write_all(payload)
                })();
                if let Err(err) = write_result {
                    tracing::error!(path = %path.display(), %err, "frame fan-out write failed");
                } else {
                    self.last_path = Some(path.clone());
                }
            }
            Err(err) => {
                tracing::error!(path = %path.display(), %err, "could not open fan-out file");
            }
        }

        Some(path)
    }
}

impl Default for FanOut {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_raw_payload_with_pnm_header() {
        let dir = tempdir().unwrap();
        let mut fanout = FanOut::new()
            .save_to(dir.path().to_str().unwrap(), "cam", false, 0, true)
            .unwrap();

        let image_type = ImageType::raw(2, 1, 1);
        let path = fanout.send(&[1, 2], &image_type, EpochTime::new(981173106, 0)).unwrap().expect("path written");

        let contents = fs::read(&path).unwrap();
        assert_eq!(contents, b"P5\n2 1\n255\n\x01\x02");
    }

    #[test]
    fn second_write_to_the_same_path_is_skipped() {
        let dir = tempdir().unwrap();
        let mut fanout = FanOut::new()
            .save_to(dir.path().to_str().unwrap(), "cam", false, 0, true)
            .unwrap();

        let image_type = ImageType::jpeg(1, 1, 3);
        let time = EpochTime::new(981173106, 0);
        let first = fanout.send(b"aaaa", &image_type, time).unwrap();
        assert!(first.is_some());

        let second = fanout.send(b"bbbb", &image_type, time).unwrap();
        assert!(second.is_none());
        assert_eq!(fs::read(first.unwrap()).unwrap(), b"aaaa");
    }

    #[test]
    fn rejects_name_with_path_separator() {
        let dir = tempdir().unwrap();
        let result = FanOut::new().save_to(dir.path().to_str().unwrap(), "a/b", false, 0, true);
        assert!(result.is_err());
    }

    #[test]
    fn no_base_dir_configured_returns_no_path() {
        let mut fanout = FanOut::new();
        let image_type = ImageType::jpeg(1, 1, 3);
        let result = fanout.send(b"x", &image_type, EpochTime::new(1, 0)).unwrap();
        assert!(result.is_none());
    }
}
