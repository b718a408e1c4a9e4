//! Frame fan-out to a channel, a fat pipe, and a calendar-organized
//! directory tree (§4.7): the collaborator that sits downstream of the
//! codec layer and owns the "where does a depacketized frame go" decision.

pub mod error;
pub mod fanout;
pub mod path;

pub use error::{ImgOutError, Result};
pub use fanout::FanOut;
pub use path::derive_path;
