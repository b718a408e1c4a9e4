//! A simpler, one-direction sibling of `channel`: a single parent writer
//! and single forked child reader, sharing an anonymous (unnamed) data
//! segment whose file descriptor is handed over out-of-band as the
//! segment is created or grown (§4.5).

pub mod ancillary;
pub mod control;
pub mod error;
pub mod fatpipe;

pub use error::{FatPipeError, Result};
pub use fatpipe::{FatPipe, FatPipeChild, FatPipeParent, ReceiveOutcome};
