#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate serde_derive;

#[macro_use]
pub mod log;
#[macro_use]
pub mod util;
pub mod bitfield;
pub mod config;
pub mod disk;
pub mod error;
pub mod info;
pub mod picker;
pub mod piece;
pub mod resume;
pub mod storage;
pub mod verify;

pub use crate::bitfield::{Bitfield, BlockTracker};
pub use crate::config::Config;
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::info::{FileEntry, Info};
pub use crate::piece::Piece;
pub use crate::storage::{IndexedStorage, PieceOutcome, PieceStorage, StreamStorage};
