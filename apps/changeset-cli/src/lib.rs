//! # changeset-cli
//!
//! Script-driven front end for [`changeset_core`].
//!
//! - [`Script`] — JSON list of change set operations
//! - [`FileElement`] — element that applies/reverts a file under a root dir
//! - [`replay`] — runs a script and streams the aggregate events as JSONL

pub mod file_element;
pub mod replay;
pub mod script;

pub use file_element::FileElement;
pub use replay::{replay, ReplayOptions, ReplayReport};
pub use script::{ElementSpec, Script, Step};
