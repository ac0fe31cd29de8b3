//! Results storage.
//!
//! Detection reports are written as pretty-printed JSON files. There is no
//! database; each run produces one file.

mod json;

pub use json::JsonResultsStore;
