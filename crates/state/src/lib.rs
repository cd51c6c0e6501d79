//! help-relay watermark persistence.
//!
//! [`JsonFileStateStore`] keeps the watermark in a single JSON record:
//!
//! ```json
//! {"last_checked":"2024-01-01T02:00:00Z"}
//! ```
//!
//! `last_checked` is `null` (or the file is absent) before the first commit.
//!
//! # Durability
//!
//! Every save writes a sibling temporary file, fsyncs it, renames it over the
//! state file and fsyncs the directory. Readers therefore see either the old
//! record or the new one, never a partial write, and a save that returned
//! `Ok` survives a crash.

mod file;

pub use file::JsonFileStateStore;
