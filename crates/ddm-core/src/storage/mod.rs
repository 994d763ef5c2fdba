//! Disk I/O for a mission's backing file.
//!
//! Preallocates the file (`posix_fallocate` on Unix when available, else
//! `set_len`) and supports concurrent positioned writes (`pwrite`) from
//! many tasks. The resolver (C1) creates the zero-byte placeholder
//! directly at its final destination path (§4.1 step 5); there is no
//! separate temp-name-then-rename step, so [`StorageWriter`] always
//! opens and writes the file it will still hold when the mission
//! finishes.

mod builder;
mod writer;

pub use builder::StorageWriterBuilder;
pub use writer::StorageWriter;
