//! File-backed keyed index over message collections.
//!
//! An [`Index`] scans a file of messages once, extracting a fixed set of
//! typed keys per message into per-key dictionaries plus rows of
//! dictionary ordinals and message byte locations. Consumers then
//! select one value per key and enumerate fresh
//! [`grib_message::MessageHandle`]s for every matching message, in file
//! order. Indexes persist to a compact versioned binary file
//! independent of the original message file.

pub mod codec;
pub mod index;

pub use index::{Handles, Index, KeySpec};
