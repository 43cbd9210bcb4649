//! Common types shared across the GRIB toolkit crates.

pub mod context;
pub mod error;
pub mod flags;
pub mod value;

pub use context::{DecodeContext, MissingKeyPolicy};
pub use error::{GribError, GribResult};
pub use flags::KeyFlags;
pub use value::{Value, ValueKind, MISSING_DOUBLE, MISSING_LONG};
