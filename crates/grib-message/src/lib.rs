//! GRIB message decoding and keyed access.
//!
//! This crate parses self-describing binary meteorological messages into
//! an ordered tree of typed, named accessors and exposes get/set access
//! plus filtered key iteration on top of it. Which keys exist for a given
//! message edition is data supplied by a [`schema::SchemaService`], not
//! code baked into the decoder.

pub mod accessor;
pub mod handle;
pub mod keys;
pub mod scan;
pub mod schema;
pub mod unpack;

pub use accessor::{Accessor, AccessorTree};
pub use handle::MessageHandle;
pub use keys::KeysIterator;
pub use scan::{count_messages, open_scanner, read_message, MessageScanner};
pub use schema::{
    Derivation, EditionSchema, Encoding, KeySchema, KeySource, LevelDescription, SchemaService,
    StandardTables,
};
pub use unpack::unpack_simple;
