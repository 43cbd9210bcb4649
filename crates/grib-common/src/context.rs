//! Decode configuration shared by handles and indexes.
//!
//! An explicit configuration object replaces process-wide toggles:
//! every handle and index holds an `Arc<DecodeContext>`, and callers
//! that want the defaults construct one with `Default`.

use std::sync::Arc;

/// Policy applied during an index build when a requested key is absent
/// from a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingKeyPolicy {
    /// Drop the message from the index and continue.
    #[default]
    SkipMessage,
    /// Fail the whole build.
    AbortBuild,
}

/// Configuration for decoding and indexing.
#[derive(Debug, Clone)]
pub struct DecodeContext {
    /// What to do when an indexed key is missing from a message.
    pub missing_key_policy: MissingKeyPolicy,
    /// Tolerate trailing bytes after the declared message length when
    /// decoding an in-memory buffer. Multi-field splitting itself is not
    /// performed; only the first field's bytes are decoded.
    pub multi_field_support: bool,
    /// Reject messages whose declared total length disagrees with the
    /// bytes actually present.
    pub strict_total_length: bool,
}

impl Default for DecodeContext {
    fn default() -> Self {
        Self {
            missing_key_policy: MissingKeyPolicy::default(),
            multi_field_support: false,
            strict_total_length: true,
        }
    }
}

impl DecodeContext {
    /// Default context, ready to share.
    pub fn shared() -> Arc<DecodeContext> {
        Arc::new(DecodeContext::default())
    }
}
