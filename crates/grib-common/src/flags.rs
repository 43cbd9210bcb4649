//! Key attribute flags.

use bitflags::bitflags;

bitflags! {
    /// Attributes attached to each key by the decode schema.
    ///
    /// Used to filter key iteration: an entry passes a filter when its
    /// flags contain every requested flag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KeyFlags: u32 {
        /// Value cannot be set.
        const READ_ONLY        = 1 << 0;
        /// Key may be absent from a structurally valid message.
        const OPTIONAL         = 1 << 1;
        /// Layout differs between editions.
        const EDITION_SPECIFIC = 1 << 2;
        /// Read directly from coded message bytes.
        const CODED            = 1 << 3;
        /// Derived from other keys rather than coded bytes.
        const COMPUTED         = 1 << 4;
        /// A later entry shadows an earlier one with the same name.
        const DUPLICATE        = 1 << 5;
    }
}

impl KeyFlags {
    /// Filter check: all requested flags must be present on the entry.
    pub fn passes(&self, filter: KeyFlags) -> bool {
        self.contains(filter)
    }
}
