//! Key name iteration.
//!
//! A stateful cursor over a decoded tree's names, filtered by attribute
//! flags and/or namespace. The tree is structurally immutable after
//! decode, so cursor positions stay valid for the handle's lifetime.

use grib_common::KeyFlags;

use crate::accessor::{Accessor, AccessorTree};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Positioned(usize),
    Exhausted,
}

/// Iterator over the key names of a decoded message.
///
/// Drive it with [`next_key`](Self::next_key)/[`name`](Self::name), or
/// use the [`Iterator`] impl to get names directly.
pub struct KeysIterator<'h> {
    tree: &'h AccessorTree,
    filter: KeyFlags,
    namespace: Option<String>,
    state: State,
}

impl<'h> KeysIterator<'h> {
    pub(crate) fn new(tree: &'h AccessorTree, filter: KeyFlags, namespace: Option<&str>) -> Self {
        Self {
            tree,
            filter,
            namespace: namespace.map(str::to_string),
            state: State::Created,
        }
    }

    /// Advance to the next entry passing both filters. Returns false
    /// once exhausted, and stays exhausted on further calls.
    pub fn next_key(&mut self) -> bool {
        let start = match self.state {
            State::Created => 0,
            State::Positioned(i) => i + 1,
            State::Exhausted => return false,
        };

        for i in start..self.tree.len() {
            if self.matches(&self.tree.entries()[i]) {
                self.state = State::Positioned(i);
                return true;
            }
        }

        self.state = State::Exhausted;
        false
    }

    /// The current key name; only valid while positioned on an entry.
    pub fn name(&self) -> Option<&'h str> {
        match self.state {
            State::Positioned(i) => Some(&self.tree.entries()[i].name),
            _ => None,
        }
    }

    fn matches(&self, entry: &Accessor) -> bool {
        if !entry.flags.passes(self.filter) {
            return false;
        }
        match &self.namespace {
            Some(ns) => entry.namespace.as_deref() == Some(ns.as_str()),
            None => true,
        }
    }
}

impl<'h> Iterator for KeysIterator<'h> {
    type Item = &'h str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_key() {
            self.name()
        } else {
            None
        }
    }
}
