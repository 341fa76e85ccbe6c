//! Typed entity identifiers and the per-collection issuer.
//!
//! Every entity kind gets its own opaque newtype over `u64` so the
//! underlying representation can change without touching call sites.
//! Identifiers are issued once, never reused and never mutated.

use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Conversion between a typed identifier and its raw integer form.
pub trait EntityId: Copy + Ord {
    /// Wrap a raw value. Only the issuer and restore paths should call this.
    fn from_raw(raw: u64) -> Self;

    /// Unwrap to the raw value.
    fn raw(self) -> u64;
}

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl EntityId for $name {
            fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            fn raw(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a [`crate::models::Task`].
    TaskId
);
id_type!(
    /// Identifier of a [`crate::models::Record`].
    RecordId
);
id_type!(
    /// Identifier of a [`crate::models::Project`].
    ProjectId
);
id_type!(
    /// Identifier of a [`crate::models::Tag`].
    TagId
);

/// Issues unique, monotonically increasing identifiers for one collection.
///
/// Not safe for concurrent callers; the facade serializes all mutations.
#[derive(Debug, Clone)]
pub struct IdIssuer<I> {
    last: u64,
    _kind: PhantomData<I>,
}

impl<I> Default for IdIssuer<I> {
    fn default() -> Self {
        Self { last: 0, _kind: PhantomData }
    }
}

impl<I: EntityId> IdIssuer<I> {
    /// Create an issuer whose first [`Self::next`] returns 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next identifier, strictly greater than all previous ones.
    pub fn next(&mut self) -> I {
        self.last += 1;
        I::from_raw(self.last)
    }

    /// Reinitialize from a persisted high-water mark so the next call to
    /// [`Self::next`] returns `last_issued + 1`. Never called mid-session.
    pub fn restore(&mut self, last_issued: I) {
        self.last = last_issued.raw();
    }

    /// Advance the counter past a trusted identifier if it is ahead of us.
    /// Used when re-inserting entities with externally persisted ids.
    pub fn bump_past(&mut self, id: I) {
        self.last = self.last.max(id.raw());
    }

    /// The raw high-water mark, for persisting.
    #[must_use]
    pub const fn last_issued(&self) -> u64 {
        self.last
    }
}
