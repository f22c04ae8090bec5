//! Byte-keyed associative store used by the guest bridge.
//!
//! [`HashTable`] maps arbitrary byte strings to arbitrary byte strings. Keys
//! are compared by full byte equality (length and content), buckets are chosen
//! with a DJB2-style hash and never grow on their own: the bucket count is fixed
//! at creation and only changes through an explicit [`HashTable::rehash`].
//!
//! Every mutating operation either completes or leaves the table untouched, so
//! a failed allocation never corrupts existing entries.

#![forbid(unsafe_code)]

mod error;
mod hashtable;

pub use error::StoreError;
pub use hashtable::{hash, HashTable, Iter};
