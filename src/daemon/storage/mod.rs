//!  Storage is organized through [store::FileStore].
//!  The basic idea is:
//!   - There is a directory holding one JSON document per record kind.
//!   - The timer document holds the single `"current"` record.
//!   - Counter and session documents hold auto-keyed records and the next free key.
//!   - Every read takes a shared file lock, every write an exclusive one.

pub mod collection;
pub mod entities;
pub mod error;
#[cfg(test)]
pub mod memory;
pub mod store;
