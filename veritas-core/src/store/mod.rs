//! Knowledge-graph persistence.
//!
//! [`GraphStore`] is the seam every pipeline stage reads and writes through;
//! [`sqlite::SqliteStore`] is the production implementation.

pub mod schema;
pub mod sqlite;
mod traits;

pub use traits::{GraphStore, MemberLookup};
