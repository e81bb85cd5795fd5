//! Fluent SQL query builder.
//!
//! Clause calls accumulate already-escaped fragments into a `BuilderState`;
//! terminal calls compile them into SQL, run it through the driver's
//! execution pipeline and clear what they consumed.
//!
//! # Cache snapshot
//!
//! Between `start_cache` and `stop_cache`, every clause is also recorded into
//! a shadow snapshot. Compiling merges the snapshot into the live clauses
//! (snapshot entries first, duplicates dropped), so a base query survives
//! repeated terminal calls until `flush_cache`.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut qb = db.qb()?;
//! let result = qb
//!     .select("id, name")
//!     .where_("age >", 18)
//!     .order_by("name", "asc")
//!     .limit(10)
//!     .get(Some("users"))?;
//! ```

mod builder;
mod compile;
mod modify;
mod state;
mod types;

#[cfg(test)]
mod tests;

pub use builder::QueryBuilder;
pub use modify::BATCH_CHUNK_SIZE;
pub use state::BuilderState;
pub use types::{AggregateKind, Connector, JoinKind, LikeSide, OrderDirection};
