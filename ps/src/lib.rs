//! PlanStore - SQLite-backed JSON record store
//!
//! Records are stored as JSON documents keyed by `(collection, id)`. Each record
//! declares a set of indexed fields which are mirrored into a side table so that
//! listings can be filtered without deserializing every document.
//!
//! # Example
//!
//! ```ignore
//! use planstore::{Filter, FilterOp, IndexValue, ListOptions, Store};
//!
//! let mut store = Store::open(".planstore")?;
//! store.upsert(plan)?;
//! let approved: Vec<Plan> = store.list(
//!     &[Filter::eq("status", IndexValue::from("APPROVED"))],
//!     &ListOptions::default(),
//! )?;
//! ```

mod record;
mod store;

pub use record::{Filter, FilterOp, IndexValue, ListOptions, Record, now_ms};
pub use store::{DB_FILE_NAME, Store};
