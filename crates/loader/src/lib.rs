//! The loader contract and its backends. Everything backend-specific sits
//! behind the [`Loader`] trait; backends register under a stable name and
//! are connected through [`connect`]. The reference backend drives a
//! Postgres-class store over its native `COPY` bulk path.

mod contract;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
mod postgres;
mod registry;

pub use self::contract::{DqCheck, DqReport, LoadError, LoadRecord, Loader, TableCounts};
pub use self::postgres::PostgresLoader;
pub use self::registry::{backend_names, connect};
