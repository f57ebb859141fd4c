//! The alias table and everything that keeps it current.
//!
//! [`AliasSource`] produces records, [`AliasTable`] publishes them as an
//! immutable snapshot, and [`ReloadCoordinator`] decides when a refresh
//! happens.

pub mod error;
pub mod record;
pub mod reload;
pub mod source;
pub mod table;

pub use error::{FetchError, FetchResult};
pub use record::{AliasRecord, parse_listing};
pub use reload::{ReloadCoordinator, ReloadHandle, ReloadTrigger};
pub use source::{AliasSource, HttpAliasSource};
pub use table::{AliasTable, Snapshot};
