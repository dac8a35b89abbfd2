//! Dual-routing connection proxy.
//!
//! [`DoubleWritePool`] looks like a single [`Connection`](crate::storage::Connection)
//! to the data access layer while fanning effects out to two stores according
//! to the active [`WritePattern`](crate::pattern::WritePattern):
//!
//! | Pattern     | Reads | Primary write | Secondary write |
//! |-------------|-------|---------------|-----------------|
//! | `SRC_ONLY`  | src   | src           | -               |
//! | `SRC_FIRST` | src   | src           | dst             |
//! | `DST_FIRST` | dst   | dst           | src             |
//! | `DST_ONLY`  | dst   | dst           | -               |
//!
//! Primary failures propagate and stop the operation before the secondary is
//! touched. Secondary failures are logged and swallowed; the validator and
//! fixer close the resulting drift.

mod pool;
mod transaction;

pub use pool::DoubleWritePool;
pub use transaction::DoubleWriteTransaction;
