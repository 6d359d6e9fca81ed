//! # Zap — live trace subsystem
//!
//! Converts live traffic on the observed streams into timestamp-ordered,
//! depth-tagged trace events ("zaps") for the rendering collaborator:
//!
//! - **[`ZapRegistry`]**: one tap registration per discovered node, merged
//!   into a single [`ZapStream`]
//! - **[`ZapDataStore`]**: shared, append-only payload store; zap events
//!   carry only an allocation index
//!
//! Taps are non-interfering: the observed application's own consumers see
//! exactly the delivery they would without the devtool attached.

pub mod error;
pub mod registry;
pub mod store;

// Re-export key types
pub use error::ZapError;
pub use registry::{Zap, ZapKind, ZapRecord, ZapRegistry, ZapStream};
pub use store::{ZapDataEntry, ZapDataKind, ZapDataStore, ZapSelector};
