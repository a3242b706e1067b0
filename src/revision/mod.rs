//! Revision allocation
//!
//! This module provides:
//! - `RevisionId` - Opaque 64-bit revision with a compact string form
//! - `HybridLogicalClock` - Unique, time-ordered revision allocator
//! - `RevisionSource` - Seam used by the merge engine to obtain revisions

mod clock;
mod revision_id;

pub use clock::{HybridLogicalClock, RevisionSource, TimeSource};
pub use revision_id::RevisionId;
