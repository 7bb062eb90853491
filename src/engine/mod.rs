//! Allocation and commission engines.
//!
//! `commission` is pure computation; `allocator` and `propagation` are
//! store-backed and rely on the repository's unique inserts and atomic
//! counter updates for their concurrency guarantees.

pub mod allocator;
pub mod commission;
pub mod propagation;

pub use allocator::{AllocationError, AllocationOutcome, PositionAllocator};
pub use commission::{CommissionEngine, CommissionSchedule, DistributionPolicy};
pub use propagation::ActiveCountPropagator;
