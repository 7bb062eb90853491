pub mod monthly;
pub mod payments;
pub mod payouts;

pub use monthly::{CycleError, CycleReport, MonthlyCycleProcessor};
pub use payments::{IntakeError, PaymentOutcome, PaymentProcessor, SubscriptionOutcome};
pub use payouts::{
    BatchPlan, BatchReport, PayoutError, PayoutOrchestrator, PayoutPolicy, ResolveReport,
};
