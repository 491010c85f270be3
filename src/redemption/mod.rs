pub mod coordinator;
pub mod eligibility;
pub mod resolver;

pub use coordinator::{RedemptionCoordinator, RedemptionOutcome};
pub use eligibility::EligibilityEvaluator;
pub use resolver::{EntitlementResolver, ResolvedEntitlement};

use tracing::error;

use crate::error::{EngineError, Rejection};

/// Maps an infrastructure fault to the single retriable rejection. Business
/// rejections never pass through here.
pub(crate) fn unavailable(err: EngineError) -> Rejection {
    error!("Storage fault during redemption: {}", err);
    Rejection::Unavailable
}
