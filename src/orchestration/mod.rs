pub mod distribution;
pub mod funding;
pub mod prompt;
pub mod recovery;
pub mod result;

pub use distribution::DistributionOrchestrator;
pub use funding::{CostBreakdown, FundingOrchestrator};
pub use prompt::{AutoApprove, AutoDecline, ConsolePrompt, OperatorPrompt};
pub use recovery::RecoveryOrchestrator;
pub use result::{OperationKind, OperationResult, WalletOutcome};
