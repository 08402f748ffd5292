//! Contextual-bandit adaptive optimizer for QAM.
//!
//! LinUCB / Thompson Sampling (plus epsilon-greedy and UCB1 baselines) over a
//! discrete arm catalog, Pareto-aware multi-objective rewards, and bounded
//! parameter adaptation with automatic rollback.

pub mod adaptation;
pub mod arms;
pub mod baseline;
pub mod context;
pub mod error;
pub mod learner;
pub mod linalg;
pub mod linucb;
pub mod optimizer;
pub mod pareto;
pub mod reward;
pub mod thompson;

pub use adaptation::{
    AdaptationEvent, AdaptationEventKind, AdaptationManager, AdaptationSettings,
    BoundedParameter, ProposedChange,
};
pub use arms::{ArmCatalog, ArmSpec};
pub use context::{ContextSnapshot, CONTEXT_DIM};
pub use error::OptimizerError;
pub use learner::Learner;
pub use optimizer::{
    AdaptiveOptimizer, LearnerState, ObservationOutcome, Recommendation,
};
pub use pareto::{FrontMetrics, ParetoPoint, ParetoWindow};
pub use reward::{composite, RewardObjectives, RewardScales, RewardWeights};
