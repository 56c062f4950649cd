//! Quote workflow: step inputs and the lifecycle engine

pub mod lifecycle;
pub mod steps;

pub use lifecycle::{
    EscalationView, QuoteLifecycleEngine, QuoteStatusView, StepOutcome, TurnaroundOption,
};
pub use steps::{FileUpload, StepInput};
