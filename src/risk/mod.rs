// =============================================================================
// Risk-management core — ATR, position sizing, trailing stops
// =============================================================================

pub mod atr;
pub mod plan;
pub mod trailing;

pub use atr::compute_atr;
pub use plan::{compute_plan, PlanInputs, StopKind, StopRequest};
pub use trailing::{adjust_stop, TrailingConfig, TrailingContext};
