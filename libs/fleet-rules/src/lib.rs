//! Fleet Rules - schedule and threshold rule evaluation
//!
//! ```text
//! ┌──────────────┐  local time   ┌────────────────┐
//! │ schedule loop│──────────────▶│ desired_state  │──▶ on / off
//! └──────────────┘               └────────────────┘
//! ┌──────────────┐   sample      ┌────────────────┐
//! │ sensor loop  │──────────────▶│  RulesEngine   │──▶ actions + alerts
//! └──────────────┘               └────────────────┘
//! ```

mod engine;
mod error;
mod schedule;

pub use engine::{RelayActuation, RulesEngine, Transition, TransitionKind};
pub use error::{Result, RuleError};
pub use schedule::desired_state;
