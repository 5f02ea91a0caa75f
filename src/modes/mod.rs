//! Betting modes
//!
//! Each mode implements [`ModeRules`]; [`ModeValidator`] runs any of them
//! against live game updates. [`LeagueKernel`] groups a league's validators
//! with its feed provider.

pub mod catalog;
pub mod choose_winner;
pub mod either_or;
pub mod kernel;
pub mod next_score;
pub mod prop_hunt;
pub mod rules;
pub mod runtime;
pub mod spread;
pub mod total_points;

pub use kernel::LeagueKernel;
pub use rules::{Checkpoint, Decision, ModeRules};
pub use runtime::{ModeValidator, Validator, ValidatorDeps};
