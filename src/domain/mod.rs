pub mod audit;
pub mod balance;
pub mod game;
pub mod job;
pub mod state;
pub mod wager;

pub use audit::*;
pub use balance::*;
pub use game::*;
pub use job::*;
pub use state::*;
pub use wager::*;
