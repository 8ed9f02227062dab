mod classify;
mod controller;
mod state;

pub use classify::{classify, user_message, Termination};
pub use controller::{GenerationController, TurnHandle, TurnOptions};
pub use state::{GenerationSession, TurnOutcome, TurnPhase};
