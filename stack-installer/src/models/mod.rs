pub mod outcome;
pub mod state;
pub mod target;
