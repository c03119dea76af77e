pub mod queue;
pub mod state;
pub mod utils;
