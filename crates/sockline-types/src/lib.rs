//! Shared types for the sockline connection harness.

mod event;
mod frame;
mod state;

pub use event::*;
pub use frame::*;
pub use state::*;
