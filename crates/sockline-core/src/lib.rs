//! Connection harness for sockline: a scripted peer, a managed socket, and
//! the bookkeeping tests assert against.

mod buffer;
mod error;
mod peer;
mod policy;
mod socket;
mod tracker;

pub use buffer::MessageBuffer;
pub use error::SocklineError;
pub use peer::SimulatedPeer;
pub use policy::ReconnectPolicy;
pub use socket::{Delivery, Receipt, SendState, SocketConfig, SocketManager, SocketStats};
pub use tracker::ConnectionTracker;

/// Result type for sockline operations.
pub type Result<T> = std::result::Result<T, SocklineError>;
