//! Connection and broadcast-session state

pub mod auth;
pub mod lock;
pub mod registry;

pub use auth::AuthGate;
pub use lock::{Acquire, BroadcastLock, BroadcastSession};
pub use registry::{Connection, ConnectionId, ConnectionRegistry};
