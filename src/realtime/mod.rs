//! Socket.IO transport for devices.
//!
//! - `packet` — Engine.IO v4 / Socket.IO v5 text codec
//! - `socket` — WebSocket upgrade and per-connection event loop, driving a
//!   [`crate::registry::ConnectionEvents`] implementation

pub mod packet;
pub mod socket;

pub use socket::socket_upgrade;
