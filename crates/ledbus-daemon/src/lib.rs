//! Bus router for ledbus attachments.
//!
//! The router owns the name table, advertisements, bound session ports and
//! live sessions, and forwards method calls and join requests between the
//! attachments connected to it.

pub mod error;
pub mod handlers;
pub mod names;
pub mod server;
pub mod state;

pub use error::{Result, RouterError};
pub use server::{run, serve};
pub use state::{ConnectionId, RouterState, SharedState};
