//! Session reuse and persistence.
//!
//! - [`SessionManager`]: adopts supplied or stored cookies, or logs in
//! - [`SessionStore`]: per-account cookie persistence with merge semantics

mod manager;
mod store;

pub use manager::{Session, SessionManager, SessionOrigin};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore, StoreError};
