//! Session runtime
//!
//! Owns the effectful side of a conversation: the controller loop that runs
//! the state machine against a `SessionApi`, and the page resolution that
//! decides which tool a session page drives.

mod controller;
mod page;

#[cfg(test)]
pub mod testing;

pub use controller::{SessionController, SessionHandle, Unmounted};
pub use page::{open_page, PageTarget, ToolPage};
