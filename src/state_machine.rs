//! Conversation state machine
//!
//! Elm-style: `transition` is pure and returns the new state plus the effects
//! the runtime must execute. Completions of those effects come back in as
//! events.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;


pub use effect::{Effect, Notification, NotificationKind, Operation};
pub use event::Event;
pub use state::{ConvState, Phase, SessionContext};
pub use transition::{transition, TransitionError};
