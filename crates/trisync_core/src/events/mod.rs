//! Events exchanged between the sync components.
//!
//! - [`ChangeEvent`]: a structured observation fed into the merge engine,
//!   tagged with the replica it came from
//! - [`DocEvent`]: a committed Doc mutation, delivered to [`EventRegistry`]
//!   subscribers (at-least-once)

mod callback_registry;
mod change;
mod domain;

pub use callback_registry::{EventCallback, EventRegistry, SubscriptionId};
pub use change::{ChangeEvent, ChangeKind, FileStats};
pub use domain::DocEvent;
