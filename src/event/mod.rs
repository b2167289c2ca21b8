//! Typed event routing.
//!
//! Any `'static` value can be published as an event; its identity is its
//! runtime type plus whatever fields a subscriber's filter inspects.
//! Dispatch is synchronous: handlers matching a published event run in
//! registration order before `publish` returns.

pub mod filter;
pub mod router;

pub use filter::{EventFilter, EventFilterBuilder, FieldValue};
pub use router::EventRouter;
