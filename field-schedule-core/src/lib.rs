//! Core scheduling domain for the Field Schedule application.
//!
//! This crate is pure: it holds the entity model, the time-slot calendar
//! algebra, the pre-schedule feasibility analyzer, the payload builder and
//! the scheduling engine. Persistence and transport live in the sibling
//! crates and feed this one with plain values.

pub mod analyzer;
pub mod calendar;
pub mod engine;
pub mod model;
pub mod payload;

pub use calendar::{CalendarError, FieldCalendar, overlaps};
pub use engine::{EngineError, EngineInput, EngineOutput};
pub use model::{Booking, Reservation, Schedule, ValidationError};
