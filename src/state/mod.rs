//! Runtime state of participants and parties

pub mod store;

pub use store::{ParticipantState, PartyState, StateStore};
