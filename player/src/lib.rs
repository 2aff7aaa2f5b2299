//! # Game Player Agent
//!
//! The client half of the framework: a state machine cycling through
//! `Connect → Input → Action → Output`. It announces itself to the server,
//! keeps a local projection of its slice of the world, and delegates every
//! decision to a pluggable [`PlayerLogic`].
//!
//! The projection is replaced wholesale by each `update` envelope — the
//! player never merges state, it mirrors whatever the server last sent.
//! A `disconnect` envelope from the server ends the run loop; any other
//! inbound type is a logged protocol error and the agent keeps waiting.

pub mod agent;
pub mod logic;

pub use agent::Player;
pub use logic::PlayerLogic;
