//! # Game Server Agent
//!
//! The authoritative half of the framework: a single-threaded state machine
//! that owns the shared world model, admits player connections, reconciles
//! their actions into one consistent state, and broadcasts per-player
//! projections back out.
//!
//! ## Architecture
//!
//! The agent cycles through three explicit states:
//!
//! - **Input** — a pending step takes priority; otherwise one bounded-wait
//!   receive attempt feeds the decode/dispatch path. Bad input is logged
//!   and dropped, never fatal.
//! - **Step** — the injected [`GameLogic`] advances the world, bracketed by
//!   its lifecycle hooks.
//! - **Output** — either the end condition holds (disconnect broadcast,
//!   stop) or the scheduling policy advances and every eligible player
//!   receives its own projection.
//!
//! *When* a step runs and *who* may act is delegated to a
//! [`SchedulePolicy`]: [`Continuous`] steps on a fixed wall-clock period
//! with every player eligible, [`TurnBased`] lets one player act at a time,
//! oldest-acted-first.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use serde_json::{json, Value};
//! use server::{Continuous, GameLogic, Server, ServerConfig, WorldModel};
//! use shared::transport::ChannelHub;
//!
//! struct Counter;
//!
//! impl GameLogic for Counter {
//!     fn step(&mut self, world: &mut WorldModel) {
//!         let ticks = world.data.get("ticks").and_then(Value::as_i64).unwrap_or(0);
//!         world.data.insert("ticks".to_string(), json!(ticks + 1));
//!     }
//!
//!     fn end_condition(&self, world: &WorldModel) -> bool {
//!         world.data.get("ticks").and_then(Value::as_i64).unwrap_or(0) >= 100
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let hub = ChannelHub::new();
//!     let config = ServerConfig {
//!         start_at_players: Some(2),
//!         ..Default::default()
//!     };
//!     let mut server = Server::new(
//!         hub.bind("game@server"),
//!         config,
//!         Box::new(Continuous::from_frequency(10)),
//!         Counter,
//!     );
//!     server.run().await;
//! }
//! ```

pub mod agent;
pub mod logic;
pub mod schedule;
pub mod world;

pub use agent::{Server, ServerConfig};
pub use logic::GameLogic;
pub use schedule::{Continuous, Eligibility, SchedulePolicy, TurnBased};
pub use world::{PlayerRecord, WorldModel, RESERVED_PREFIX};
