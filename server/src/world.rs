//! The world model: the shared game state owned exclusively by the server.
//!
//! Everything here mutates only inside the server's state-machine handlers,
//! one message or step at a time. What crosses the wire is never the model
//! itself but per-player projections built by [`PlayerRecord::projection`].

use std::time::Instant;

use log::info;
use serde_json::{Map, Value};

/// Keys carrying this prefix are server-side control data and are stripped
/// from every wire projection.
pub const RESERVED_PREFIX: &str = "_";

/// One connected player.
#[derive(Debug, Clone)]
pub struct PlayerRecord {
    /// Transport address; unique and immutable once assigned.
    pub address: String,
    /// Declared attributes merged with the values the player supplied on connect.
    pub attributes: Map<String, Value>,
    /// Last validated action payload, if any.
    pub action: Option<Value>,
    /// When this player last acted (or connected); drives turn ordering.
    pub last_action_time: Instant,
}

impl PlayerRecord {
    pub fn new(address: impl Into<String>, attributes: Map<String, Value>) -> Self {
        Self {
            address: address.into(),
            attributes,
            action: None,
            last_action_time: Instant::now(),
        }
    }

    /// The record as the owning player may see it: attributes minus
    /// reserved-prefix keys. Address, pending action and timing stay
    /// server-side.
    pub fn projection(&self) -> Map<String, Value> {
        self.attributes
            .iter()
            .filter(|(key, _)| !key.starts_with(RESERVED_PREFIX))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

/// The authoritative game state.
#[derive(Debug, Default)]
pub struct WorldModel {
    /// Connected players in connection order.
    pub players: Vec<PlayerRecord>,
    /// Game-specific keys seeded at construction and mutated by the game logic.
    pub data: Map<String, Value>,
    /// Most recent validated action payload, for `step()` to consume.
    pub last_action_performed: Option<Value>,
    /// Address of the player who performed it.
    pub last_action_player: Option<String>,
}

impl WorldModel {
    pub fn new(seed: Map<String, Value>) -> Self {
        Self {
            players: Vec::new(),
            data: seed,
            last_action_performed: None,
            last_action_player: None,
        }
    }

    pub fn find_player(&self, address: &str) -> Option<&PlayerRecord> {
        self.players.iter().find(|p| p.address == address)
    }

    pub fn find_player_mut(&mut self, address: &str) -> Option<&mut PlayerRecord> {
        self.players.iter_mut().find(|p| p.address == address)
    }

    pub fn contains_player(&self, address: &str) -> bool {
        self.find_player(address).is_some()
    }

    pub fn add_player(&mut self, record: PlayerRecord) {
        info!("player {} connected", record.address);
        self.players.push(record);
    }

    pub fn remove_player(&mut self, address: &str) -> Option<PlayerRecord> {
        let index = self.players.iter().position(|p| p.address == address)?;
        info!("player {} disconnected", address);
        Some(self.players.remove(index))
    }

    pub fn addresses(&self) -> Vec<String> {
        self.players.iter().map(|p| p.address.clone()).collect()
    }
}
