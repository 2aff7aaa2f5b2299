//! The interface a concrete player implements to run on the agent.

use serde_json::{Map, Value};

/// Decision-making injected into the player agent.
pub trait PlayerLogic {
    /// Chooses the next action from the current world projection.
    ///
    /// Must be pure with respect to the transport: it reads the projection
    /// and returns a payload; the agent does the sending.
    fn decide_action(&mut self, projection: &Map<String, Value>) -> Value;
}
