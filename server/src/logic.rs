//! The interface a concrete game implements to run on the server core.

use serde_json::Value;

use crate::world::WorldModel;

/// Game rules injected into the server as a capability object.
///
/// `step` and `end_condition` are required; action validation defaults to
/// accepting everything and the lifecycle hooks default to no-ops. None of
/// these may perform I/O — the server owns the transport.
pub trait GameLogic {
    /// Advances the world one step. Typically reads
    /// `world.last_action_performed` / `world.last_action_player` and
    /// mutates the game data and player attributes.
    fn step(&mut self, world: &mut WorldModel);

    /// Whether the game is over. Checked in the `Output` state; returning
    /// true triggers the disconnect broadcast and stops the server.
    fn end_condition(&self, world: &WorldModel) -> bool;

    /// Game-rule validation for an incoming action payload. Invalid actions
    /// are logged and dropped, never treated as protocol errors.
    fn is_action_valid(&self, _world: &WorldModel, _action: &Value) -> bool {
        true
    }

    fn on_step_start(&mut self, _world: &mut WorldModel) {}

    fn on_step_end(&mut self, _world: &mut WorldModel) {}

    fn on_output_start(&mut self, _world: &mut WorldModel) {}

    fn on_output_end(&mut self, _world: &mut WorldModel) {}
}
