//! The server agent: an explicit `Input → Step → Output` state machine.
//!
//! The loop is strictly sequential: one transition, including any world
//! mutation, completes before the next inbound message is considered.
//! Protocol errors raised while decoding a message are logged and dropped;
//! the only way the agent stops is the normal end-of-game path.

use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde_json::{Map, Value};

use shared::envelope::{decode, encode, MessageKind};
use shared::error::ProtocolError;
use shared::transport::Transport;

use crate::logic::GameLogic;
use crate::schedule::{Eligibility, SchedulePolicy};
use crate::world::{PlayerRecord, WorldModel};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Server construction parameters.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Initial game-specific world keys.
    pub game_state: Map<String, Value>,
    /// Player attribute template. Entries declared `null` form the
    /// connection contract and must be supplied by the connecting player;
    /// the rest are copied verbatim into every new record.
    pub player_attributes: Map<String, Value>,
    /// Exact key set required of mapping-shaped action payloads.
    /// `None` leaves the action shape unconstrained.
    pub action_attributes: Option<Vec<String>>,
    /// Leave the lobby automatically once this many players are connected.
    pub start_at_players: Option<usize>,
    /// Upper bound on how long one `Input` iteration waits for a message;
    /// also the worst-case lag on the scheduling clock.
    pub poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            game_state: Map::new(),
            player_attributes: Map::new(),
            action_attributes: None,
            start_at_players: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    Input,
    Step,
    Output,
}

/// The authoritative server agent.
pub struct Server<T: Transport, G: GameLogic> {
    transport: T,
    logic: G,
    policy: Box<dyn SchedulePolicy + Send>,
    world: WorldModel,
    eligibility: Eligibility,
    state: ServerState,
    running: bool,
    player_attributes: Map<String, Value>,
    connect_contract: Vec<String>,
    action_attributes: Option<Vec<String>>,
    start_at_players: Option<usize>,
    poll_interval: Duration,
}

impl<T: Transport, G: GameLogic> Server<T, G> {
    pub fn new(
        transport: T,
        config: ServerConfig,
        policy: Box<dyn SchedulePolicy + Send>,
        logic: G,
    ) -> Self {
        let connect_contract = config
            .player_attributes
            .iter()
            .filter(|(_, value)| value.is_null())
            .map(|(key, _)| key.clone())
            .collect();

        Self {
            transport,
            logic,
            policy,
            world: WorldModel::new(config.game_state),
            eligibility: Eligibility::new(),
            state: ServerState::Input,
            running: false,
            player_attributes: config.player_attributes,
            connect_contract,
            action_attributes: config.action_attributes,
            start_at_players: config.start_at_players,
            poll_interval: config.poll_interval,
        }
    }

    pub fn world(&self) -> &WorldModel {
        &self.world
    }

    /// Mutable world access for embedders seeding extra state before the
    /// game starts.
    pub fn world_mut(&mut self) -> &mut WorldModel {
        &mut self.world
    }

    pub fn eligibility(&self) -> &Eligibility {
        &self.eligibility
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Leaves the lobby: the policy computes the initial eligibility sets
    /// and the step clock opens. Until this is called, `Input` never
    /// transitions to `Step`.
    pub fn run_steps(&mut self) {
        self.policy.on_game_start(&self.world, &mut self.eligibility);
        self.running = true;
        // Announce initial projections, otherwise update-driven players
        // would never learn the game started.
        self.state = ServerState::Output;
        info!("game started with {} players", self.world.players.len());
    }

    /// Drives the state machine until the end-of-game broadcast.
    pub async fn run(&mut self) {
        info!("server listening at {}", self.transport.local_addr());
        loop {
            match self.state {
                ServerState::Input => self.input().await,
                ServerState::Step => self.step(),
                ServerState::Output => {
                    if self.output() {
                        break;
                    }
                }
            }
        }
        info!("server stopped");
    }

    /// One `Input` iteration: a pending step takes priority over the
    /// mailbox so inbound traffic can never starve the scheduling clock.
    async fn input(&mut self) {
        if self.running && self.policy.is_step_due(&self.world, &self.eligibility) {
            self.state = ServerState::Step;
            return;
        }
        if let Some((from, body)) = self.transport.recv(self.poll_interval).await {
            if let Err(err) = self.handle_message(&from, &body) {
                warn!("dropping message from {}: {}", from, err);
            }
        }
    }

    fn step(&mut self) {
        debug!("running step");
        self.logic.on_step_start(&mut self.world);
        self.logic.step(&mut self.world);
        self.logic.on_step_end(&mut self.world);
        self.state = ServerState::Output;
    }

    /// One `Output` iteration; returns true when the game ended.
    fn output(&mut self) -> bool {
        if self.logic.end_condition(&self.world) {
            self.finish();
            return true;
        }

        self.logic.on_output_start(&mut self.world);

        // The policy advances before the broadcast: under turn-based
        // scheduling the update must reach the next turn-holder, not the
        // player whose action triggered the step.
        self.policy.on_cycle_end(&self.world, &mut self.eligibility);

        let recipients: Vec<String> = self
            .eligibility
            .can_receive_update
            .iter()
            .cloned()
            .collect();
        for address in recipients {
            let Some(record) = self.world.find_player(&address) else {
                continue;
            };
            let body = encode(MessageKind::Update, Value::Object(record.projection()));
            if let Err(err) = self.transport.send(&address, &body) {
                error!("failed to send update to {}: {}", address, err);
            }
        }
        self.logic.on_output_end(&mut self.world);

        self.state = ServerState::Input;
        false
    }

    /// End of game: every connected player gets a disconnect envelope and
    /// is removed, draining the eligibility sets.
    fn finish(&mut self) {
        info!("end condition met, closing the game");
        let body = encode(MessageKind::Disconnect, Value::Object(Map::new()));
        for address in self.world.addresses() {
            if let Err(err) = self.transport.send(&address, &body) {
                error!("failed to send disconnect to {}: {}", address, err);
            }
            self.world.remove_player(&address);
            self.eligibility.purge(&address);
        }
    }

    /// Decodes one inbound transport message and applies it to the world
    /// model. Public so embedders driving their own loop can feed it.
    pub fn handle_message(&mut self, from: &str, body: &[u8]) -> Result<(), ProtocolError> {
        let envelope = decode(body)?;
        match envelope.kind {
            MessageKind::Connect => self.handle_connect(from, envelope.info),
            MessageKind::Disconnect => self.handle_disconnect(from),
            MessageKind::Action => self.handle_action(from, envelope.info),
            // Servers never receive updates; only players do.
            MessageKind::Update => Err(ProtocolError::MessageType(
                MessageKind::Update.as_str().to_string(),
            )),
        }
    }

    fn handle_connect(&mut self, from: &str, info: Value) -> Result<(), ProtocolError> {
        if self.running {
            warn!("refusing connect from {}: the game already started", from);
            return Ok(());
        }
        if self.world.contains_player(from) {
            return Err(ProtocolError::PlayerAlreadyConnected(from.to_string()));
        }

        let supplied = match info {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let actual: Vec<String> = supplied.keys().cloned().collect();
        if !key_sets_match(&self.connect_contract, &actual) {
            return Err(ProtocolError::InvalidContent {
                message_type: MessageKind::Connect.as_str().to_string(),
                expected: self.connect_contract.clone(),
                actual,
            });
        }

        let mut attributes = Map::new();
        for (key, declared) in &self.player_attributes {
            if declared.is_null() {
                if let Some(value) = supplied.get(key) {
                    attributes.insert(key.clone(), value.clone());
                }
            } else {
                attributes.insert(key.clone(), declared.clone());
            }
        }
        self.world.add_player(PlayerRecord::new(from, attributes));

        if let Some(needed) = self.start_at_players {
            if !self.running && self.world.players.len() >= needed {
                self.run_steps();
            }
        }
        Ok(())
    }

    fn handle_disconnect(&mut self, from: &str) -> Result<(), ProtocolError> {
        if self.world.remove_player(from).is_none() {
            return Err(ProtocolError::PlayerNotFound(from.to_string()));
        }
        self.eligibility.purge(from);
        if self.running {
            // A leaving turn-holder must not stall the game.
            self.policy
                .compute_eligibility(&self.world, &mut self.eligibility);
        }
        Ok(())
    }

    fn handle_action(&mut self, from: &str, info: Value) -> Result<(), ProtocolError> {
        if !self.world.contains_player(from) {
            return Err(ProtocolError::PlayerNotFound(from.to_string()));
        }
        if !self.eligibility.can_act.contains(from) {
            debug!("ignoring action from {}: not eligible to act", from);
            return Ok(());
        }

        if let (Some(contract), Value::Object(map)) = (&self.action_attributes, &info) {
            let actual: Vec<String> = map.keys().cloned().collect();
            if !key_sets_match(contract, &actual) {
                return Err(ProtocolError::InvalidContent {
                    message_type: MessageKind::Action.as_str().to_string(),
                    expected: contract.clone(),
                    actual,
                });
            }
        }

        if !self.logic.is_action_valid(&self.world, &info) {
            info!("discarding invalid action from {}", from);
            return Ok(());
        }

        let now = Instant::now();
        if let Some(record) = self.world.find_player_mut(from) {
            record.action = Some(info.clone());
            record.last_action_time = now;
        }
        self.world.last_action_performed = Some(info);
        self.world.last_action_player = Some(from.to_string());
        Ok(())
    }
}

/// Order-insensitive key-set equality; both sides are duplicate-free.
fn key_sets_match(expected: &[String], actual: &[String]) -> bool {
    expected.len() == actual.len() && actual.iter().all(|key| expected.contains(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{Continuous, TurnBased};
    use serde_json::json;
    use shared::transport::{ChannelEndpoint, ChannelHub};

    struct NoopGame;

    impl GameLogic for NoopGame {
        fn step(&mut self, _world: &mut WorldModel) {}

        fn end_condition(&self, _world: &WorldModel) -> bool {
            false
        }
    }

    struct PickyGame;

    impl GameLogic for PickyGame {
        fn step(&mut self, _world: &mut WorldModel) {}

        fn end_condition(&self, _world: &WorldModel) -> bool {
            false
        }

        fn is_action_valid(&self, _world: &WorldModel, action: &Value) -> bool {
            action.get("cell").is_some()
        }
    }

    struct EndsImmediately;

    impl GameLogic for EndsImmediately {
        fn step(&mut self, _world: &mut WorldModel) {}

        fn end_condition(&self, _world: &WorldModel) -> bool {
            true
        }
    }

    fn template() -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("name".to_string(), Value::Null);
        map.insert("team".to_string(), json!("red"));
        map
    }

    fn test_server<G: GameLogic>(
        logic: G,
        config: ServerConfig,
    ) -> (Server<ChannelEndpoint, G>, ChannelHub) {
        let hub = ChannelHub::new();
        let endpoint = hub.bind("game@server");
        let server = Server::new(endpoint, config, Box::new(TurnBased::new()), logic);
        (server, hub)
    }

    fn connect(server: &mut Server<ChannelEndpoint, impl GameLogic>, from: &str, name: &str) {
        let body = encode(MessageKind::Connect, json!({ "name": name }));
        server.handle_message(from, &body).unwrap();
    }

    #[test]
    fn connect_preserves_arrival_order() {
        let config = ServerConfig {
            player_attributes: template(),
            ..Default::default()
        };
        let (mut server, _hub) = test_server(NoopGame, config);

        connect(&mut server, "p1", "ada");
        connect(&mut server, "p2", "grace");
        connect(&mut server, "p3", "edsger");

        assert_eq!(server.world.addresses(), vec!["p1", "p2", "p3"]);
        let record = server.world.find_player("p1").unwrap();
        assert_eq!(record.attributes.get("name"), Some(&json!("ada")));
        assert_eq!(record.attributes.get("team"), Some(&json!("red")));
        assert!(record.action.is_none());
    }

    #[test]
    fn duplicate_connect_is_an_error() {
        let config = ServerConfig {
            player_attributes: template(),
            ..Default::default()
        };
        let (mut server, _hub) = test_server(NoopGame, config);

        connect(&mut server, "p1", "ada");
        let body = encode(MessageKind::Connect, json!({ "name": "ada" }));
        assert_eq!(
            server.handle_message("p1", &body),
            Err(ProtocolError::PlayerAlreadyConnected("p1".to_string()))
        );
        assert_eq!(server.world.players.len(), 1);
    }

    #[test]
    fn connect_with_wrong_keys_leaves_players_unchanged() {
        let config = ServerConfig {
            player_attributes: template(),
            ..Default::default()
        };
        let (mut server, _hub) = test_server(NoopGame, config);

        let body = encode(MessageKind::Connect, json!({ "nickname": "ada" }));
        match server.handle_message("p1", &body) {
            Err(ProtocolError::InvalidContent {
                expected, actual, ..
            }) => {
                assert_eq!(expected, vec!["name".to_string()]);
                assert_eq!(actual, vec!["nickname".to_string()]);
            }
            other => panic!("expected InvalidContent, got {:?}", other),
        }
        assert!(server.world.players.is_empty());
    }

    #[test]
    fn lobby_closes_once_running() {
        let config = ServerConfig {
            player_attributes: template(),
            ..Default::default()
        };
        let (mut server, _hub) = test_server(NoopGame, config);

        connect(&mut server, "p1", "ada");
        server.run_steps();

        let body = encode(MessageKind::Connect, json!({ "name": "late" }));
        assert!(server.handle_message("p2", &body).is_ok());
        assert_eq!(server.world.players.len(), 1);
    }

    #[test]
    fn auto_start_fires_at_threshold() {
        let config = ServerConfig {
            player_attributes: template(),
            start_at_players: Some(2),
            ..Default::default()
        };
        let (mut server, _hub) = test_server(NoopGame, config);

        connect(&mut server, "p1", "ada");
        assert!(!server.is_running());
        connect(&mut server, "p2", "grace");
        assert!(server.is_running());
        assert_eq!(server.eligibility.can_act.len(), 1);
    }

    #[test]
    fn disconnect_purges_everywhere_and_then_actions_fail() {
        let config = ServerConfig {
            player_attributes: template(),
            start_at_players: Some(2),
            ..Default::default()
        };
        let (mut server, _hub) = test_server(NoopGame, config);
        connect(&mut server, "p1", "ada");
        connect(&mut server, "p2", "grace");

        let body = encode(MessageKind::Disconnect, json!({}));
        server.handle_message("p1", &body).unwrap();

        assert_eq!(server.world.addresses(), vec!["p2"]);
        assert!(!server.eligibility.can_act.contains("p1"));
        assert!(!server.eligibility.can_receive_update.contains("p1"));
        // The turn passed on rather than stalling.
        assert!(server.eligibility.can_act.contains("p2"));

        let action = encode(MessageKind::Action, json!([0, 0]));
        assert_eq!(
            server.handle_message("p1", &action),
            Err(ProtocolError::PlayerNotFound("p1".to_string()))
        );
    }

    #[test]
    fn disconnect_of_unknown_player_is_an_error() {
        let (mut server, _hub) = test_server(NoopGame, ServerConfig::default());
        let body = encode(MessageKind::Disconnect, json!({}));
        assert_eq!(
            server.handle_message("ghost", &body),
            Err(ProtocolError::PlayerNotFound("ghost".to_string()))
        );
    }

    #[test]
    fn ineligible_action_mutates_nothing() {
        let config = ServerConfig {
            player_attributes: template(),
            start_at_players: Some(2),
            ..Default::default()
        };
        let (mut server, _hub) = test_server(NoopGame, config);
        connect(&mut server, "p1", "ada");
        connect(&mut server, "p2", "grace");

        // p1 holds the turn; p2's action is expected traffic, not a fault.
        let turn_holder: Vec<_> = server.eligibility.can_act.iter().cloned().collect();
        assert_eq!(turn_holder, vec!["p1".to_string()]);

        let action = encode(MessageKind::Action, json!([1, 1]));
        assert!(server.handle_message("p2", &action).is_ok());

        assert!(server.world.find_player("p2").unwrap().action.is_none());
        assert!(server.world.last_action_performed.is_none());
        assert!(server.world.last_action_player.is_none());
    }

    #[test]
    fn valid_action_updates_record_and_world() {
        let config = ServerConfig {
            player_attributes: template(),
            start_at_players: Some(1),
            ..Default::default()
        };
        let (mut server, _hub) = test_server(NoopGame, config);
        connect(&mut server, "p1", "ada");

        let before = server.world.find_player("p1").unwrap().last_action_time;
        let action = encode(MessageKind::Action, json!([2, 0]));
        server.handle_message("p1", &action).unwrap();

        let record = server.world.find_player("p1").unwrap();
        assert_eq!(record.action, Some(json!([2, 0])));
        assert!(record.last_action_time >= before);
        assert_eq!(server.world.last_action_performed, Some(json!([2, 0])));
        assert_eq!(server.world.last_action_player, Some("p1".to_string()));
    }

    #[test]
    fn mapping_action_must_match_the_contract() {
        let config = ServerConfig {
            player_attributes: template(),
            action_attributes: Some(vec!["row".to_string(), "col".to_string()]),
            start_at_players: Some(1),
            ..Default::default()
        };
        let (mut server, _hub) = test_server(NoopGame, config);
        connect(&mut server, "p1", "ada");

        let bad = encode(MessageKind::Action, json!({ "row": 1 }));
        assert!(matches!(
            server.handle_message("p1", &bad),
            Err(ProtocolError::InvalidContent { .. })
        ));
        assert!(server.world.find_player("p1").unwrap().action.is_none());

        let good = encode(MessageKind::Action, json!({ "row": 1, "col": 2 }));
        server.handle_message("p1", &good).unwrap();
        assert!(server.world.find_player("p1").unwrap().action.is_some());

        // Non-mapping payloads bypass the contract entirely.
        let scalar = encode(MessageKind::Action, json!([1, 2]));
        assert!(server.handle_message("p1", &scalar).is_ok());
    }

    #[test]
    fn game_rule_rejection_discards_silently() {
        let config = ServerConfig {
            player_attributes: template(),
            start_at_players: Some(1),
            ..Default::default()
        };
        let (mut server, _hub) = test_server(PickyGame, config);
        connect(&mut server, "p1", "ada");

        let invalid = encode(MessageKind::Action, json!({ "wrong": true }));
        assert!(server.handle_message("p1", &invalid).is_ok());
        assert!(server.world.find_player("p1").unwrap().action.is_none());
        assert!(server.world.last_action_performed.is_none());
    }

    #[test]
    fn inbound_update_is_a_protocol_error() {
        let (mut server, _hub) = test_server(NoopGame, ServerConfig::default());
        let body = encode(MessageKind::Update, json!({}));
        assert_eq!(
            server.handle_message("p1", &body),
            Err(ProtocolError::MessageType("update".to_string()))
        );
    }

    #[test]
    fn unknown_envelope_type_is_a_protocol_error() {
        let (mut server, _hub) = test_server(NoopGame, ServerConfig::default());
        assert!(matches!(
            server.handle_message("p1", br#"{"type": "emote", "info": {}}"#),
            Err(ProtocolError::MessageType(tag)) if tag == "emote"
        ));
    }

    #[test]
    fn output_sends_each_player_their_own_projection() {
        let hub = ChannelHub::new();
        let endpoint = hub.bind("game@server");
        let mut p1 = hub.bind("p1");
        let config = ServerConfig {
            player_attributes: template(),
            start_at_players: Some(1),
            ..Default::default()
        };
        let mut server = Server::new(endpoint, config, Box::new(TurnBased::new()), NoopGame);
        connect(&mut server, "p1", "ada");

        assert!(!server.output());

        let (from, body) = p1.try_recv().unwrap();
        assert_eq!(from, "game@server");
        let envelope = decode(&body).unwrap();
        assert_eq!(envelope.kind, MessageKind::Update);
        assert_eq!(envelope.info, json!({ "name": "ada", "team": "red" }));
    }

    #[test]
    fn end_of_game_broadcasts_disconnect_and_drains() {
        let hub = ChannelHub::new();
        let endpoint = hub.bind("game@server");
        let mut p1 = hub.bind("p1");
        let mut p2 = hub.bind("p2");
        let config = ServerConfig {
            player_attributes: template(),
            start_at_players: Some(2),
            ..Default::default()
        };
        let mut server = Server::new(
            endpoint,
            config,
            Box::new(Continuous::from_frequency(10)),
            EndsImmediately,
        );
        connect(&mut server, "p1", "ada");
        connect(&mut server, "p2", "grace");

        assert!(server.output());

        for endpoint in [&mut p1, &mut p2] {
            let (_, body) = endpoint.try_recv().unwrap();
            assert_eq!(decode(&body).unwrap().kind, MessageKind::Disconnect);
            assert!(endpoint.try_recv().is_none());
        }
        assert!(server.world.players.is_empty());
        assert!(server.eligibility.can_act.is_empty());
        assert!(server.eligibility.can_receive_update.is_empty());
    }

    #[test]
    fn turn_rotates_to_the_player_longest_idle() {
        let config = ServerConfig {
            player_attributes: template(),
            start_at_players: Some(3),
            ..Default::default()
        };
        let (mut server, _hub) = test_server(NoopGame, config);
        connect(&mut server, "p1", "a");
        connect(&mut server, "p2", "b");
        connect(&mut server, "p3", "c");

        // Backdate the stamps so they are unambiguous regardless of clock
        // resolution and still older than the stamp p1's action gets below.
        let base = Instant::now();
        for (i, address) in ["p1", "p2", "p3"].iter().enumerate() {
            server.world.find_player_mut(address).unwrap().last_action_time =
                base - Duration::from_millis(30 - i as u64 * 10);
        }
        server.policy.compute_eligibility(&server.world, &mut server.eligibility);
        assert!(server.eligibility.can_act.contains("p1"));

        let action = encode(MessageKind::Action, json!([0, 0]));
        server.handle_message("p1", &action).unwrap();

        // p1 just acted, so the recomputed turn must pass them over.
        server.policy.compute_eligibility(&server.world, &mut server.eligibility);
        assert!(server.eligibility.can_act.contains("p2"));
        assert!(!server.eligibility.can_act.contains("p1"));
    }

    #[test]
    fn update_after_a_step_reaches_the_next_turn_holder() {
        let hub = ChannelHub::new();
        let endpoint = hub.bind("game@server");
        let mut p1 = hub.bind("p1");
        let mut p2 = hub.bind("p2");
        let config = ServerConfig {
            player_attributes: template(),
            start_at_players: Some(2),
            ..Default::default()
        };
        let mut server = Server::new(endpoint, config, Box::new(TurnBased::new()), NoopGame);
        connect(&mut server, "p1", "ada");
        connect(&mut server, "p2", "grace");

        let base = Instant::now();
        server.world.find_player_mut("p1").unwrap().last_action_time =
            base - Duration::from_millis(20);
        server.world.find_player_mut("p2").unwrap().last_action_time =
            base - Duration::from_millis(10);
        server.policy.compute_eligibility(&server.world, &mut server.eligibility);
        assert!(server.eligibility.can_act.contains("p1"));

        let action = encode(MessageKind::Action, json!([0, 0]));
        server.handle_message("p1", &action).unwrap();
        assert!(server.policy.is_step_due(&server.world, &server.eligibility));
        server.step();

        // The broadcast has to land with p2, whose turn it now is; sending
        // it back to p1 would leave p2 waiting forever.
        assert!(!server.output());
        assert!(p1.try_recv().is_none());
        let (_, body) = p2.try_recv().unwrap();
        assert_eq!(decode(&body).unwrap().kind, MessageKind::Update);
        assert!(server.eligibility.can_act.contains("p2"));
    }
}
