//! The player agent: a `Connect → Input → Action → Output` state machine.

use std::time::Duration;

use log::{error, info, warn};
use serde_json::{Map, Value};

use shared::envelope::{decode, encode, MessageKind};
use shared::error::ProtocolError;
use shared::transport::Transport;

use crate::logic::PlayerLogic;

const DEFAULT_RECV_WAIT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlayerState {
    Connect,
    Input,
    Action,
    Output,
}

/// What one inbound message asked of the agent.
#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    /// Projection replaced; move on to deciding an action.
    Update,
    /// The server closed the game; stop cooperatively.
    Stop,
    /// Nothing usable; keep waiting.
    Ignored,
}

/// A player agent bound to one server.
pub struct Player<T: Transport, L: PlayerLogic> {
    transport: T,
    logic: L,
    server_address: String,
    attributes: Map<String, Value>,
    projection: Map<String, Value>,
    action: Option<Value>,
    state: PlayerState,
    recv_wait: Duration,
}

impl<T: Transport, L: PlayerLogic> Player<T, L> {
    /// `attributes` are the declared initial attributes sent with the
    /// connect envelope; their key set must match the server's connection
    /// contract or admission fails server-side.
    pub fn new(
        transport: T,
        server_address: impl Into<String>,
        attributes: Map<String, Value>,
        logic: L,
    ) -> Self {
        Self {
            transport,
            logic,
            server_address: server_address.into(),
            attributes,
            projection: Map::new(),
            action: None,
            state: PlayerState::Connect,
            recv_wait: DEFAULT_RECV_WAIT,
        }
    }

    /// Overrides the bounded wait used in the `Input` state.
    pub fn with_recv_wait(mut self, wait: Duration) -> Self {
        self.recv_wait = wait;
        self
    }

    /// The last world projection received from the server.
    pub fn projection(&self) -> &Map<String, Value> {
        &self.projection
    }

    pub fn last_action(&self) -> Option<&Value> {
        self.action.as_ref()
    }

    /// Drives the state machine until the server disconnects this player.
    pub async fn run(&mut self) {
        loop {
            match self.state {
                PlayerState::Connect => self.connect(),
                PlayerState::Input => {
                    if self.input().await {
                        break;
                    }
                }
                PlayerState::Action => self.decide(),
                PlayerState::Output => self.output(),
            }
        }
        info!("player {} stopped", self.transport.local_addr());
    }

    fn connect(&mut self) {
        let body = encode(MessageKind::Connect, Value::Object(self.attributes.clone()));
        if let Err(err) = self.transport.send(&self.server_address, &body) {
            error!("failed to send connect: {}", err);
        }
        self.state = PlayerState::Input;
    }

    /// One `Input` iteration; returns true when the agent should stop.
    async fn input(&mut self) -> bool {
        let Some((from, body)) = self.transport.recv(self.recv_wait).await else {
            return false;
        };
        match self.handle_message(&from, &body) {
            Ok(Inbound::Update) => {
                self.state = PlayerState::Action;
                false
            }
            Ok(Inbound::Stop) => true,
            Ok(Inbound::Ignored) => false,
            Err(err) => {
                warn!("dropping message from {}: {}", from, err);
                false
            }
        }
    }

    /// Decodes one inbound message. Only `update` envelopes from the
    /// configured server replace the projection; a server `disconnect`
    /// asks the agent to stop; everything else is a protocol error.
    fn handle_message(&mut self, from: &str, body: &[u8]) -> Result<Inbound, ProtocolError> {
        let envelope = decode(body)?;
        if from != self.server_address {
            return Err(ProtocolError::UnauthorizedSender(from.to_string()));
        }
        match envelope.kind {
            MessageKind::Update => match envelope.info {
                Value::Object(map) => {
                    self.projection = map;
                    Ok(Inbound::Update)
                }
                other => {
                    warn!("ignoring update with non-mapping payload: {}", other);
                    Ok(Inbound::Ignored)
                }
            },
            MessageKind::Disconnect => {
                info!("server closed the game");
                Ok(Inbound::Stop)
            }
            kind => Err(ProtocolError::MessageType(kind.as_str().to_string())),
        }
    }

    fn decide(&mut self) {
        self.action = Some(self.logic.decide_action(&self.projection));
        self.state = PlayerState::Output;
    }

    fn output(&mut self) {
        if let Some(action) = &self.action {
            let body = encode(MessageKind::Action, action.clone());
            if let Err(err) = self.transport.send(&self.server_address, &body) {
                error!("failed to send action: {}", err);
            }
        }
        self.state = PlayerState::Input;
    }
}
