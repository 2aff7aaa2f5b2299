//! Scheduling policies: when a step may run and who may act.
//!
//! The server core depends only on [`SchedulePolicy`]; the two built-in
//! strategies are [`Continuous`] (fixed wall-clock period, everyone acts)
//! and [`TurnBased`] (one player at a time, oldest-acted-first).

use std::collections::HashSet;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::world::WorldModel;

/// The two eligibility sets the active policy maintains.
///
/// Both are always subsets of the currently connected addresses; a
/// disconnection purges the address from both.
#[derive(Debug, Clone, Default)]
pub struct Eligibility {
    /// Addresses whose actions are currently admissible.
    pub can_act: HashSet<String>,
    /// Addresses that receive the next update broadcast.
    pub can_receive_update: HashSet<String>,
}

impl Eligibility {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes an address from both sets. Absence is not an error.
    pub fn purge(&mut self, address: &str) {
        self.can_act.remove(address);
        self.can_receive_update.remove(address);
    }

    pub fn clear(&mut self) {
        self.can_act.clear();
        self.can_receive_update.clear();
    }

    /// Grants both sets to every connected player.
    pub fn grant_all(&mut self, world: &WorldModel) {
        self.clear();
        for record in &world.players {
            self.can_act.insert(record.address.clone());
            self.can_receive_update.insert(record.address.clone());
        }
    }

    /// Grants both sets to a single player.
    pub fn grant_solo(&mut self, address: &str) {
        self.clear();
        self.can_act.insert(address.to_string());
        self.can_receive_update.insert(address.to_string());
    }
}

/// Strategy deciding step cadence and player eligibility.
pub trait SchedulePolicy {
    /// Whether the next `Step` transition may fire now.
    fn is_step_due(&self, world: &WorldModel, eligibility: &Eligibility) -> bool;

    /// Recomputes both eligibility sets from the current player roster.
    fn compute_eligibility(&mut self, world: &WorldModel, eligibility: &mut Eligibility);

    /// Lobby exit: initial eligibility and clock start.
    fn on_game_start(&mut self, world: &WorldModel, eligibility: &mut Eligibility);

    /// End of an `Output` cycle: advance the internal clock or pass the turn.
    fn on_cycle_end(&mut self, world: &WorldModel, eligibility: &mut Eligibility);
}

/// Time-stepped scheduling: a step every `period`, all players eligible.
#[derive(Debug)]
pub struct Continuous {
    period: Duration,
    next_step_deadline: Option<Instant>,
}

impl Continuous {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next_step_deadline: None,
        }
    }

    /// Convenience constructor matching the server's configuration surface:
    /// steps per second rather than a period.
    pub fn from_frequency(steps_per_second: u32) -> Self {
        Self::new(Duration::from_secs_f64(
            1.0 / f64::from(steps_per_second.max(1)),
        ))
    }
}

impl SchedulePolicy for Continuous {
    fn is_step_due(&self, _world: &WorldModel, _eligibility: &Eligibility) -> bool {
        match self.next_step_deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    fn compute_eligibility(&mut self, world: &WorldModel, eligibility: &mut Eligibility) {
        eligibility.grant_all(world);
    }

    fn on_game_start(&mut self, world: &WorldModel, eligibility: &mut Eligibility) {
        self.compute_eligibility(world, eligibility);
        self.next_step_deadline = Some(Instant::now() + self.period);
    }

    fn on_cycle_end(&mut self, world: &WorldModel, eligibility: &mut Eligibility) {
        self.compute_eligibility(world, eligibility);
        self.next_step_deadline = Some(Instant::now() + self.period);
    }
}

/// Turn-based scheduling: the player with the oldest `last_action_time`
/// holds the turn; earlier connection order breaks ties. The step fires
/// once the turn-holder has submitted a validated action for this turn.
#[derive(Debug, Default)]
pub struct TurnBased {
    /// Turn-holder and their `last_action_time` when the turn was computed.
    /// An advance past the baseline means they acted this turn.
    current_turn: Option<(String, Instant)>,
}

impl TurnBased {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_player(&self) -> Option<&str> {
        self.current_turn.as_ref().map(|(address, _)| address.as_str())
    }
}

impl SchedulePolicy for TurnBased {
    fn is_step_due(&self, world: &WorldModel, eligibility: &Eligibility) -> bool {
        if eligibility.can_act.len() != 1 {
            return false;
        }
        let Some((address, baseline)) = &self.current_turn else {
            return false;
        };
        world
            .find_player(address)
            .map(|record| record.last_action_time > *baseline)
            .unwrap_or(false)
    }

    fn compute_eligibility(&mut self, world: &WorldModel, eligibility: &mut Eligibility) {
        eligibility.clear();

        // Strict less-than keeps the earliest-connected player on ties.
        let mut next: Option<&crate::world::PlayerRecord> = None;
        for record in &world.players {
            let older = match next {
                Some(best) => record.last_action_time < best.last_action_time,
                None => true,
            };
            if older {
                next = Some(record);
            }
        }

        match next {
            Some(record) => {
                debug!("turn passes to {}", record.address);
                self.current_turn = Some((record.address.clone(), record.last_action_time));
                eligibility.grant_solo(&record.address);
            }
            None => {
                warn!("no players connected, could not determine the next turn");
                self.current_turn = None;
            }
        }
    }

    fn on_game_start(&mut self, world: &WorldModel, eligibility: &mut Eligibility) {
        self.compute_eligibility(world, eligibility);
    }

    fn on_cycle_end(&mut self, world: &WorldModel, eligibility: &mut Eligibility) {
        self.compute_eligibility(world, eligibility);
    }
}
