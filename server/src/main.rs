//! Demo binary: a turn-based tic-tac-toe server over UDP loopback.
//!
//! Players connect with a `mark` attribute (1 for crosses, -1 for noughts)
//! and submit `[row, col]` actions; the grid travels back to each player in
//! its `state` attribute.

use clap::Parser;
use log::info;
use serde_json::{json, Map, Value};

use server::{GameLogic, Server, ServerConfig, TurnBased, WorldModel};
use shared::transport::UdpEndpoint;

const GRID_KEY: &str = "grid";

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to bind the server transport to
    #[arg(short = 'H', long, default_value = "127.0.0.1:7400")]
    host: String,

    /// Players to wait for before starting
    #[arg(short, long, default_value = "2")]
    players: usize,
}

fn empty_grid() -> Value {
    json!([[0, 0, 0], [0, 0, 0], [0, 0, 0]])
}

/// Parses a `[row, col]` action into grid coordinates.
fn cell(action: &Value) -> Option<(usize, usize)> {
    let row = action.get(0)?.as_u64()? as usize;
    let col = action.get(1)?.as_u64()? as usize;
    (row < 3 && col < 3).then_some((row, col))
}

fn at(grid: &Value, row: usize, col: usize) -> i64 {
    grid.get(row)
        .and_then(|r| r.get(col))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

fn has_winning_line(grid: &Value, mark: i64) -> bool {
    for i in 0..3 {
        if (0..3).all(|j| at(grid, i, j) == mark) || (0..3).all(|j| at(grid, j, i) == mark) {
            return true;
        }
    }
    (0..3).all(|i| at(grid, i, i) == mark) || (0..3).all(|i| at(grid, i, 2 - i) == mark)
}

fn grid_full(grid: &Value) -> bool {
    (0..3).all(|row| (0..3).all(|col| at(grid, row, col) != 0))
}

struct TicTacToe;

impl GameLogic for TicTacToe {
    fn step(&mut self, world: &mut WorldModel) {
        let Some(action) = world.last_action_performed.clone() else {
            return;
        };
        let Some(address) = world.last_action_player.clone() else {
            return;
        };
        let Some((row, col)) = cell(&action) else {
            return;
        };

        let mark = world
            .find_player(&address)
            .and_then(|record| record.attributes.get("mark"))
            .and_then(Value::as_i64)
            .unwrap_or(0);

        if let Some(slot) = world
            .data
            .get_mut(GRID_KEY)
            .and_then(|grid| grid.get_mut(row))
            .and_then(|r| r.get_mut(col))
        {
            *slot = json!(mark);
        }

        let grid = world.data.get(GRID_KEY).cloned().unwrap_or_else(empty_grid);
        info!("grid after {}'s move: {}", address, grid);
        for record in &mut world.players {
            record.attributes.insert("state".to_string(), grid.clone());
        }
    }

    fn end_condition(&self, world: &WorldModel) -> bool {
        let Some(grid) = world.data.get(GRID_KEY) else {
            return false;
        };
        for mark in [1i64, -1] {
            if has_winning_line(grid, mark) {
                let winner = world
                    .players
                    .iter()
                    .find(|p| p.attributes.get("mark").and_then(Value::as_i64) == Some(mark));
                match winner {
                    Some(record) => info!("player {} won", record.address),
                    None => info!("mark {} won", mark),
                }
                return true;
            }
        }
        if grid_full(grid) {
            info!("the game ended in a draw");
            return true;
        }
        false
    }

    fn is_action_valid(&self, world: &WorldModel, action: &Value) -> bool {
        let Some((row, col)) = cell(action) else {
            return false;
        };
        world
            .data
            .get(GRID_KEY)
            .map(|grid| at(grid, row, col) == 0)
            .unwrap_or(false)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let transport = UdpEndpoint::bind(&args.host).await?;

    let mut game_state = Map::new();
    game_state.insert(GRID_KEY.to_string(), empty_grid());

    let mut player_attributes = Map::new();
    player_attributes.insert("mark".to_string(), Value::Null);
    player_attributes.insert("state".to_string(), empty_grid());

    let config = ServerConfig {
        game_state,
        player_attributes,
        start_at_players: Some(args.players),
        ..Default::default()
    };

    let mut server = Server::new(transport, config, Box::new(TurnBased::new()), TicTacToe);
    server.run().await;

    Ok(())
}
