//! Demo binary: a random tic-tac-toe bot over UDP loopback.
//!
//! Pairs with the demo server: run the server first, then two bots with
//! opposite marks (1 and -1). Each update carries the grid in the `state`
//! attribute; the bot plays a uniformly random empty cell.

use clap::Parser;
use log::warn;
use rand::seq::SliceRandom;
use serde_json::{json, Map, Value};

use player::{Player, PlayerLogic};
use shared::transport::UdpEndpoint;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server address to connect to
    #[arg(short, long, default_value = "127.0.0.1:7400")]
    server: String,

    /// Local address to bind the player transport to
    #[arg(short, long, default_value = "127.0.0.1:0")]
    bind: String,

    /// Mark to play with (1 for crosses, -1 for noughts)
    #[arg(short, long, default_value = "1")]
    mark: i64,
}

struct RandomBot;

/// Collects the `[row, col]` coordinates of every empty cell in the grid.
fn empty_cells(grid: &Value) -> Vec<(usize, usize)> {
    let mut cells = Vec::new();
    let Some(rows) = grid.as_array() else {
        return cells;
    };
    for (row, columns) in rows.iter().enumerate() {
        let Some(columns) = columns.as_array() else {
            continue;
        };
        for (col, slot) in columns.iter().enumerate() {
            if slot.as_i64() == Some(0) {
                cells.push((row, col));
            }
        }
    }
    cells
}

impl PlayerLogic for RandomBot {
    fn decide_action(&mut self, projection: &Map<String, Value>) -> Value {
        let grid = projection.get("state").cloned().unwrap_or(Value::Null);
        let cells = empty_cells(&grid);
        match cells.choose(&mut rand::thread_rng()) {
            Some((row, col)) => json!([row, col]),
            None => {
                warn!("no empty cell left to play");
                json!([0, 0])
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let transport = UdpEndpoint::bind(&args.bind).await?;

    let mut attributes = Map::new();
    attributes.insert("mark".to_string(), json!(args.mark));

    let mut bot = Player::new(transport, args.server, attributes, RandomBot);
    bot.run().await;

    Ok(())
}
