//! # kfchess-server — Authoritative simulation server for Kung Fu Chess
//!
//! A tick-driven, real-time variant of chess where every player moves
//! simultaneously subject to per-piece cooldowns rather than taking turns.
//! This binary hosts the lobby/matchmaking layer and the per-game simulation
//! actors over two WebSocket endpoints, plus a CLI for running the server
//! and inspecting replay storage.
//!
//! ## Architecture
//!
//! - **`model`** — board, piece, move and game-state types, plus the
//!   per-`Speed` tick-rate/cooldown constants.
//! - **`movegen`/`collision`** — per-piece-kind legal destination
//!   generation and the continuous-motion collision resolver.
//! - **`engine`** — the pure `tick`/`apply_move`/`set_ready` state
//!   transitions.
//! - **`ai`** — the bot driver contract and the baseline random mover.
//! - **`replay`** — the recorded-move format and its playback engine.
//! - **`lobby`** — pre-game matchmaking: codes, seats, readiness, settings.
//! - **`transport`** — the channel-based WebSocket fan-out hub.
//! - **`protocol`** — the wire JSON exchanged with clients.
//! - **`session`** — the per-game actor driving `engine::tick` on a timer.
//! - **`storage`** — JSON+zstd replay persistence (active/archive tiers).
//! - **`ws`** — the two WebSocket upgrade handlers tying it all together.
//!
//! ## Usage
//!
//! ```bash
//! # Start the server (default: http://0.0.0.0:8080)
//! kfchess-server serve
//!
//! # Inspect what's on disk
//! kfchess-server storage-stats --data-dir data
//! ```

pub mod ai;
pub mod collision;
pub mod engine;
pub mod lobby;
pub mod model;
pub mod movegen;
pub mod protocol;
pub mod replay;
pub mod session;
pub mod storage;
pub mod transport;
pub mod ws;

use actix::Actor;
use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::lobby::{LobbyManager, LobbyManagerActor};
use crate::session::GameSession;
use crate::storage::ReplayStorage;
use crate::transport::Hub;

/// kfchess-server — real-time simultaneous-movement chess.
#[derive(Parser, Debug)]
#[command(name = "kfchess-server")]
#[command(about = "Authoritative simulation server for Kung Fu Chess")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the lobby + game WebSocket server.
    Serve {
        #[arg(short, long, default_value_t = 8080)]
        port: u16,

        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Directory for replay storage (active + archive).
        #[arg(long, default_value = "data")]
        data_dir: String,
    },

    /// Print replay storage counts and on-disk size.
    StorageStats {
        #[arg(long, default_value = "data")]
        data_dir: String,
    },
}

/// Shared state handed to every request/WS handler (spec §4.8 "Transport
/// layer" owns no game state itself; this is the registry it's built atop).
pub struct AppState {
    pub lobby_manager: Arc<Mutex<LobbyManager>>,
    pub lobby_manager_actor: actix::Addr<LobbyManagerActor>,
    pub hub: actix::Addr<Hub>,
    pub storage: Arc<ReplayStorage>,
    pub games: Mutex<HashMap<String, actix::Addr<GameSession>>>,
    /// `lobby code -> (identity -> session id)`, so a `StartGame` handler
    /// can privately deliver each occupant's freshly minted game key
    /// (spec §4.7) without broadcasting it to the rest of the lobby.
    pub lobby_session_ids: Mutex<HashMap<String, HashMap<String, uuid::Uuid>>>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, host, data_dir } => run_server(&host, port, &data_dir).await,
        Commands::StorageStats { data_dir } => {
            let storage = ReplayStorage::new(&data_dir)?;
            match storage.stats() {
                Ok(stats) => {
                    println!(
                        "active: {} ({} bytes) archived: {} ({} bytes) total: {} bytes",
                        stats.active_count, stats.active_bytes, stats.archived_count, stats.archive_bytes, stats.total_bytes
                    );
                    Ok(())
                }
                Err(e) => Err(std::io::Error::other(e)),
            }
        }
    }
}

/// Starts the HTTP + WebSocket server with the lobby and game routes.
async fn run_server(host: &str, port: u16, data_dir: &str) -> std::io::Result<()> {
    let storage = Arc::new(ReplayStorage::new(data_dir)?);
    let lobby_manager = Arc::new(Mutex::new(LobbyManager::new()));
    let lobby_manager_actor = LobbyManagerActor(lobby_manager.clone()).start();
    let hub = Hub::new().start();

    let app_state = web::Data::new(AppState {
        lobby_manager,
        lobby_manager_actor,
        hub,
        storage,
        games: Mutex::new(HashMap::new()),
        lobby_session_ids: Mutex::new(HashMap::new()),
    });

    log::info!("starting kfchess-server on {host}:{port}");
    log::info!("replay storage directory: {data_dir}");
    log::info!("lobby endpoint: ws://{host}:{port}/ws/lobby");
    log::info!("game endpoint: ws://{host}:{port}/ws/game/{{game_id}}");

    HttpServer::new(move || {
        let cors = Cors::default().allow_any_origin().allow_any_method().allow_any_header().max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(app_state.clone())
            .route("/ws/lobby", web::get().to(ws::lobby_ws))
            .route("/ws/game/{game_id}", web::get().to(ws::game_ws))
    })
    .bind((host, port))?
    .run()
    .await
}
