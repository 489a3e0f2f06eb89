//! fakedeck — entry point.
//!
//! ```text
//! fakedeck                    Run with fakedeck.toml (or defaults)
//! fakedeck --config <path>    Load a custom config TOML
//! fakedeck --gen-config       Write default config to stdout
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use deck_core::{Deck, DeckServer, MediaDeck, MediaEngine, Pusher, SimulatedEngine, Slot, RATE_60_DF};
use fakedeck::config::DeckConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "fakedeck", about = "Broadcast video deck emulator")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "fakedeck.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&DeckConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let config = DeckConfig::load(&cli.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("fakedeck v{}", env!("CARGO_PKG_VERSION"));
    info!("model: {}", config.deck.model);
    info!("port: {}", config.network.port);
    info!("slots path: {}", config.deck.slots_path.display());

    let engine = SimulatedEngine::new(Duration::from_secs(config.engine.default_clip_secs));
    let pusher = Pusher::new();
    let deck = MediaDeck::new(
        config.deck.model,
        config.deck.video_format,
        Arc::clone(&engine) as Arc<dyn MediaEngine>,
        None,
        RATE_60_DF,
        pusher.clone(),
    );

    // Each slot mounts slots_path/<id>; a missing directory leaves
    // that slot unattached rather than aborting startup.
    for id in 1..=config.deck.num_slots {
        let dir = config.deck.slots_path.join(id.to_string());
        match Slot::mount(id, dir, Arc::clone(&engine) as Arc<dyn MediaEngine>, RATE_60_DF).await {
            Ok(slot) => deck.attach_slot(slot).await?,
            Err(e) => warn!(slot = id, "slot not mounted: {e}"),
        }
    }

    deck.power_on().await?;

    let server = DeckServer::bind(
        Arc::clone(&deck) as Arc<dyn Deck>,
        config.network.port,
        pusher,
    )
    .await?;

    // Ctrl-C handler.
    let shutdown_server = Arc::clone(&server);
    let shutdown_deck = Arc::clone(&deck);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received — shutting down");
        // Tear down the client session before the transport so no
        // push races a deck that is already going away.
        shutdown_server.stop().await;
        shutdown_deck.power_off().await;
    });

    server.run().await;

    Ok(())
}
