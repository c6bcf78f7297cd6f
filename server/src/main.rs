use clap::Parser;
use log::{error, info};
use server::config::Config;
use server::grid::Grid;
use server::hub::Hub;
use server::network::Server;
use server::world::{Broadcaster, World};
use std::sync::Arc;

/// Main-method of the application.
/// Parses command-line arguments, builds the world, then runs the hub and the
/// WebSocket server until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    config.validate()?;

    let grid = Grid::generate(
        config.width,
        config.height,
        config.stone_percent,
        &mut rand::thread_rng(),
    );
    let world = Arc::new(World::new(grid));

    // The world only keeps a weak handle, so `broadcaster` must outlive the run.
    let (hub, hub_handle) = Hub::new(Arc::clone(&world), config.hub_capacity);
    let broadcaster: Arc<dyn Broadcaster> = Arc::new(hub_handle.clone());
    world.attach_broadcaster(&broadcaster);
    let hub_task = tokio::spawn(hub.run());

    let spawned = world.spawn_initial_monsters(config.monsters).await;
    info!(
        "World ready: {}x{} map, {} monsters",
        config.width, config.height, spawned
    );
    info!("Map:\n{}", world.render().await);

    let server = Server::bind(&config.address(), Arc::clone(&world), hub_handle, config.queue_capacity).await?;

    tokio::select! {
        _ = server.run() => {
            error!("Accept loop ended unexpectedly");
        }
        result = hub_task => {
            if let Err(e) = result {
                error!("Hub task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    drop(broadcaster);
    Ok(())
}
