use clap::Parser;
use thiserror::Error;

/// Command line configuration for the game server.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[clap(author, version, about)]
pub struct Config {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    pub port: u16,
    /// Map width in cells, border included
    #[clap(long, default_value = "20")]
    pub width: usize,
    /// Map height in cells, border included
    #[clap(long, default_value = "20")]
    pub height: usize,
    /// Monsters spawned at startup
    #[clap(short, long, default_value = "5")]
    pub monsters: usize,
    /// Chance in percent that an interior cell is stone
    #[clap(long, default_value = "20")]
    pub stone_percent: u32,
    /// Outbound messages buffered per session before it is dropped
    #[clap(long, default_value = "256")]
    pub queue_capacity: usize,
    /// Events buffered on the hub control queue
    #[clap(long, default_value = "256")]
    pub hub_capacity: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("map must be at least 3x3, got {width}x{height}")]
    MapTooSmall { width: usize, height: usize },
    #[error("stone percent must be between 0 and 100, got {0}")]
    StonePercent(u32),
    #[error("{0} must be greater than zero")]
    ZeroCapacity(&'static str),
}

impl Config {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Rejects settings that would leave no room to play.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width < 3 || self.height < 3 {
            return Err(ConfigError::MapTooSmall {
                width: self.width,
                height: self.height,
            });
        }
        if self.stone_percent > 100 {
            return Err(ConfigError::StonePercent(self.stone_percent));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("queue capacity"));
        }
        if self.hub_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("hub capacity"));
        }
        Ok(())
    }
}
