use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;

use nowcast_core::{
    Config, ErrorKind, IpLocator, LocationWeatherResolver, ProviderId, ResolutionState,
    WeatherSnapshot,
    provider::provider_from_config,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "nowcast", version, about = "Current-location weather CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show current conditions at your current location.
    Show {
        /// Provider short name, e.g. "openmeteo" or "openweather".
        #[arg(long)]
        provider: Option<String>,

        /// Seconds to wait for a position.
        #[arg(long)]
        locate_timeout: Option<u64>,

        /// Seconds to wait for the weather provider's answer.
        #[arg(long)]
        fetch_timeout: Option<u64>,
    },

    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name, e.g. "openmeteo" or "openweather".
        provider: String,
    },

    /// List known providers and their configuration status.
    Providers,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Show { provider, locate_timeout, fetch_timeout } => {
                show(provider, locate_timeout, fetch_timeout).await
            }
            Command::Configure { provider } => configure(&provider),
            Command::Providers => providers(),
        }
    }
}

async fn show(
    provider: Option<String>,
    locate_timeout: Option<u64>,
    fetch_timeout: Option<u64>,
) -> Result<()> {
    let config = Config::load()?;

    let id = match provider {
        Some(name) => ProviderId::try_from(name.as_str())?,
        None => config.default_provider_id()?,
    };
    let weather = provider_from_config(id, &config)?;
    tracing::debug!(provider = %id, "using weather provider");

    let mut timeouts = config.timeouts;
    if let Some(secs) = locate_timeout {
        timeouts.locate_secs = secs;
    }
    if let Some(secs) = fetch_timeout {
        timeouts.fetch_secs = secs;
    }

    let locator = IpLocator::new().context("Failed to set up geolocation")?;
    let resolver = Arc::new(LocationWeatherResolver::new(
        Arc::new(locator),
        Arc::from(weather),
        timeouts,
    ));

    // Narrate transitions while the attempt is pending.
    let mut state_rx = resolver.subscribe();
    let progress = tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = state_rx.borrow_and_update().clone();
            match state {
                ResolutionState::Locating => eprintln!("Locating you..."),
                ResolutionState::Fetching => eprintln!("Fetching current conditions..."),
                _ => {}
            }
        }
    });

    let result = tokio::select! {
        res = resolver.resolve() => res,
        _ = tokio::signal::ctrl_c() => {
            resolver.cancel();
            Err(ErrorKind::Cancelled)
        }
    };
    progress.abort();

    match result {
        Ok(snapshot) => {
            print_snapshot(&snapshot);
            Ok(())
        }
        Err(ErrorKind::Cancelled) => {
            eprintln!("Cancelled.");
            Ok(())
        }
        Err(kind) => {
            eprintln!("{}", kind.user_message());
            Err(anyhow::Error::new(kind))
        }
    }
}

fn print_snapshot(snapshot: &WeatherSnapshot) {
    let observed_local = snapshot
        .observation_time
        .with_timezone(&chrono::Local)
        .format("%H:%M");

    println!("{} - {}", snapshot.location_name, snapshot.condition);
    println!(
        "  temperature  {:.1} C (feels like {:.1} C)",
        snapshot.temperature_c, snapshot.feels_like_c
    );
    println!("  humidity     {}%", snapshot.humidity_pct);
    println!("  wind         {:.1} m/s", snapshot.wind_speed_mps);
    println!("  observed     {} (via {})", observed_local, snapshot.provider);
}

fn configure(provider: &str) -> Result<()> {
    let id = ProviderId::try_from(provider)?;
    let mut config = Config::load()?;

    if id.is_keyless() {
        println!("Provider '{id}' needs no API key.");
        config.set_default_provider(id);
        config.save()?;
        println!("Set '{id}' as the default provider.");
        return Ok(());
    }

    let api_key = inquire::Password::new("API key:")
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;

    let other_default_exists = config.default_provider.is_some()
        && config.default_provider.as_deref() != Some(id.as_str());
    config.upsert_provider_api_key(id, api_key);

    if other_default_exists {
        let make_default = inquire::Confirm::new(&format!("Make '{id}' the default provider?"))
            .with_default(false)
            .prompt()
            .context("Failed to read answer")?;

        if make_default {
            config.set_default_provider(id);
        }
    }

    config.save()?;
    println!(
        "Saved API key for '{id}' to {}",
        Config::config_file_path()?.display()
    );

    Ok(())
}

fn providers() -> Result<()> {
    let config = Config::load()?;
    let default = config.default_provider_id()?;

    for id in ProviderId::all() {
        let status = if id.is_keyless() {
            "no key needed"
        } else if config.is_provider_configured(*id) {
            "configured"
        } else {
            "no API key"
        };
        let marker = if *id == default { "  (default)" } else { "" };

        println!("{:<12} {status}{marker}", id.as_str());
    }

    Ok(())
}
