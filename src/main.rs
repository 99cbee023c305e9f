use anyhow::{Context, Result};
use std::env;
use std::sync::Arc;

use multiview::session::testing::MockEmbedFactory;
use multiview::{
    layout, CapacityTier, EmbedFactory, SessionConfig, SessionDeps, SessionEvent, SessionHandle,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    match command {
        "layout" => {
            let count: usize = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("Slot count required"))?
                .parse()
                .context("Slot count must be a number")?;
            let grid = layout(count);

            if args.contains(&"--css".to_string()) {
                println!("grid-template-areas: {};", grid.template_areas());
                println!("grid-template-columns: {};", grid.template_columns());
                println!("grid-template-rows: {};", grid.template_rows());
            } else {
                println!("{}", serde_json::to_string_pretty(&grid)?);
            }
        }
        "simulate" => {
            let channels: Vec<&str> = args[2..]
                .iter()
                .map(|s| s.as_str())
                .take_while(|s| !s.starts_with("--"))
                .collect();
            let tier = match parse_arg(&args, "--tier") {
                Some("premium") => CapacityTier::Premium,
                Some("free") | None => CapacityTier::Free,
                Some(other) => anyhow::bail!("Unknown tier: {}", other),
            };
            let config = match parse_arg(&args, "--config") {
                Some(path) => SessionConfig::load_from_file(path)
                    .with_context(|| format!("Failed to load {}", path))?,
                None => SessionConfig::default(),
            };

            simulate(&channels, tier, config, parse_arg(&args, "--promote")).await?;
        }
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("sample");
            match subcommand {
                "sample" => {
                    println!("{}", toml::to_string_pretty(&SessionConfig::default())?);
                }
                "validate" => {
                    let path = args.get(3).map_or("multiview.toml", |v| v);
                    SessionConfig::load_from_file(path)
                        .map_err(|e| anyhow::anyhow!("{}", e))?;
                    println!("{} is valid", path);
                }
                _ => {
                    println!("Unknown config subcommand. Available: sample, validate");
                }
            }
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        _ => {
            println!("Unknown command: {}", command);
            println!();
            print_help();
        }
    }

    Ok(())
}

/// Drive a session against in-memory players and print what happened
async fn simulate(
    channels: &[&str],
    tier: CapacityTier,
    config: SessionConfig,
    promote: Option<&str>,
) -> Result<()> {
    let factory: Arc<dyn EmbedFactory> = Arc::new(MockEmbedFactory::new());
    let session = SessionHandle::create(tier, SessionDeps::new(factory), config).await?;
    let mut events = session.subscribe();

    for channel in channels {
        match session.add(channel).await {
            Ok(slots) => println!("+ {} ({} streams)", channel, slots.len()),
            Err(e) => println!("! {}: {}", channel, e),
        }
    }

    if let Some(channel) = promote {
        let slots = session.slots().await;
        let slot = slots
            .find_by_channel(channel)
            .ok_or_else(|| anyhow::anyhow!("Channel {} is not in the session", channel))?;
        session.promote_to_primary(slot.id).await?;
        println!("* {} promoted", channel);
    }

    session.settle().await;
    session.close().await;

    let mut ready = 0;
    let mut failed = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::EmbedReady { .. } => ready += 1,
            SessionEvent::EmbedFailed { .. } => failed += 1,
            _ => {}
        }
    }
    println!("Embeds: {} ready, {} failed", ready, failed);

    println!("{}", serde_json::to_string_pretty(&session.slots().await)?);
    println!("{}", serde_json::to_string_pretty(&session.placement().await)?);
    Ok(())
}

fn parse_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|pos| args.get(pos + 1))
        .map(|s| s.as_str())
}

/// Print help information
fn print_help() {
    println!("multiview");
    println!("Watch several live channels at once in a single grid");
    println!();
    println!("USAGE:");
    println!("    multiview <COMMAND> [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    layout <N>               Print the grid for N streams");
    println!("    simulate <CHANNEL>...    Build a session against in-memory players");
    println!("    config <SUBCOMMAND>      Configuration management (sample, validate)");
    println!("    help                     Show this help message");
    println!();
    println!("LAYOUT OPTIONS:");
    println!("    --css                    Print CSS grid properties instead of JSON");
    println!();
    println!("SIMULATE OPTIONS:");
    println!("    --tier TIER              free or premium (default: free)");
    println!("    --config PATH            Session configuration file");
    println!("    --promote CHANNEL        Promote a channel to primary after adding");
}
