use std::io::Read;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sage_domain::config::Config;
use sage_hooks::HookStateStore;

mod capture;
mod input;
mod stop;

use input::HookInput;

#[derive(Parser)]
#[command(name = "sage-hook", about = "Host-invoked capture hooks for the sage memory service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record a pre-tool event. Always exits 0.
    Pre,
    /// Record a post-tool event. Always exits 0.
    Post,
    /// Assemble and persist the finished turn.
    Stop,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::from_env();

    let mut raw = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut raw) {
        tracing::error!(error = %e, "failed to read stdin");
        std::process::exit(match cli.command {
            Command::Stop => stop::EXIT_FAIL_FAST,
            _ => 0,
        });
    }

    match cli.command {
        Command::Pre => {
            run_capture(&raw, &config, capture::run_pre);
        }
        Command::Post => {
            run_capture(&raw, &config, capture::run_post);
        }
        Command::Stop => {
            let code = stop::run_stop(&raw, &config).await;
            std::process::exit(code);
        }
    }
}

/// Capture hooks never block the assistant: errors are logged, the
/// exit code stays 0.
fn run_capture(raw: &str, config: &Config, run: fn(HookInput, &HookStateStore)) {
    let Some(input) = HookInput::from_raw(raw) else {
        tracing::warn!("empty hook input");
        return;
    };
    match HookStateStore::open(config.hooks.state_dir.clone()) {
        Ok(store) => run(input, &store),
        Err(e) => tracing::error!(error = %e, "hook state unavailable"),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
