use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sage_domain::config::Config;
use sage_server::ServiceContainer;

#[derive(Parser)]
#[command(name = "sage-mcp", about = "Conversational-memory tool server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve JSON-RPC over stdio (the canonical transport).
    Serve,
    /// Serve the HTTP POST surface instead of stdio.
    Http,
    /// Validate the environment-derived configuration and exit.
    ConfigCheck,
    /// Print the version.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to stdio serving when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing(false);
            let container = Arc::new(ServiceContainer::new(Config::from_env()));
            sage_server::stdio::run(container).await?;
            Ok(())
        }
        Some(Command::Http) => {
            init_tracing(true);
            let container = Arc::new(ServiceContainer::new(Config::from_env()));
            sage_server::http::serve(container).await
        }
        Some(Command::ConfigCheck) => {
            let config = Config::from_env();
            let issues = config.validate();
            for issue in &issues {
                eprintln!("{issue}");
            }
            if Config::has_errors(&issues) {
                std::process::exit(1);
            }
            println!("configuration ok");
            Ok(())
        }
        Some(Command::Version) => {
            println!("sage-mcp {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// stdout belongs to the stdio protocol, so logs always go to
/// stderr; the HTTP surface gets JSON-formatted lines.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sage_server=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
