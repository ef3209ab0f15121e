use amelia::config::Config;
use amelia::logging;
use amelia::whatsapp::{
    Bootstrapper, ConsolePrompt, Connector, CredentialStore, Dispatcher, Outcome,
    ReconnectPolicy, Supervisor, VersionSource,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "amelia", version, about = "Minimal WhatsApp bot")]
struct Cli {
    /// Config file (defaults to ~/.amelia/config.toml)
    #[arg(short, long, env = "AMELIA_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the linked session
    #[arg(long)]
    session_dir: Option<PathBuf>,

    /// Phone number to pair with, skipping the interactive prompt
    #[arg(long, env = "AMELIA_PHONE")]
    phone: Option<String>,

    /// Log filter, e.g. `debug` or `amelia=trace`
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Connect and answer messages (default)
    Run,
    /// Forget the linked session
    Logout,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(dir) = cli.session_dir {
        config.session.dir = dir;
    }
    if let Some(phone) = cli.phone {
        config.session.phone_number = Some(phone);
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    let _log_guard = logging::init(&config.logging)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Logout => logout(&config).await,
        Commands::Config => {
            print!("{}", config.to_toml().context("Failed to render configuration")?);
            Ok(())
        }
    }
}

#[cfg(feature = "whatsapp")]
fn connector() -> Result<Arc<dyn Connector>> {
    Ok(Arc::new(amelia::whatsapp::WaConnector::new()))
}

#[cfg(not(feature = "whatsapp"))]
fn connector() -> Result<Arc<dyn Connector>> {
    anyhow::bail!("amelia was built without the `whatsapp` feature; rebuild with `--features whatsapp`")
}

async fn run(config: Config) -> Result<()> {
    let connector = connector()?;
    let store = CredentialStore::open(&config.session.dir)
        .await
        .with_context(|| format!("Failed to open session directory {:?}", config.session.dir))?;

    tracing::info!(
        "Starting {} (session: {})",
        config.bot.name,
        config.session.dir.display()
    );

    let bootstrapper = Bootstrapper::new(
        store,
        connector,
        Arc::new(ConsolePrompt),
        VersionSource::Manifest(config.version.clone()),
        config.session.browser.clone(),
    )
    .with_phone_number(config.session.phone_number.clone());

    let shutdown = CancellationToken::new();
    let on_ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, shutting down");
            on_ctrl_c.cancel();
        }
    });

    let supervisor = Supervisor::new(
        bootstrapper,
        Dispatcher::new(config.bot.greeting.clone()),
        ReconnectPolicy::from_config(&config.reconnect),
    )
    .with_cancellation(shutdown)
    .print_qr(config.session.print_qr)
    .clear_session_on_logout(config.session.clear_session_on_logout);

    match supervisor.run().await? {
        Outcome::Stopped => Ok(()),
        Outcome::LoggedOut => {
            anyhow::bail!("WhatsApp session logged out; run again to link a new device")
        }
        Outcome::Exhausted { attempts } => {
            anyhow::bail!("Could not reconnect to WhatsApp after {} attempt(s)", attempts)
        }
    }
}

async fn logout(config: &Config) -> Result<()> {
    let store = CredentialStore::open(&config.session.dir).await?;
    store.clear().await?;
    println!("Session in {} cleared.", config.session.dir.display());
    Ok(())
}
