use anyhow::Result;
use clap::{Parser, Subcommand};
use moneta_core::config::DEFAULT_BASE_URL;
use moneta_core::gateway::{AuthGateway, ReqwestExchange};
use moneta_core::storage::MemoryStore;
use moneta_core::stream::{ScriptedChunkSource, StreamEvent};
use moneta_core::{
    telemetry, ChatSession, ClientConfig, Credential, CredentialStore, SessionPhase, User,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "xtask", version, about = "Automation helpers for Moneta")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a lightweight smoke test that exercises the Moneta session core.
    Smoke,
}

fn main() -> Result<()> {
    telemetry::init_tracing(EnvFilter::new("info"))?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Smoke => smoke_test(),
    }
}

fn smoke_test() -> Result<()> {
    let runtime = Runtime::new()?;

    let credentials =
        CredentialStore::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()));
    credentials.set(
        &Credential {
            access_token: "smoke-access".into(),
            refresh_token: Some("smoke-refresh".into()),
        },
        &User {
            id: "smoke-user".into(),
            email: "smoke@example.com".into(),
            username: "smoke".into(),
            first_name: "Smoke".into(),
            last_name: "Test".into(),
            phone_number: None,
        },
        false,
    )?;

    let config = ClientConfig::from_base_url(DEFAULT_BASE_URL)?;
    let (gateway, _events) = AuthGateway::new(Arc::new(ReqwestExchange::new(&config)), credentials);

    let source = Arc::new(ScriptedChunkSource::new());
    source.enqueue(vec![
        StreamEvent::Chunk("Your grocery spending ".into()),
        StreamEvent::Chunk("is on track this month.".into()),
        StreamEvent::Complete,
    ]);
    let session = ChatSession::new(gateway, source);

    runtime.block_on(async {
        session.send("ping from xtask").await?;
        while session.phase() != SessionPhase::Idle {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        Ok::<_, anyhow::Error>(())
    })?;

    let turns = session.turns();
    info!(
        "turns" = turns.len(),
        "reply" = turns.last().map(|turn| turn.text.as_str()).unwrap_or(""),
        "smoke test conversation finished"
    );

    Ok(())
}
