use anyhow::Result;
use clap::{Parser, Subcommand};
use moneta_core::gateway::ReqwestExchange;
use moneta_core::storage::{default_credential_root, FileStore, MemoryStore};
use moneta_core::stream::SseChunkSource;
use moneta_core::{
    telemetry, AuthGateway, ChatSession, ClientConfig, CredentialStore, LoginRequest,
    RegisterRequest, SessionEvent,
};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

mod chat;

#[derive(Parser, Debug)]
#[command(name = "Moneta", version, about = "Chat client for the Moneta finance assistant")]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Backend base URL, overriding moneta.yaml.
    #[arg(long)]
    server: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the credential.
    Login {
        username_or_email: String,
        /// Keep the credential across restarts.
        #[arg(long)]
        remember: bool,
    },
    /// Create an account and sign in.
    Register {
        email: String,
        first_name: String,
        last_name: String,
        #[arg(long)]
        phone: Option<String>,
    },
    /// Interactive chat with the assistant.
    Chat,
    /// Print the server-side transcript.
    History,
    /// Show session statistics.
    Stats,
    /// Drop the server-side chat session.
    Reset,
    /// Sign out and clear stored credentials.
    Logout,
    /// Show the signed-in profile.
    Whoami,
}

struct Client {
    gateway: AuthGateway,
    session: ChatSession,
    events: UnboundedReceiver<SessionEvent>,
}

fn build_client(config: &ClientConfig) -> Client {
    let credentials = CredentialStore::new(
        Arc::new(FileStore::new(default_credential_root())),
        Arc::new(MemoryStore::new()),
    );
    let exchange = ReqwestExchange::new(config);
    let http = exchange.client();
    let (gateway, events) = AuthGateway::new(Arc::new(exchange), credentials.clone());
    let source = SseChunkSource::new(http, config, credentials);
    let session = ChatSession::new(gateway.clone(), Arc::new(source));
    Client {
        gateway,
        session,
        events,
    }
}

fn prompt_password() -> Result<String> {
    print!("Password: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn main() -> Result<()> {
    telemetry::init_tracing(EnvFilter::from_default_env())?;

    let cli = Cli::parse();
    let config = match &cli.server {
        Some(server) => ClientConfig::from_base_url(server),
        None => ClientConfig::load(),
    }
    .map_err(|err| anyhow::anyhow!(err.user_message()))?;

    let runtime = Runtime::new()?;
    let mut client = build_client(&config);

    match cli.command {
        Command::Login {
            username_or_email,
            remember,
        } => {
            let password = prompt_password()?;
            let user = runtime.block_on(client.gateway.login(
                LoginRequest {
                    username_or_email,
                    password,
                },
                remember,
            ))?;
            println!("Signed in as {} {}", user.first_name, user.last_name);
            if !remember {
                println!("Credential is session-scoped; pass --remember to keep it.");
            }
        }
        Command::Register {
            email,
            first_name,
            last_name,
            phone,
        } => {
            let password = prompt_password()?;
            let user = runtime.block_on(client.gateway.register(RegisterRequest {
                email,
                password,
                first_name,
                last_name,
                phone_number: phone,
            }))?;
            println!("Welcome, {} {}", user.first_name, user.last_name);
        }
        Command::Chat => {
            runtime.block_on(chat::run(&client.session, &mut client.events))?;
        }
        Command::History => {
            runtime.block_on(client.session.load_history())?;
            for turn in client.session.turns() {
                println!("{}", chat::render_turn(&turn));
            }
        }
        Command::Stats => {
            let stats = runtime.block_on(client.session.stats())?;
            println!(
                "{} messages, session {}, last activity {}",
                stats.total_messages,
                if stats.session_active {
                    "active"
                } else {
                    "inactive"
                },
                stats.last_activity
            );
        }
        Command::Reset => {
            runtime.block_on(client.session.reset())?;
            println!("Chat session cleared.");
        }
        Command::Logout => {
            runtime.block_on(client.gateway.logout())?;
            println!("Signed out.");
        }
        Command::Whoami => {
            let user = runtime.block_on(client.gateway.fetch_profile())?;
            println!(
                "{} {} <{}> ({})",
                user.first_name, user.last_name, user.email, user.username
            );
        }
    }

    Ok(())
}
