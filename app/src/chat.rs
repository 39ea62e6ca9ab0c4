use anyhow::{bail, Result};
use moneta_core::{
    ChatSession, ClientError, ConversationTurn, SessionEvent, SessionPhase, TurnRole, TurnStatus,
};
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::sleep;
use tracing::debug;

pub fn render_turn(turn: &ConversationTurn) -> String {
    let badge = match turn.role {
        TurnRole::User => "you",
        TurnRole::Assistant => "moneta",
    };
    match turn.status {
        TurnStatus::Failed => format!("{badge}> {} [failed]", turn.text),
        _ => format!("{badge}> {}", turn.text),
    }
}

/// Line-oriented chat loop. Streams the assistant reply to stdout as chunks
/// arrive; `/reset`, `/stats` and `/quit` are handled locally.
pub async fn run(
    session: &ChatSession,
    events: &mut UnboundedReceiver<SessionEvent>,
) -> Result<()> {
    match session.load_history().await {
        Ok(count) if count > 0 => {
            for turn in session.turns() {
                println!("{}", render_turn(&turn));
            }
        }
        Ok(_) => {}
        Err(ClientError::SessionExpired) => bail!("session expired; sign in again"),
        Err(err) => debug!(%err, "could not load history"),
    }

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        print!("you> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                session.reset().await?;
                println!("(session cleared)");
                continue;
            }
            "/stats" => {
                let stats = session.stats().await?;
                println!(
                    "({} messages, last activity {})",
                    stats.total_messages, stats.last_activity
                );
                continue;
            }
            _ => {}
        }

        match session.send(input).await {
            Ok(true) => {}
            Ok(false) => {
                println!("(still streaming the previous reply)");
                continue;
            }
            Err(ClientError::Validation(reason)) => {
                println!("({reason})");
                continue;
            }
            Err(err) => return Err(err.into()),
        }

        print!("moneta> ");
        std::io::stdout().flush()?;
        stream_reply(session).await?;

        while let Ok(event) = events.try_recv() {
            match event {
                SessionEvent::Expired => bail!("session expired; sign in again"),
                SessionEvent::TurnCompleted { .. } => {
                    if let Ok(stats) = session.stats().await {
                        debug!(total = stats.total_messages, "session stats refreshed");
                    }
                }
            }
        }
    }

    Ok(())
}

/// Poll the in-progress assistant turn and print whatever text arrived since
/// the last tick, until the session returns to idle.
async fn stream_reply(session: &ChatSession) -> Result<()> {
    let mut printed = 0usize;
    loop {
        let turns = session.turns();
        let Some(turn) = turns
            .iter()
            .rev()
            .find(|turn| turn.role == TurnRole::Assistant)
        else {
            break;
        };
        if turn.text.len() > printed {
            print!("{}", &turn.text[printed..]);
            std::io::stdout().flush()?;
            printed = turn.text.len();
        }
        match turn.status {
            TurnStatus::Failed => {
                println!("\n[error: failed to get response]");
                break;
            }
            TurnStatus::Complete => {
                println!();
                break;
            }
            _ => {}
        }
        if session.phase() == SessionPhase::Idle {
            println!();
            break;
        }
        sleep(Duration::from_millis(40)).await;
    }
    Ok(())
}
