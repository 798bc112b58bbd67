use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use suswords::api::HttpGameApi;
use suswords::config::ClientConfig;
use suswords::presenter::UiEvent;
use suswords::session::{Session, SessionEnd, SessionHandle};
use suswords::types::{SessionIdentity, VoteDirection};

const USAGE: &str = "usage: suswords <GAME_ID> <PLAYER_ID> (or SUSWORDS_GAME_ID / SUSWORDS_PLAYER_ID)";

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "suswords=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Some(identity) = identity_from_args() else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };

    let config = ClientConfig::from_env();
    tracing::info!("Connecting to {}", config.base_url);

    let api = match HttpGameApi::new(config.base_url.clone(), config.request_timeout) {
        Ok(api) => Arc::new(api),
        Err(e) => {
            eprintln!("Failed to set up HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let (ui_tx, ui_rx) = mpsc::unbounded_channel();
    let render = tokio::spawn(render(ui_rx));

    let session = match Session::start(api, identity, config, ui_tx).await {
        Ok(session) => session,
        Err(e) => {
            // The fatal event is already queued for the renderer
            let _ = render.await;
            tracing::error!("Could not start session: {}", e);
            std::process::exit(1);
        }
    };

    let end = drive(session).await;
    let _ = render.await;

    match end {
        SessionEnd::Finished(_) => tracing::info!("Game over"),
        SessionEnd::Removed => tracing::info!("Removed from game"),
        SessionEnd::Left => tracing::info!("Left game"),
    }
}

fn identity_from_args() -> Option<SessionIdentity> {
    let mut args = std::env::args().skip(1);
    let game_id = args
        .next()
        .or_else(|| std::env::var("SUSWORDS_GAME_ID").ok())?;
    let player_id = args
        .next()
        .or_else(|| std::env::var("SUSWORDS_PLAYER_ID").ok())?;

    let (game_id, player_id) = (game_id.trim(), player_id.trim());
    if game_id.is_empty() || player_id.is_empty() {
        return None;
    }
    Some(SessionIdentity::new(game_id, player_id))
}

/// Read commands from stdin until the session ends or the user quits
async fn drive(session: SessionHandle) -> SessionEnd {
    print_help();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = session.closed() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Failed to read stdin: {}", e);
                    break;
                }
            },
        };

        let mut parts = line.split_whitespace();
        let result = match (parts.next(), parts.next()) {
            (Some("sus"), Some(suspect)) => session.start_vote(suspect).await,
            (Some("up"), None) => session.cast_vote(VoteDirection::Up).await,
            (Some("down"), None) => session.cast_vote(VoteDirection::Down).await,
            (Some("word"), Some(word)) => session.submit_word(word).await,
            (Some("sync"), None) => session.resync().await,
            (Some("quit"), None) => {
                if let Some(warning) = session.leave_warning().await {
                    println!("! {} Type 'quit!' to leave anyway.", warning);
                    continue;
                }
                break;
            }
            (Some("quit!"), None) => break,
            (Some("help"), None) => {
                print_help();
                continue;
            }
            (None, _) => continue,
            _ => {
                println!("? unknown command, type 'help'");
                continue;
            }
        };

        if let Err(e) = result {
            println!("✗ {}", e);
        }
    }

    if session.is_finished() {
        session.wait().await
    } else {
        session.shutdown().await
    }
}

fn print_help() {
    println!("commands: sus <player_id> | up | down | word <word> | sync | quit | help");
}

/// Print UI events until the session drops its sender
async fn render(mut events: mpsc::UnboundedReceiver<UiEvent>) {
    while let Some(event) = events.recv().await {
        let ts = chrono::Local::now().format("%H:%M:%S");
        if let Some(line) = describe(&event) {
            println!("[{}] {}", ts, line);
        }
    }
}

fn describe(event: &UiEvent) -> Option<String> {
    let line = match event {
        UiEvent::Connection { status } => format!("connection: {:?}", status),
        UiEvent::PlayerIdentified { name, is_master, .. } => {
            format!("you are {}{}", name, if *is_master { " (game master)" } else { "" })
        }
        UiEvent::IdentityLookupFailed {
            attempt,
            max_attempts,
            error,
        } => format!("lookup attempt {}/{} failed: {}", attempt, max_attempts, error),
        UiEvent::Fatal { message } => format!("FATAL: {}", message),
        UiEvent::GameUpdated { snapshot, .. } => {
            let secret = if snapshot.is_impostor() {
                "you are the impostor".to_string()
            } else {
                format!("secret word: {}", snapshot.secret_word.as_deref().unwrap_or("-"))
            };
            let history: Vec<String> = snapshot
                .history
                .iter()
                .map(|entry| {
                    if snapshot.is_eliminated(&entry.player_id) {
                        format!("~{}: {}~", entry.player_id, entry.word)
                    } else {
                        format!("{}: {}", entry.player_id, entry.word)
                    }
                })
                .collect();
            format!("{} | words: [{}]", secret, history.join(", "))
        }
        UiEvent::TurnChanged {
            current_player,
            is_my_turn,
        } => {
            if *is_my_turn {
                "your turn! word <word> or sus <player_id>".to_string()
            } else {
                format!("turn: {}", current_player.as_deref().unwrap_or("-"))
            }
        }
        UiEvent::SuspectsChanged { suspects } if !suspects.is_empty() => {
            let names: Vec<String> = suspects
                .iter()
                .map(|s| format!("{} ({})", s.name, s.player_id))
                .collect();
            format!("can accuse: {}", names.join(", "))
        }
        UiEvent::PollFailed { failures, error } => {
            format!("poll failed ({} in a row): {}", failures, error)
        }
        UiEvent::PollDegraded { interval_ms } => {
            format!("server unreachable, polling every {}s", interval_ms / 1000)
        }
        UiEvent::PollRecovered { .. } => "server reachable again".to_string(),
        UiEvent::VoteStarted {
            suspect_name,
            initiator_name,
            is_player_suspect,
            can_vote,
            ..
        } => {
            let hint = if *is_player_suspect {
                "you are the suspect, wait for the others"
            } else if *can_vote {
                "vote with 'up' or 'down'"
            } else {
                "you already voted"
            };
            format!("VOTE: {} accuses {}. {}", initiator_name, suspect_name, hint)
        }
        UiEvent::VoteTimer {
            remaining_secs,
            warning,
        } if *warning || remaining_secs % 10 == 0 => format!("vote: {}s left", remaining_secs),
        UiEvent::VoteProgress {
            tally,
            votes_cast,
            votes_needed,
        } => match votes_needed {
            Some(needed) => format!(
                "votes {}/{} (up {}, down {})",
                votes_cast, needed, tally.up, tally.down
            ),
            None => format!("votes {} (up {}, down {})", votes_cast, tally.up, tally.down),
        },
        UiEvent::VoteCastConfirmed { direction } => format!("your vote: {:?}", direction),
        UiEvent::VoteProcessing { suspect_name } => format!("counting votes on {}...", suspect_name),
        UiEvent::VoteResults {
            tally, verdict, ..
        } => format!(
            "RESULT: up {} vs down {}. {} [{:?}]",
            tally.up, tally.down, verdict.message, verdict.tone
        ),
        UiEvent::Notice { level, message } => format!("{:?}: {}", level, message),
        UiEvent::WordAccepted { word } => format!("sent '{}'", word),
        UiEvent::GameOver { summary } => format!(
            "GAME OVER: {} The secret word was {}.",
            summary.message, summary.secret_word
        ),
        UiEvent::Removed { message } => message.clone(),
        _ => return None,
    };
    Some(line)
}
