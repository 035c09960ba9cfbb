use std::io::{Write, stdout};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{self, ClearType},
};

use flashlearn::{
    api::{
        CandidateDecision, CandidateEdit, FlashcardApi, FlashcardQuery, GenerationRequest,
        http::{ClientConfig, HttpApiClient},
        pending_candidates,
    },
    card::{Flashcard, ReviewSessionConfig},
    core::session::MAX_SESSION_CARDS,
    keys::KeyInput,
    persist::sqlite::SqliteMarkerStore,
    player::{PlayerView, ReviewPlayer, SHORTCUT_HINTS},
    runtime::{
        events::GenerationEvent,
        generation::{GenerationConfig, spawn_generation_engine},
        session::{SessionConfig, spawn_review_session},
    },
    types::Outcome,
};

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

#[derive(Parser, Debug)]
#[command(name = "flashlearn", version, about = "Flashcard review and generation client")]
struct Cli {
    /// Backend base URL.
    #[arg(long, env = "FLASHLEARN_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    /// Bearer token for the backend.
    #[arg(long, env = "FLASHLEARN_API_TOKEN")]
    api_token: Option<String>,

    /// Request timeout in milliseconds.
    #[arg(long, env = "FLASHLEARN_TIMEOUT_MS", default_value = "30000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Review due flashcards in the terminal
    Review {
        /// Maximum number of cards in the session
        #[arg(long, default_value_t = MAX_SESSION_CARDS)]
        limit: usize,
        /// Only cards carrying this tag
        #[arg(long)]
        tag: Option<String>,
        /// Include cards that are not due yet
        #[arg(long)]
        all: bool,
    },
    /// Generate flashcard candidates from a text file and wait for the result
    Generate {
        /// File with the source text (omit to resume a pending generation)
        #[arg(long)]
        file: Option<PathBuf>,
        /// Model override
        #[arg(long)]
        model: Option<String>,
        /// Sampling temperature
        #[arg(long)]
        temperature: Option<f32>,
        /// SQLite file remembering the in-flight generation
        #[arg(long, env = "FLASHLEARN_MARKER_DB", default_value = ".flashlearn.db")]
        marker_db: PathBuf,
        /// Poll interval in milliseconds
        #[arg(long, default_value = "5000")]
        poll_interval_ms: u64,
        /// Accept, edit or reject each candidate once the generation succeeds
        #[arg(long)]
        review: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "flashlearn=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let api = Arc::new(HttpApiClient::new(ClientConfig {
        base_url: cli.base_url,
        api_token: cli.api_token,
        timeout_ms: cli.timeout_ms,
    })?);

    match cli.command {
        Commands::Review { limit, tag, all } => review(api, limit, tag, !all).await,
        Commands::Generate {
            file,
            model,
            temperature,
            marker_db,
            poll_interval_ms,
            review,
        } => {
            let request = match file {
                Some(path) => Some(GenerationRequest {
                    source_text: std::fs::read_to_string(&path)?,
                    model,
                    temperature,
                }),
                None => None,
            };
            generate(api, request, marker_db, poll_interval_ms, review).await
        }
    }
}

async fn fetch_cards(
    api: &HttpApiClient,
    limit: usize,
    tag: Option<String>,
    due_only: bool,
) -> Result<Vec<Flashcard>> {
    let mut cards = Vec::new();
    let mut query = FlashcardQuery {
        limit: Some(limit.min(MAX_SESSION_CARDS) as u32),
        tag,
        due_only,
        ..FlashcardQuery::default()
    };

    loop {
        let page = api.list_flashcards(&query).await?;
        cards.extend(page.data);
        if cards.len() >= limit || !page.page.has_more {
            break;
        }
        let Some(next) = page.page.next_cursor else {
            break;
        };
        query.cursor = Some(next);
    }

    cards.truncate(limit);
    Ok(cards)
}

async fn review(api: Arc<HttpApiClient>, limit: usize, tag: Option<String>, due_only: bool) -> Result<()> {
    let cards = fetch_cards(&api, limit, tag, due_only).await?;
    if cards.is_empty() {
        eprintln!("No cards to review.");
        return Ok(());
    }

    let config = SessionConfig {
        max_cards: limit.min(MAX_SESSION_CARDS),
        ..SessionConfig::default()
    };
    let handle = spawn_review_session(ReviewSessionConfig::new(cards), api, config);
    let player = ReviewPlayer::new(handle.clone());

    let result = run_player(&player).await;
    terminal::disable_raw_mode()?;
    result?;

    if let PlayerView::Finished { summary, logged, .. } = player.view().await? {
        println!();
        println!("Reviewed {} card(s), skipped {}.", summary.reviewed, summary.skipped);
        for outcome in Outcome::ALL {
            let n = summary.by_outcome.get(&outcome).copied().unwrap_or(0);
            if n > 0 {
                println!("  {outcome:<6} {n}");
            }
        }
        if let Some(ms) = summary.mean_response_ms {
            println!("Average answer time: {:.1}s", ms as f64 / 1000.0);
        }
        match logged {
            Some(n) => println!("{GREEN}Saved {n} review(s).{RESET}"),
            None => println!("{DIM}Session not saved.{RESET}"),
        }
    }

    handle.shutdown().await?;
    Ok(())
}

async fn run_player(player: &ReviewPlayer) -> Result<()> {
    let mut out = stdout();
    terminal::enable_raw_mode()?;

    loop {
        let view = player.view().await?;
        render(&mut out, &view)?;

        let Event::Key(key) = tokio::task::spawn_blocking(event::read).await?? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match (&view, key.code) {
            (_, KeyCode::Esc | KeyCode::Char('q')) => return Ok(()),
            (PlayerView::Finished { can_submit: true, .. }, KeyCode::Char('s')) => {
                if let Err(err) = player.finish().await {
                    tracing::error!(error = %err, "could not save session");
                }
            }
            (PlayerView::Finished { can_submit: false, .. }, _) => return Ok(()),
            (PlayerView::Card { .. }, KeyCode::Char('s')) => {
                if let Err(err) = player.finish().await {
                    tracing::error!(error = %err, "could not save session");
                }
            }
            _ => {
                player.handle_key(&KeyInput::from(key)).await?;
            }
        }
    }
}

fn render(out: &mut std::io::Stdout, view: &PlayerView) -> std::io::Result<()> {
    crossterm::execute!(
        out,
        cursor::MoveTo(0, 0),
        terminal::Clear(ClearType::FromCursorDown)
    )?;

    match view {
        PlayerView::Empty => write!(out, "Nothing to review.\r\n")?,
        PlayerView::Card {
            front,
            back,
            progress,
            ..
        } => {
            write!(
                out,
                "{DIM}[{}/{}]{RESET}\r\n\r\n  {front}\r\n\r\n",
                progress.current_index, progress.total
            )?;
            match back {
                Some(back) => write!(out, "  {GREEN}{back}{RESET}\r\n\r\n")?,
                None => write!(out, "  {DIM}…{RESET}\r\n\r\n")?,
            }
            let legend = SHORTCUT_HINTS
                .iter()
                .map(|(key, action)| format!("{key} {action}"))
                .collect::<Vec<_>>()
                .join(" · ");
            write!(out, "{DIM}{legend} · s save · q quit{RESET}\r\n")?;
        }
        PlayerView::Finished {
            summary,
            can_submit,
            logged,
            error,
            ..
        } => {
            write!(out, "Session finished: {} graded.\r\n", summary.reviewed)?;
            if let Some(err) = error {
                write!(out, "{RED}Save failed: {err}{RESET}\r\n")?;
            }
            if let Some(n) = logged {
                write!(out, "{GREEN}Saved {n} review(s).{RESET}\r\n")?;
            }
            if *can_submit {
                write!(out, "{DIM}s save · q quit{RESET}\r\n")?;
            } else {
                write!(out, "{DIM}press any key{RESET}\r\n")?;
            }
        }
    }
    out.flush()
}

async fn generate(
    api: Arc<HttpApiClient>,
    request: Option<GenerationRequest>,
    marker_db: PathBuf,
    poll_interval_ms: u64,
    review: bool,
) -> Result<()> {
    let markers = SqliteMarkerStore::open(&marker_db)?;
    let engine = spawn_generation_engine(
        api.clone(),
        Box::new(markers),
        GenerationConfig {
            poll_interval_ms,
            resume_on_spawn: false,
            ..GenerationConfig::default()
        },
    );
    let mut events = engine.subscribe();

    let tracked = match request {
        Some(request) => engine.start_generation(request).await?,
        None => engine.check_active_generation().await?,
    };
    let Some(record) = tracked else {
        eprintln!("No active generation.");
        engine.shutdown().await?;
        return Ok(());
    };
    eprintln!("Tracking generation {} ({:?})", record.id, record.status);

    let finished = loop {
        tokio::select! {
            evt = events.recv() => match evt {
                Ok(GenerationEvent::StatusChanged { status, .. }) => eprintln!("status: {status:?}"),
                Ok(GenerationEvent::Finished { id, status }) => break Some((id, status)),
                Ok(GenerationEvent::Failed { message }) => return Err(eyre!(message)),
                Ok(_) => {}
                Err(_) => break None,
            },
            _ = tokio::signal::ctrl_c() => {
                if engine.cancel_generation().await? {
                    eprintln!("Cancelled.");
                }
                break None;
            }
        }
    };

    engine.shutdown().await?;

    if let Some((id, status)) = finished {
        println!("Generation {id} finished: {status:?}");
        if status.has_candidates() {
            review_candidates(api.as_ref(), &id, review).await?;
        }
    }
    Ok(())
}

async fn review_candidates(api: &HttpApiClient, generation_id: &str, interactive: bool) -> Result<()> {
    let candidates = pending_candidates(api, generation_id).await?;
    if candidates.is_empty() {
        println!("No candidates awaiting review.");
        return Ok(());
    }

    for candidate in candidates {
        println!("- {} → {}", candidate.front, candidate.back);
        if !interactive {
            continue;
        }

        let decision = loop {
            match prompt("  [a]ccept [e]dit [r]eject [s]kip: ".to_string()).await?.as_str() {
                "a" => break CandidateDecision::Accept,
                "e" => {
                    let front = prompt(format!("  front [{}]: ", candidate.front)).await?;
                    let back = prompt(format!("  back [{}]: ", candidate.back)).await?;
                    break CandidateDecision::AcceptEdited(CandidateEdit {
                        front: if front.is_empty() { candidate.front.clone() } else { front },
                        back: if back.is_empty() { candidate.back.clone() } else { back },
                    });
                }
                "r" => break CandidateDecision::Reject,
                "s" | "" => break CandidateDecision::Skip,
                _ => continue,
            }
        };

        match decision.apply(api, &candidate.id).await {
            Ok(Some(card)) => println!("  {GREEN}added card {}{RESET}", card.id),
            Ok(None) if decision == CandidateDecision::Reject => println!("  {DIM}rejected{RESET}"),
            Ok(None) => {}
            Err(err) => {
                tracing::error!(candidate_id = %candidate.id, error = %err, "candidate decision failed");
                println!("  {RED}{err}{RESET}");
            }
        }
    }
    Ok(())
}

/// Reads one trimmed line from stdin without holding a runtime worker.
async fn prompt(question: String) -> Result<String> {
    let answer = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        print!("{question}");
        stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line.trim().to_string())
    })
    .await??;
    Ok(answer)
}
