//! Docent — conversational document assistant.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Parse CLI args
//!   3. Load config, init logger
//!   4. Build the client bundle (graph store, reasoning, embeddings)
//!   5. Log in (or register) the user against the store
//!   6. Ingest any files given on the command line
//!   7. Run the chat REPL until EOF or `:quit`

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use docent::chat::Assistant;
use docent::config::{self, Secrets};
use docent::embedding::EmbeddingClient;
use docent::error::AppError;
use docent::graph::GraphClient;
use docent::ingest::{FileOutcome, FileSummary, Ingestor};
use docent::llm::providers;
use docent::logger;
use docent::store::{AccessRole, GraphStore};
use docent::tools::Toolbox;
use docent::voice::{Prosody, build_ssml, detect_style};

struct CliArgs {
    config_path: Option<String>,
    username: Option<String>,
    register: bool,
    voice: bool,
    language: String,
    files: Vec<PathBuf>,
}

fn parse_cli_args() -> CliArgs {
    let mut args = CliArgs {
        config_path: None,
        username: None,
        register: false,
        voice: false,
        language: "English (US)".to_string(),
        files: Vec::new(),
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-c" | "--config" => args.config_path = iter.next(),
            "-u" | "--user" => args.username = iter.next(),
            "--register" => args.register = true,
            "--voice" => args.voice = true,
            "--lang" => {
                if let Some(lang) = iter.next() {
                    args.language = lang;
                }
            }
            other => args.files.push(PathBuf::from(other)),
        }
    }
    args
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();
    let config = config::load(args.config_path.as_deref())?;
    logger::init(&config.log_level)?;

    let secrets = Secrets::from_env();
    let graph = GraphClient::build(&config.graph, secrets.graph_password.clone())?;
    let store = GraphStore::new(graph);
    let llm = providers::build(&config.llm, secrets.llm_api_key.clone())?;
    let embedder = EmbeddingClient::build(&config.embedding, secrets.embedding_api_key.clone())?;

    store.ensure_indexes().await?;

    let username = args
        .username
        .or_else(|| std::env::var("DOCENT_USER").ok())
        .ok_or_else(|| AppError::Config("no user given; pass --user or set DOCENT_USER".into()))?;
    let password = std::env::var("DOCENT_PASSWORD")
        .map_err(|_| AppError::Config("DOCENT_PASSWORD must be set".into()))?;

    if args.register {
        let first_name = std::env::var("DOCENT_FIRST_NAME").unwrap_or_else(|_| username.clone());
        let last_name = std::env::var("DOCENT_LAST_NAME").unwrap_or_default();
        store
            .register_user(&first_name, &last_name, AccessRole::User, &username, &password)
            .await?;
        info!(user = %username, "user registered");
    }

    let user = store
        .verify_user(&username, &password)
        .await?
        .ok_or_else(|| AppError::Rejected("invalid username/password".into()))?;
    println!("Welcome {}", user.first_name);

    let recent = store
        .recent_sessions(&user.username, config.chat.recent_sessions as i64)
        .await?;
    for session in &recent {
        if let Some(turn) = session.turns.first() {
            println!("[{}] {}", &session.timestamp[..19.min(session.timestamp.len())], turn.user_query);
        }
    }

    let ingestor = Ingestor::new(store.clone(), llm.clone(), embedder.clone(), &config.ingest);
    let mut placed_files: Vec<FileSummary> = Vec::new();
    if !args.files.is_empty() {
        report_outcomes(
            &ingestor.process_given_files(&args.files, &user.username).await,
            &mut placed_files,
        );
    }

    let toolbox = Toolbox::new(store.clone(), embedder.clone());
    let mut assistant = Assistant::new(
        llm.clone(),
        toolbox,
        store.clone(),
        embedder.clone(),
        user.clone(),
        &config.chat,
    );

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    println!("Ask your questions here (:new for a fresh session, :quit to exit)");

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| AppError::Io(e))?
    {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        match input {
            ":quit" | ":q" => break,
            ":new" => {
                assistant.start_new_session();
                println!("started a new session");
                continue;
            }
            _ => {}
        }

        if let Some(path) = input.strip_prefix(":ingest ") {
            let paths = vec![PathBuf::from(path.trim())];
            report_outcomes(
                &ingestor.process_given_files(&paths, &user.username).await,
                &mut placed_files,
            );
            continue;
        }

        match assistant
            .converse(input, &placed_files, args.voice, &args.language)
            .await
        {
            Ok(outcome) => {
                println!("{}", outcome.answer);
                for (name, payload) in &outcome.images {
                    println!("[image] {name} ({} base64 bytes)", payload.len());
                }
                if args.voice {
                    let style = detect_style(&llm, &outcome.answer, input).await;
                    let ssml = build_ssml(
                        &outcome.answer,
                        "en-US-JennyNeural",
                        &Prosody::default(),
                        style,
                    );
                    info!(style = style.as_str(), ssml_len = ssml.len(), "speech prepared");
                }
            }
            Err(e) => warn!(error = %e, "turn failed"),
        }
    }

    Ok(())
}

fn report_outcomes(outcomes: &[FileOutcome], placed_files: &mut Vec<FileSummary>) {
    for outcome in outcomes {
        match outcome {
            FileOutcome::Processed(summary) => {
                println!("{} processed successfully!", summary.name);
                if !placed_files.iter().any(|f| f.name == summary.name) {
                    placed_files.push(summary.clone());
                }
            }
            FileOutcome::Skipped { name, reason } => {
                println!("{name} skipped: {reason}");
            }
            FileOutcome::Failed { name, error } => {
                println!("{name} failed: {error}");
            }
        }
    }
}
