//! Interactive terminal chat (`ragbot chat`).
//!
//! Lines starting with `/` are commands; anything else is sent to the model.
//! Plain answers are printed as they stream in.

use anyhow::Result;
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::catalog::Provider;
use crate::chat::ChatSession;
use crate::config::Config;
use crate::credentials::TerminalPrompt;
use crate::embedding::shared_embedder;
use crate::error::RagError;
use crate::llm::{create_chat_model, create_vision_model};
use crate::personality_cmd::open_store;
use crate::vector_store::IndexStore;

const HELP: &str = "\
Commands:
  /index <name>   retrieve from a vector index
  /noindex        stop retrieving
  /image <path>   describe an image and use it as context
  /messages       show the conversation
  /clear          forget the conversation and image
  /quit           leave";

/// Model selection for a chat run.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub personality: String,
    pub provider: Provider,
    pub model: String,
    pub index: Option<String>,
    pub vision_provider: Option<Provider>,
    pub vision_model: Option<String>,
}

/// A parsed REPL line.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Message(String),
    Index(String),
    NoIndex,
    Image(String),
    Messages,
    Clear,
    Help,
    Quit,
    Unknown(String),
    Empty,
}

pub fn parse_line(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return ReplCommand::Message(line.to_string());
    };
    let (cmd, arg) = match rest.split_once(char::is_whitespace) {
        Some((c, a)) => (c, a.trim()),
        None => (rest, ""),
    };
    match (cmd, arg) {
        ("index", name) if !name.is_empty() => ReplCommand::Index(name.to_string()),
        ("noindex", _) => ReplCommand::NoIndex,
        ("image", path) if !path.is_empty() => ReplCommand::Image(path.to_string()),
        ("messages", _) => ReplCommand::Messages,
        ("clear", _) => ReplCommand::Clear,
        ("help", _) => ReplCommand::Help,
        ("quit", _) | ("exit", _) => ReplCommand::Quit,
        _ => ReplCommand::Unknown(line.to_string()),
    }
}

pub async fn run_chat(config: &Config, options: ChatOptions) -> Result<()> {
    let store = open_store(config).await?;
    let personality = store
        .find_by_name(&options.personality)
        .await?
        .ok_or_else(|| RagError::NotFound(format!("personality '{}'", options.personality)))?;
    store.pool().close().await;

    let mut session = ChatSession::new(personality);
    session.set_model(create_chat_model(
        options.provider,
        &options.model,
        &config.llm,
        &TerminalPrompt,
    )?);
    if let (Some(provider), Some(model)) = (options.vision_provider, &options.vision_model) {
        session.set_vision_model(create_vision_model(
            provider,
            model,
            &config.llm,
            &TerminalPrompt,
        )?);
    }
    if let Some(name) = &options.index {
        load_index(config, &mut session, name).await;
    }

    println!(
        "Chatting as {} with {} {}. Type /help for commands.",
        session.personality().title,
        options.provider.label(),
        options.model
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_line(&line) {
            ReplCommand::Empty => {}
            ReplCommand::Quit => break,
            ReplCommand::Help => println!("{}", HELP),
            ReplCommand::Unknown(cmd) => println!("Unknown command: {} (try /help)", cmd),
            ReplCommand::Clear => {
                session.clear();
                println!("Conversation cleared.");
            }
            ReplCommand::NoIndex => {
                session.disable_retrieval();
                println!("Retrieval off.");
            }
            ReplCommand::Index(name) => load_index(config, &mut session, &name).await,
            ReplCommand::Messages => {
                for m in session.messages() {
                    println!("[{}] {}", m.role.as_str(), m.content);
                }
            }
            ReplCommand::Image(path) => match std::fs::read(Path::new(&path)) {
                Ok(bytes) => match session.analyze_image(&bytes).await {
                    Ok(desc) if desc.fresh => println!("Image description:\n{}", desc.text),
                    Ok(_) => println!("Same image as before; keeping the existing description."),
                    Err(e) => eprintln!("Error: {:#}", e),
                },
                Err(e) => eprintln!("Error: cannot read {}: {}", path, e),
            },
            ReplCommand::Message(text) => {
                let result = session
                    .submit(&text, &mut |delta: &str| {
                        print!("{}", delta);
                        let _ = std::io::stdout().flush();
                    })
                    .await;
                println!();
                if let Err(e) = result {
                    eprintln!("Error: {:#}", e);
                }
            }
        }
    }
    Ok(())
}

/// Load failures are reported and the session continues without retrieval.
async fn load_index(config: &Config, session: &mut ChatSession, name: &str) {
    let embedder = match shared_embedder(&config.embedding).await {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Warning: {:#}. Continuing without retrieval.", e);
            return;
        }
    };
    let store = IndexStore::from_config(config);
    match session.load_index(&store, name, embedder, config.retrieval.k) {
        Ok(true) => println!("Using vector index '{}'.", name),
        Ok(false) => println!("Vector index '{}' is already loaded.", name),
        Err(e) => eprintln!("Warning: {:#}. Continuing without retrieval.", e),
    }
}
