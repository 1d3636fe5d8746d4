//! # ragbot CLI
//!
//! ```bash
//! ragbot init                                        # create directories and database
//! ragbot personality add tutor --title "Tutor" \
//!     --system-prompt @prompts/tutor.txt --rag-prompt @prompts/tutor_rag.txt
//! ragbot index create manuals                        # from ~/.ragbot/context_folder/manuals
//! ragbot index create reports --s3-bucket acme --s3-prefix reports/
//! ragbot chat tutor --provider openai --model "ChatGPT 4o Mini" --index manuals
//! ragbot serve                                       # JSON API
//! ```
//!
//! Provider API keys are read from `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`,
//! `GROQ_API_KEY` and `MISTRAL_API_KEY`; in a terminal a missing key is
//! prompted for. Set `RUST_LOG` for diagnostics (default `warn`).

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use ragbot::catalog::{chat_models, vision_models, Provider};
use ragbot::chat_cmd::{self, ChatOptions};
use ragbot::config::{self, Config};
use ragbot::models::PersonalityInput;
use ragbot::personality_cmd::{self, PersonalityPatch};
use ragbot::{index_cmd, migrate, server};

#[derive(Parser)]
#[command(
    name = "ragbot",
    about = "Chat with hosted LLMs, grounded in your own documents",
    version,
    long_about = "ragbot talks to OpenAI, Anthropic, Groq, Mistral and Ollama models using \
    stored personalities, and can answer from local vector indexes built from PDF folders or \
    S3 buckets."
)]
struct Cli {
    /// Path to configuration file (TOML). Missing file means defaults.
    #[arg(long, global = true, default_value = "./config/ragbot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directories and the personality database.
    Init,

    /// List providers and their chat and vision models.
    Catalog,

    /// Manage vector indexes.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Manage personalities.
    Personality {
        #[command(subcommand)]
        action: PersonalityAction,
    },

    /// Chat in the terminal.
    Chat {
        /// Personality name.
        personality: String,

        /// openai, anthropic, groq, mistral or ollama.
        #[arg(long)]
        provider: Provider,

        /// Model display name as shown by `ragbot catalog`.
        #[arg(long)]
        model: String,

        /// Vector index to retrieve from.
        #[arg(long)]
        index: Option<String>,

        #[arg(long, requires = "vision_model")]
        vision_provider: Option<Provider>,

        #[arg(long, requires = "vision_provider")]
        vision_model: Option<String>,
    },

    /// Start the JSON HTTP API on `[server].bind`.
    Serve,

    /// Print shell completions.
    Completions { shell: Shell },
}

#[derive(Subcommand)]
enum IndexAction {
    List,
    /// Build a new index from PDFs.
    Create {
        name: String,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Rebuild an existing index from its source.
    Resync {
        name: String,
        #[command(flatten)]
        source: SourceArgs,
    },
    Delete {
        name: String,
    },
}

#[derive(clap::Args)]
struct SourceArgs {
    /// Folder under `context_folder/` (defaults to the index name).
    #[arg(long, conflicts_with = "s3_bucket")]
    folder: Option<String>,

    #[arg(long)]
    s3_bucket: Option<String>,

    #[arg(long, requires = "s3_bucket")]
    s3_prefix: Option<String>,
}

/// Prompt values starting with `@` are read from that file.
#[derive(Subcommand)]
enum PersonalityAction {
    List,
    Show {
        id: i64,
    },
    Add {
        name: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        system_prompt: String,
        #[arg(long)]
        rag_prompt: String,
    },
    Update {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        system_prompt: Option<String>,
        #[arg(long)]
        rag_prompt: Option<String>,
    },
    Delete {
        id: i64,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_catalog() {
    for provider in Provider::ALL {
        println!("{} ({})", provider.label(), provider.slug());
        for (name, id) in chat_models(provider) {
            println!("  chat    {:<24} {}", name, id);
        }
        for (name, id) in vision_models(provider) {
            println!("  vision  {:<24} {}", name, id);
        }
    }
}

async fn run_init(cfg: &Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(cfg.paths.vector_dbs())?;
    std::fs::create_dir_all(cfg.paths.context_folder())?;
    migrate::run_migrations(cfg).await?;
    println!("Initialized {}", cfg.paths.root.display());
    println!("  vector indexes: {}", cfg.paths.vector_dbs().display());
    println!("  documents: {}", cfg.paths.context_folder().display());
    println!("  personalities: {}", cfg.db_path().display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    // Commands that don't require config
    match &cli.command {
        Commands::Catalog => {
            print_catalog();
            return Ok(());
        }
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "ragbot", &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config_or_default(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&cfg).await?,
        Commands::Index { action } => match action {
            IndexAction::List => index_cmd::run_list(&cfg)?,
            IndexAction::Create { name, source } => {
                let source = index_cmd::source_from_args(
                    &name,
                    source.folder,
                    source.s3_bucket,
                    source.s3_prefix,
                );
                index_cmd::run_create(&cfg, &name, &source).await?;
            }
            IndexAction::Resync { name, source } => {
                let source = index_cmd::source_from_args(
                    &name,
                    source.folder,
                    source.s3_bucket,
                    source.s3_prefix,
                );
                index_cmd::run_resync(&cfg, &name, &source).await?;
            }
            IndexAction::Delete { name } => index_cmd::run_delete(&cfg, &name)?,
        },
        Commands::Personality { action } => match action {
            PersonalityAction::List => personality_cmd::run_list(&cfg).await?,
            PersonalityAction::Show { id } => personality_cmd::run_show(&cfg, id).await?,
            PersonalityAction::Add {
                name,
                title,
                system_prompt,
                rag_prompt,
            } => {
                let input = PersonalityInput {
                    name,
                    title,
                    system_prompt,
                    system_prompt_rag: rag_prompt,
                };
                personality_cmd::run_add(&cfg, input).await?;
            }
            PersonalityAction::Update {
                id,
                name,
                title,
                system_prompt,
                rag_prompt,
            } => {
                let patch = PersonalityPatch {
                    name,
                    title,
                    system_prompt,
                    system_prompt_rag: rag_prompt,
                };
                personality_cmd::run_update(&cfg, id, patch).await?;
            }
            PersonalityAction::Delete { id } => personality_cmd::run_delete(&cfg, id).await?,
        },
        Commands::Chat {
            personality,
            provider,
            model,
            index,
            vision_provider,
            vision_model,
        } => {
            let options = ChatOptions {
                personality,
                provider,
                model,
                index,
                vision_provider,
                vision_model,
            };
            chat_cmd::run_chat(&cfg, options).await?;
        }
        Commands::Serve => {
            let store = personality_cmd::open_store(&cfg).await?;
            server::run_server(&cfg, store).await?;
        }
        Commands::Catalog | Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
