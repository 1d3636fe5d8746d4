//! # ragbot
//!
//! A personality-driven chat assistant for hosted LLMs, optionally grounded
//! in local vector indexes built from PDF collections.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ PDF sources  │──▶│ Chunk+Embed  │──▶│ vector_dbs/  │
//! │ folder / S3  │   │  (semantic)  │   │ index.json   │
//! └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                              │ top-k
//! ┌──────────────┐   ┌──────────────┐   ┌──────▼───────┐
//! │ personalities│──▶│ ChatSession  │◀──│  Retriever   │
//! │   (SQLite)   │   │ plain / RAG  │   └──────────────┘
//! └──────────────┘   └──────┬───────┘
//!                           ▼
//!              OpenAI · Anthropic · Groq · Mistral · Ollama
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Classified failures carried in `anyhow` |
//! | [`credentials`] | Secrets from env or an interactive prompt |
//! | [`catalog`] | Providers and their model display names |
//! | [`llm`] | Chat and vision clients, model factory |
//! | [`embedding`] | Embedding backends, memoized shared instance |
//! | [`extract`] | PDF text extraction |
//! | [`chunk`] | Semantic chunking |
//! | [`loader`], [`s3`] | Document loading from folders and buckets |
//! | [`vector_store`] | On-disk indexes, loading, retrieval |
//! | [`index_builder`] | Create, resync and delete indexes |
//! | [`personality`] | Personality repository |
//! | [`chat`] | Pipelines, history, image analysis, sessions |
//! | [`server`] | JSON HTTP API |
//! | [`db`], [`migrate`] | SQLite connection and schema |

pub mod catalog;
pub mod chat;
pub mod chat_cmd;
pub mod chunk;
pub mod config;
pub mod credentials;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index_builder;
pub mod index_cmd;
pub mod llm;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod personality;
pub mod personality_cmd;
pub mod s3;
pub mod server;
pub mod vector_store;
