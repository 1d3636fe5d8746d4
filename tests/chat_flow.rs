//! End-to-end library tests with in-process fakes for the model, the
//! embedder and the retriever. Nothing here touches the network.

use anyhow::{bail, Result};
use async_trait::async_trait;
use ragbot::catalog::Provider;
use ragbot::chat::ChatSession;
use ragbot::config::ChunkingConfig;
use ragbot::embedding::Embedder;
use ragbot::error::{classify, RagError};
use ragbot::extract::ExtractError;
use ragbot::index_builder::IndexBuilder;
use ragbot::llm::{ChatModel, PromptMessage};
use ragbot::loader::load_local;
use ragbot::models::{Chunk, Personality, PersonalityInput, Role};
use ragbot::personality::PersonalityStore;
use ragbot::vector_store::{IndexLoader, IndexSlot, IndexStore, Retriever, VectorIndex};
use ragbot::{db, migrate};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ─── Fakes ──────────────────────────────────────────────────────────

/// Bag-of-letters embedding: deterministic and cheap.
struct LetterEmbedder;

#[async_trait]
impl Embedder for LetterEmbedder {
    fn model_name(&self) -> &str {
        "letters"
    }
    fn dims(&self) -> usize {
        26
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 26];
                for c in t.to_ascii_lowercase().bytes() {
                    if c.is_ascii_lowercase() {
                        v[(c - b'a') as usize] += 1.0;
                    }
                }
                v
            })
            .collect())
    }
}

/// Echoes the last user message; can be switched to fail. Counts calls.
struct EchoModel {
    fail: AtomicBool,
    calls: AtomicUsize,
    describes: AtomicUsize,
}

impl EchoModel {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            describes: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ChatModel for EchoModel {
    fn provider(&self) -> Provider {
        Provider::Ollama
    }
    fn model_id(&self) -> &str {
        "echo"
    }
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(RagError::Invocation("provider unavailable".into()).into());
        }
        let last = messages.last().map(|m| m.text_content()).unwrap_or_default();
        Ok(format!("echo: {}", last))
    }
    async fn describe_image(&self, _jpeg_base64: &str, _instruction: &str) -> Result<String> {
        self.describes.fetch_add(1, Ordering::SeqCst);
        Ok("a small green square".into())
    }
}

struct FixedRetriever(Vec<Chunk>);

#[async_trait]
impl Retriever for FixedRetriever {
    async fn retrieve(&self, _query: &str) -> Result<Vec<Chunk>> {
        Ok(self.0.clone())
    }
}

struct CountingLoader {
    store: IndexStore,
    loads: AtomicUsize,
}

impl IndexLoader for CountingLoader {
    fn load_index(&self, name: &str, model: &str) -> Result<VectorIndex> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.store.load_index(name, model)
    }
}

fn utf8_extract(bytes: &[u8]) -> Result<String, ExtractError> {
    String::from_utf8(bytes.to_vec()).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn personality() -> Personality {
    Personality {
        id: 1,
        name: "tutor".into(),
        system_prompt: "You teach.".into(),
        system_prompt_rag: "Answer from:\n{context}".into(),
        title: "Tutor".into(),
    }
}

fn chunk(source: &str, text: &str) -> Chunk {
    Chunk {
        id: text.into(),
        source: source.into(),
        chunk_index: 0,
        text: text.into(),
        hash: String::new(),
    }
}

fn builder(tmp: &TempDir) -> IndexBuilder {
    IndexBuilder::new(
        IndexStore::new(tmp.path().join("vector_dbs")),
        Arc::new(LetterEmbedder),
        ChunkingConfig::default(),
        8,
    )
}

fn png(color: [u8; 4]) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(2, 2, image::Rgba(color));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

async fn submit(session: &mut ChatSession, text: &str) -> Result<String> {
    let streamed = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&streamed);
    let outcome = session
        .submit(text, &mut move |d: &str| sink.lock().unwrap().push_str(d))
        .await?;
    assert_eq!(*streamed.lock().unwrap(), outcome.displayed);
    Ok(outcome.displayed)
}

// ─── Personality store ──────────────────────────────────────────────

#[tokio::test]
async fn personality_add_then_list_shows_it_once() {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("p.sqlite")).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    let store = PersonalityStore::new(pool);

    assert!(store.list().await.unwrap().is_empty());
    let input = PersonalityInput {
        name: "critic".into(),
        system_prompt: "Be harsh.\n\tUnicode: ✓ \"quotes\"".into(),
        system_prompt_rag: "Use {context} only.".into(),
        title: "The Critic".into(),
    };
    store.add(&input).await.unwrap();

    let all = store.list().await.unwrap();
    assert_eq!(all.iter().filter(|p| p.name == "critic").count(), 1);
    assert_eq!(all[0].system_prompt, input.system_prompt);
    assert_eq!(all[0].system_prompt_rag, input.system_prompt_rag);
}

// ─── Session bookkeeping ────────────────────────────────────────────

#[tokio::test]
async fn messages_track_successful_turns_only() {
    let model = EchoModel::new();
    let mut session = ChatSession::new(personality());

    let err = submit(&mut session, "hi").await.unwrap_err();
    assert!(matches!(classify(&err), Some(RagError::NotConfigured(_))));

    session.set_model(model.clone());
    submit(&mut session, "one").await.unwrap();
    submit(&mut session, "two").await.unwrap();
    assert_eq!(session.messages().len(), 4);

    model.fail.store(true, Ordering::SeqCst);
    let err = submit(&mut session, "three").await.unwrap_err();
    assert!(matches!(classify(&err), Some(RagError::Invocation(_))));
    assert_eq!(session.messages().len(), 4);
    assert_eq!(session.history().len(), 4);

    model.fail.store(false, Ordering::SeqCst);
    submit(&mut session, "four").await.unwrap();
    assert_eq!(session.messages().len(), 6);

    for (shown, kept) in session.messages().iter().zip(session.history()) {
        assert_eq!(shown.role, kept.role);
    }

    session.clear();
    assert!(session.messages().is_empty());
    assert!(session.history().is_empty());
    assert!(session.model().is_some());
}

#[tokio::test]
async fn rag_turn_cites_sources_but_history_keeps_bare_answer() {
    let model = EchoModel::new();
    let mut session = ChatSession::new(personality());
    session.set_model(model.clone());
    session.set_retriever(Arc::new(FixedRetriever(vec![
        chunk("b.pdf", "beta"),
        chunk("a.pdf", "alpha"),
        chunk("b.pdf", "more beta"),
    ])));

    let shown = submit(&mut session, "what is beta?").await.unwrap();
    assert_eq!(shown, "echo: what is beta?\n\n📌 Source: b.pdf, a.pdf");
    assert_eq!(session.history()[1].role, Role::Assistant);
    assert_eq!(session.history()[1].content, "echo: what is beta?");
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);

    // Second turn has history, so the query is rewritten first.
    submit(&mut session, "and alpha?").await.unwrap();
    assert_eq!(model.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn same_image_is_described_once() {
    let model = EchoModel::new();
    let mut session = ChatSession::new(personality());

    let err = session.analyze_image(&png([0, 255, 0, 255])).await.unwrap_err();
    assert!(matches!(classify(&err), Some(RagError::NotConfigured(_))));

    session.set_vision_model(model.clone());
    let green = png([0, 255, 0, 255]);
    assert!(session.analyze_image(&green).await.unwrap().fresh);
    assert!(!session.analyze_image(&green).await.unwrap().fresh);
    assert_eq!(model.describes.load(Ordering::SeqCst), 1);

    session.analyze_image(&png([255, 0, 0, 255])).await.unwrap();
    assert_eq!(model.describes.load(Ordering::SeqCst), 2);
    assert_eq!(session.image_description(), Some("a small green square"));

    session.clear();
    assert_eq!(session.image_description(), None);
}

// ─── Index lifecycle ────────────────────────────────────────────────

#[tokio::test]
async fn no_documents_creates_no_directory() {
    let tmp = TempDir::new().unwrap();
    let b = builder(&tmp);
    let err = b.create(&[], "empty").await.unwrap_err();
    assert_eq!(classify(&err), Some(&RagError::NoDocuments));
    assert!(!tmp.path().join("vector_dbs").join("empty").exists());
    assert!(!tmp.path().join("vector_dbs").exists());
}

#[tokio::test]
async fn deleting_missing_index_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let err = builder(&tmp).delete("nothing").unwrap_err();
    assert_eq!(classify(&err), Some(&RagError::IndexNotFound("nothing".into())));
}

#[tokio::test]
async fn two_pdf_folder_builds_a_retrievable_index() {
    let tmp = TempDir::new().unwrap();
    let folder = tmp.path().join("context_folder").join("zoo");
    std::fs::create_dir_all(&folder).unwrap();
    let long_text = |topic: &str| {
        (0..12)
            .map(|i| format!("Fact {} about the {} enclosure.", i, topic))
            .collect::<Vec<_>>()
            .join(" ")
    };
    std::fs::write(folder.join("lions.pdf"), long_text("lion")).unwrap();
    std::fs::write(folder.join("penguins.pdf"), long_text("penguin")).unwrap();

    let documents = load_local(&folder, &utf8_extract).unwrap();
    assert_eq!(documents.len(), 2);

    let b = builder(&tmp);
    let report = b.create(&documents, "zoo").await.unwrap();
    assert_eq!(report.sources, vec!["lions.pdf", "penguins.pdf"]);

    let index = b.store().load_index("zoo", "letters").unwrap();
    for c in index.chunks() {
        assert!(c.source == "lions.pdf" || c.source == "penguins.pdf");
    }

    let mut slot = IndexSlot::default();
    slot.load(b.store(), "zoo", "letters").unwrap();
    let retriever = slot.retriever(Arc::new(LetterEmbedder), 5).unwrap();
    let hits = retriever.retrieve("penguin enclosure").await.unwrap();
    assert!(!hits.is_empty());
    assert!(hits.len() <= 5);
}

#[tokio::test]
async fn loading_the_same_index_twice_reads_disk_once() {
    let tmp = TempDir::new().unwrap();
    let b = builder(&tmp);
    b.create(&[ragbot::models::Document::new("a.pdf", "Some text.")], "docs")
        .await
        .unwrap();

    let loader = CountingLoader {
        store: b.store().clone(),
        loads: AtomicUsize::new(0),
    };
    let mut session = ChatSession::new(personality());
    assert!(session
        .load_index(&loader, "docs", Arc::new(LetterEmbedder), 5)
        .unwrap());
    assert!(!session
        .load_index(&loader, "docs", Arc::new(LetterEmbedder), 5)
        .unwrap());
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    assert!(session.retrieval_enabled());

    let err = session
        .load_index(&loader, "missing", Arc::new(LetterEmbedder), 5)
        .unwrap_err();
    assert!(matches!(classify(&err), Some(RagError::IndexNotFound(_))));
    assert!(!session.retrieval_enabled());
    assert_eq!(session.index_name(), None);
}

#[tokio::test]
async fn index_from_other_embedder_is_refused() {
    struct Other;
    #[async_trait]
    impl Embedder for Other {
        fn model_name(&self) -> &str {
            "other"
        }
        fn dims(&self) -> usize {
            26
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            bail!("unused")
        }
    }

    let tmp = TempDir::new().unwrap();
    let b = builder(&tmp);
    b.create(&[ragbot::models::Document::new("a.pdf", "Text.")], "docs")
        .await
        .unwrap();

    let mut session = ChatSession::new(personality());
    let err = session
        .load_index(b.store(), "docs", Arc::new(Other), 5)
        .unwrap_err();
    assert!(matches!(classify(&err), Some(RagError::IndexLoad(_))));
}
