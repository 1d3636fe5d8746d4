use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[paths]
root = "{}/data"

[embedding]
provider = "disabled"

[retrieval]
k = 5
"#,
        root.display()
    );

    let config_path = config_dir.join("ragbot.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ragbot(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_ragbot"))
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run ragbot binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_layout() {
    let (tmp, config) = setup_test_env();
    let (_, stderr, success) = run_ragbot(&config, &["init"]);
    assert!(success, "init failed: {}", stderr);

    let data = tmp.path().join("data");
    assert!(data.join("personalities.sqlite").exists());
    assert!(data.join("vector_dbs").is_dir());
    assert!(data.join("context_folder").is_dir());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config) = setup_test_env();
    assert!(run_ragbot(&config, &["init"]).2);
    let (_, stderr, success) = run_ragbot(&config, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_catalog_lists_every_provider() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, success) = run_ragbot(&config, &["catalog"]);
    assert!(success);
    for label in ["OpenAI", "Anthropic", "Groq", "Mistral AI", "Ollama"] {
        assert!(stdout.contains(label), "missing {} in:\n{}", label, stdout);
    }
    assert!(stdout.contains("llava"));
}

#[test]
fn test_personality_add_list_show() {
    let (tmp, config) = setup_test_env();
    let prompt_file = tmp.path().join("rag.txt");
    fs::write(&prompt_file, "Answer only from:\n{context}").unwrap();
    let rag_arg = format!("@{}", prompt_file.display());

    let (stdout, stderr, success) = run_ragbot(
        &config,
        &[
            "personality",
            "add",
            "tutor",
            "--title",
            "Patient Tutor",
            "--system-prompt",
            "You teach.",
            "--rag-prompt",
            &rag_arg,
        ],
    );
    assert!(success, "add failed: {}", stderr);
    assert!(stdout.contains("Added personality 1"));

    let (stdout, _, success) = run_ragbot(&config, &["personality", "list"]);
    assert!(success);
    assert_eq!(stdout.matches("tutor").count(), 1);
    assert!(stdout.contains("Patient Tutor"));

    let (stdout, _, success) = run_ragbot(&config, &["personality", "show", "1"]);
    assert!(success);
    assert!(stdout.contains("Answer only from:\n{context}"));
}

#[test]
fn test_personality_delete_missing_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_ragbot(&config, &["personality", "delete", "99"]);
    assert!(!success);
    assert!(stderr.contains("not found"), "stderr: {}", stderr);
}

#[test]
fn test_index_list_empty() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, success) = run_ragbot(&config, &["index", "list"]);
    assert!(success);
    assert!(stdout.contains("No vector indexes"));
}

#[test]
fn test_index_delete_missing_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_ragbot(&config, &["index", "delete", "ghost"]);
    assert!(!success);
    assert!(stderr.contains("vector index 'ghost' not found"), "stderr: {}", stderr);
}

#[test]
fn test_index_create_without_pdfs_creates_nothing() {
    let (tmp, config) = setup_test_env();
    let folder = tmp.path().join("data/context_folder/notes");
    fs::create_dir_all(&folder).unwrap();
    fs::write(folder.join("readme.txt"), "not a pdf").unwrap();

    let (_, stderr, success) = run_ragbot(&config, &["index", "create", "notes"]);
    assert!(!success);
    assert!(stderr.contains("no documents found"), "stderr: {}", stderr);
    assert!(!tmp.path().join("data/vector_dbs/notes").exists());
}

#[test]
fn test_index_create_missing_folder_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_ragbot(&config, &["index", "create", "absent"]);
    assert!(!success);
    assert!(stderr.contains("folder does not exist"), "stderr: {}", stderr);
}
