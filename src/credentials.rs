//! API key and AWS credential resolution.
//!
//! Environment first; if absent, an injected [`SecretPrompt`] may ask the
//! operator. An empty answer is a [`RagError::MissingCredential`].

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::io::Write;

use crate::error::RagError;

/// Interactive fallback for secrets that are not in the environment.
pub trait SecretPrompt: Send + Sync {
    /// Returns the operator's answer, or `None` if prompting is impossible.
    fn ask(&self, label: &str) -> Option<String>;
}

/// Asks on the controlling terminal without echoing the answer. Returns
/// `None` when stdin is not a TTY or the operator presses Ctrl-C.
pub struct TerminalPrompt;

impl SecretPrompt for TerminalPrompt {
    fn ask(&self, label: &str) -> Option<String> {
        if !atty::is(atty::Stream::Stdin) {
            return None;
        }
        eprint!("Enter your {}: ", label);
        std::io::stderr().flush().ok()?;
        let line = read_hidden_line();
        eprintln!();
        line.map(|l| l.trim().to_string())
    }
}

/// Restores cooked mode when dropped.
struct RawMode;

impl RawMode {
    fn enable() -> Option<Self> {
        terminal::enable_raw_mode().ok()?;
        Some(RawMode)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

#[derive(Debug, PartialEq, Eq)]
enum LineEdit {
    Continue,
    Done,
    Cancel,
}

/// Applies one key press to a hidden input line.
fn edit_line(line: &mut String, key: &KeyEvent) -> LineEdit {
    match key.code {
        KeyCode::Enter => LineEdit::Done,
        KeyCode::Esc => LineEdit::Cancel,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => LineEdit::Cancel,
        KeyCode::Backspace => {
            line.pop();
            LineEdit::Continue
        }
        KeyCode::Char(c) => {
            line.push(c);
            LineEdit::Continue
        }
        _ => LineEdit::Continue,
    }
}

/// Reads one line in raw mode, where the terminal does not echo.
fn read_hidden_line() -> Option<String> {
    let _raw = RawMode::enable()?;
    let mut line = String::new();
    loop {
        if let Event::Key(key) = event::read().ok()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match edit_line(&mut line, &key) {
                LineEdit::Continue => {}
                LineEdit::Done => return Some(line),
                LineEdit::Cancel => return None,
            }
        }
    }
}

/// Never prompts. Used by the HTTP server and tests.
pub struct NoPrompt;

impl SecretPrompt for NoPrompt {
    fn ask(&self, _label: &str) -> Option<String> {
        None
    }
}

/// Answers every prompt with a fixed value.
pub struct FixedSecret(pub String);

impl SecretPrompt for FixedSecret {
    fn ask(&self, _label: &str) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Reads `var` from the environment, falling back to `prompt`.
pub fn resolve_secret(var: &str, label: &str, prompt: &dyn SecretPrompt) -> Result<String> {
    if let Ok(value) = std::env::var(var) {
        let value = value.trim().to_string();
        if !value.is_empty() {
            return Ok(value);
        }
    }
    match prompt.ask(label) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(RagError::MissingCredential(format!("{} (set {})", label, var)).into()),
    }
}

/// Credentials for the S3 document source.
#[derive(Debug, Clone)]
pub struct AwsCredentials {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    pub fn resolve(prompt: &dyn SecretPrompt) -> Result<Self> {
        let region = resolve_secret("AWS_REGION_NAME", "AWS region", prompt)?;
        let access_key_id = resolve_secret("AWS_ACCESS_KEY", "AWS access key", prompt)?;
        let secret_access_key =
            resolve_secret("AWS_SECRET_ACCESS_KEY", "AWS secret access key", prompt)?;
        let session_token = std::env::var("AWS_SESSION_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());
        Ok(Self {
            region,
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify;

    #[test]
    fn prompt_fills_missing_env() {
        let value = resolve_secret(
            "RAGBOT_TEST_UNSET_VAR_1",
            "test key",
            &FixedSecret("  sk-123 ".into()),
        )
        .unwrap();
        assert_eq!(value, "sk-123");
    }

    #[test]
    fn empty_answer_is_missing_credential() {
        let err = resolve_secret("RAGBOT_TEST_UNSET_VAR_2", "test key", &FixedSecret(String::new()))
            .unwrap_err();
        assert!(matches!(
            classify(&err),
            Some(RagError::MissingCredential(_))
        ));
    }

    fn type_keys(keys: &[KeyEvent]) -> (String, LineEdit) {
        let mut line = String::new();
        let mut last = LineEdit::Continue;
        for key in keys {
            last = edit_line(&mut line, key);
            if last != LineEdit::Continue {
                break;
            }
        }
        (line, last)
    }

    #[test]
    fn hidden_line_collects_edits_until_enter() {
        let press = |code| KeyEvent::new(code, KeyModifiers::NONE);
        let (line, outcome) = type_keys(&[
            press(KeyCode::Char('s')),
            press(KeyCode::Char('k')),
            press(KeyCode::Char('x')),
            press(KeyCode::Backspace),
            press(KeyCode::Char('-')),
            press(KeyCode::Char('1')),
            press(KeyCode::Enter),
            press(KeyCode::Char('z')),
        ]);
        assert_eq!(outcome, LineEdit::Done);
        assert_eq!(line, "sk-1");
    }

    #[test]
    fn ctrl_c_cancels_hidden_line() {
        let (_, outcome) = type_keys(&[
            KeyEvent::new(KeyCode::Char('a'), KeyModifiers::NONE),
            KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL),
        ]);
        assert_eq!(outcome, LineEdit::Cancel);
    }

    #[test]
    fn no_prompt_is_missing_credential() {
        let err = resolve_secret("RAGBOT_TEST_UNSET_VAR_3", "test key", &NoPrompt).unwrap_err();
        assert!(err.to_string().contains("RAGBOT_TEST_UNSET_VAR_3"));
    }
}
