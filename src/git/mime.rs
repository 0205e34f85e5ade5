//! Content classification.
//!
//! Strategies are tried in a fixed order and the first non-empty answer wins:
//! 1. In-process signature detection on the content buffer
//! 2. The external `file` tool fed the content on stdin
//! 3. The file name extension
//!
//! Classification never fails. A strategy that cannot run is skipped and the
//! terminal result for unknown content is the empty string.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::git::exec::run_tool;

#[async_trait]
pub trait MimeStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok("")` means "no opinion"; errors are logged and treated the same way.
    async fn detect(&self, file_name: Option<&str>, data: &[u8]) -> Result<String>;
}

/// Buffer signature matching
pub struct SignatureStrategy;

#[async_trait]
impl MimeStrategy for SignatureStrategy {
    fn name(&self) -> &'static str {
        "signature"
    }

    async fn detect(&self, _file_name: Option<&str>, data: &[u8]) -> Result<String> {
        if data.is_empty() {
            return Ok(String::new());
        }
        Ok(infer::get(data)
            .map(|kind| strip_parameters(kind.mime_type()).to_string())
            .unwrap_or_default())
    }
}

/// `file -b --mime -`, optionally against a specific magic database
pub struct FileCommandStrategy {
    program: String,
    magic_db: Option<PathBuf>,
    timeout: Duration,
}

impl FileCommandStrategy {
    pub fn new(program: impl Into<String>, magic_db: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            magic_db,
            timeout,
        }
    }
}

#[async_trait]
impl MimeStrategy for FileCommandStrategy {
    fn name(&self) -> &'static str {
        "file-command"
    }

    async fn detect(&self, _file_name: Option<&str>, data: &[u8]) -> Result<String> {
        if data.is_empty() {
            return Ok(String::new());
        }

        let mut cmd = Command::new(&self.program);
        cmd.arg("-b").arg("--mime");
        if let Some(db) = &self.magic_db {
            cmd.arg("-m").arg(db);
        }
        cmd.arg("-");

        let output = run_tool(cmd, Some(data), self.timeout).await?;
        if !output.status.success() {
            return Err(CoreError::ToolExecution(format!("{} exited with {}", self.program, output.status)));
        }

        let mime = String::from_utf8_lossy(&output.stdout);
        let mime = strip_parameters(mime.trim());
        // Anything without a type/subtype shape is an error message, not a type
        if mime.find('/').is_some_and(|pos| pos > 0) {
            Ok(mime.to_string())
        } else {
            Ok(String::new())
        }
    }
}

/// Fixed extension table for images
pub struct ExtensionStrategy;

#[async_trait]
impl MimeStrategy for ExtensionStrategy {
    fn name(&self) -> &'static str {
        "extension"
    }

    async fn detect(&self, file_name: Option<&str>, _data: &[u8]) -> Result<String> {
        Ok(extension_mime(file_name.unwrap_or("")).to_string())
    }
}

pub fn extension_mime(file_name: &str) -> &'static str {
    let Some((_, ext)) = file_name.rsplit_once('.') else {
        return "";
    };
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" | "jpe" => "image/jpeg",
        "gif" => "image/gif",
        "png" => "image/png",
        _ => "",
    }
}

fn strip_parameters(mime: &str) -> &str {
    mime.split(';').next().unwrap_or("").trim()
}

pub struct ContentClassifier {
    strategies: Vec<Box<dyn MimeStrategy>>,
}

impl ContentClassifier {
    pub fn new(strategies: Vec<Box<dyn MimeStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut strategies: Vec<Box<dyn MimeStrategy>> = Vec::new();
        if config.signature_detection {
            strategies.push(Box::new(SignatureStrategy));
        }
        if let Some(program) = &config.file_command {
            strategies.push(Box::new(FileCommandStrategy::new(
                program.clone(),
                config.magic_db.clone(),
                config.tool_timeout(),
            )));
        }
        if let (Some(db), None) = (&config.magic_db, &config.file_command) {
            tracing::warn!(magic_db = %db.display(), "magic_db is only read by the file command, which is disabled");
        }
        strategies.push(Box::new(ExtensionStrategy));
        Self::new(strategies)
    }

    #[cfg(test)]
    fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn classify(&self, file_name: Option<&str>, data: &[u8]) -> String {
        for strategy in &self.strategies {
            match strategy.detect(file_name, data).await {
                Ok(mime) if !mime.is_empty() => {
                    tracing::debug!(strategy = strategy.name(), %mime, "classified content");
                    return mime;
                }
                Ok(_) => {}
                Err(CoreError::ToolUnavailable(tool)) => {
                    tracing::debug!(strategy = strategy.name(), %tool, "strategy unavailable");
                }
                Err(e) => {
                    tracing::warn!(strategy = strategy.name(), error = %e, "mime strategy failed");
                }
            }
        }
        String::new()
    }

    /// Type group only, e.g. `image` for `image/png`.
    pub fn short_form(mime: &str) -> &str {
        mime.split('/').next().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01\x08\x06\0\0\0";

    fn extension_only() -> ContentClassifier {
        let config = Config {
            signature_detection: false,
            file_command: None,
            ..Config::default()
        };
        ContentClassifier::from_config(&config)
    }

    #[tokio::test]
    async fn falls_through_to_extension() {
        let classifier = extension_only();
        assert_eq!(classifier.classify(Some("photo.JPG"), b"not really a jpeg").await, "image/jpeg");
        assert_eq!(classifier.classify(Some("a.b.gif"), b"x").await, "image/gif");
        assert_eq!(classifier.classify(Some("logo.png"), b"x").await, "image/png");
        assert_eq!(classifier.classify(Some("shot.jpe"), b"x").await, "image/jpeg");
    }

    #[tokio::test]
    async fn unknown_is_empty() {
        let classifier = extension_only();
        assert_eq!(classifier.classify(Some("README"), b"text").await, "");
        assert_eq!(classifier.classify(Some("main.rs"), b"fn main() {}").await, "");
        assert_eq!(classifier.classify(None, b"text").await, "");
    }

    #[tokio::test]
    async fn signature_beats_extension() {
        let strategies: Vec<Box<dyn MimeStrategy>> = vec![Box::new(SignatureStrategy), Box::new(ExtensionStrategy)];
        let classifier = ContentClassifier::new(strategies);
        assert_eq!(classifier.classify(Some("misnamed.gif"), PNG_HEADER).await, "image/png");
    }

    #[tokio::test]
    async fn missing_tool_falls_back() {
        let strategies: Vec<Box<dyn MimeStrategy>> = vec![
            Box::new(FileCommandStrategy::new("blobview-no-such-file-tool", None, Duration::from_secs(5))),
            Box::new(ExtensionStrategy),
        ];
        let classifier = ContentClassifier::new(strategies);
        assert_eq!(classifier.classify(Some("cat.gif"), b"GIF89a").await, "image/gif");
    }

    #[tokio::test]
    async fn file_command_strips_parameters() {
        if !crate::git::exec::tool_installed("file") {
            return;
        }
        let strategy = FileCommandStrategy::new("file", None, Duration::from_secs(10));
        let mime = strategy.detect(None, b"plain words\n").await.unwrap();
        assert_eq!(mime, "text/plain");
    }

    #[test]
    fn short_form_and_parameters() {
        assert_eq!(ContentClassifier::short_form("image/png"), "image");
        assert_eq!(ContentClassifier::short_form(""), "");
        assert_eq!(strip_parameters("text/plain; charset=us-ascii"), "text/plain");
        assert_eq!(extension_mime("noext"), "");
        assert_eq!(extension_mime("archive.tar.gz"), "");
    }

    #[test]
    fn magic_db_only_reaches_file_command() {
        let with_tool = Config {
            magic_db: Some(PathBuf::from("/usr/share/misc/magic.mgc")),
            file_command: Some("file".to_string()),
            ..Config::default()
        };
        assert_eq!(
            ContentClassifier::from_config(&with_tool).strategy_names(),
            vec!["signature", "file-command", "extension"]
        );

        let without_tool = Config {
            file_command: None,
            ..with_tool
        };
        assert_eq!(
            ContentClassifier::from_config(&without_tool).strategy_names(),
            vec!["signature", "extension"]
        );
    }
}
