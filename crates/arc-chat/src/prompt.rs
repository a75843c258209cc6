//! System prompt assembly
//!
//! The system turn of every history is rebuilt from a static prompt plus the
//! notes the bot has recorded in its notebook, so edits to either take effect
//! on the next exchange.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

const NOTES_HEADER: &str = "Important things recorded in earlier conversations:";

/// A remembered fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: u64,
    pub content: String,
    #[serde(default)]
    pub context: Option<String>,
    /// Unix timestamp (seconds)
    pub created_at: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NotebookFile {
    #[serde(default)]
    notes: Vec<Note>,
}

/// Notes persisted as `{"notes": [...]}`
#[derive(Debug, Clone)]
pub struct Notebook {
    path: PathBuf,
    notes: Vec<Note>,
}

impl Notebook {
    /// Load the notebook at `path`; a missing or unreadable file yields an
    /// empty notebook.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let notes = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<NotebookFile>(&raw) {
                Ok(file) => file.notes,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Corrupt notebook, ignoring notes");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, notes })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Record a note and persist the notebook
    pub async fn add_note(
        &mut self,
        content: impl Into<String>,
        context: Option<String>,
    ) -> Result<&Note> {
        let id = self.notes.iter().map(|n| n.id).max().unwrap_or(0) + 1;
        self.notes.push(Note {
            id,
            content: content.into(),
            context,
            created_at: chrono::Utc::now().timestamp(),
        });
        self.save().await?;
        Ok(&self.notes[self.notes.len() - 1])
    }

    /// Forget every note and persist the empty notebook
    pub async fn clear(&mut self) -> Result<()> {
        self.notes.clear();
        self.save().await
    }

    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = NotebookFile {
            notes: self.notes.clone(),
        };
        tokio::fs::write(&self.path, serde_json::to_string_pretty(&file)?).await?;
        Ok(())
    }

    /// Render the notes as a block for the system prompt, `""` when empty
    pub fn render(&self) -> String {
        if self.notes.is_empty() {
            return String::new();
        }

        let mut out = String::from(NOTES_HEADER);
        for note in &self.notes {
            out.push_str("\n- ");
            out.push_str(&note.content);
            if let Some(context) = note.context.as_deref().filter(|c| !c.is_empty()) {
                out.push_str("\n  Context when recorded: ");
                out.push_str(context);
            }
            if let Some(at) = Local.timestamp_opt(note.created_at, 0).single() {
                out.push_str(&format!(" (recorded {})", at.format("%Y-%m-%d %H:%M:%S")));
            }
        }
        out
    }
}

/// Where the static part of the system prompt comes from
#[derive(Debug, Clone)]
pub enum PromptSource {
    Text(String),
    File(PathBuf),
}

/// Builds the system turn content
#[derive(Debug, Clone)]
pub struct SystemPrompt {
    source: PromptSource,
    notebook_path: Option<PathBuf>,
}

impl SystemPrompt {
    pub fn new(source: PromptSource) -> Self {
        Self {
            source,
            notebook_path: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(PromptSource::Text(text.into()))
    }

    /// Append notes from the notebook at `path` when rendering
    pub fn with_notebook(mut self, path: impl Into<PathBuf>) -> Self {
        self.notebook_path = Some(path.into());
        self
    }

    /// Current system prompt text. Read failures are logged and yield the
    /// part that could be read.
    pub async fn render(&self) -> String {
        let base = match &self.source {
            PromptSource::Text(text) => text.trim().to_string(),
            PromptSource::File(path) => match tokio::fs::read_to_string(path).await {
                Ok(text) => text.trim().to_string(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not read system prompt");
                    String::new()
                }
            },
        };

        let notes = match &self.notebook_path {
            Some(path) => match Notebook::load(path).await {
                Ok(notebook) => notebook.render(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not read notebook");
                    String::new()
                }
            },
            None => String::new(),
        };

        match (base.is_empty(), notes.is_empty()) {
            (_, true) => base,
            (true, false) => notes,
            (false, false) => format!("{base}\n\n{notes}"),
        }
    }
}
