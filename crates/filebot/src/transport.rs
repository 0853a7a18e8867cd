//! Line-delimited JSON stand-in for the chat transport.
//!
//! Each stdin line is one event, each stdout line one response. Uploaded
//! files are referenced by path; `.tsv` is read as a sheet and anything else
//! as text. Produced files are written under the output directory.

use anyhow::{anyhow, Context, Result};
use filebot_core::{
    Artifact, ArtifactContent, Event, FileUpload, Mode, Outcome, Response, Row, SplitPolicy,
    UserId,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
pub struct WireEvent {
    pub user_id: UserId,
    #[serde(flatten)]
    pub action: WireAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireMode {
    Split,
    Merge,
    XlsxTxt,
    XlsxMsg,
    TxtXlsx,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WireAction {
    Start,
    Status,
    Plans,
    Back,
    MenuSelect {
        mode: WireMode,
        #[serde(default)]
        parts: Option<usize>,
        #[serde(default)]
        lines: Option<usize>,
    },
    Count {
        count: i64,
    },
    File {
        path: PathBuf,
        #[serde(default)]
        sequence: Option<u64>,
    },
    /// The transport stopped waiting for this user.
    Expire,
    Grant {
        target: UserId,
        #[serde(default)]
        days: Option<u32>,
        #[serde(default)]
        plan: Option<String>,
    },
    Extend {
        target: UserId,
        days: u32,
    },
    Revoke {
        target: UserId,
    },
    List,
}

impl WireAction {
    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            WireAction::Grant { .. }
                | WireAction::Extend { .. }
                | WireAction::Revoke { .. }
                | WireAction::List
        )
    }
}

#[derive(Debug, Serialize)]
pub struct WireResponse {
    pub user_id: UserId,
    pub outcome: Outcome,
    pub messages: Vec<String>,
    pub files: Vec<PathBuf>,
}

impl WireResponse {
    pub fn message(user_id: UserId, outcome: Outcome, message: impl Into<String>) -> Self {
        Self {
            user_id,
            outcome,
            messages: vec![message.into()],
            files: Vec::new(),
        }
    }
}

pub fn mode_for(mode: WireMode, parts: Option<usize>, lines: Option<usize>, default_split: SplitPolicy) -> Mode {
    match mode {
        WireMode::Split => match (parts, lines) {
            (Some(n), _) => Mode::Split(SplitPolicy::ByCount(n)),
            (None, Some(k)) => Mode::Split(SplitPolicy::ByLines(k)),
            (None, None) => Mode::Split(default_split),
        },
        WireMode::Merge => Mode::Merge,
        WireMode::XlsxTxt => Mode::XlsxToTxt,
        WireMode::XlsxMsg => Mode::XlsxToMsg,
        WireMode::TxtXlsx => Mode::TxtToXlsx,
    }
}

/// Reads an uploaded file into memory.
pub fn read_upload(path: &Path, sequence: Option<u64>) -> Result<Event> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("Invalid file path: {}", path.display()))?
        .to_string();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read upload: {}", path.display()))?;

    let upload = if extension == "tsv" {
        FileUpload::sheet(name, parse_rows(&content))
    } else {
        FileUpload::text(name, content)
    };

    Ok(Event::FileReceived(match sequence {
        Some(sequence) => upload.with_sequence(sequence),
        None => upload,
    }))
}

fn parse_rows(content: &str) -> Vec<Row> {
    content
        .lines()
        .map(|line| line.split('\t').map(str::to_string).collect())
        .collect()
}

/// Writes the response's files under `output_dir/<user>/` and returns the wire form.
pub fn deliver(user_id: UserId, response: &Response, output_dir: &Path) -> Result<WireResponse> {
    let mut files = Vec::new();

    if !response.artifacts().is_empty() {
        let dir = output_dir.join(user_id.to_string());
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;

        for artifact in response.artifacts() {
            files.push(write_artifact(&dir, artifact)?);
        }
    }

    Ok(WireResponse {
        user_id,
        outcome: response.outcome(),
        messages: response.messages().to_vec(),
        files,
    })
}

// Spreadsheets are written as tab-separated text; real .xlsx encoding belongs
// to the chat transport.
fn write_artifact(dir: &Path, artifact: &Artifact) -> Result<PathBuf> {
    let (path, body) = match artifact.content() {
        ArtifactContent::Text(lines) => (dir.join(artifact.filename()), lines.join("\n")),
        ArtifactContent::Sheet(rows) => {
            let body = rows
                .iter()
                .map(|row| row.join("\t"))
                .collect::<Vec<_>>()
                .join("\n");
            (dir.join(artifact.filename()).with_extension("tsv"), body)
        }
    };

    fs::write(&path, body).with_context(|| format!("Failed to write output: {}", path.display()))?;
    Ok(path)
}
