use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub type UserId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Trial,
    Pro,
    Premium,
}

impl Plan {
    pub fn name(&self) -> &'static str {
        match self {
            Plan::Trial => "trial",
            Plan::Pro => "pro",
            Plan::Premium => "premium",
        }
    }

    /// Length of a grant when the administrator does not give one.
    pub fn default_days(&self) -> u32 {
        match self {
            Plan::Trial => 7,
            Plan::Pro => 30,
            Plan::Premium => 90,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Plan::Trial => "Trial: 7 days",
            Plan::Pro => "Pro: 30 days",
            Plan::Premium => "Premium: 90 days",
        }
    }

    pub fn from_name(name: &str) -> Option<Plan> {
        match name.trim().to_ascii_lowercase().as_str() {
            "trial" => Some(Plan::Trial),
            "pro" => Some(Plan::Pro),
            "premium" => Some(Plan::Premium),
            _ => None,
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    user_id: UserId,
    plan: Plan,
    expires_at: DateTime<Utc>,
}

impl Entitlement {
    pub fn new(user_id: UserId, plan: Plan, expires_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            plan,
            expires_at,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn plan(&self) -> Plan {
        self.plan
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Whole days left, rounded up so that an entitlement expiring later today reads as one day.
    pub fn days_left(&self, now: DateTime<Utc>) -> i64 {
        let remaining = self.expires_at - now;
        if remaining <= Duration::zero() {
            return 0;
        }
        let days = remaining.num_days();
        if remaining > Duration::days(days) {
            days + 1
        } else {
            days
        }
    }

    pub fn expires_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        let remaining = self.expires_at - now;
        remaining >= Duration::zero() && remaining <= window
    }
}

/// A completed transformation kind, as counted in the periodic report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Split,
    Merge,
    XlsxTxt,
    XlsxMsg,
    TxtXlsx,
}

impl Feature {
    pub const ALL: [Feature; 5] = [
        Feature::Split,
        Feature::Merge,
        Feature::XlsxTxt,
        Feature::XlsxMsg,
        Feature::TxtXlsx,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Split => "split",
            Feature::Merge => "merge",
            Feature::XlsxTxt => "xlsx_txt",
            Feature::XlsxMsg => "xlsx_msg",
            Feature::TxtXlsx => "txt_xlsx",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitPolicy {
    ByCount(usize),
    ByLines(usize),
}

impl SplitPolicy {
    pub fn size(&self) -> usize {
        match self {
            SplitPolicy::ByCount(n) | SplitPolicy::ByLines(n) => *n,
        }
    }
}

impl fmt::Display for SplitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitPolicy::ByCount(n) => write!(f, "{} parts", n),
            SplitPolicy::ByLines(k) => write!(f, "{} lines per part", k),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Text,
    Sheet,
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::Text => f.write_str("text (.txt)"),
            FileKind::Sheet => f.write_str("spreadsheet (.xlsx)"),
        }
    }
}

/// Transformation selected from the menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Split(SplitPolicy),
    Merge,
    XlsxToTxt,
    XlsxToMsg,
    TxtToXlsx,
}

impl Mode {
    pub fn feature(&self) -> Feature {
        match self {
            Mode::Split(_) => Feature::Split,
            Mode::Merge => Feature::Merge,
            Mode::XlsxToTxt => Feature::XlsxTxt,
            Mode::XlsxToMsg => Feature::XlsxMsg,
            Mode::TxtToXlsx => Feature::TxtXlsx,
        }
    }

    pub fn input_kind(&self) -> FileKind {
        match self {
            Mode::Split(_) | Mode::Merge | Mode::TxtToXlsx => FileKind::Text,
            Mode::XlsxToTxt | Mode::XlsxToMsg => FileKind::Sheet,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Mode::Split(_) => "Split file",
            Mode::Merge => "Merge files",
            Mode::XlsxToTxt => "XLSX to TXT",
            Mode::XlsxToMsg => "XLSX to messages",
            Mode::TxtToXlsx => "TXT to XLSX",
        }
    }
}

pub type Row = Vec<String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Text(String),
    Sheet(Vec<Row>),
}

/// A file handed in by the transport, already read into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    name: String,
    content: FileContent,
    sequence: Option<u64>,
}

impl FileUpload {
    pub fn text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: FileContent::Text(text.into()),
            sequence: None,
        }
    }

    pub fn sheet(name: impl Into<String>, rows: Vec<Row>) -> Self {
        Self {
            name: name.into(),
            content: FileContent::Sheet(rows),
            sequence: None,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &FileContent {
        &self.content
    }

    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn kind(&self) -> FileKind {
        match self.content {
            FileContent::Text(_) => FileKind::Text,
            FileContent::Sheet(_) => FileKind::Sheet,
        }
    }

    /// File name without directory or extension, used to name outputs.
    pub fn stem(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("output")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactContent {
    Text(Vec<String>),
    Sheet(Vec<Row>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    filename: String,
    content: ArtifactContent,
}

impl Artifact {
    pub fn text(filename: impl Into<String>, lines: Vec<String>) -> Self {
        Self {
            filename: filename.into(),
            content: ArtifactContent::Text(lines),
        }
    }

    pub fn sheet(filename: impl Into<String>, rows: Vec<Row>) -> Self {
        Self {
            filename: filename.into(),
            content: ArtifactContent::Sheet(rows),
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content(&self) -> &ArtifactContent {
        &self.content
    }

    pub fn lines(&self) -> Vec<String> {
        match &self.content {
            ArtifactContent::Text(lines) => lines.clone(),
            ArtifactContent::Sheet(rows) => crate::transform::detabularize(rows),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Start,
    MenuSelect(Mode),
    FileReceived(FileUpload),
    CountDeclared(i64),
    Back,
    Status,
    Plans,
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Start => "start",
            Event::MenuSelect(_) => "menu_select",
            Event::FileReceived(_) => "file_received",
            Event::CountDeclared(_) => "count_declared",
            Event::Back => "back",
            Event::Status => "status",
            Event::Plans => "plans",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Allowed,
    Denied,
    Complete,
    Rejected,
}

/// What the transport should deliver back to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    outcome: Outcome,
    messages: Vec<String>,
    artifacts: Vec<Artifact>,
}

impl Response {
    pub fn new(outcome: Outcome, messages: Vec<String>, artifacts: Vec<Artifact>) -> Self {
        Self {
            outcome,
            messages,
            artifacts,
        }
    }

    pub fn allowed(message: impl Into<String>) -> Self {
        Self::new(Outcome::Allowed, vec![message.into()], Vec::new())
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self::new(Outcome::Denied, vec![message.into()], Vec::new())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(Outcome::Rejected, vec![message.into()], Vec::new())
    }

    pub fn complete(messages: Vec<String>, artifacts: Vec<Artifact>) -> Self {
        Self::new(Outcome::Complete, messages, artifacts)
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn message(&self) -> &str {
        self.messages.first().map(String::as_str).unwrap_or("")
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }
}
