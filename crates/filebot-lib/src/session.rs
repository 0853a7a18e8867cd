//! Per-user interaction state.
//!
//! A session is idle until the user picks an option from the menu. Single
//! input options complete on the next file; merge first needs a file count
//! and then collects that many files. Every transition that fails leaves
//! the session exactly as it was.

use crate::data_structures::{FileUpload, Mode, SplitPolicy, UserId};
use crate::error::{FileBotError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Session {
    #[default]
    Idle,
    Split(SplitPolicy),
    Merge(MergeProgress),
    XlsxToTxt,
    XlsxToMsg,
    TxtToXlsx,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeProgress {
    AwaitingCount,
    Collecting {
        expected: usize,
        files: Vec<FileUpload>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    ModeSelected,
    AccumulatingInput,
}

/// Inputs ready for the transform engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    mode: Mode,
    inputs: Vec<FileUpload>,
}

impl Job {
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn inputs(&self) -> &[FileUpload] {
        &self.inputs
    }

    pub fn into_inputs(self) -> Vec<FileUpload> {
        self.inputs
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Pending { received: usize, expected: usize },
    Ready(Job),
}

impl Session {
    /// Session for a menu choice. Whatever was in progress is dropped by the caller
    /// replacing its session with this one.
    pub fn select(mode: Mode) -> Result<Session> {
        Ok(match mode {
            Mode::Split(policy) => {
                if policy.size() == 0 {
                    return Err(FileBotError::InvalidSplitPolicy(0));
                }
                Session::Split(policy)
            }
            Mode::Merge => Session::Merge(MergeProgress::AwaitingCount),
            Mode::XlsxToTxt => Session::XlsxToTxt,
            Mode::XlsxToMsg => Session::XlsxToMsg,
            Mode::TxtToXlsx => Session::TxtToXlsx,
        })
    }

    pub fn mode(&self) -> Option<Mode> {
        match self {
            Session::Idle => None,
            Session::Split(policy) => Some(Mode::Split(*policy)),
            Session::Merge(_) => Some(Mode::Merge),
            Session::XlsxToTxt => Some(Mode::XlsxToTxt),
            Session::XlsxToMsg => Some(Mode::XlsxToMsg),
            Session::TxtToXlsx => Some(Mode::TxtToXlsx),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        match self {
            Session::Idle => SessionPhase::Idle,
            Session::Merge(MergeProgress::Collecting { .. }) => SessionPhase::AccumulatingInput,
            _ => SessionPhase::ModeSelected,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Session::Idle)
    }

    pub fn pending_inputs(&self) -> &[FileUpload] {
        match self {
            Session::Merge(MergeProgress::Collecting { files, .. }) => files,
            _ => &[],
        }
    }

    pub fn expected_count(&self) -> Option<usize> {
        match self {
            Session::Merge(MergeProgress::Collecting { expected, .. }) => Some(*expected),
            _ => None,
        }
    }

    pub fn declare_count(&mut self, count: i64) -> Result<usize> {
        match self {
            Session::Merge(MergeProgress::AwaitingCount) => {
                if count <= 0 {
                    return Err(FileBotError::InvalidCount(count));
                }
                let expected = usize::try_from(count).map_err(|_| FileBotError::InvalidCount(count))?;
                *self = Session::Merge(MergeProgress::Collecting {
                    expected,
                    files: Vec::with_capacity(expected.min(64)),
                });
                Ok(expected)
            }
            Session::Merge(MergeProgress::Collecting { expected, .. }) => Err(
                FileBotError::InvalidTransition(format!(
                    "You already declared {} files. Send them, or Back to start over.",
                    expected
                )),
            ),
            _ => Err(FileBotError::InvalidTransition(
                "A file count is only needed for Merge. Choose Merge from the menu first.".to_string(),
            )),
        }
    }

    /// Accepts a file. When the session has what it needs, it hands back the
    /// job and returns to idle.
    pub fn receive(&mut self, file: FileUpload) -> Result<Step> {
        let mode = self.mode().ok_or_else(|| {
            FileBotError::InvalidTransition("Choose an option from the menu before sending a file.".to_string())
        })?;

        if file.kind() != mode.input_kind() {
            return Err(FileBotError::WrongFileType {
                expected: mode.input_kind(),
                actual: file.kind(),
            });
        }

        match self {
            Session::Merge(MergeProgress::AwaitingCount) => Err(FileBotError::InvalidTransition(
                "How many files do you want to merge? Send the number first.".to_string(),
            )),
            Session::Merge(MergeProgress::Collecting { expected, files }) => {
                if files.len() >= *expected {
                    return Err(FileBotError::TooManyFiles { expected: *expected });
                }
                files.push(file);
                if files.len() < *expected {
                    return Ok(Step::Pending {
                        received: files.len(),
                        expected: *expected,
                    });
                }
                let inputs = std::mem::take(files);
                *self = Session::Idle;
                Ok(Step::Ready(Job { mode, inputs }))
            }
            _ => {
                *self = Session::Idle;
                Ok(Step::Ready(Job {
                    mode,
                    inputs: vec![file],
                }))
            }
        }
    }

    /// Back to idle, discarding collected files. Returns whether anything was in progress.
    pub fn reset(&mut self) -> bool {
        let was_active = !self.is_idle();
        *self = Session::Idle;
        was_active
    }
}

/// One session per user, each behind its own lock so that events for the
/// same user run one at a time while different users do not wait on each other.
#[derive(Default)]
pub struct SessionTable {
    sessions: Mutex<HashMap<UserId, Arc<Mutex<Session>>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with exclusive access to the user's session.
    pub fn with_session<R>(&self, user_id: UserId, f: impl FnOnce(&mut Session) -> R) -> R {
        let slot = self.slot(user_id);
        let mut session = slot.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut session)
    }

    pub fn snapshot(&self, user_id: UserId) -> Session {
        self.with_session(user_id, |session| session.clone())
    }

    /// Drops a session the transport gave up on after inactivity.
    pub fn expire(&self, user_id: UserId) -> bool {
        let existing = self.table().get(&user_id).cloned();
        match existing {
            Some(slot) => slot.lock().unwrap_or_else(PoisonError::into_inner).reset(),
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        let slots: Vec<Arc<Mutex<Session>>> = self.table().values().cloned().collect();
        slots
            .iter()
            .filter(|slot| !slot.lock().unwrap_or_else(PoisonError::into_inner).is_idle())
            .count()
    }

    fn slot(&self, user_id: UserId) -> Arc<Mutex<Session>> {
        Arc::clone(self.table().entry(user_id).or_default())
    }

    fn table(&self) -> MutexGuard<'_, HashMap<UserId, Arc<Mutex<Session>>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
