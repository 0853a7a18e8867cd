use crate::aggregator::{ReportSink, UsageAggregator, UsageReport, UsageStats};
use crate::config::Config;
use crate::data_structures::{
    Artifact, Entitlement, Event, FileContent, FileUpload, Mode, Plan, Response, UserId,
};
use crate::entitlements::EntitlementStore;
use crate::error::{FileBotError, Result};
use crate::gate::{AccessDecision, AccessGate, AccessGrant};
use crate::scheduler::{ReportSchedule, ReportScheduler, SchedulerState};
use crate::session::{Job, Session, SessionTable, Step};
use crate::transform;
use crate::trial::TrialCounter;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, instrument, warn};

pub const WELCOME_MESSAGE: &str = "Welcome! Choose an option from the menu to get started.";

/// Owns every in-process store and turns transport events into responses.
pub struct FileBotService {
    store: Arc<EntitlementStore>,
    trials: Arc<TrialCounter>,
    gate: AccessGate,
    sessions: SessionTable,
    aggregator: UsageAggregator,
    scheduler: Mutex<ReportScheduler>,
    known_users: Mutex<HashSet<UserId>>,
    warning_window: Duration,
    message_chunk_chars: usize,
}

impl FileBotService {
    pub fn new(config: &Config, store: Arc<EntitlementStore>, now: DateTime<Utc>) -> Self {
        let trials = Arc::new(TrialCounter::new(config.trial_limit));
        let schedule = ReportSchedule::daily(config.report_hour, config.report_minute);

        Self {
            gate: AccessGate::new(Arc::clone(&store), Arc::clone(&trials)),
            store,
            trials,
            sessions: SessionTable::new(),
            aggregator: UsageAggregator::new(),
            scheduler: Mutex::new(ReportScheduler::new(schedule, now)),
            known_users: Mutex::new(HashSet::new()),
            warning_window: config.expiry_warning_window(),
            message_chunk_chars: config.message_chunk_chars.max(1),
        }
    }

    pub fn store(&self) -> &EntitlementStore {
        &self.store
    }

    pub fn trials(&self) -> &TrialCounter {
        &self.trials
    }

    pub fn session(&self, user_id: UserId) -> Session {
        self.sessions.snapshot(user_id)
    }

    pub fn usage(&self) -> UsageStats {
        self.aggregator.snapshot()
    }

    pub fn schedule(&self) -> ReportSchedule {
        self.lock_scheduler().schedule()
    }

    /// Handles one user event. Events for the same user are processed one at
    /// a time; errors come back as a rendered message, never as `Err`.
    #[instrument(skip(self, event), fields(kind = event.kind()))]
    pub fn handle(&self, user_id: UserId, event: Event, now: DateTime<Utc>) -> Response {
        self.note_contact(user_id);

        match event {
            Event::Status => Response::allowed(self.gate.status(user_id, now).to_string()),
            Event::Plans => Response::allowed(plans_message()),
            Event::Start => match self.gate.authorize(user_id, now) {
                AccessDecision::Allowed(grant) => Response::allowed(with_trial_note(WELCOME_MESSAGE, grant)),
                AccessDecision::Denied { reason } => Response::denied(reason),
            },
            Event::MenuSelect(mode) => self.sessions.with_session(user_id, |session| {
                self.select(user_id, session, mode, now)
            }),
            Event::CountDeclared(count) => self.sessions.with_session(user_id, |session| {
                match session.declare_count(count) {
                    Ok(expected) => Response::allowed(format!(
                        "Send the {} files in the order they should be merged.",
                        expected
                    )),
                    Err(err) => rejected(user_id, err),
                }
            }),
            Event::FileReceived(file) => self.sessions.with_session(user_id, |session| {
                self.receive(user_id, session, file, now)
            }),
            Event::Back => self.sessions.with_session(user_id, |session| {
                if session.reset() {
                    debug!(user_id, "Session cancelled");
                }
                Response::allowed("Back to the main menu.")
            }),
        }
    }

    /// Transport gave up waiting on this user.
    pub fn expire_session(&self, user_id: UserId) -> bool {
        self.sessions.expire(user_id)
    }

    /// Reports and resets the period counters. Called from the same loop that
    /// delivers user events.
    #[instrument(skip(self, sink))]
    pub fn period_boundary(&self, now: DateTime<Utc>, sink: &dyn ReportSink) -> Option<UsageReport> {
        if !self.lock_scheduler().begin() {
            warn!("Report already in progress, skipping boundary");
            return None;
        }

        // The scheduler lock is not held while the sink runs.
        let report = self
            .aggregator
            .on_period_boundary(now, &self.store, self.warning_window, sink);

        let mut scheduler = self.lock_scheduler();
        scheduler.complete(now);
        info!(
            at = %report.generated_at(),
            files = report.files_processed(),
            new_users = report.new_users(),
            next = %scheduler.state().next_report,
            "Period closed"
        );
        Some(report)
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.lock_scheduler().state().clone()
    }

    pub fn grant(&self, user_id: UserId, days: Option<u32>, plan: Option<Plan>, now: DateTime<Utc>) -> Result<Entitlement> {
        let plan = plan.unwrap_or(Plan::Pro);
        let days = days.unwrap_or_else(|| plan.default_days());
        self.store.grant(user_id, days, plan, now)
    }

    pub fn extend(&self, user_id: UserId, days: u32, now: DateTime<Utc>) -> Result<Entitlement> {
        self.store.extend(user_id, days, now)
    }

    pub fn revoke(&self, user_id: UserId) -> Result<bool> {
        self.store.revoke(user_id)
    }

    /// Subscriber list packed into chat-sized messages.
    pub fn list_messages(&self, now: DateTime<Utc>) -> Vec<String> {
        let entitlements = self.store.list();
        if entitlements.is_empty() {
            return vec!["No active subscribers.".to_string()];
        }

        let mut lines = vec!["Active Subscribers:".to_string()];
        lines.extend(entitlements.iter().map(|e| {
            format!(
                "- User ID: {} | Plan: {} | Days Left: {} | Expires: {}",
                e.user_id(),
                e.plan(),
                e.days_left(now),
                e.expires_at().format("%Y-%m-%d")
            )
        }));
        transform::pack_messages(&lines, self.message_chunk_chars)
    }

    fn lock_scheduler(&self) -> MutexGuard<'_, ReportScheduler> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn note_contact(&self, user_id: UserId) {
        let first_contact = self
            .known_users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id);
        if first_contact {
            self.aggregator.record_new_user(user_id);
        }
    }

    fn select(&self, user_id: UserId, session: &mut Session, mode: Mode, now: DateTime<Utc>) -> Response {
        let grant = match self.gate.authorize(user_id, now) {
            AccessDecision::Allowed(grant) => grant,
            AccessDecision::Denied { reason } => return Response::denied(reason),
        };

        let next = match Session::select(mode) {
            Ok(next) => next,
            Err(err) => return rejected(user_id, err),
        };

        if session.reset() {
            debug!(user_id, "Previous selection discarded");
        }
        *session = next;
        Response::allowed(with_trial_note(&select_prompt(mode), grant))
    }

    // The gate runs before any validation, so a rejected file still costs a
    // trial use. The transition is tried on a copy so that a rejected file
    // leaves the live session untouched.
    fn receive(&self, user_id: UserId, session: &mut Session, file: FileUpload, now: DateTime<Utc>) -> Response {
        if let AccessDecision::Denied { reason } = self.gate.authorize(user_id, now) {
            return Response::denied(reason);
        }

        let mut next = session.clone();
        let step = match next.receive(file) {
            Ok(step) => step,
            Err(err) => return rejected(user_id, err),
        };
        *session = next;

        match step {
            Step::Pending { received, expected } => Response::allowed(format!(
                "Received file {} of {}.",
                received, expected
            )),
            Step::Ready(job) => self.complete(user_id, job),
        }
    }

    fn complete(&self, user_id: UserId, job: Job) -> Response {
        let mode = job.mode();
        let input_count = job.inputs().len();

        match self.execute(job) {
            Ok(response) => {
                for _ in 0..input_count {
                    self.aggregator.record_file_processed();
                }
                self.aggregator.record_feature(mode.feature());
                info!(user_id, feature = %mode.feature(), inputs = input_count, "Transformation complete");
                response
            }
            Err(err) => rejected(user_id, err),
        }
    }

    fn execute(&self, job: Job) -> Result<Response> {
        let mode = job.mode();
        let mut inputs = job.into_inputs();

        match mode {
            Mode::Split(policy) => {
                let file = first(&inputs)?;
                let groups = transform::split(&upload_lines(file), policy)?;
                let stem = file.stem();
                let artifacts: Vec<Artifact> = groups
                    .into_iter()
                    .enumerate()
                    .map(|(i, lines)| Artifact::text(format!("{}_part{}.txt", stem, i + 1), lines))
                    .collect();
                Ok(Response::complete(
                    vec![format!("Split into {} file(s) ({}).", artifacts.len(), policy)],
                    artifacts,
                ))
            }
            Mode::Merge => {
                if inputs.iter().all(|f| f.sequence().is_some()) {
                    inputs.sort_by_key(FileUpload::sequence);
                }
                let contents: Vec<Vec<String>> = inputs.iter().map(upload_lines).collect();
                let merged = transform::merge(&contents)?;
                let count = merged.len();
                Ok(Response::complete(
                    vec![format!("Merged {} files into {} unique lines.", inputs.len(), count)],
                    vec![Artifact::text("merged.txt", merged)],
                ))
            }
            Mode::TxtToXlsx => {
                let file = first(&inputs)?;
                let lines = non_empty(transform::normalize(&upload_lines(file)))?;
                Ok(Response::complete(
                    vec![format!("Converted {} lines to a spreadsheet.", lines.len())],
                    vec![Artifact::sheet(format!("{}.xlsx", file.stem()), transform::tabularize(&lines))],
                ))
            }
            Mode::XlsxToTxt => {
                let file = first(&inputs)?;
                let lines = non_empty(transform::compact(&upload_lines(file)))?;
                Ok(Response::complete(
                    vec![format!("Converted {} rows to text.", lines.len())],
                    vec![Artifact::text(format!("{}.txt", file.stem()), lines)],
                ))
            }
            Mode::XlsxToMsg => {
                let file = first(&inputs)?;
                let lines = non_empty(transform::compact(&upload_lines(file)))?;
                Ok(Response::complete(
                    transform::pack_messages(&lines, self.message_chunk_chars),
                    Vec::new(),
                ))
            }
        }
    }
}

fn upload_lines(file: &FileUpload) -> Vec<String> {
    match file.content() {
        FileContent::Text(text) => text.lines().map(str::to_string).collect(),
        FileContent::Sheet(rows) => transform::detabularize(rows),
    }
}

fn first(inputs: &[FileUpload]) -> Result<&FileUpload> {
    inputs.first().ok_or(FileBotError::EmptyInput)
}

fn non_empty(lines: Vec<String>) -> Result<Vec<String>> {
    if lines.is_empty() {
        Err(FileBotError::EmptyInput)
    } else {
        Ok(lines)
    }
}

fn rejected(user_id: UserId, err: FileBotError) -> Response {
    debug!(user_id, error = %err, "Event rejected");
    Response::rejected(err.user_message())
}

fn select_prompt(mode: Mode) -> String {
    match mode {
        Mode::Split(policy) => format!("{} ({}): send the .txt file.", mode.label(), policy),
        Mode::Merge => format!("{}: how many files do you want to merge?", mode.label()),
        Mode::XlsxToTxt | Mode::XlsxToMsg => format!("{}: send the .xlsx file.", mode.label()),
        Mode::TxtToXlsx => format!("{}: send the .txt file.", mode.label()),
    }
}

fn with_trial_note(message: &str, grant: AccessGrant) -> String {
    match grant {
        AccessGrant::Subscribed(_) => message.to_string(),
        AccessGrant::Trial { used, limit } => {
            format!("{}\n(Trial use {}/{})", message, used, limit)
        }
    }
}

fn plans_message() -> String {
    let mut message = String::from("Available plans:");
    for plan in [Plan::Pro, Plan::Premium] {
        message.push_str("\n- ");
        message.push_str(plan.description());
    }
    message
}
