use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use filebot_core::config::DEFAULT_CONFIG_PATH;
use filebot_core::prelude::*;
use filebot_core::{EntitlementStore, FileSink, LogSink, ReportSink};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

mod transport;
use transport::*;

#[derive(Parser, Debug)]
#[clap(author = "Red", version, about)]
struct Args {
    #[arg(short = 'v')]
    verbose: bool,

    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[arg(short = 's', long = "store")]
    store: Option<String>,

    #[arg(long = "trial-limit")]
    trial_limit: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process events from stdin and write responses to stdout
    Serve {
        #[arg(short = 'o', long = "output-dir", default_value = "out")]
        output_dir: PathBuf,
    },
    /// Grant or replace a subscription
    Grant {
        user_id: UserId,
        #[arg(short = 'd', long = "days")]
        days: Option<u32>,
        #[arg(short = 'p', long = "plan", default_value = "pro")]
        plan: String,
    },
    /// Add days to an existing subscription
    Extend { user_id: UserId, days: u32 },
    /// Remove a subscription
    Revoke { user_id: UserId },
    /// List subscriptions, soonest expiry first
    List,
}

enum Inbound {
    User(WireEvent),
    Malformed(String),
    Boundary(DateTime<Utc>),
    Shutdown,
}

pub struct App {
    service: Arc<FileBotService>,
    sink: Box<dyn ReportSink>,
    admin_id: Option<UserId>,
    default_split: SplitPolicy,
    output_dir: PathBuf,
}

impl App {
    pub fn new(config: &Config, service: Arc<FileBotService>, output_dir: PathBuf) -> Self {
        let sink: Box<dyn ReportSink> = match config.report_path() {
            Some(path) => Box::new(FileSink::new(path)),
            None => Box::new(LogSink),
        };

        Self {
            service,
            sink,
            admin_id: config.admin_id,
            default_split: config.default_split_policy(),
            output_dir,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<Inbound>(64);

        let schedule = self.service.schedule();
        let timer_tx = tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(schedule.wait_from(Utc::now())).await;
                if timer_tx.send(Inbound::Boundary(Utc::now())).await.is_err() {
                    break;
                }
            }
        });

        let stdin_tx = tx;
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                let inbound = match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match serde_json::from_str::<WireEvent>(&line) {
                        Ok(event) => Inbound::User(event),
                        Err(e) => Inbound::Malformed(e.to_string()),
                    },
                    Ok(None) => Inbound::Shutdown,
                    Err(e) => {
                        error!(error = %e, "Failed to read stdin");
                        Inbound::Shutdown
                    }
                };
                let done = matches!(inbound, Inbound::Shutdown);
                if stdin_tx.send(inbound).await.is_err() || done {
                    break;
                }
            }
        });

        info!(at = %self.service.schedule().at(), "Serving events from stdin");

        loop {
            tokio::select! {
                inbound = rx.recv() => {
                    match inbound {
                        Some(Inbound::User(event)) => self.dispatch(event)?,
                        Some(Inbound::Malformed(reason)) => warn!(%reason, "Skipping malformed event"),
                        Some(Inbound::Boundary(now)) => {
                            self.service.period_boundary(now, self.sink.as_ref());
                        }
                        Some(Inbound::Shutdown) | None => break,
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    fn dispatch(&self, event: WireEvent) -> Result<()> {
        let user_id = event.user_id;
        let now = Utc::now();
        debug!(user_id, action = ?event.action, "Event received");

        let wire = if event.action.is_admin() {
            self.admin(user_id, event.action, now)
        } else {
            match self.to_event(user_id, event.action) {
                Ok(Some(core_event)) => {
                    let response = self.service.handle(user_id, core_event, now);
                    match deliver(user_id, &response, &self.output_dir) {
                        Ok(wire) => wire,
                        Err(e) => {
                            error!(user_id, error = %format!("{:#}", e), "Failed to write output files");
                            WireResponse::message(
                                user_id,
                                Outcome::Rejected,
                                "Could not send the result files, please try again.",
                            )
                        }
                    }
                }
                Ok(None) => WireResponse::message(user_id, Outcome::Allowed, "Session closed."),
                Err(e) => {
                    warn!(user_id, error = %e, "Could not read upload");
                    WireResponse::message(user_id, Outcome::Rejected, "Could not read that file.")
                }
            }
        };

        println!("{}", serde_json::to_string(&wire)?);
        Ok(())
    }

    fn to_event(&self, user_id: UserId, action: WireAction) -> Result<Option<Event>> {
        Ok(Some(match action {
            WireAction::Start => Event::Start,
            WireAction::Status => Event::Status,
            WireAction::Plans => Event::Plans,
            WireAction::Back => Event::Back,
            WireAction::MenuSelect { mode, parts, lines } => {
                Event::MenuSelect(mode_for(mode, parts, lines, self.default_split))
            }
            WireAction::Count { count } => Event::CountDeclared(count),
            WireAction::File { path, sequence } => read_upload(&path, sequence)?,
            WireAction::Expire => {
                self.service.expire_session(user_id);
                return Ok(None);
            }
            _ => return Ok(None),
        }))
    }

    fn admin(&self, user_id: UserId, action: WireAction, now: DateTime<Utc>) -> WireResponse {
        if self.admin_id != Some(user_id) {
            warn!(user_id, "Admin command from non-admin user");
            return WireResponse::message(user_id, Outcome::Denied, "Not authorized.");
        }

        let result = match action {
            WireAction::Grant { target, days, plan } => {
                let plan = match plan.as_deref().map(Plan::from_name) {
                    Some(None) => {
                        return WireResponse::message(
                            user_id,
                            Outcome::Rejected,
                            "Usage: grant <user_id> [days] [pro|premium]",
                        )
                    }
                    Some(plan) => plan,
                    None => None,
                };
                self.service
                    .grant(target, days, plan, now)
                    .map(|e| vec![format!("Subscription added for {} ({} plan, {} days)", target, e.plan(), e.days_left(now))])
            }
            WireAction::Extend { target, days } => self
                .service
                .extend(target, days, now)
                .map(|_| vec![format!("Extended {} by {} days", target, days)]),
            WireAction::Revoke { target } => self.service.revoke(target).map(|removed| {
                if removed {
                    vec![format!("Removed subscription for {}", target)]
                } else {
                    vec![format!("User {} had no subscription", target)]
                }
            }),
            WireAction::List => Ok(self.service.list_messages(now)),
            _ => Ok(Vec::new()),
        };

        match result {
            Ok(messages) => WireResponse {
                user_id,
                outcome: Outcome::Complete,
                messages,
                files: Vec::new(),
            },
            Err(e) => {
                error!(user_id, error = %e, "Admin command failed");
                WireResponse::message(user_id, Outcome::Rejected, e.to_string())
            }
        }
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(&args.config)?;
    if let Some(store) = &args.store {
        config.store_path = store.clone();
    }
    if let Some(limit) = args.trial_limit {
        config.trial_limit = limit;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let config = load_config(&args)?;
    let store = Arc::new(EntitlementStore::open(config.store_path())?);
    let now = Utc::now();
    let service = Arc::new(FileBotService::new(&config, store, now));

    match args.command {
        Command::Serve { output_dir } => {
            let mut app = App::new(&config, service, output_dir);
            app.run().await
        }
        Command::Grant { user_id, days, plan } => {
            let plan = Plan::from_name(&plan)
                .ok_or_else(|| anyhow::anyhow!("Unknown plan: {} (expected pro or premium)", plan))?;
            let entitlement = service.grant(user_id, days, Some(plan), now)?;
            println!(
                "Subscription added for {} ({} plan, expires {})",
                user_id,
                entitlement.plan(),
                entitlement.expires_at().to_rfc3339()
            );
            Ok(())
        }
        Command::Extend { user_id, days } => {
            let entitlement = service.extend(user_id, days, now)?;
            println!(
                "Extended {} by {} days (expires {})",
                user_id,
                days,
                entitlement.expires_at().to_rfc3339()
            );
            Ok(())
        }
        Command::Revoke { user_id } => {
            if service.revoke(user_id)? {
                println!("Removed subscription for {}", user_id);
            } else {
                println!("User {} had no subscription", user_id);
            }
            Ok(())
        }
        Command::List => {
            for message in service.list_messages(now) {
                println!("{}", message);
            }
            Ok(())
        }
    }
}
