use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use staffdesk::attendance::{
    format_elapsed, recent_hours, AttendanceTracker, CheckKind, Coordinates, FixedLocation,
    LocationProvider, NoLocation, TrackerSettings,
};
use staffdesk::config::{self, Config};
use staffdesk::dashboard::load_dashboard;
use staffdesk::model::{Department, LeaveRequest, Resource, SalaryPeriod, SalaryRecord, User};
use staffdesk::mutation::{AlwaysConfirm, Confirm, ConfirmPrompt, MutationIntent, MutationOutcome};
use staffdesk::query::{page_window, PageLink, ResourcePage};
use staffdesk::session::{FileTokenStore, SessionState};
use staffdesk::{ApiClient, AuthSession, ListResource};

#[derive(Debug, Parser)]
#[command(author, version, about = "Terminal client for the employee management service")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Answer yes to every confirmation prompt
    #[arg(long, short = 'y', global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print an example config file
    InitConfig,
    Login {
        #[arg(long)]
        email: String,
        /// Read from stdin when omitted
        #[arg(long, env = "STAFFDESK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    Logout,
    Users {
        #[command(flatten)]
        list: ListArgs,
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        department: Option<i64>,
        #[arg(long)]
        active: Option<bool>,
    },
    Departments {
        #[command(flatten)]
        list: ListArgs,
    },
    Requests {
        #[command(flatten)]
        list: ListArgs,
        #[arg(long)]
        status: Option<String>,
        #[arg(long = "type")]
        request_type: Option<String>,
    },
    Approve {
        id: i64,
        #[arg(long)]
        comment: Option<String>,
    },
    Reject {
        id: i64,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Delete a user, department or request
    Delete {
        #[arg(value_enum)]
        resource: Deletable,
        id: i64,
    },
    Salary {
        #[command(flatten)]
        list: ListArgs,
        /// YYYY-MM
        #[arg(long)]
        period: Option<String>,
    },
    CalculateSalary {
        /// YYYY-MM, defaults to the current month
        #[arg(long)]
        period: Option<String>,
        #[arg(long)]
        user: Option<i64>,
    },
    /// Current status, recent history and who is at work
    Attendance,
    CheckIn(CheckArgs),
    CheckOut(CheckArgs),
    /// Follow the live clock and status poll until Ctrl-C
    Watch,
    Dashboard,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long)]
    search: Option<String>,
}

#[derive(Debug, Args)]
struct CheckArgs {
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    lat: Option<f64>,
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lon: Option<f64>,
    #[arg(long)]
    photo_url: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Deletable {
    User,
    Department,
    Request,
}

/// Asks on the terminal before destructive actions.
struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &ConfirmPrompt) -> bool {
        print!("{} {} #{}? [y/N] ", prompt.action, prompt.resource, prompt.id);
        if io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    if let Command::InitConfig = cli.command {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&cli.config))
        .with_context(|| format!("loading {}", cli.config.display()))?;
    cfg.ensure_dirs().context("creating token directory")?;
    let session = AuthSession::new(Arc::new(FileTokenStore::new(cfg.token_path())));
    let client = ApiClient::from_config(&cfg, session).context("building HTTP client")?;
    let confirm: &dyn Confirm = if cli.yes { &AlwaysConfirm } else { &StdinConfirm };

    match cli.command {
        Command::InitConfig => {}
        Command::Login { email, password } => {
            let password = match password {
                Some(p) => p,
                None => read_line("password: ")?,
            };
            if let Err(err) = client.login(&email, &password).await {
                bail!("login failed: {}", err.user_message("Login failed"));
            }
            println!("signed in as {email}");
        }
        Command::Logout => {
            client.logout().context("logout failed")?;
            println!("signed out");
        }
        Command::Users {
            list,
            role,
            department,
            active,
        } => {
            let filters = [
                ("role", role),
                ("department", department.map(|d| d.to_string())),
                ("is_active", active.map(|a| a.to_string())),
            ];
            show_list::<User>(&client, &cfg, &list, &filters).await?;
        }
        Command::Departments { list } => {
            show_list::<Department>(&client, &cfg, &list, &[]).await?;
        }
        Command::Requests {
            list,
            status,
            request_type,
        } => {
            let filters = [("status", status), ("request_type", request_type)];
            show_list::<LeaveRequest>(&client, &cfg, &list, &filters).await?;
        }
        Command::Approve { id, comment } => {
            let intent = MutationIntent::approve(id, comment.as_deref());
            run_mutation::<LeaveRequest>(&client, &cfg, intent, confirm).await?;
        }
        Command::Reject { id, comment } => {
            let intent = MutationIntent::reject(id, comment.as_deref());
            run_mutation::<LeaveRequest>(&client, &cfg, intent, confirm).await?;
        }
        Command::Delete { resource, id } => {
            let intent = MutationIntent::Delete { id };
            match resource {
                Deletable::User => run_mutation::<User>(&client, &cfg, intent, confirm).await?,
                Deletable::Department => {
                    run_mutation::<Department>(&client, &cfg, intent, confirm).await?
                }
                Deletable::Request => {
                    run_mutation::<LeaveRequest>(&client, &cfg, intent, confirm).await?
                }
            }
        }
        Command::Salary { list, period } => {
            let period = period.map(|p| parse_period(&p)).transpose()?;
            let filters = [("period", period.map(|p| p.to_string()))];
            show_list::<SalaryRecord>(&client, &cfg, &list, &filters).await?;
        }
        Command::CalculateSalary { period, user } => {
            let period = match period {
                Some(p) => parse_period(&p)?,
                None => SalaryPeriod::current(),
            };
            let mut payload = json!({ "period": period.as_str() });
            if let Some(user) = user {
                payload["user_id"] = json!(user);
            }
            let intent = MutationIntent::Action {
                action: "calculate".into(),
                payload,
            };
            run_mutation::<SalaryRecord>(&client, &cfg, intent, confirm).await?;
        }
        Command::Attendance => {
            let mut tracker = AttendanceTracker::new(client, TrackerSettings::from_config(&cfg));
            let overview = tracker.load().await;
            tracker.shutdown();
            match &overview.status {
                Some(status) => println!(
                    "checked in: {}  hours: {}",
                    if status.is_checked_in { "yes" } else { "no" },
                    status.display_hours(Utc::now())
                ),
                None => println!("status: unavailable"),
            }
            println!("\nrecent:");
            for rec in &overview.history {
                println!("  {}", rec.summary());
            }
            println!("\nlast {} entries:", recent_hours(&overview.history).len());
            for (date, hours) in recent_hours(&overview.history) {
                let date = date.map(|d| d.to_string()).unwrap_or_else(|| "-".into());
                println!("  {date}  {hours:.2} h");
            }
            println!("\nat work now: {}", overview.active.len());
            for emp in &overview.active {
                println!(
                    "  {} ({}) {:.2} h",
                    emp.full_name,
                    emp.department.as_deref().unwrap_or("-"),
                    emp.hours_worked
                );
            }
            for failure in &overview.failures {
                eprintln!("{}: {}", failure.part, failure.message);
            }
        }
        Command::CheckIn(args) => check(client, &cfg, CheckKind::In, args).await?,
        Command::CheckOut(args) => check(client, &cfg, CheckKind::Out, args).await?,
        Command::Watch => watch(client, &cfg).await?,
        Command::Dashboard => {
            let summary = load_dashboard(&client).await;
            let show = |n: Option<u64>| n.map(|n| n.to_string()).unwrap_or_else(|| "-".into());
            println!("users: {}", show(summary.total_users));
            println!("at work now: {}", show(summary.active_now));
            println!("departments: {}", show(summary.departments));
            println!("pending requests: {}", show(summary.pending_requests));
            println!("\ncheck-ins per day:");
            for (day, count) in &summary.checkins_per_day {
                println!("  {}  {count}", day.format("%d.%m"));
            }
            println!("\nheadcount:");
            for (name, count) in &summary.headcount {
                println!("  {name}: {count}");
            }
            for failure in &summary.failures {
                eprintln!("{}: {}", failure.part, failure.message);
            }
        }
    }
    Ok(())
}

fn read_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn parse_period(raw: &str) -> Result<SalaryPeriod> {
    SalaryPeriod::parse(raw).with_context(|| format!("period must be YYYY-MM, got {raw:?}"))
}

async fn show_list<T: Resource>(
    client: &ApiClient,
    cfg: &Config,
    args: &ListArgs,
    filters: &[(&str, Option<String>)],
) -> Result<()> {
    let mut list = ListResource::<T>::new(client.clone(), cfg.page_size_for(T::ENDPOINT.name));
    let query = list.query_mut();
    for (key, value) in filters {
        query.set_filter(key, value.as_deref());
    }
    if let Some(search) = &args.search {
        query.set_search(search);
    }
    // Filters reset the page, so it goes last.
    query.set_page(args.page);
    list.refresh().await;
    if let Some(err) = list.error() {
        bail!("{err}");
    }
    print_page(list.page());
    Ok(())
}

fn print_page<T: Resource>(page: &ResourcePage<T>) {
    for item in &page.items {
        println!("{}", item.summary());
    }
    match page.showing_range() {
        Some((start, end)) => println!("\nshowing {start}-{end} of {}", page.total_count),
        None => println!("nothing found"),
    }
    let links: Vec<String> = page_window(page.page, page.total_pages)
        .into_iter()
        .map(|link| match link {
            PageLink::Page(n) if n == page.page => format!("[{n}]"),
            PageLink::Page(n) => n.to_string(),
            PageLink::Gap => "...".into(),
        })
        .collect();
    if !links.is_empty() {
        println!("pages: {}", links.join(" "));
    }
}

async fn run_mutation<T: Resource>(
    client: &ApiClient,
    cfg: &Config,
    intent: MutationIntent,
    confirm: &dyn Confirm,
) -> Result<()> {
    let mut list = ListResource::<T>::new(client.clone(), cfg.page_size_for(T::ENDPOINT.name));
    let verb = intent.verb().to_string();
    match list.mutate(intent, confirm).await {
        MutationOutcome::Declined => println!("cancelled"),
        MutationOutcome::AlreadySubmitting => println!("already in progress"),
        MutationOutcome::Committed => {
            info!(resource = T::ENDPOINT.name, verb = %verb, "done");
            println!("{verb}: ok");
        }
        MutationOutcome::RolledBack { error, message } => {
            for (field, errors) in error.field_errors() {
                eprintln!("  {field}: {}", errors.join("; "));
            }
            bail!("{verb} failed: {message}");
        }
    }
    Ok(())
}

async fn check(client: ApiClient, cfg: &Config, kind: CheckKind, args: CheckArgs) -> Result<()> {
    let location: Box<dyn LocationProvider> = match (args.lat, args.lon) {
        (Some(latitude), Some(longitude)) => Box::new(FixedLocation(Coordinates {
            latitude,
            longitude,
        })),
        _ => Box::new(NoLocation),
    };
    let mut tracker = AttendanceTracker::new(client, TrackerSettings::from_config(cfg));
    let outcome = tracker
        .submit(kind, location.as_ref(), args.photo_url)
        .await;
    tracker.shutdown();
    let outcome = outcome
        .map_err(|err| anyhow::anyhow!(err.user_message("Failed to record attendance")))?;
    if let Some(notice) = &outcome.notice {
        println!("{notice}");
    }
    println!("{}", outcome.record.summary());
    Ok(())
}

async fn watch(client: ApiClient, cfg: &Config) -> Result<()> {
    let mut session = client.session().subscribe();
    let mut tracker = AttendanceTracker::new(client, TrackerSettings::from_config(cfg));
    let overview = tracker.load().await;
    for failure in &overview.failures {
        eprintln!("{}: {}", failure.part, failure.message);
    }
    tracker.start_clock();
    let mut clock = tracker.subscribe_clock();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = session.changed() => {
                if changed.is_err() || *session.borrow() == SessionState::Expired {
                    eprintln!("session expired; run `staffdesk login`");
                    break;
                }
            }
            changed = clock.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = match *clock.borrow() {
                    Some(elapsed) => format!("at work {}", format_elapsed(elapsed)),
                    None => "not checked in".to_string(),
                };
                print!("\r{line}    ");
                io::stdout().flush()?;
            }
        }
    }
    println!();
    tracker.shutdown();
    Ok(())
}
