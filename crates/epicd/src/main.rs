use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use epic_builder::PtyWorker;
use epic_core::config::{load_epic_config, EpicConfig};
use epic_core::state::{EpicState, TestSuiteStatus, TicketState};
use epic_core::types::TicketId;
use epic_git::{discover_repo, GitCli, RepoHandle};
use epicd::{load_state, EpicStateFile, EpicStateMachine, JsonlEventLog};

const DEFAULT_STATE_DIR: &str = ".raido";

#[derive(Debug, Parser)]
#[command(
    name = "raido",
    version,
    about = "Deterministic controller for worker-built ticket epics"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct CommonArgs {
    /// Epic configuration file.
    #[arg(long, default_value = "epic.toml")]
    epic: PathBuf,
    /// Repository the epic operates on.
    #[arg(long, default_value = ".")]
    repo: PathBuf,
    /// Execution state file (defaults to .raido/state.json in the repo).
    #[arg(long)]
    state: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the epic to a terminal state: ticket execution, then collapse.
    Execute {
        #[command(flatten)]
        common: CommonArgs,
        /// Resume from an existing state file after an interruption.
        #[arg(long)]
        resume: bool,
    },
    /// Show the epic and its tickets from the persisted state file.
    Status {
        #[command(flatten)]
        common: CommonArgs,
        /// Only show tickets that are ready (or eligible) to run.
        #[arg(long)]
        ready: bool,
    },
    /// Run the start gates for one ticket and leave it IN_PROGRESS.
    StartTicket {
        id: String,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Validate a ticket whose worker ran out-of-band.
    CompleteTicket {
        id: String,
        /// Reported test suite status: passing, failing, or skipped.
        #[arg(long, default_value = "passing")]
        test_status: String,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Fail a ticket and block its dependents.
    FailTicket {
        id: String,
        #[arg(long)]
        reason: String,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Collapse completed ticket branches into the epic branch.
    Finalize {
        #[command(flatten)]
        common: CommonArgs,
    },
}

struct Workspace {
    config: EpicConfig,
    epic_path: PathBuf,
    repo: RepoHandle,
    git: GitCli,
    state_path: PathBuf,
    log: JsonlEventLog,
}

fn open_workspace(common: &CommonArgs) -> anyhow::Result<Workspace> {
    let (config, warnings) = load_epic_config(&common.epic)
        .with_context(|| format!("loading epic config {}", common.epic.display()))?;
    for warning in &warnings {
        eprintln!("[epic] config warning {}: {}", warning.code, warning.message);
    }

    let git = GitCli::default();
    let repo = discover_repo(&common.repo, &git)?;
    let state_path = common
        .state
        .clone()
        .unwrap_or_else(|| repo.root.join(DEFAULT_STATE_DIR).join("state.json"));
    let log_root = state_path
        .parent()
        .map(|parent| parent.join("events"))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR).join("events"));

    Ok(Workspace {
        config,
        epic_path: common.epic.clone(),
        repo,
        git,
        state_path,
        log: JsonlEventLog::new(log_root),
    })
}

/// New epic when no state file exists yet; resume otherwise.
fn build_machine(ws: Workspace, resume_requested: bool) -> anyhow::Result<EpicStateMachine> {
    let builder = Box::new(PtyWorker::new(ws.config.builder.command.clone()));
    if ws.state_path.exists() {
        if !resume_requested {
            eprintln!(
                "[epic] state file {} exists; resuming",
                ws.state_path.display()
            );
        }
        Ok(EpicStateMachine::resume(
            &ws.config,
            &ws.epic_path,
            ws.repo,
            ws.git,
            &ws.state_path,
            builder,
            ws.log,
        )?)
    } else {
        if resume_requested {
            bail!(
                "--resume requested but no state file at {}",
                ws.state_path.display()
            );
        }
        Ok(EpicStateMachine::new_epic(
            &ws.config,
            &ws.epic_path,
            ws.repo,
            ws.git,
            &ws.state_path,
            builder,
            ws.log,
        )?)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Execute { common, resume } => {
            let ws = open_workspace(&common)?;
            let mut machine = build_machine(ws, resume)?;
            let state = machine.execute()?;
            render_status(&machine.snapshot(), false);
            if matches!(state, EpicState::Failed | EpicState::RolledBack) {
                std::process::exit(1);
            }
        }
        Command::Status { common, ready } => {
            let ws = open_workspace(&common)?;
            let state = load_state(&ws.state_path)
                .with_context(|| format!("loading state file {}", ws.state_path.display()))?;
            render_status(&state, ready);
        }
        Command::StartTicket { id, common } => {
            let ws = open_workspace(&common)?;
            let mut machine = build_machine(ws, false)?;
            let state = machine.start_ticket(&TicketId::new(id.clone()))?;
            println!("ticket {id}: {state}");
        }
        Command::CompleteTicket {
            id,
            test_status,
            common,
        } => {
            let test_status: TestSuiteStatus = test_status
                .parse()
                .map_err(|message: String| anyhow::anyhow!(message))?;
            let ws = open_workspace(&common)?;
            let mut machine = build_machine(ws, false)?;
            let state = machine.complete_ticket(&TicketId::new(id.clone()), test_status)?;
            println!("ticket {id}: {state}");
        }
        Command::FailTicket { id, reason, common } => {
            let ws = open_workspace(&common)?;
            let mut machine = build_machine(ws, false)?;
            let state = machine.fail_ticket_command(&TicketId::new(id.clone()), &reason)?;
            println!("ticket {id}: {state}");
        }
        Command::Finalize { common } => {
            let ws = open_workspace(&common)?;
            let mut machine = build_machine(ws, false)?;
            machine.finalize()?;
            render_status(&machine.snapshot(), false);
        }
    }

    Ok(())
}

fn render_status(state: &EpicStateFile, ready_only: bool) {
    println!(
        "epic {} [{}] branch {} baseline {}",
        state.epic_id,
        state.state,
        state.epic_branch,
        short_sha(&state.baseline_commit)
    );

    for ticket in state.tickets.values() {
        let eligible = ticket.state == TicketState::Ready
            || (ticket.state == TicketState::Pending
                && ticket.dependencies_completed(&state.tickets));
        if ready_only && !eligible {
            continue;
        }

        let mut line = format!(
            "  {:<20} {:<16} {}",
            ticket.state.to_string(),
            ticket.id.to_string(),
            ticket.title
        );
        if ticket.critical {
            line.push_str(" [critical]");
        }
        if let Some(blocking) = &ticket.blocking_dependency {
            line.push_str(&format!(" (blocked by {blocking})"));
        }
        if let Some(reason) = &ticket.failure_reason {
            line.push_str(&format!(" ({reason})"));
        }
        println!("{line}");
    }
}

fn short_sha(sha: &str) -> &str {
    &sha[..sha.len().min(12)]
}
