//! TDD phase guard CLI.
//!
//! Tracks a per-feature RED/GREEN/REFACTOR state machine under
//! `.guard/state/`, answers pre-write permission checks for a coding agent,
//! and auto-runs tests on file changes to suggest the next phase.

use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use guard::core::guard as path_guard;
use guard::core::phase::recommendations;
use guard::core::policy::PolicyTable;
use guard::core::types::Phase;
use guard::exit_codes;
use guard::hook;
use guard::io::config::{ProjectProfile, load_profile, write_profile};
use guard::io::state_store::StatePaths;
use guard::logging;
use guard::model::default_workspace;
use guard::verify::{CommandTestRunner, TestRunRecord, Verifier, run_tests_once};
use guard::workspace::WorkspaceManager;

#[derive(Parser)]
#[command(
    name = "guard",
    version,
    about = "TDD phase guard and auto-verification engine"
)]
struct Cli {
    /// Project root (defaults to the current directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.guard/state/` with a default project profile.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Answer one pre-write hook request (JSON on stdin, decision on stdout).
    Hook,
    /// Check a single path against the current phase; exits 2 on deny.
    Check { path: String },
    /// Switch the current feature's TDD phase (red/green/refactor/ready).
    Phase { name: String },
    /// Manage features.
    #[command(subcommand)]
    Feature(FeatureCommand),
    /// Print workspace and phase status.
    Status,
    /// Watch the project and auto-run tests on changes.
    Watch,
    /// Run the test command once, bypassing the watcher, and classify.
    Test,
}

#[derive(Subcommand)]
enum FeatureCommand {
    /// Create a feature and make it current (opens in RED).
    Create {
        id: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Make another existing feature current.
    Switch { id: String },
    /// Complete the current feature.
    Complete,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("resolve current directory")?,
    };

    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Hook => cmd_hook(&root),
        Command::Check { path } => cmd_check(&root, &path),
        Command::Phase { name } => cmd_phase(&root, &name),
        Command::Feature(feature) => cmd_feature(&root, feature),
        Command::Status => cmd_status(&root),
        Command::Watch => cmd_watch(&root),
        Command::Test => cmd_test(&root),
    }
}

fn cmd_init(root: &std::path::Path, force: bool) -> Result<i32> {
    let paths = StatePaths::new(root);
    std::fs::create_dir_all(&paths.state_dir)
        .with_context(|| format!("create {}", paths.state_dir.display()))?;

    if force || !paths.profile_path.exists() {
        write_profile(&paths.profile_path, &ProjectProfile::default())?;
    }
    if force || !paths.workspace_path.exists() {
        guard::io::state_store::write_workspace(
            &paths.workspace_path,
            &default_workspace(Utc::now()),
        )?;
    }

    println!("initialized {}", paths.state_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_hook(root: &std::path::Path) -> Result<i32> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("read hook request from stdin")?;
    let response = hook::handle_request(root, &input)?;
    println!("{}", serde_json::to_string(&response)?);
    Ok(exit_codes::OK)
}

fn cmd_check(root: &std::path::Path, path: &str) -> Result<i32> {
    let paths = StatePaths::new(root);
    let profile = load_profile(&paths.profile_path)?;
    let table = PolicyTable::compile(&profile.test_globs, &profile.source_globs)?;
    let phase = hook::enforced_phase(root)?;

    let decision = path_guard::check(&table, phase, path);
    println!("{}", decision.reason);
    Ok(if decision.allowed {
        exit_codes::OK
    } else {
        exit_codes::DENIED
    })
}

fn cmd_phase(root: &std::path::Path, name: &str) -> Result<i32> {
    let target = Phase::parse(name)?;
    let manager = WorkspaceManager::open(root)?;
    let outcome = manager.switch_phase(target)?;

    println!("phase: {} -> {}", outcome.from, outcome.to);
    if let Some(warning) = &outcome.non_canonical {
        println!("warning: {warning}");
    }
    for line in recommendations(target) {
        println!("  - {line}");
    }
    Ok(exit_codes::OK)
}

fn cmd_feature(root: &std::path::Path, command: FeatureCommand) -> Result<i32> {
    let manager = WorkspaceManager::open(root)?;
    match command {
        FeatureCommand::Create {
            id,
            title,
            description,
        } => {
            let feature = manager.create_feature(&id, &title, &description)?;
            println!("created feature '{}' in {} phase", feature.id, feature.current_phase);
            for line in recommendations(Phase::Red) {
                println!("  - {line}");
            }
        }
        FeatureCommand::Switch { id } => {
            manager.switch_feature(&id)?;
            let phase = manager.current_phase().map(|p| p.to_string());
            println!(
                "switched to feature '{}' ({} phase)",
                id.trim(),
                phase.as_deref().unwrap_or("unknown")
            );
        }
        FeatureCommand::Complete => {
            let id = manager.complete_feature()?;
            println!("completed feature '{id}'");
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_status(root: &std::path::Path) -> Result<i32> {
    let manager = WorkspaceManager::open(root)?;
    let ws = manager.snapshot();

    match ws.current_feature() {
        Some(feature) => {
            println!(
                "feature '{}' in {} phase ({} transitions)",
                feature.id,
                feature.current_phase,
                feature.history.len()
            );
            for line in recommendations(feature.current_phase) {
                println!("  - {line}");
            }
        }
        None => println!("no active feature"),
    }

    for (id, feature) in &ws.features {
        if Some(id) != ws.current_feature_id.as_ref() {
            println!("  {} ({})", id, feature.current_phase);
        }
    }
    if !ws.completed_feature_ids.is_empty() {
        println!("completed: {}", ws.completed_feature_ids.join(", "));
    }
    Ok(exit_codes::OK)
}

fn cmd_watch(root: &std::path::Path) -> Result<i32> {
    let paths = StatePaths::new(root);
    let profile = load_profile(&paths.profile_path)?;
    let verifier = Verifier::new(CommandTestRunner);
    verifier.start_watching(root, &profile)?;
    println!(
        "watching {} (debounce {}ms, timeout {}s); Ctrl-C to stop",
        root.display(),
        profile.debounce_ms,
        profile.test_timeout_secs
    );

    let mut last_seen: Option<DateTime<Utc>> = None;
    loop {
        std::thread::sleep(Duration::from_millis(500));
        if let Some(record) = verifier.last_result(root)
            && last_seen != Some(record.started_at)
        {
            last_seen = Some(record.started_at);
            print_record(&record);
        }
    }
}

fn cmd_test(root: &std::path::Path) -> Result<i32> {
    let paths = StatePaths::new(root);
    let profile = load_profile(&paths.profile_path)?;
    let record = run_tests_once(root, &profile, &CommandTestRunner)?;
    print_record(&record);
    Ok(exit_codes::OK)
}

fn print_record(record: &TestRunRecord) {
    let outcome = if record.timed_out {
        "timed out".to_string()
    } else if record.suggestion.test_succeeded {
        format!("passed ({}/{})", record.summary.passed, record.summary.total)
    } else {
        format!(
            "failed ({} failed, {} passed)",
            record.summary.failed, record.summary.passed
        )
    };
    println!("[{}] tests {}", record.phase, outcome);

    for warning in &record.suggestion.warnings {
        println!("  warning: {warning}");
    }
    for action in &record.suggestion.actions {
        println!("  - {action}");
    }
    if let Some(next) = record.suggestion.next_phase {
        println!("  suggest: switch to {next}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let cli = Cli::parse_from(["guard", "init"]);
        assert!(matches!(cli.command, Command::Init { force: false }));
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["guard", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_feature_create_with_description() {
        let cli = Cli::parse_from([
            "guard",
            "feature",
            "create",
            "login",
            "--description",
            "login flow",
        ]);
        match cli.command {
            Command::Feature(FeatureCommand::Create { id, description, .. }) => {
                assert_eq!(id, "login");
                assert_eq!(description, "login flow");
            }
            _ => panic!("unexpected command"),
        }
    }

    #[test]
    fn parse_check_with_root_override() {
        let cli = Cli::parse_from(["guard", "--root", "/tmp/p", "check", "src/a.rs"]);
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/p")));
        assert!(matches!(cli.command, Command::Check { .. }));
    }
}
