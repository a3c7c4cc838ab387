use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fleetwall_core::{
    Deployer, ErrorExt, FwError, GitRepository, HostOutcome, Model, MockFleet, RemoteExec, Repository, UserStore,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fleetwall", bin_name = "fleetwall", about, long_about = None)]
struct Cli {
    /// Path to the version-controlled model repository.
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compile the model and diff it against the live fleet without applying anything.
    Check,
    /// Compile, diff, and apply the result to every host that needs it.
    Deploy,
    /// Commit the working tree to the repository.
    Save {
        #[arg(long, default_value = "")]
        message: String,
    },
    /// Discard uncommitted changes and reset to the last commit.
    Reset,
    /// Undo the last `n` commits.
    Rollback { n: u32 },
    /// Print the commit history.
    History,
    #[command(subcommand)]
    User(UserCommand),
}

#[derive(Debug, Subcommand)]
enum UserCommand {
    Create { username: String, role: String, password: String },
    Delete { username: String },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed command line");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let repo = GitRepository::new(&cli.repo);

    match cli.command {
        Command::Check => {
            let model = Model::load(&repo).context("failed to load model")?;
            let fleet: Arc<dyn RemoteExec> = Arc::new(MockFleet::new());
            let deployer = Deployer::new(fleet, Duration::from_secs(30));

            let report = deployer.check(&model).await.context("check failed")?;
            for (host, outcome) in &report.outcomes {
                print_outcome(host, outcome);
            }
            for warning in &report.warnings {
                println!("warning: {warning:?}");
            }
        }
        Command::Deploy => {
            let model = Model::load(&repo).context("failed to load model")?;
            let fleet: Arc<dyn RemoteExec> = Arc::new(MockFleet::new());
            let deployer = Deployer::new(fleet, Duration::from_secs(30));

            match deployer.deploy(&repo, &model).await {
                Ok(report) => {
                    tracing::info!(hosts = report.outcomes.len(), "deploy finished");
                    for (host, outcome) in &report.outcomes {
                        print_outcome(host, outcome);
                    }
                }
                Err(e) => {
                    let wrapped = anyhow::Error::new(e).context("deploy failed");
                    if wrapped.any_is::<FwError>() {
                        eprintln!("{wrapped:#}");
                        std::process::exit(1);
                    }
                    return Err(wrapped);
                }
            }
        }
        Command::Save { message } => {
            repo.save(&message).context("save failed")?;
        }
        Command::Reset => {
            repo.reset_to_head().context("reset failed")?;
        }
        Command::Rollback { n } => {
            repo.rollback(n).context("rollback failed")?;
        }
        Command::History => {
            for entry in repo.history().context("failed to read history")? {
                println!("{} {} {} {}", entry.commit_id, entry.date, entry.author, entry.message);
            }
        }
        Command::User(UserCommand::Create { username, role, password }) => {
            let mut store = load_user_store(&repo)?;
            store.create(&username, &role, &password, None).context("failed to create user")?;
            save_user_store(&repo, &store)?;
        }
        Command::User(UserCommand::Delete { username }) => {
            let mut store = load_user_store(&repo)?;
            store.delete(&username).context("failed to delete user")?;
            save_user_store(&repo, &store)?;
        }
    }

    Ok(())
}

/// Renders `spec.md` §4.6 step 5's human-readable diff for a host: the
/// `Outdated` variant gets a `+`/`-` line breakdown, everything else just
/// prints its debug form.
fn print_outcome(host: &str, outcome: &HostOutcome) {
    match outcome {
        HostOutcome::Outdated { added, removed } => {
            println!("{host}: out of date");
            for line in added {
                println!("  + {line}");
            }
            for line in removed {
                println!("  - {line}");
            }
        }
        other => println!("{host}: {other:?}"),
    }
}

fn load_user_store(repo: &GitRepository) -> Result<UserStore> {
    match repo.read_file("users") {
        Ok(text) => UserStore::from_json(&text).context("malformed users.json").map_err(Into::into),
        Err(_) => Ok(UserStore::new()),
    }
}

fn save_user_store(repo: &GitRepository, store: &UserStore) -> Result<()> {
    let json = store.to_json().context("failed to serialize users")?;
    repo.write_file("users", &json).context("failed to write users.json")?;
    Ok(())
}
