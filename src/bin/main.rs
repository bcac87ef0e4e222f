use clap::{Parser, Subcommand};
use git_pending::{
    CommandDispatcher, Config, Error, FileStatus, GitCli, GitCommand, ProcessControl,
    ProcessEvent, Repository, TagPanel, Target,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, level_filters::LevelFilter};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Working tree to operate on
    #[arg(short, long, default_value = ".")]
    repo: PathBuf,

    /// Git executable (overrides config file and GIT_PENDING_GIT)
    #[arg(long)]
    git_bin: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the diagnostic log when done
    #[arg(global = true, long)]
    show_log: bool,

    /// Log level
    #[arg(global = true, short, long, default_value = "error")]
    log: LevelFilter,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the modified and staged lists
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Push the current branch
    Push,
    /// Pull into the current branch
    Pull,
    /// Fetch all remotes
    Fetch,
    /// Run git with a raw argument string, e.g. `run "log -5 --oneline"`
    Run { arguments: String },
    /// Commit the staged changes
    Commit {
        #[arg(short, long)]
        message: String,
    },
    /// Stage paths
    Stage { paths: Vec<String> },
    /// Unstage paths
    Unstage { paths: Vec<String> },
    /// Discard working-tree changes of paths
    Revert { paths: Vec<String> },
    /// Show the diff of paths
    Diff {
        /// Diff the index instead of the working tree
        #[arg(long)]
        staged: bool,
        paths: Vec<String>,
    },
    /// List tags
    Tags,
    /// Delete a tag
    DeleteTag { name: String },
}

#[derive(Serialize)]
struct StatusView<'a> {
    branch: Option<String>,
    modified: &'a [FileStatus],
    staged: &'a [FileStatus],
}

fn print_status(repository: &Repository<GitCli>, json: bool) -> git_pending::Result<()> {
    let branch = repository.branch().map(ToString::to_string);
    if json {
        let view = StatusView {
            branch,
            modified: repository.modified_list(),
            staged: repository.staged_list(),
        };
        let rendered = serde_json::to_string_pretty(&view)
            .map_err(|e| Error::IoError(std::io::Error::other(e)))?;
        println!("{rendered}");
        return Ok(());
    }

    println!("\n📊 Pending Changes:");
    println!("==================");
    println!("Branch: {}", branch.as_deref().unwrap_or("(unknown)"));
    println!("  Modified: {}", repository.modified_list().len());
    println!("  Staged:   {}", repository.staged_list().len());

    if !repository.staged_list().is_empty() {
        println!("\n✅ Staged:");
        for status in repository.staged_list() {
            println!("  + {}", status.display.trim_start());
        }
    }

    if !repository.modified_list().is_empty() {
        println!("\n🔄 Modified:");
        for status in repository.modified_list() {
            println!("  ~ {} [{}]", status.display, status.status);
        }
    }
    Ok(())
}

fn print_event(event: &ProcessEvent) {
    match event {
        ProcessEvent::Line { line, .. } => println!("{line}"),
        ProcessEvent::CancelRequested => println!("Cancelling..."),
        ProcessEvent::Exited { outcome, .. } => println!("Process exited: {outcome:?}"),
        ProcessEvent::Started { command_line, .. } => println!("{command_line}"),
    }
}

async fn run_long(
    mut dispatcher: CommandDispatcher<GitCli>,
    start: impl FnOnce(&mut CommandDispatcher<GitCli>) -> git_pending::Result<Option<ProcessControl>>,
) -> git_pending::Result<CommandDispatcher<GitCli>> {
    let Some(control) = start(&mut dispatcher)? else {
        print_log(&mut dispatcher, true);
        return Ok(dispatcher);
    };

    let mut worker = tokio::task::spawn_blocking(move || {
        let report = dispatcher.wait_with(print_event);
        (dispatcher, report)
    });
    let joined = tokio::select! {
        joined = &mut worker => Some(joined),
        _ = tokio::signal::ctrl_c() => None,
    };
    let joined = match joined {
        Some(joined) => joined,
        None => {
            debug!(pid = control.pid(), "Interrupted, cancelling");
            control.cancel();
            worker.await
        }
    };
    let (mut dispatcher, report) = joined.map_err(|e| Error::IoError(std::io::Error::other(e)))?;

    match report? {
        Some(report) if !report.outcome.is_success() => {
            print_log(&mut dispatcher, true);
            Err(Error::GitCommandError(format!(
                "git {} did not succeed: {:?}",
                report.command.arguments(),
                report.outcome
            )))
        }
        _ => Ok(dispatcher),
    }
}

fn long_command(
    command: GitCommand,
) -> impl FnOnce(&mut CommandDispatcher<GitCli>) -> git_pending::Result<Option<ProcessControl>> {
    move |dispatcher| dispatcher.start(command).map(Some)
}

/// Prints and clears the log collected so far.
fn print_log(dispatcher: &mut CommandDispatcher<GitCli>, show: bool) {
    let lines = dispatcher.repository_mut().log_mut().drain();
    if !show {
        return;
    }
    eprintln!("\n📝 Log:");
    for line in lines {
        eprintln!("{line}");
    }
}

#[tokio::main]
async fn main() -> git_pending::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = EnvFilter::from_default_env().add_directive(cli.log.into());

    fmt()
        .with_env_filter(env_filter)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(true)
        .pretty()
        .init();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(git_bin) = cli.git_bin {
        config.git_bin = Some(git_bin);
    }

    let mut dispatcher = git_pending::open(&cli.repo, &config)?;
    dispatcher.refresh()?;

    let mut dispatcher = match cli.command {
        Commands::Status { json } => {
            print_status(dispatcher.repository(), json)?;
            dispatcher
        }
        Commands::Push => run_long(dispatcher, long_command(GitCommand::Push)).await?,
        Commands::Pull => run_long(dispatcher, long_command(GitCommand::Pull)).await?,
        Commands::Fetch => run_long(dispatcher, long_command(GitCommand::FetchAll)).await?,
        Commands::Run { arguments } => {
            run_long(dispatcher, long_command(GitCommand::Raw(arguments))).await?
        }
        Commands::Commit { message } => {
            if !dispatcher.commit(&message)? {
                print_log(&mut dispatcher, true);
            }
            dispatcher
        }
        Commands::Stage { paths } => {
            dispatcher.stage(&paths)?;
            print_status(dispatcher.repository(), false)?;
            dispatcher
        }
        Commands::Unstage { paths } => {
            dispatcher.unstage(&paths)?;
            print_status(dispatcher.repository(), false)?;
            dispatcher
        }
        Commands::Revert { paths } => {
            dispatcher.revert(&paths)?;
            print_status(dispatcher.repository(), false)?;
            dispatcher
        }
        Commands::Diff { staged, paths } => {
            let target = if staged {
                Target::Staged
            } else {
                Target::Modified
            };
            run_long(dispatcher, move |d| d.diff(target, &paths)).await?
        }
        Commands::Tags => {
            let mut panel = TagPanel::new(dispatcher.repository().link());
            for tag in panel.refresh()? {
                println!("{}\t{}\t{}", tag.name, tag.commit, tag.subject);
            }
            dispatcher
        }
        Commands::DeleteTag { name } => {
            let mut panel = TagPanel::new(dispatcher.repository().link());
            panel.refresh()?;
            let command = panel.delete_command(&name)?;
            run_long(dispatcher, long_command(command)).await?
        }
    };

    print_log(&mut dispatcher, cli.show_log);
    Ok(())
}
