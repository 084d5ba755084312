use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::{self, CommandReport};

#[derive(Debug, Parser)]
#[command(name = "audiovault", version, about = "Deduplicating audio archiver bot")]
struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the bot: archive incoming audio and answer /start and /list.
    Serve,
    /// Reconcile every known owner's history backlog once.
    Scan,
    /// Show an owner's archived files, newest first.
    List {
        #[arg(long)]
        owner: i64,
    },
    /// Show resolved paths, configuration and record counts.
    Status,
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("{}: {}", report.command, if report.ok { "ok" } else { "failed" });
    for line in &report.details {
        println!("{line}");
    }
    for issue in &report.issues {
        println!("issue: {issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let report = match &cli.command {
        Command::Serve => commands::serve::run()?,
        Command::Scan => commands::scan::run()?,
        Command::List { owner } => {
            commands::list::run(&commands::list::ListOptions { owner_id: *owner })?
        }
        Command::Status => commands::status::run()?,
    };

    print_report(&report, cli.json)?;
    if !report.ok {
        anyhow::bail!("{} reported {} issue(s)", report.command, report.issues.len());
    }
    Ok(())
}
