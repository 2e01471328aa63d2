pub mod commands;

use analyst_core::domain::thread::{ThreadKey, UserId};
use clap::{Parser, Subcommand};
use commands::registry::Cleanup;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "analyst",
    about = "Data analyst operator CLI",
    long_about = "Ask questions about the support dataset, inspect configuration, run migrations, and browse or remove users, threads and history.",
    after_help = "Examples:\n  analyst doctor --json\n  analyst ask --user user_1a2b3c4d --thread thread_5e6f7a8b \"How many refund requests are there?\"\n  analyst history --user user_1a2b3c4d --thread thread_5e6f7a8b\n  analyst delete-thread --user user_1a2b3c4d --thread thread_5e6f7a8b"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, dataset, prompt templates, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run one dialogue turn and print the analyst's answer")]
    Ask {
        #[arg(long, help = "User id; generated when omitted")]
        user: Option<String>,
        #[arg(long, help = "Thread id; generated when omitted")]
        thread: Option<String>,
        #[arg(long, help = "Start the thread over with the full dataset and an empty message log")]
        new: bool,
        #[arg(help = "The question to ask")]
        question: String,
    },
    #[command(about = "List registered users")]
    Users,
    #[command(about = "List threads, optionally for one user")]
    Threads {
        #[arg(long)]
        user: Option<String>,
    },
    #[command(about = "Show the question/answer history of a thread")]
    History {
        #[arg(long)]
        user: String,
        #[arg(long)]
        thread: String,
    },
    #[command(about = "Delete a thread with its history and saved checkpoint")]
    DeleteThread {
        #[arg(long)]
        user: String,
        #[arg(long)]
        thread: String,
    },
    #[command(about = "Delete a user with their threads, checkpoints and memories")]
    DeleteUser {
        #[arg(long)]
        user: String,
    },
    #[command(about = "Empty a thread's history and drop its checkpoint, keeping the thread")]
    ClearHistory {
        #[arg(long)]
        user: String,
        #[arg(long)]
        thread: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Ask { user, thread, new, question } => {
            commands::ask::run(commands::ask::AskArgs { user, thread, reset: new, question })
        }
        Command::Users => commands::registry::users(),
        Command::Threads { user } => commands::registry::threads(user),
        Command::History { user, thread } => commands::registry::history(&user, &thread),
        Command::DeleteThread { user, thread } => {
            commands::registry::cleanup(Cleanup::Thread(ThreadKey::new(user, thread)))
        }
        Command::DeleteUser { user } => commands::registry::cleanup(Cleanup::User(UserId(user))),
        Command::ClearHistory { user, thread } => {
            commands::registry::cleanup(Cleanup::History(ThreadKey::new(user, thread)))
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
