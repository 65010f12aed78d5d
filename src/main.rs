use clap::{Parser, Subcommand};
use colored::*;
use log::debug;

mod alert;
mod config;
mod mailer;
mod reboot;
mod system;
mod usage;

/// Volume monitor and reboot notifier with email alerts
#[derive(Parser)]
#[command(name = "volmon")]
#[command(about = "Check disk usage thresholds and notify about host reboots by email")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check primary (and optional backup) volume usage and alert by email
    Check {
        /// Send the alert email regardless of thresholds (for testing SMTP settings)
        #[arg(long)]
        force_mail: bool,
        /// Print the observation and decision as JSON instead of sending mail
        #[arg(long, conflicts_with = "force_mail")]
        json: bool,
    },
    /// Send a one-time "server rebooted" notification, debounced on disk
    Reboot,
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    // Optional .env next to the working directory; absence is fine.
    match dotenvy::dotenv() {
        Ok(path) => debug!("loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => log::warn!("failed to load .env file: {e}"),
    }

    let cli = Cli::parse();

    let code = match cli.command {
        Command::Check { force_mail, json } => match config::load_check() {
            Ok((check_cfg, mail_cfg)) => alert::run(&check_cfg, &mail_cfg, force_mail, json),
            Err(e) => {
                eprintln!("{} {}", "Configuration error:".red().bold(), e);
                2
            }
        },
        Command::Reboot => match config::load_reboot() {
            Ok((reboot_cfg, mail_cfg)) => reboot::run(&reboot_cfg, &mail_cfg),
            Err(e) => {
                eprintln!("{} {}", "Configuration error:".red().bold(), e);
                2
            }
        },
    };

    std::process::exit(code);
}
