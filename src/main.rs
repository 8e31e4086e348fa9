mod auth;
mod clock;
mod config;
mod database;
mod display;
mod error;
mod models;
mod schedule;
mod seed;
mod web;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use auth::SessionKeys;
use clock::{parse_date, ServiceTime, SystemClock};
use config::Config;
use schedule::Scheduler;
use web::AppState;

#[derive(Parser)]
#[command(name = "vaccine-booking", about = "Vaccine appointment scheduling service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// Overrides BOOKING_PORT
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the open slots of a center for one day
    Slots {
        #[arg(long)]
        center: String,
        /// YYYY-MM-DD
        #[arg(long)]
        date: String,
    },
    /// Import vaccines, centers and users from CSV files
    Seed {
        #[arg(long)]
        vaccines: Option<PathBuf>,
        #[arg(long)]
        centers: Option<PathBuf>,
        #[arg(long)]
        users: Option<PathBuf>,
    },
    /// Issue a session token for an existing user, using their stored role
    Token {
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 24)]
        hours: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = Config::load()?;

    info!("Initializing state...");
    let pool = database::connect(&config.database_url).await?;
    let time = ServiceTime::new(config.utc_offset, Arc::new(SystemClock));
    let scheduler = Scheduler::new(pool, time);

    match cli.command {
        Command::Serve { port } => {
            let port = port.unwrap_or(config.port);
            println!("Access the API at http://localhost:{}/api", port);

            let state = AppState {
                scheduler,
                sessions: SessionKeys::new(&config.session_secret),
                dev_mode: config.dev_mode,
            };
            web::start_server(port, state).await?;
        }
        Command::Slots { center, date } => {
            let day = parse_date(&date)?;
            let (center, open) = scheduler.open_slots(&center, &date).await?;
            display::print_day_slots(&center, day, &open);
        }
        Command::Seed {
            vaccines,
            centers,
            users,
        } => {
            let now = scheduler.time().now_local();
            let vaccines = vaccines.map(seed::load_vaccines).transpose()?.unwrap_or_default();
            let centers = centers.map(seed::load_centers).transpose()?.unwrap_or_default();
            let users = users
                .map(|path| seed::load_users(path, now))
                .transpose()?
                .unwrap_or_default();

            let summary = seed::import(scheduler.pool(), &vaccines, &centers, &users).await?;
            println!(
                "Imported {} vaccine(s), {} center(s), {} user(s)",
                summary.vaccines, summary.centers, summary.users
            );
        }
        Command::Token { user, hours } => {
            let Some(user) = database::find_user(scheduler.pool(), &user).await? else {
                return Err(format!("no user with id '{user}'").into());
            };
            let token = SessionKeys::new(&config.session_secret).issue(&user.id, user.role, hours)?;
            println!("{token}");
        }
    }

    Ok(())
}
