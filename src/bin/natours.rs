use clap::{Parser, Subcommand};
use natours::cli::{self as prog_cli, Command, OutputMode, RunContext};
use natours::config::{load_config, AppConfig, Environment};
use natours::engine::{Store, StoreOptions};
use natours::logger::configure_logging;
use natours::models::register_all;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "natours", version, about = "Natours tour-booking backend CLI", long_about = None)]
struct Cli {
    /// Path to a config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Data directory holding the write-ahead log
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// development or production
    #[arg(long, global = true)]
    env: Option<Environment>,
    /// Print one JSON document per line instead of pretty JSON
    #[arg(long, global = true)]
    plain: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Load tours, users and reviews from a dev-data directory")]
    Import {
        #[arg(default_value = "dev-data")]
        dir: PathBuf,
    },
    #[command(about = "Delete all tours, users and reviews")]
    Delete,
    #[command(about = "List tours, shaped by a query string (e.g. 'price[lt]=1000&sort=-price')")]
    Tours {
        #[arg(default_value = "")]
        query: String,
    },
    #[command(about = "Show one tour with its reviews")]
    Tour { id: String },
    #[command(name = "top-tours", about = "Five best-rated, cheapest tours")]
    TopTours {
        #[arg(default_value = "")]
        query: String,
    },
    #[command(about = "Rating and price statistics by difficulty")]
    Stats,
    #[command(name = "monthly-plan", about = "Tour starts per month of a year")]
    MonthlyPlan { year: String },
    #[command(about = "Tours starting within a distance of a point")]
    Within {
        distance: String,
        #[arg(help = "lat,lng")]
        latlng: String,
        #[arg(default_value = "km", help = "mi or km")]
        unit: String,
    },
    #[command(about = "Distance to every tour start, nearest first")]
    Distances {
        #[arg(help = "lat,lng")]
        latlng: String,
        #[arg(default_value = "km", help = "mi or km")]
        unit: String,
    },
    #[command(about = "List reviews, optionally of one tour")]
    Reviews {
        #[arg(long)]
        tour: Option<String>,
        #[arg(default_value = "")]
        query: String,
    },
    #[command(name = "review-create", about = "Write a review for a tour")]
    ReviewCreate {
        tour: String,
        user: String,
        review: String,
        rating: f64,
    },
    #[command(name = "review-delete", about = "Delete a review")]
    ReviewDelete { id: String },
    #[command(about = "Create a checkout session and book a tour")]
    Book { tour: String, user: String },
    #[command(name = "my-tours", about = "Tours a user has booked")]
    MyTours { user: String },
    #[command(about = "Rewrite the write-ahead log to hold only live documents")]
    Compact,
}

impl From<Commands> for Command {
    fn from(c: Commands) -> Self {
        match c {
            Commands::Import { dir } => Self::Import { dir },
            Commands::Delete => Self::Delete,
            Commands::Tours { query } => Self::Tours { query },
            Commands::Tour { id } => Self::Tour { id },
            Commands::TopTours { query } => Self::TopTours { query },
            Commands::Stats => Self::Stats,
            Commands::MonthlyPlan { year } => Self::MonthlyPlan { year },
            Commands::Within { distance, latlng, unit } => Self::Within { distance, latlng, unit },
            Commands::Distances { latlng, unit } => Self::Distances { latlng, unit },
            Commands::Reviews { tour, query } => Self::Reviews { tour, query },
            Commands::ReviewCreate { tour, user, review, rating } => Self::ReviewCreate { tour, user, review, rating },
            Commands::ReviewDelete { id } => Self::ReviewDelete { id },
            Commands::Book { tour, user } => Self::Book { tour, user },
            Commands::MyTours { user } => Self::MyTours { user },
            Commands::Compact => Self::Compact,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let overrides = AppConfig { data_dir: cli.data_dir.clone(), environment: cli.env, ..AppConfig::default() };
    let cfg = load_config(cli.config.as_deref(), overrides);

    configure_logging(Some(&cfg.log_dir()), cfg.log_level.as_deref(), cfg.log_retention)?;
    log::info!("natours starting (environment {:?})", cfg.environment());

    let store = Store::open(StoreOptions { data_dir: Some(cfg.data_dir()) })?;
    register_all(&store)?;
    let ctx = RunContext { environment: cfg.environment(), base_url: cfg.base_url().to_string() };
    let mode = if cli.plain { OutputMode::Plain } else { OutputMode::Json };

    let result = prog_cli::run_with_format(&store, cli.command.into(), &ctx, mode);
    store.close()?;
    result
}
