use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod auth;
mod cache;
mod config;
mod dashboard;
mod data;
mod ecl;
mod insight;
mod models;
mod pd_model;
mod report;
mod storage;

use crate::auth::UserStore;
use crate::cache::{dataset_key, ModelCache};
use crate::config::{ApiKeySources, AppConfig};
use crate::dashboard::{Credentials, DashboardRequest};
use crate::models::{Action, CroDecision, Role, SegmentPermissions};
use crate::storage::{InsightStore, ReportStore};

#[derive(Parser)]
#[command(name = "ecl-dashboard")]
#[command(about = "Expected Credit Loss dashboard for loan portfolio segments", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Loan dataset (CSV)
    #[arg(long, global = true, env = "ECL_DATA", default_value = "loan_data.csv")]
    data: PathBuf,

    #[arg(long, global = true, env = "ECL_REPORTS_DIR", default_value = "reports")]
    reports_dir: PathBuf,

    #[arg(long, global = true, env = "ECL_INSIGHTS", default_value = "insights.csv")]
    insights: PathBuf,

    #[arg(long, global = true, env = "ECL_USERS", default_value = "users.csv")]
    users: PathBuf,

    #[arg(long, global = true, env = "ECL_CACHE_DIR", default_value = ".ecl_cache")]
    cache_dir: PathBuf,

    #[arg(long, global = true, env = "ECL_INSIGHT_ENDPOINT", default_value = crate::config::DEFAULT_ENDPOINT)]
    insight_endpoint: String,

    /// Refit the PD model instead of reusing a cached one
    #[arg(long, global = true)]
    no_cache: bool,

    /// Hosted secrets file checked first for the API key
    #[arg(long, global = true, env = "ECL_SECRETS", default_value = "secrets.toml")]
    secrets: PathBuf,

    #[arg(long, global = true, env = "ECL_ENV_FILE", default_value = ".env")]
    env_file: PathBuf,

    #[arg(long, global = true, env = "ECL_CONFIG", default_value = "config.json")]
    config: PathBuf,

    #[arg(short, long, global = true, env = "ECL_USERNAME")]
    username: Option<String>,

    #[arg(short, long, global = true, env = "ECL_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Require the login to hold this role
    #[arg(long, global = true, value_enum)]
    role: Option<Role>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the demo analyst1 / cro1 accounts if missing
    SeedUsers,
    /// Create an account
    CreateUser {
        #[arg(long)]
        new_username: String,
        #[arg(long)]
        new_password: String,
        #[arg(long, value_enum, default_value = "analyst")]
        new_role: Role,
    },
    /// Store the generative-text API key in the config file
    SetApiKey { key: String },
    /// List the loan intents and genders available to the logged-in user
    Options,
    /// Score the portfolio and show segment ECL for a selection
    Dashboard {
        #[arg(long = "intent")]
        intents: Vec<String>,
        #[arg(long = "gender")]
        genders: Vec<String>,
        /// Persist the aggregate as a report
        #[arg(long)]
        save: bool,
        /// Ask the insight endpoint for narrative guidance
        #[arg(long)]
        insight: bool,
    },
    /// Record an analyst insight against a report
    SaveInsight {
        /// Defaults to the user's latest report
        #[arg(long)]
        report_id: Option<String>,
        #[arg(long)]
        note: String,
        #[arg(long, value_parser = parse_action)]
        recommendation: Action,
    },
    /// List saved reports (all for CRO, own for analysts)
    Reports,
    /// Show one saved report
    Report { rid: String },
    /// List analyst insights (CRO)
    Insights,
    /// Record a CRO decision on an insight (CRO)
    Review {
        iid: String,
        #[arg(long, value_enum)]
        decision: CroDecision,
        #[arg(long, default_value = "")]
        note: String,
    },
    /// List accounts (CRO)
    Users,
    /// Restrict an analyst to the given intents and genders (CRO)
    Grant {
        analyst: String,
        #[arg(long = "intent")]
        intents: Vec<String>,
        #[arg(long = "gender")]
        genders: Vec<String>,
    },
    /// Model cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Drop the cached model for the current dataset
    Invalidate,
    /// Drop every cached model
    Clear,
}

fn parse_action(value: &str) -> Result<Action, String> {
    match value.trim().to_lowercase().as_str() {
        "monitor" => Ok(Action::Monitor),
        "increase interest rate" | "increase-interest-rate" => Ok(Action::IncreaseInterestRate),
        "reduce disbursement" | "reduce-disbursement" => Ok(Action::ReduceDisbursement),
        other => Err(format!(
            "unknown recommendation `{other}` (expected Monitor, Increase interest rate, Reduce disbursement)"
        )),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn seed_requested() -> bool {
    std::env::var("SEED_DEFAULT_USERS")
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = AppConfig {
        data_path: cli.data,
        reports_dir: cli.reports_dir,
        insights_path: cli.insights,
        users_path: cli.users,
        cache_dir: cli.cache_dir,
        insight_endpoint: cli.insight_endpoint,
        use_cache: !cli.no_cache,
        api_keys: ApiKeySources {
            secrets_path: cli.secrets,
            env_file: cli.env_file,
            config_path: cli.config,
        },
    };
    let credentials = Credentials {
        username: cli.username,
        password: cli.password,
        role: cli.role,
    };
    debug!(?config, "configuration resolved");

    let users = UserStore::new(&config.users_path);
    if seed_requested() {
        users.ensure_default_users()?;
    }

    match cli.command {
        Commands::SeedUsers => {
            let created = users.ensure_default_users()?;
            println!("Seeded {created} default users.");
        }
        Commands::CreateUser {
            new_username,
            new_password,
            new_role,
        } => {
            if users.create_user(&new_username, &new_password, new_role, None)? {
                println!("Account created. Please login.");
            } else {
                anyhow::bail!("Username exists or invalid input.");
            }
        }
        Commands::SetApiKey { key } => {
            config.api_keys.set_api_key(&key)?;
            println!("Saved");
        }
        Commands::Options => {
            let user = dashboard::login(&config, &credentials)?;
            let loans = data::load_clean(&config.data_path)?;
            let (intents, genders) = dashboard::segment_options(&loans, &user);
            println!("Loan intents:");
            for intent in &intents {
                println!("- {intent} ({})", report::format_label(intent));
            }
            println!("Genders:");
            for gender in &genders {
                println!("- {gender} ({})", report::format_label(gender));
            }
        }
        Commands::Dashboard {
            intents,
            genders,
            save,
            insight,
        } => {
            let user = dashboard::login(&config, &credentials)?;
            let output = dashboard::run_dashboard(
                &config,
                &user,
                DashboardRequest {
                    intents,
                    genders,
                    save,
                    insight,
                },
            )
            .await?;
            println!("{output}");
        }
        Commands::SaveInsight {
            report_id,
            note,
            recommendation,
        } => {
            let user = dashboard::login(&config, &credentials)?;
            let rid = match report_id {
                Some(rid) => rid,
                None => ReportStore::new(&config.reports_dir)
                    .latest_report_for(&user.username)?
                    .context("no saved report to attach the insight to; pass --report-id")?,
            };
            let iid = InsightStore::new(&config.insights_path).save_insight(
                &rid,
                &note,
                recommendation.as_str(),
            )?;
            println!("Insight saved: {iid}");
        }
        Commands::Reports => {
            let user = dashboard::login(&config, &credentials)?;
            let store = ReportStore::new(&config.reports_dir);
            let entries = match user.role {
                Role::Cro => store.list_reports(None)?,
                Role::Analyst => store.list_reports(Some(&user.username))?,
            };
            print!("{}", report::render_report_list(&entries));
        }
        Commands::Report { rid } => {
            let user = dashboard::login(&config, &credentials)?;
            let rows = ReportStore::new(&config.reports_dir).load_report(&rid)?;
            dashboard::require_report_access(&user, &rows)?;
            print!("{}", report::render_report(&rid, &rows));
        }
        Commands::Insights => {
            let user = dashboard::login(&config, &credentials)?;
            dashboard::require_cro(&user)?;
            let insights = InsightStore::new(&config.insights_path).list_insights()?;
            print!("{}", report::render_insights(&insights));
        }
        Commands::Review {
            iid,
            decision,
            note,
        } => {
            let user = dashboard::login(&config, &credentials)?;
            dashboard::require_cro(&user)?;
            if InsightStore::new(&config.insights_path).update_insight(&iid, decision, &note)? {
                println!("Updated");
            } else {
                anyhow::bail!("Update failed");
            }
        }
        Commands::Users => {
            let user = dashboard::login(&config, &credentials)?;
            dashboard::require_cro(&user)?;
            print!("{}", report::render_users(&users.list_users()?));
        }
        Commands::Grant {
            analyst,
            intents,
            genders,
        } => {
            let user = dashboard::login(&config, &credentials)?;
            dashboard::require_cro(&user)?;
            let target = dashboard::grant_target(&users, &analyst)?;
            let segments = SegmentPermissions::restricted(intents, genders);
            if users.update_segments(&target.username, &segments)? {
                println!("Access updated");
            } else {
                anyhow::bail!("Update failed");
            }
        }
        Commands::Cache { action } => {
            let cache = ModelCache::new(&config.cache_dir);
            match action {
                CacheAction::Invalidate => {
                    let key = dataset_key(&config.data_path)?;
                    if cache.invalidate(&key)? {
                        println!("Cached model for {} dropped.", config.data_path.display());
                    } else {
                        println!("No cached model for {}.", config.data_path.display());
                    }
                }
                CacheAction::Clear => {
                    let removed = cache.clear()?;
                    println!("Removed {removed} cached models.");
                }
            }
        }
    }

    Ok(())
}
