use anyhow::{bail, Context};
use tracing::{debug, info, instrument};

use crate::auth::UserStore;
use crate::cache::{dataset_key, ModelCache};
use crate::config::AppConfig;
use crate::data;
use crate::ecl;
use crate::insight::InsightClient;
use crate::models::{
    EclRecord, LoanRecord, ReportRow, Role, User, GENDER_DIMENSION, INTENT_DIMENSION,
};
use crate::pd_model::{self, PdModelConfig};
use crate::report::{self, DashboardView};
use crate::storage::ReportStore;

pub const SELECT_PROMPT: &str = "Select loan intent and gender to see ECL results.";
pub const NO_DATA: &str = "No data for current selections.";

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
}

pub fn login(config: &AppConfig, credentials: &Credentials) -> anyhow::Result<User> {
    let (Some(username), Some(password)) = (&credentials.username, &credentials.password) else {
        bail!("login required: pass --username and --password (or ECL_USERNAME / ECL_PASSWORD)");
    };
    let store = UserStore::new(&config.users_path);
    match store.verify_login(username, password, credentials.role)? {
        Some(user) => {
            info!(username = %user.username, role = %user.role, "logged in");
            Ok(user)
        }
        None => bail!("Invalid credentials"),
    }
}

pub fn require_cro(user: &User) -> anyhow::Result<()> {
    if user.role != Role::Cro {
        bail!("this action is restricted to the CRO role");
    }
    Ok(())
}

pub fn require_report_access(user: &User, rows: &[ReportRow]) -> anyhow::Result<()> {
    if user.role == Role::Analyst
        && rows
            .iter()
            .any(|row| !row.saved_by.eq_ignore_ascii_case(&user.username))
    {
        bail!("this report belongs to another user");
    }
    Ok(())
}

pub fn grant_target(users: &UserStore, name: &str) -> anyhow::Result<User> {
    users
        .get_user(name)?
        .filter(|u| u.role == Role::Analyst)
        .with_context(|| format!("no analyst named {name}"))
}

/// Cleans and scores the configured dataset, reusing a cached model when the
/// dataset bytes are unchanged.
#[instrument(skip(config), fields(data = %config.data_path.display()))]
pub fn scored_portfolio(config: &AppConfig) -> anyhow::Result<Vec<EclRecord>> {
    let loans = data::load_clean(&config.data_path)?;
    if !config.use_cache {
        let scored = pd_model::build_pd(loans).context("failed to build PD model")?;
        return Ok(ecl::add_ecl(scored));
    }
    let key = dataset_key(&config.data_path)?;
    let cache = ModelCache::new(&config.cache_dir);
    let model = cache
        .get_or_fit(&key, &loans, &PdModelConfig::default())
        .context("failed to build PD model")?;
    debug!(iterations = model.iterations(), "PD model ready");
    Ok(ecl::add_ecl(model.score(loans)))
}

pub fn distinct_values(loans: &[LoanRecord], dimension: &str) -> Vec<String> {
    let mut values: Vec<String> = loans
        .iter()
        .map(|loan| match dimension {
            GENDER_DIMENSION => loan.person_gender.clone(),
            _ => loan.loan_intent.clone(),
        })
        .collect();
    values.sort();
    values.dedup();
    values
}

pub fn segment_options(loans: &[LoanRecord], user: &User) -> (Vec<String>, Vec<String>) {
    let intents = distinct_values(loans, INTENT_DIMENSION);
    let genders = distinct_values(loans, GENDER_DIMENSION);
    (
        user.allowed_values(INTENT_DIMENSION, &intents),
        user.allowed_values(GENDER_DIMENSION, &genders),
    )
}

/// Rejects selections outside the user's permitted values.
pub fn check_selection(selected: &[String], allowed: &[String], dimension: &str) -> anyhow::Result<()> {
    if let Some(denied) = selected.iter().find(|value| !allowed.contains(value)) {
        bail!("{dimension} `{denied}` is not available to this user");
    }
    Ok(())
}

pub fn filter_selection(
    records: Vec<EclRecord>,
    intents: &[String],
    genders: &[String],
) -> Vec<EclRecord> {
    records
        .into_iter()
        .filter(|r| intents.contains(&r.loan.loan_intent) && genders.contains(&r.loan.person_gender))
        .collect()
}

pub struct DashboardRequest {
    pub intents: Vec<String>,
    pub genders: Vec<String>,
    pub save: bool,
    pub insight: bool,
}

pub async fn run_dashboard(
    config: &AppConfig,
    user: &User,
    request: DashboardRequest,
) -> anyhow::Result<String> {
    if request.intents.is_empty() || request.genders.is_empty() {
        return Ok(SELECT_PROMPT.to_string());
    }

    let records = scored_portfolio(config)?;
    let loans: Vec<LoanRecord> = records.iter().map(|r| r.loan.clone()).collect();
    let (allowed_intents, allowed_genders) = segment_options(&loans, user);
    check_selection(&request.intents, &allowed_intents, INTENT_DIMENSION)?;
    check_selection(&request.genders, &allowed_genders, GENDER_DIMENSION)?;

    let selected = filter_selection(records, &request.intents, &request.genders);
    if selected.is_empty() {
        return Ok(NO_DATA.to_string());
    }

    let (segments, median) = ecl::aggregate(&selected);
    let by_gender = ecl::ecl_by_gender(&selected);
    info!(
        loans = selected.len(),
        segments = segments.len(),
        median,
        "segments aggregated"
    );

    let saved_report = if request.save {
        let store = ReportStore::new(&config.reports_dir);
        Some(store.save_report(&segments, median, &user.username)?)
    } else {
        None
    };

    let insight = if request.insight {
        let client = InsightClient::new(config.insight_config())?;
        let top = ecl::top_segments(&segments, 5);
        Some(
            client
                .get_insight(&request.intents, &request.genders, &top, median)
                .await,
        )
    } else {
        None
    };

    Ok(report::render_dashboard(&DashboardView {
        user,
        intents: &request.intents,
        genders: &request.genders,
        segments: &segments,
        median,
        by_gender: &by_gender,
        saved_report: saved_report.as_deref(),
        insight: insight.as_deref(),
    }))
}
