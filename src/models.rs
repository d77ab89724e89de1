use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const NUMERIC_COLUMNS: [&str; 8] = [
    "person_age",
    "person_income",
    "person_emp_exp",
    "loan_amnt",
    "loan_int_rate",
    "loan_percent_income",
    "cb_person_cred_hist_length",
    "credit_score",
];

pub const CATEGORICAL_COLUMNS: [&str; 5] = [
    "person_gender",
    "person_education",
    "person_home_ownership",
    "loan_intent",
    "previous_loan_defaults_on_file",
];

pub const LABEL_COLUMN: &str = "loan_status";

pub const INTENT_DIMENSION: &str = "loan_intent";
pub const GENDER_DIMENSION: &str = "person_gender";

/// One cleaned loan row. Numeric fields are imputed, categoricals are never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct LoanRecord {
    pub person_age: f64,
    pub person_income: f64,
    pub person_emp_exp: f64,
    pub loan_amnt: f64,
    pub loan_int_rate: f64,
    pub loan_percent_income: f64,
    pub cb_person_cred_hist_length: f64,
    pub credit_score: f64,
    pub person_gender: String,
    pub person_education: String,
    pub person_home_ownership: String,
    pub loan_intent: String,
    pub previous_loan_defaults_on_file: String,
    pub loan_status: u8,
}

impl LoanRecord {
    /// Numeric features in `NUMERIC_COLUMNS` order.
    pub fn numeric_features(&self) -> [f64; 8] {
        [
            self.person_age,
            self.person_income,
            self.person_emp_exp,
            self.loan_amnt,
            self.loan_int_rate,
            self.loan_percent_income,
            self.cb_person_cred_hist_length,
            self.credit_score,
        ]
    }

    /// Categorical features in `CATEGORICAL_COLUMNS` order.
    pub fn categorical_features(&self) -> [&str; 5] {
        [
            &self.person_gender,
            &self.person_education,
            &self.person_home_ownership,
            &self.loan_intent,
            &self.previous_loan_defaults_on_file,
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredLoan {
    pub loan: LoanRecord,
    pub pd: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EclRecord {
    pub loan: LoanRecord,
    pub pd: f64,
    pub lgd: f64,
    pub ead: f64,
    pub ecl: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "Monitor")]
    Monitor,
    #[serde(rename = "Increase interest rate")]
    IncreaseInterestRate,
    #[serde(rename = "Reduce disbursement")]
    ReduceDisbursement,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Monitor => "Monitor",
            Action::IncreaseInterestRate => "Increase interest rate",
            Action::ReduceDisbursement => "Reduce disbursement",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentAggregate {
    pub loan_intent: String,
    pub person_gender: String,
    pub pd_mean: f64,
    pub lgd: f64,
    pub ecl: f64,
    pub action: Action,
}

/// A persisted segment row. Carries the save metadata next to the aggregate columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub loan_intent: String,
    pub person_gender: String,
    pub pd_mean: f64,
    pub lgd: f64,
    pub ecl: f64,
    pub action: Action,
    pub median: f64,
    pub rid: String,
    pub saved_by: String,
    pub saved_at: DateTime<Utc>,
}

impl ReportRow {
    pub fn aggregate(&self) -> SegmentAggregate {
        SegmentAggregate {
            loan_intent: self.loan_intent.clone(),
            person_gender: self.person_gender.clone(),
            pd_mean: self.pd_mean,
            lgd: self.lgd,
            ecl: self.ecl,
            action: self.action,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub rid: String,
    pub file: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CroDecision {
    Pending,
    #[value(alias = "approve")]
    Approved,
    #[value(alias = "reject")]
    Rejected,
    #[value(alias = "defer")]
    Deferred,
}

impl fmt::Display for CroDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CroDecision::Pending => "pending",
            CroDecision::Approved => "approved",
            CroDecision::Rejected => "rejected",
            CroDecision::Deferred => "deferred",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub iid: String,
    pub rid: String,
    pub note: String,
    pub recommendation: String,
    pub saved_at: DateTime<Utc>,
    pub cro_decision: CroDecision,
    pub cro_note: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Analyst,
    Cro,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Analyst => f.write_str("analyst"),
            Role::Cro => f.write_str("cro"),
        }
    }
}

/// Dimension name to allowed values. A `*` key, or a dimension mapped to `["*"]`,
/// grants every value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentPermissions(pub BTreeMap<String, Vec<String>>);

impl SegmentPermissions {
    pub const WILDCARD: &'static str = "*";

    pub fn unrestricted() -> Self {
        let mut map = BTreeMap::new();
        map.insert(
            Self::WILDCARD.to_string(),
            vec![Self::WILDCARD.to_string()],
        );
        Self(map)
    }

    pub fn restricted(intents: Vec<String>, genders: Vec<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(INTENT_DIMENSION.to_string(), intents);
        map.insert(GENDER_DIMENSION.to_string(), genders);
        Self(map)
    }

    pub fn allows_all(&self) -> bool {
        self.0.contains_key(Self::WILDCARD)
    }

    pub fn allowed_values(&self, dimension: &str, available: &[String]) -> Vec<String> {
        let all = match self.0.get(dimension) {
            _ if self.allows_all() => true,
            None => true,
            Some(values) => values.len() == 1 && values[0] == Self::WILDCARD,
        };
        if all {
            return available.to_vec();
        }
        let granted = &self.0[dimension];
        available
            .iter()
            .filter(|value| granted.contains(value))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub username: String,
    pub role: Role,
    pub segments: SegmentPermissions,
}

impl User {
    pub fn allowed_values(&self, dimension: &str, available: &[String]) -> Vec<String> {
        match self.role {
            Role::Cro => available.to_vec(),
            Role::Analyst => self.segments.allowed_values(dimension, available),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn wildcard_grants_every_dimension() {
        let perms = SegmentPermissions::unrestricted();
        let available = values(&["EDUCATION", "MEDICAL"]);
        assert_eq!(perms.allowed_values(INTENT_DIMENSION, &available), available);
        assert_eq!(perms.allowed_values("anything", &available), available);
    }

    #[test]
    fn restricted_filters_to_granted_values() {
        let perms = SegmentPermissions::restricted(values(&["MEDICAL"]), values(&["*"]));
        let intents = values(&["EDUCATION", "MEDICAL", "VENTURE"]);
        let genders = values(&["female", "male"]);
        assert_eq!(perms.allowed_values(INTENT_DIMENSION, &intents), values(&["MEDICAL"]));
        assert_eq!(perms.allowed_values(GENDER_DIMENSION, &genders), genders);
    }

    #[test]
    fn cro_ignores_segment_restrictions() {
        let user = User {
            username: "cro1".to_string(),
            role: Role::Cro,
            segments: SegmentPermissions::restricted(vec![], vec![]),
        };
        let intents = values(&["EDUCATION"]);
        assert_eq!(user.allowed_values(INTENT_DIMENSION, &intents), intents);
    }

    #[test]
    fn permissions_serialize_as_plain_map() {
        let json = serde_json::to_string(&SegmentPermissions::unrestricted()).unwrap();
        assert_eq!(json, r#"{"*":["*"]}"#);
    }
}
