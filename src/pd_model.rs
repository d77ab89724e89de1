use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{LoanRecord, ScoredLoan, CATEGORICAL_COLUMNS, NUMERIC_COLUMNS};

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("cannot fit a PD model on an empty dataset")]
    EmptyDataset,
    #[error("cannot fit a PD model: every loan has loan_status = {0}")]
    SingleClass(u8),
}

#[derive(Debug, Clone)]
pub struct PdModelConfig {
    /// Inverse L2 regularisation strength.
    pub c: f64,
    pub max_iter: usize,
    pub learning_rate: f64,
    /// Early stop once the largest gradient component falls below this.
    pub tolerance: f64,
}

impl Default for PdModelConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 500,
            learning_rate: 0.1,
            tolerance: 1e-6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdModel {
    /// Sorted categories seen during fit, per categorical column.
    categories: Vec<Vec<String>>,
    numeric_mean: Vec<f64>,
    numeric_scale: Vec<f64>,
    intercept: f64,
    coef: Vec<f64>,
    iterations: usize,
}

impl PdModel {
    pub fn fit(loans: &[LoanRecord], config: &PdModelConfig) -> Result<Self, ModelError> {
        let n = loans.len();
        if n == 0 {
            return Err(ModelError::EmptyDataset);
        }
        let positives = loans.iter().filter(|l| l.loan_status == 1).count();
        if positives == 0 {
            return Err(ModelError::SingleClass(0));
        }
        if positives == n {
            return Err(ModelError::SingleClass(1));
        }

        let categories = learn_categories(loans);
        let (numeric_mean, numeric_scale) = learn_scaling(loans);
        let mut model = Self {
            categories,
            numeric_mean,
            numeric_scale,
            intercept: 0.0,
            coef: Vec::new(),
            iterations: 0,
        };
        let dim = model.feature_dim();
        model.coef = vec![0.0; dim];

        let rows: Vec<Vec<f64>> = loans.iter().map(|l| model.encode(l)).collect();
        let labels: Vec<f64> = loans.iter().map(|l| f64::from(l.loan_status)).collect();

        // balanced: n / (classes * count)
        let n_f = n as f64;
        let weight_pos = n_f / (2.0 * positives as f64);
        let weight_neg = n_f / (2.0 * (n - positives) as f64);
        let penalty = 1.0 / (config.c * n_f);

        for iteration in 0..config.max_iter {
            let mut grad = vec![0.0; dim];
            let mut grad_intercept = 0.0;

            for (x, &y) in rows.iter().zip(labels.iter()) {
                let weight = if y > 0.5 { weight_pos } else { weight_neg };
                let error = weight * (sigmoid(model.logit(x)) - y);
                grad_intercept += error;
                for (g, &xj) in grad.iter_mut().zip(x.iter()) {
                    *g += error * xj;
                }
            }

            grad_intercept /= n_f;
            let mut largest = grad_intercept.abs();
            for (g, &w) in grad.iter_mut().zip(model.coef.iter()) {
                *g = *g / n_f + penalty * w;
                largest = largest.max(g.abs());
            }

            model.intercept -= config.learning_rate * grad_intercept;
            for (w, g) in model.coef.iter_mut().zip(grad.iter()) {
                *w -= config.learning_rate * g;
            }
            model.iterations = iteration + 1;

            if largest < config.tolerance {
                debug!(iteration, "PD model converged");
                break;
            }
        }

        info!(
            rows = n,
            positives,
            features = dim,
            iterations = model.iterations,
            "PD model fitted"
        );
        Ok(model)
    }

    /// Probability of the default class.
    pub fn predict_proba(&self, loan: &LoanRecord) -> f64 {
        sigmoid(self.logit(&self.encode(loan)))
    }

    pub fn score(&self, loans: Vec<LoanRecord>) -> Vec<ScoredLoan> {
        loans
            .into_iter()
            .map(|loan| {
                let pd = self.predict_proba(&loan);
                ScoredLoan { loan, pd }
            })
            .collect()
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// True when the fitted arrays match the current feature layout.
    pub fn is_consistent(&self) -> bool {
        self.categories.len() == CATEGORICAL_COLUMNS.len()
            && self.numeric_mean.len() == NUMERIC_COLUMNS.len()
            && self.numeric_scale.len() == NUMERIC_COLUMNS.len()
            && self.coef.len() == self.feature_dim()
    }

    fn feature_dim(&self) -> usize {
        self.categories.iter().map(Vec::len).sum::<usize>() + NUMERIC_COLUMNS.len()
    }

    fn logit(&self, x: &[f64]) -> f64 {
        self.intercept
            + self
                .coef
                .iter()
                .zip(x.iter())
                .map(|(w, v)| w * v)
                .sum::<f64>()
    }

    /// Categories unseen at fit time encode as all zeros.
    fn encode(&self, loan: &LoanRecord) -> Vec<f64> {
        let mut x = Vec::with_capacity(self.feature_dim());
        for (known, value) in self.categories.iter().zip(loan.categorical_features()) {
            let hit = known.binary_search_by(|c| c.as_str().cmp(value)).ok();
            x.extend((0..known.len()).map(|i| if Some(i) == hit { 1.0 } else { 0.0 }));
        }
        for (j, value) in loan.numeric_features().into_iter().enumerate() {
            x.push((value - self.numeric_mean[j]) / self.numeric_scale[j]);
        }
        x
    }
}

/// Fits a fresh model on `loans` and scores every row with it.
pub fn build_pd(loans: Vec<LoanRecord>) -> Result<Vec<ScoredLoan>, ModelError> {
    let model = PdModel::fit(&loans, &PdModelConfig::default())?;
    Ok(model.score(loans))
}

fn learn_categories(loans: &[LoanRecord]) -> Vec<Vec<String>> {
    (0..CATEGORICAL_COLUMNS.len())
        .map(|j| {
            let mut values: Vec<String> = loans
                .iter()
                .map(|l| l.categorical_features()[j].to_string())
                .collect();
            values.sort();
            values.dedup();
            values
        })
        .collect()
}

fn learn_scaling(loans: &[LoanRecord]) -> (Vec<f64>, Vec<f64>) {
    let n = loans.len() as f64;
    let mut mean = vec![0.0; NUMERIC_COLUMNS.len()];
    for loan in loans {
        for (m, v) in mean.iter_mut().zip(loan.numeric_features()) {
            *m += v;
        }
    }
    mean.iter_mut().for_each(|m| *m /= n);

    let mut variance = vec![0.0; NUMERIC_COLUMNS.len()];
    for loan in loans {
        for ((s, m), v) in variance.iter_mut().zip(mean.iter()).zip(loan.numeric_features()) {
            *s += (v - m).powi(2);
        }
    }
    // constant columns keep unit scale
    let scale = variance
        .into_iter()
        .zip(mean.iter())
        .map(|(v, m)| {
            let std = (v / n).sqrt();
            if std.is_finite() && std > 1e-9 * (m.abs() + 1.0) {
                std
            } else {
                1.0
            }
        })
        .collect();
    (mean, scale)
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loan(score: f64, intent: &str, defaulted: u8) -> LoanRecord {
        LoanRecord {
            person_age: 30.0,
            person_income: 50_000.0,
            person_emp_exp: 5.0,
            loan_amnt: 10_000.0,
            loan_int_rate: 11.0,
            loan_percent_income: 0.2,
            cb_person_cred_hist_length: 4.0,
            credit_score: score,
            person_gender: "female".to_string(),
            person_education: "Bachelor".to_string(),
            person_home_ownership: "RENT".to_string(),
            loan_intent: intent.to_string(),
            previous_loan_defaults_on_file: "No".to_string(),
            loan_status: defaulted,
        }
    }

    fn portfolio() -> Vec<LoanRecord> {
        let mut loans = Vec::new();
        for i in 0..40 {
            let score = 500.0 + i as f64;
            loans.push(loan(score, "MEDICAL", u8::from(i % 4 != 0)));
        }
        for i in 0..60 {
            let score = 700.0 + i as f64;
            loans.push(loan(score, "EDUCATION", u8::from(i % 10 == 0)));
        }
        loans
    }

    #[test]
    fn probabilities_stay_in_unit_interval() {
        let scored = build_pd(portfolio()).unwrap();
        assert_eq!(scored.len(), 100);
        assert!(scored.iter().all(|s| (0.0..=1.0).contains(&s.pd)));
    }

    #[test]
    fn riskier_profile_scores_higher() {
        let model = PdModel::fit(&portfolio(), &PdModelConfig::default()).unwrap();
        let risky = model.predict_proba(&loan(510.0, "MEDICAL", 0));
        let safe = model.predict_proba(&loan(750.0, "EDUCATION", 0));
        assert!(risky > safe, "risky {risky} should exceed safe {safe}");
    }

    #[test]
    fn balanced_weights_center_signal_free_data() {
        // 90/10 imbalance with identical features: balanced weighting keeps PD at 0.5
        let loans: Vec<LoanRecord> = (0..100)
            .map(|i| loan(650.0, "PERSONAL", u8::from(i < 10)))
            .collect();
        let scored = build_pd(loans).unwrap();
        for s in scored {
            assert!((s.pd - 0.5).abs() < 1e-9, "pd was {}", s.pd);
        }
    }

    #[test]
    fn unknown_categories_are_ignored() {
        let model = PdModel::fit(&portfolio(), &PdModelConfig::default()).unwrap();
        let pd = model.predict_proba(&loan(600.0, "SPACE TRAVEL", 0));
        assert!(pd.is_finite());
        assert!((0.0..=1.0).contains(&pd));
    }

    #[test]
    fn degenerate_inputs_are_rejected() {
        assert_eq!(
            PdModel::fit(&[], &PdModelConfig::default()).unwrap_err(),
            ModelError::EmptyDataset
        );
        let all_paid = vec![loan(600.0, "MEDICAL", 0), loan(650.0, "VENTURE", 0)];
        assert_eq!(
            PdModel::fit(&all_paid, &PdModelConfig::default()).unwrap_err(),
            ModelError::SingleClass(0)
        );
    }

    #[test]
    fn iteration_cap_is_respected() {
        let config = PdModelConfig {
            max_iter: 3,
            tolerance: 0.0,
            ..PdModelConfig::default()
        };
        let model = PdModel::fit(&portfolio(), &config).unwrap();
        assert_eq!(model.iterations(), 3);
    }

    #[test]
    fn fitted_model_survives_json() {
        let model = PdModel::fit(&portfolio(), &PdModelConfig::default()).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let restored: PdModel = serde_json::from_str(&json).unwrap();
        let sample = loan(620.0, "MEDICAL", 0);
        assert!((model.predict_proba(&sample) - restored.predict_proba(&sample)).abs() < 1e-12);
    }
}
