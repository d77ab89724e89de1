use std::collections::BTreeMap;

use crate::data::median;
use crate::models::{Action, EclRecord, ScoredLoan, SegmentAggregate};

pub const DEFAULT_LGD: f64 = 0.45;

pub fn lgd_for_intent(intent: &str) -> f64 {
    match intent.trim().to_lowercase().as_str() {
        "education" => 0.3,
        "business" => 0.5,
        "medical" => 0.4,
        "venture" => 0.6,
        _ => DEFAULT_LGD,
    }
}

pub fn add_ecl(scored: Vec<ScoredLoan>) -> Vec<EclRecord> {
    scored
        .into_iter()
        .map(|ScoredLoan { loan, pd }| {
            let lgd = lgd_for_intent(&loan.loan_intent);
            let ead = loan.loan_amnt.max(0.0);
            EclRecord {
                loan,
                pd,
                lgd,
                ead,
                ecl: pd * lgd * ead,
            }
        })
        .collect()
}

pub fn action_rule(ecl: f64, median: f64) -> Action {
    if ecl > 1.5 * median {
        Action::ReduceDisbursement
    } else if ecl > 1.1 * median {
        Action::IncreaseInterestRate
    } else {
        Action::Monitor
    }
}

/// Groups by (intent, gender) and ranks each group's summed ECL against the
/// median across groups. Returns the groups in key order with that median.
pub fn aggregate(records: &[EclRecord]) -> (Vec<SegmentAggregate>, f64) {
    let mut groups: BTreeMap<(&str, &str), (usize, f64, f64, f64)> = BTreeMap::new();

    for record in records {
        let key = (
            record.loan.loan_intent.as_str(),
            record.loan.person_gender.as_str(),
        );
        let entry = groups.entry(key).or_insert((0, 0.0, 0.0, 0.0));
        entry.0 += 1;
        entry.1 += record.pd;
        entry.2 += record.lgd;
        entry.3 += record.ecl;
    }

    let mut sums: Vec<f64> = groups.values().map(|(_, _, _, ecl)| *ecl).collect();
    let median = median(&mut sums).unwrap_or(0.0);

    let segments = groups
        .into_iter()
        .map(|((intent, gender), (count, pd_total, lgd_total, ecl))| {
            let count = count as f64;
            SegmentAggregate {
                loan_intent: intent.to_string(),
                person_gender: gender.to_string(),
                pd_mean: pd_total / count,
                lgd: lgd_total / count,
                ecl,
                action: action_rule(ecl, median),
            }
        })
        .collect();

    (segments, median)
}

pub fn top_segments(segments: &[SegmentAggregate], n: usize) -> Vec<SegmentAggregate> {
    let mut ranked = segments.to_vec();
    ranked.sort_by(|a, b| b.ecl.partial_cmp(&a.ecl).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(n);
    ranked
}

pub fn ecl_by_gender(records: &[EclRecord]) -> Vec<(String, f64)> {
    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
    for record in records {
        *totals.entry(record.loan.person_gender.as_str()).or_insert(0.0) += record.ecl;
    }
    totals
        .into_iter()
        .map(|(gender, ecl)| (gender.to_string(), ecl))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LoanRecord;

    fn scored(intent: &str, gender: &str, amount: f64, pd: f64) -> ScoredLoan {
        ScoredLoan {
            loan: LoanRecord {
                person_age: 30.0,
                person_income: 40_000.0,
                person_emp_exp: 2.0,
                loan_amnt: amount,
                loan_int_rate: 12.0,
                loan_percent_income: 0.25,
                cb_person_cred_hist_length: 3.0,
                credit_score: 640.0,
                person_gender: gender.to_string(),
                person_education: "Bachelor".to_string(),
                person_home_ownership: "RENT".to_string(),
                loan_intent: intent.to_string(),
                previous_loan_defaults_on_file: "No".to_string(),
                loan_status: 0,
            },
            pd,
        }
    }

    #[test]
    fn lgd_table_is_case_insensitive() {
        assert_eq!(lgd_for_intent("Education"), 0.3);
        assert_eq!(lgd_for_intent("BUSINESS"), 0.5);
        assert_eq!(lgd_for_intent("medical"), 0.4);
        assert_eq!(lgd_for_intent("Venture"), 0.6);
    }

    #[test]
    fn unlisted_intents_get_default_lgd() {
        for intent in ["PERSONAL", "DEBTCONSOLIDATION", "HOMEIMPROVEMENT", "", "unknown"] {
            assert_eq!(lgd_for_intent(intent), DEFAULT_LGD);
        }
    }

    #[test]
    fn ecl_is_pd_times_lgd_times_ead() {
        let records = add_ecl(vec![scored("Education", "female", 10_000.0, 0.2)]);
        assert_eq!(records[0].lgd, 0.3);
        assert_eq!(records[0].ead, 10_000.0);
        assert!((records[0].ecl - 600.0).abs() < 1e-9);
    }

    #[test]
    fn negative_amounts_floor_exposure_at_zero() {
        let records = add_ecl(vec![scored("VENTURE", "male", -500.0, 0.9)]);
        assert_eq!(records[0].ead, 0.0);
        assert_eq!(records[0].ecl, 0.0);
    }

    #[test]
    fn action_thresholds_are_strict() {
        assert_eq!(action_rule(220.0, 200.0), Action::Monitor);
        assert_eq!(action_rule(220.01, 200.0), Action::IncreaseInterestRate);
        assert_eq!(action_rule(300.0, 200.0), Action::IncreaseInterestRate);
        assert_eq!(action_rule(300.01, 200.0), Action::ReduceDisbursement);
    }

    #[test]
    fn action_is_monotonic_in_ecl() {
        let rank = |a: Action| match a {
            Action::Monitor => 0,
            Action::IncreaseInterestRate => 1,
            Action::ReduceDisbursement => 2,
        };
        let mut previous = 0;
        for step in 0..400 {
            let current = rank(action_rule(step as f64, 200.0));
            assert!(current >= previous);
            previous = current;
        }
    }

    #[test]
    fn empty_input_aggregates_to_nothing() {
        let (segments, median) = aggregate(&[]);
        assert!(segments.is_empty());
        assert_eq!(median, 0.0);
    }

    #[test]
    fn aggregate_uses_median_of_group_sums() {
        // lgd 0.45 for PERSONAL; pd * 0.45 * amount gives the target sums
        let records = add_ecl(vec![
            scored("PERSONAL", "female", 1_000.0, 100.0 / 450.0),
            scored("PERSONAL", "male", 1_000.0, 150.0 / 450.0),
            scored("PERSONAL", "male", 1_000.0, 150.0 / 450.0),
        ]);
        let (segments, median) = aggregate(&records);
        assert_eq!(segments.len(), 2);
        assert!((median - 200.0).abs() < 1e-9);

        let female = &segments[0];
        assert_eq!(female.person_gender, "female");
        assert!((female.ecl - 100.0).abs() < 1e-9);
        assert_eq!(female.action, Action::Monitor);

        let male = &segments[1];
        assert!((male.ecl - 300.0).abs() < 1e-9);
        assert!((male.pd_mean - 150.0 / 450.0).abs() < 1e-12);
        assert_eq!(male.lgd, 0.45);
    }

    #[test]
    fn actions_against_median_of_two_groups() {
        // sums [100, 300] give median 200: thresholds at 220 and 300
        assert_eq!(action_rule(250.0, 200.0), Action::IncreaseInterestRate);
        assert_eq!(action_rule(310.0, 200.0), Action::ReduceDisbursement);
        assert_eq!(action_rule(100.0, 200.0), Action::Monitor);
    }

    #[test]
    fn top_segments_rank_by_ecl() {
        let records = add_ecl(vec![
            scored("MEDICAL", "female", 1_000.0, 0.1),
            scored("VENTURE", "female", 1_000.0, 0.5),
            scored("EDUCATION", "male", 1_000.0, 0.2),
        ]);
        let (segments, _) = aggregate(&records);
        let top = top_segments(&segments, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].loan_intent, "VENTURE");
        assert_eq!(top[1].loan_intent, "EDUCATION");
    }

    #[test]
    fn gender_totals_sum_ecl() {
        let records = add_ecl(vec![
            scored("MEDICAL", "female", 1_000.0, 0.5),
            scored("VENTURE", "female", 1_000.0, 0.5),
            scored("EDUCATION", "male", 1_000.0, 0.5),
        ]);
        let totals = ecl_by_gender(&records);
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].0, "female");
        assert!((totals[0].1 - 500.0).abs() < 1e-9);
        assert!((totals[1].1 - 150.0).abs() < 1e-9);
    }
}
