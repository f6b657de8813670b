//! Drift detection scenarios.

use driftline::domain::{Column, ColumnKind, Dataset};
use driftline::drift::{AggregationPolicy, DriftDetector, DriftMethod, ThresholdPolicy};

fn ages(range: std::ops::RangeInclusive<i32>) -> Vec<f64> {
    range.map(f64::from).collect()
}

fn people(ages: Vec<f64>, cities: &[&str]) -> Dataset {
    let cities: Vec<&str> = cities.iter().copied().cycle().take(ages.len()).collect();
    Dataset::new(vec![
        Column::numeric("age", ages),
        Column::categorical("city", cities),
    ])
    .unwrap()
}

#[test]
fn test_age_shift_detected() {
    let reference = people(ages(18..=60), &["paris", "lyon", "nice"]);
    let current = people(ages(60..=100), &["paris", "lyon", "nice"]);
    let detector = DriftDetector::new(ThresholdPolicy::default().with_threshold(0.1));

    let report = detector
        .detect(&reference, &current, &["age".to_string()])
        .unwrap();

    let age = report.feature("age").unwrap();
    assert_eq!(age.kind, ColumnKind::Numeric);
    assert_eq!(age.method, DriftMethod::KolmogorovSmirnov);
    assert!(age.statistic > 0.9, "statistic was {}", age.statistic);
    assert!(age.drifted);
    assert!(report.dataset_drifted);
    assert_eq!(report.drifted_features().collect::<Vec<_>>(), vec!["age"]);
}

#[test]
fn test_self_comparison_never_drifts() {
    let data = people(ages(18..=60), &["paris", "lyon", "nice"]);
    let detector = DriftDetector::new(ThresholdPolicy::default().with_threshold(0.0));

    let report = detector.detect(&data, &data, &[]).unwrap();

    assert_eq!(report.features.len(), 2);
    for feature in &report.features {
        assert_eq!(feature.statistic, 0.0, "{}", feature.feature);
        assert!(!feature.drifted);
    }
    assert!(!report.dataset_drifted);
}

#[test]
fn test_categorical_shift_detected() {
    let reference = people(ages(18..=60), &["paris", "lyon", "nice"]);
    let current = people(ages(18..=60), &["paris", "paris", "paris", "lille"]);

    let report = DriftDetector::default()
        .detect(&reference, &current, &[])
        .unwrap();

    let city = report.feature("city").unwrap();
    assert_eq!(city.method, DriftMethod::JensenShannon);
    assert!(city.drifted);
    assert!(city.statistic <= 1.0);
    assert!(!report.feature("age").unwrap().drifted);
}

#[test]
fn test_reports_are_deterministic() {
    let reference = people(ages(18..=60), &["paris", "lyon", "nice"]);
    let current = people(ages(30..=80), &["lyon", "nice", "lille"]);
    let policy = ThresholdPolicy::default()
        .with_feature_threshold("city", 0.5)
        .with_aggregation(AggregationPolicy::Share(0.5));

    let first = DriftDetector::new(policy.clone())
        .detect(&reference, &current, &[])
        .unwrap();
    let second = DriftDetector::new(policy)
        .detect(&reference, &current, &[])
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_eq!(first.feature("city").unwrap().threshold, 0.5);
}

#[test]
fn test_aggregation_policy_decides_dataset_drift() {
    // Age drifts, city does not
    let reference = people(ages(18..=60), &["paris", "lyon", "nice"]);
    let current = people(ages(60..=100), &["paris", "lyon", "nice"]);

    let decide = |aggregation| {
        DriftDetector::new(ThresholdPolicy::default().with_aggregation(aggregation))
            .detect(&reference, &current, &[])
            .unwrap()
            .dataset_drifted
    };

    assert!(decide(AggregationPolicy::AnyFeature));
    assert!(!decide(AggregationPolicy::MinCount(2)));
    assert!(decide(AggregationPolicy::Share(0.5)));
    assert!(!decide(AggregationPolicy::Share(0.75)));
}
