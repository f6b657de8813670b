//! Model training and evaluation steps.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::{Step, StepError, StepInputs, StepOutputs};
use crate::domain::{Dataset, DatasetError};

/// Ridge term added to the feature diagonal of the normal equations
const RIDGE: f64 = 1e-8;

/// Ordinary least squares linear regression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub target: String,
    pub features: Vec<String>,
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

impl LinearModel {
    /// Fit `target` on every other numeric column of `data`
    pub fn fit(data: &Dataset, target: &str) -> Result<Self, StepError> {
        let y = data.numeric(target)?;
        let features = data.numeric_columns_except(&[target]);
        if features.is_empty() {
            return Err(StepError::invalid("train", "no numeric feature columns"));
        }
        if y.is_empty() {
            return Err(StepError::invalid("train", "no rows to train on"));
        }

        let columns = features
            .iter()
            .map(|f| data.numeric(f))
            .collect::<Result<Vec<_>, _>>()?;

        // Normal equations over [1, x1, .., xp]
        let p = features.len() + 1;
        let mut xtx = vec![vec![0.0; p]; p];
        let mut xty = vec![0.0; p];
        let mut row = vec![1.0; p];
        for (i, target_value) in y.iter().enumerate() {
            for (j, column) in columns.iter().enumerate() {
                row[j + 1] = column[i];
            }
            for a in 0..p {
                xty[a] += row[a] * target_value;
                for b in 0..p {
                    xtx[a][b] += row[a] * row[b];
                }
            }
        }
        for (a, xtx_row) in xtx.iter_mut().enumerate().skip(1) {
            xtx_row[a] += RIDGE * (1.0 + xtx_row[a]);
        }

        let solution = solve(xtx, xty)
            .ok_or_else(|| StepError::failed("feature matrix is singular, cannot fit model"))?;

        Ok(Self {
            target: target.to_string(),
            features,
            intercept: solution[0],
            coefficients: solution[1..].to_vec(),
        })
    }

    /// Predict every row of `data`; extra columns are ignored
    pub fn predict(&self, data: &Dataset) -> Result<Vec<f64>, DatasetError> {
        let columns = self
            .features
            .iter()
            .map(|f| data.numeric(f))
            .collect::<Result<Vec<_>, _>>()?;

        Ok((0..data.num_rows())
            .map(|i| {
                self.intercept
                    + columns
                        .iter()
                        .zip(&self.coefficients)
                        .map(|(column, coefficient)| column[i] * coefficient)
                        .sum::<f64>()
            })
            .collect())
    }
}

/// Gaussian elimination with partial pivoting
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        let pivot_row = a[col].clone();
        for row in col + 1..n {
            let factor = a[row][col] / pivot_row[col];
            for (k, value) in pivot_row.iter().enumerate().skip(col) {
                a[row][k] -= factor * value;
            }
            let delta = factor * b[col];
            b[row] -= delta;
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let sum: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - sum) / a[row][row];
    }
    Some(x)
}

/// Trains a [`LinearModel`] on the train split
#[derive(Debug, Clone, Default)]
pub struct TrainModel;

#[async_trait]
impl Step for TrainModel {
    fn kind(&self) -> &str {
        "train_model"
    }

    fn inputs(&self) -> &[&str] {
        &["train", "target"]
    }

    fn outputs(&self) -> &[&str] {
        &["model"]
    }

    async fn compute(&self, inputs: &StepInputs) -> Result<StepOutputs, StepError> {
        let train: Dataset = inputs.get("train")?;
        let target: String = inputs.get("target")?;

        let model = LinearModel::fit(&train, &target)?;
        info!(
            %target,
            features = model.features.len(),
            rows = train.num_rows(),
            "Model trained"
        );
        StepOutputs::new().with("model", &model)
    }
}

/// Regression quality on held-out data
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub r2: f64,
    pub rmse: f64,
    pub rows: usize,
}

impl Metrics {
    pub fn compute(actual: &[f64], predicted: &[f64]) -> Self {
        let rows = actual.len();
        if rows == 0 {
            return Self {
                r2: 0.0,
                rmse: 0.0,
                rows,
            };
        }

        let mean = actual.iter().sum::<f64>() / rows as f64;
        let ss_res: f64 = actual
            .iter()
            .zip(predicted)
            .map(|(a, p)| (a - p).powi(2))
            .sum();
        let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();

        let r2 = if ss_tot > 0.0 {
            1.0 - ss_res / ss_tot
        } else if ss_res < 1e-12 {
            1.0
        } else {
            0.0
        };

        Self {
            r2,
            rmse: (ss_res / rows as f64).sqrt(),
            rows,
        }
    }
}

/// Scores the model on the test split
#[derive(Debug, Clone, Default)]
pub struct EvaluateModel;

#[async_trait]
impl Step for EvaluateModel {
    fn kind(&self) -> &str {
        "evaluate_model"
    }

    fn inputs(&self) -> &[&str] {
        &["model", "test"]
    }

    fn outputs(&self) -> &[&str] {
        &["metrics"]
    }

    async fn compute(&self, inputs: &StepInputs) -> Result<StepOutputs, StepError> {
        let model: LinearModel = inputs.get("model")?;
        let test: Dataset = inputs.get("test")?;

        let predicted = model.predict(&test)?;
        let metrics = Metrics::compute(test.numeric(&model.target)?, &predicted);
        info!(r2 = metrics.r2, rmse = metrics.rmse, rows = metrics.rows, "Model evaluated");

        StepOutputs::new().with("metrics", &metrics)
    }
}
