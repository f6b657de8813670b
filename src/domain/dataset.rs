//! Columnar tabular datasets exchanged between lifecycle steps.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while building or slicing a dataset
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DatasetError {
    #[error("Column '{column}' has {actual} rows, expected {expected}")]
    RaggedColumn {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("Duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Column '{0}' is not numeric")]
    NotNumeric(String),
}

/// A named collection of equally long columns
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub columns: Vec<Column>,
}

/// One named column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: ColumnValues,
}

/// Column payload; numeric and categorical columns are compared differently
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ColumnValues {
    /// Missing values are encoded as JSON `null` and read back as NaN
    Numeric(#[serde(with = "nullable_f64")] Vec<f64>),
    Categorical(Vec<String>),
}

/// Type of a column, without its data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::Categorical => "categorical",
        }
    }
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(v) => v.len(),
            Self::Categorical(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            Self::Numeric(_) => ColumnKind::Numeric,
            Self::Categorical(_) => ColumnKind::Categorical,
        }
    }

    fn select(&self, rows: &[usize]) -> Self {
        match self {
            Self::Numeric(v) => Self::Numeric(rows.iter().map(|&i| v[i]).collect()),
            Self::Categorical(v) => Self::Categorical(rows.iter().map(|&i| v[i].clone()).collect()),
        }
    }

    fn is_valid(&self, row: usize) -> bool {
        match self {
            Self::Numeric(v) => v[row].is_finite(),
            Self::Categorical(v) => !v[row].trim().is_empty(),
        }
    }
}

impl Column {
    pub fn numeric(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values: ColumnValues::Numeric(values),
        }
    }

    pub fn categorical<S: Into<String>>(name: impl Into<String>, values: Vec<S>) -> Self {
        Self {
            name: name.into(),
            values: ColumnValues::Categorical(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn kind(&self) -> ColumnKind {
        self.values.kind()
    }
}

impl Dataset {
    /// Build a dataset, checking names are unique and columns equally long
    pub fn new(columns: Vec<Column>) -> Result<Self, DatasetError> {
        let dataset = Self { columns };
        dataset.validate()?;
        Ok(dataset)
    }

    /// Check that column names are unique and every column has the same
    /// number of rows
    pub fn validate(&self) -> Result<(), DatasetError> {
        let mut seen = BTreeSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(DatasetError::DuplicateColumn(column.name.clone()));
            }
        }

        let expected = self.num_rows();
        for column in &self.columns {
            let actual = column.values.len();
            if actual != expected {
                return Err(DatasetError::RaggedColumn {
                    column: column.name.clone(),
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.values.len()).unwrap_or(0)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Values of a numeric column
    pub fn numeric(&self, name: &str) -> Result<&[f64], DatasetError> {
        match self.column(name) {
            Some(Column {
                values: ColumnValues::Numeric(v),
                ..
            }) => Ok(v),
            Some(_) => Err(DatasetError::NotNumeric(name.to_string())),
            None => Err(DatasetError::ColumnNotFound(name.to_string())),
        }
    }

    /// Names of numeric columns, excluding the given ones
    pub fn numeric_columns_except(&self, excluded: &[&str]) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.kind() == ColumnKind::Numeric && !excluded.contains(&c.name.as_str()))
            .map(|c| c.name.clone())
            .collect()
    }

    /// Keep only the given rows, in the given order
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    values: c.values.select(rows),
                })
                .collect(),
        }
    }

    /// Drop every row holding a non-finite number or a blank category
    pub fn drop_invalid_rows(&self) -> Self {
        let rows: Vec<usize> = (0..self.num_rows())
            .filter(|&row| self.columns.iter().all(|c| c.values.is_valid(row)))
            .collect();
        self.select_rows(&rows)
    }

    /// Dataset without the named column
    pub fn without(&self, name: &str) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .filter(|c| c.name != name)
                .cloned()
                .collect(),
        }
    }
}

mod nullable_f64 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        values
            .iter()
            .map(|v| v.is_finite().then_some(*v))
            .collect::<Vec<Option<f64>>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let values = Vec::<Option<f64>>::deserialize(deserializer)?;
        Ok(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}
