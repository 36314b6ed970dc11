//! Feature extraction and per-run standardization.
//!
//! The column order of [`FeatureSchema`] is part of its version: centroids
//! computed under one version are not comparable with another.

use std::collections::HashSet;

use ndarray::{Array1, Array2, Axis};
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use serde_json::Value;

use crate::types::{AttributeGroup, CustomerFeatures};

/// How a raw attribute value becomes a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Numeric,
    /// 1.0 when the attribute equals the given string, else 0.0.
    Indicator(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureColumn {
    pub group: AttributeGroup,
    pub attribute: &'static str,
    pub encoding: Encoding,
}

const fn numeric(group: AttributeGroup, attribute: &'static str) -> FeatureColumn {
    FeatureColumn {
        group,
        attribute,
        encoding: Encoding::Numeric,
    }
}

const REFERENCE_COLUMNS: [FeatureColumn; 12] = [
    numeric(AttributeGroup::Demographics, "age"),
    numeric(AttributeGroup::Demographics, "income"),
    FeatureColumn {
        group: AttributeGroup::Demographics,
        attribute: "gender",
        encoding: Encoding::Indicator("M"),
    },
    numeric(AttributeGroup::Behavior, "page_views"),
    numeric(AttributeGroup::Behavior, "session_duration"),
    numeric(AttributeGroup::Behavior, "bounce_rate"),
    numeric(AttributeGroup::PurchaseHistory, "total_purchases"),
    numeric(AttributeGroup::PurchaseHistory, "avg_order_value"),
    numeric(AttributeGroup::PurchaseHistory, "lifetime_value"),
    numeric(AttributeGroup::Engagement, "email_open_rate"),
    numeric(AttributeGroup::Engagement, "click_through_rate"),
    numeric(AttributeGroup::Engagement, "last_interaction_days"),
];

/// Fixed, versioned attribute schema.
#[derive(Debug, Clone)]
pub struct FeatureSchema {
    pub version: u32,
    pub columns: Vec<FeatureColumn>,
}

impl FeatureSchema {
    /// 3 demographic + 3 behavioral + 3 purchase + 3 engagement columns.
    pub fn reference() -> Self {
        Self {
            version: 1,
            columns: REFERENCE_COLUMNS.to_vec(),
        }
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.attribute).collect()
    }

    /// Build one row per customer, in input order.
    pub fn extract(&self, customers: &[CustomerFeatures]) -> OrchestratorResult<Array2<f64>> {
        let mut seen = HashSet::with_capacity(customers.len());
        let mut matrix = Array2::<f64>::zeros((customers.len(), self.width()));

        for (row, customer) in customers.iter().enumerate() {
            if !seen.insert(customer.customer_id.as_str()) {
                return Err(OrchestratorError::Schema(format!(
                    "duplicate customer_id '{}'",
                    customer.customer_id
                )));
            }
            for group in AttributeGroup::ALL {
                if customer.group(group).is_none() {
                    return Err(OrchestratorError::Schema(format!(
                        "customer '{}' is missing attribute group '{}'",
                        customer.customer_id,
                        group.as_str()
                    )));
                }
            }
            for (col, column) in self.columns.iter().enumerate() {
                let raw = customer
                    .group(column.group)
                    .and_then(|attrs| attrs.get(column.attribute));
                matrix[[row, col]] = encode(&customer.customer_id, column, raw)?;
            }
        }

        Ok(matrix)
    }
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::reference()
    }
}

fn encode(
    customer_id: &str,
    column: &FeatureColumn,
    raw: Option<&Value>,
) -> OrchestratorResult<f64> {
    let value = match (column.encoding, raw) {
        (_, None) | (_, Some(Value::Null)) => 0.0,
        (Encoding::Indicator(expected), Some(Value::String(s))) => {
            if s == expected {
                1.0
            } else {
                0.0
            }
        }
        (Encoding::Indicator(_), Some(_)) => 0.0,
        (Encoding::Numeric, Some(Value::Number(n))) => n.as_f64().unwrap_or(0.0),
        (Encoding::Numeric, Some(Value::Bool(b))) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        (Encoding::Numeric, Some(other)) => {
            return Err(OrchestratorError::Schema(format!(
                "customer '{}': attribute '{}.{}' must be numeric, got {}",
                customer_id,
                column.group.as_str(),
                column.attribute,
                other
            )));
        }
    };

    if !value.is_finite() {
        return Err(OrchestratorError::Schema(format!(
            "customer '{}': attribute '{}.{}' is not finite",
            customer_id,
            column.group.as_str(),
            column.attribute
        )));
    }
    Ok(value)
}

/// Standardized feature matrix plus the parameters fit for this run.
#[derive(Debug, Clone)]
pub struct NormalizedVectors {
    pub data: Array2<f64>,
    pub mean: Array1<f64>,
    pub std_dev: Array1<f64>,
}

/// Per-column z-score with population standard deviation. Zero-variance
/// columns map to 0 instead of NaN.
pub fn normalize(vectors: &Array2<f64>) -> NormalizedVectors {
    let (rows, cols) = vectors.dim();
    if rows == 0 {
        return NormalizedVectors {
            data: vectors.clone(),
            mean: Array1::zeros(cols),
            std_dev: Array1::zeros(cols),
        };
    }

    let mean = vectors
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(cols));
    let std_dev = vectors.std_axis(Axis(0), 0.0);

    let mut data = vectors - &mean;
    for (col, mut column) in data.axis_iter_mut(Axis(1)).enumerate() {
        let sd = std_dev[col];
        if sd > f64::EPSILON {
            column.mapv_inplace(|v| v / sd);
        } else {
            column.fill(0.0);
        }
    }

    NormalizedVectors {
        data,
        mean,
        std_dev,
    }
}
