//! Hyperparameter search space definitions.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use gb_types::{GbResult, SearchError};

/// A concrete parameter value produced by a search strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.is_finite() => Some(v.round() as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// One full configuration, keyed by parameter name.
pub type ParamSet = BTreeMap<String, ParameterValue>;

/// How a parameter is searched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Dimension {
    /// Always this value.
    Fixed { value: ParameterValue },
    /// Continuous uniform range `[low, high]`.
    Uniform { low: f64, high: f64 },
    /// Integers `low, low + step, ...` not exceeding `high`.
    QuantizedInt { low: i64, high: i64, step: i64 },
    /// Categorical choices.
    Choice { values: Vec<String> },
}

impl Dimension {
    /// The admissible values of a quantized dimension, in increasing order.
    pub fn quantized_values(&self) -> Vec<i64> {
        match *self {
            Dimension::QuantizedInt { low, high, step } if step > 0 && low <= high => {
                let count = (high - low) / step + 1;
                (0..count).map(|k| low + k * step).collect()
            }
            _ => Vec::new(),
        }
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParameterValue {
        match self {
            Dimension::Fixed { value } => value.clone(),
            Dimension::Uniform { low, high } => {
                let u: f64 = rng.random();
                ParameterValue::Float(low + u * (high - low))
            }
            Dimension::QuantizedInt { .. } => {
                let values = self.quantized_values();
                ParameterValue::Int(values[rng.random_range(0..values.len())])
            }
            Dimension::Choice { values } => {
                ParameterValue::Text(values[rng.random_range(0..values.len())].clone())
            }
        }
    }
}

/// A single named dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    pub name: String,
    pub dimension: Dimension,
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, name: impl Into<String>, dimension: Dimension) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            dimension,
        });
        self
    }

    pub fn add_fixed(self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.push(
            name,
            Dimension::Fixed {
                value: value.into(),
            },
        )
    }

    pub fn add_uniform(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.push(name, Dimension::Uniform { low, high })
    }

    pub fn add_quantized_int(self, name: impl Into<String>, low: i64, high: i64, step: i64) -> Self {
        self.push(name, Dimension::QuantizedInt { low, high, step })
    }

    pub fn add_choice(self, name: impl Into<String>, values: &[&str]) -> Self {
        self.push(
            name,
            Dimension::Choice {
                values: values.iter().map(|v| v.to_string()).collect(),
            },
        )
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterDef> {
        self.parameters.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Dimension> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.dimension)
    }

    pub fn validate(&self) -> GbResult<()> {
        if self.parameters.is_empty() {
            return Err(SearchError::EmptySpace.into());
        }
        for param in &self.parameters {
            let bad = |message: String| SearchError::InvalidHyperparameterBounds {
                name: param.name.clone(),
                message,
            };
            if self.parameters.iter().filter(|p| p.name == param.name).count() > 1 {
                return Err(bad("declared more than once".into()).into());
            }
            match &param.dimension {
                Dimension::Fixed { .. } => {}
                Dimension::Uniform { low, high } => {
                    if !low.is_finite() || !high.is_finite() {
                        return Err(bad(format!("non-finite bounds [{low}, {high}]")).into());
                    }
                    if low > high {
                        return Err(bad(format!("low {low} exceeds high {high}")).into());
                    }
                }
                Dimension::QuantizedInt { low, high, step } => {
                    if *step <= 0 {
                        return Err(bad(format!("step must be positive, got {step}")).into());
                    }
                    if low > high {
                        return Err(bad(format!("low {low} exceeds high {high}")).into());
                    }
                }
                Dimension::Choice { values } => {
                    if values.is_empty() {
                        return Err(bad("choice list is empty".into()).into());
                    }
                }
            }
        }
        Ok(())
    }

    /// Draw every dimension independently and uniformly.
    pub fn sample_random<R: Rng + ?Sized>(&self, rng: &mut R) -> ParamSet {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), p.dimension.sample(rng)))
            .collect()
    }

    /// Map a proposal onto the space: floats are clamped into bounds, integers
    /// snap to the nearest admissible quantized value and fixed dimensions
    /// take their fixed value. Parameters outside the space are dropped.
    pub fn materialize(&self, proposal: &ParamSet) -> GbResult<ParamSet> {
        let mut out = ParamSet::new();
        for param in &self.parameters {
            let invalid = |message: String| SearchError::InvalidValue {
                name: param.name.clone(),
                message,
            };
            let raw = proposal.get(&param.name);
            let value = match (&param.dimension, raw) {
                (Dimension::Fixed { value }, _) => value.clone(),
                (_, None) => return Err(invalid("missing from proposal".into()).into()),
                (Dimension::Uniform { low, high }, Some(v)) => {
                    let x = v
                        .as_f64()
                        .filter(|x| !x.is_nan())
                        .ok_or_else(|| invalid(format!("expected a number, got {v}")))?;
                    ParameterValue::Float(x.clamp(*low, *high))
                }
                (Dimension::QuantizedInt { low, step, .. }, Some(v)) => {
                    let x = v
                        .as_f64()
                        .filter(|x| !x.is_nan())
                        .ok_or_else(|| invalid(format!("expected a number, got {v}")))?;
                    let values = param.dimension.quantized_values();
                    let last = values.len() as i64 - 1;
                    let k = ((x - *low as f64) / *step as f64)
                        .round()
                        .clamp(0.0, last as f64) as i64;
                    ParameterValue::Int(low + k * step)
                }
                (Dimension::Choice { values }, Some(v)) => {
                    let s = v
                        .as_str()
                        .filter(|s| values.iter().any(|c| c == s))
                        .ok_or_else(|| invalid(format!("{v} is not one of {values:?}")))?;
                    ParameterValue::Text(s.to_string())
                }
            };
            out.insert(param.name.clone(), value);
        }
        Ok(out)
    }

    /// Whether every parameter of `params` lies inside its dimension.
    pub fn contains(&self, params: &ParamSet) -> bool {
        self.parameters.iter().all(|p| {
            let Some(v) = params.get(&p.name) else {
                return false;
            };
            match &p.dimension {
                Dimension::Fixed { value } => v == value,
                Dimension::Uniform { low, high } => {
                    v.as_f64().is_some_and(|x| x >= *low && x <= *high)
                }
                Dimension::QuantizedInt { .. } => matches!(
                    v,
                    ParameterValue::Int(i) if p.dimension.quantized_values().contains(i)
                ),
                Dimension::Choice { values } => {
                    v.as_str().is_some_and(|s| values.iter().any(|c| c == s))
                }
            }
        })
    }
}
