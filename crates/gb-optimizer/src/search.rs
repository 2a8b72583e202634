//! Search strategies: the proposal side of the optimizer loop.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use gb_types::GbResult;

use crate::space::{Dimension, ParamSet, ParameterValue, SearchSpace};
use crate::trial::Trial;

/// Common trait for all search strategies.
pub trait SearchStrategy: Send {
    /// Propose the next configuration given the history so far.
    fn propose(&mut self, history: &[Trial]) -> GbResult<ParamSet>;

    /// Observe a finished trial. Strategies that read everything they need
    /// from `history` can ignore this.
    fn record(&mut self, _trial: &Trial) {}

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

// ---- Grid search ----

/// Exhaustive grid over the space. Continuous dimensions use `float_steps`
/// evenly spaced points; proposals wrap around once the grid is exhausted.
#[derive(Debug, Clone)]
pub struct GridSearch {
    cursor: usize,
    combos: Vec<ParamSet>,
}

impl GridSearch {
    pub fn new(space: &SearchSpace, float_steps: usize) -> GbResult<Self> {
        space.validate()?;
        Ok(Self {
            cursor: 0,
            combos: Self::build_grid(space, float_steps),
        })
    }

    pub fn len(&self) -> usize {
        self.combos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combos.is_empty()
    }

    fn build_grid(space: &SearchSpace, float_steps: usize) -> Vec<ParamSet> {
        let mut result: Vec<ParamSet> = vec![ParamSet::new()];
        for param in space.iter() {
            let axis: Vec<ParameterValue> = match &param.dimension {
                Dimension::Fixed { value } => vec![value.clone()],
                Dimension::Uniform { low, high } => {
                    let steps = float_steps.max(2);
                    (0..steps)
                        .map(|i| {
                            let t = i as f64 / (steps - 1) as f64;
                            ParameterValue::Float(low + t * (high - low))
                        })
                        .collect()
                }
                Dimension::QuantizedInt { .. } => param
                    .dimension
                    .quantized_values()
                    .into_iter()
                    .map(ParameterValue::Int)
                    .collect(),
                Dimension::Choice { values } => values
                    .iter()
                    .map(|v| ParameterValue::Text(v.clone()))
                    .collect(),
            };

            // Cartesian product
            let mut next = Vec::with_capacity(result.len() * axis.len());
            for existing in &result {
                for value in &axis {
                    let mut combo = existing.clone();
                    combo.insert(param.name.clone(), value.clone());
                    next.push(combo);
                }
            }
            result = next;
        }
        result
    }
}

impl SearchStrategy for GridSearch {
    fn propose(&mut self, _history: &[Trial]) -> GbResult<ParamSet> {
        let combo = self.combos[self.cursor % self.combos.len()].clone();
        self.cursor += 1;
        Ok(combo)
    }

    fn name(&self) -> &str {
        "grid"
    }
}

// ---- Random search ----

/// Independent seeded sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: ChaCha8Rng,
}

impl RandomSearch {
    pub fn new(space: SearchSpace, seed: u64) -> GbResult<Self> {
        space.validate()?;
        Ok(Self {
            space,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }
}

impl SearchStrategy for RandomSearch {
    fn propose(&mut self, _history: &[Trial]) -> GbResult<ParamSet> {
        Ok(self.space.sample_random(&mut self.rng))
    }

    fn name(&self) -> &str {
        "random"
    }
}
