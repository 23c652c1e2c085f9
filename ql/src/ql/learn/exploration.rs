use anyhow::Result;
use rand::Rng;

use crate::ql::prelude::{ModelActionType, QlError};

/// One multiplicative annealing step of the exploration rate
pub fn decay(
    rate: f64,
    factor: f64,
) -> f64 {
    rate * factor
}

/// How an action was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Explore,
    Exploit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectedAction {
    pub action: ModelActionType,
    /// the estimator's value for `action`, also when it was chosen randomly
    pub value: f32,
    pub selection: Selection,
}

/// Epsilon-greedy policy with a multiplicative decay schedule
#[derive(Debug, Clone)]
pub struct ExplorationPolicy {
    rate: f64,
    decay_factor: f64,
}

impl ExplorationPolicy {
    pub fn new(
        rate: f64,
        decay_factor: f64,
    ) -> Self {
        Self { rate, decay_factor }
    }

    /// Current probability `𝜀` of taking a random action
    pub fn rate(&self) -> f64 { self.rate }

    pub fn decay(&mut self) { self.rate = decay(self.rate, self.decay_factor); }

    pub fn select_action<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        values: &[f32],
    ) -> Result<SelectedAction> {
        if values.is_empty() {
            Err(QlError::shape("cannot select an action from an empty value vector"))?
        }

        let (action, selection) = if rng.gen::<f64>() < self.rate {
            (rng.gen_range(0..values.len()), Selection::Explore)
        } else {
            (first_argmax(values), Selection::Exploit)
        };

        Ok(SelectedAction {
            action,
            value: values[action],
            selection,
        })
    }
}

/// Index of the maximum value; ties resolve to the lowest index.
///
/// A NaN counts as the maximum, so the first NaN wins.
pub fn first_argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            return i;
        }
        if v > values[best] {
            best = i;
        }
    }
    best
}
