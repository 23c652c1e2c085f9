use anyhow::Result;

use crate::ql::learn::observation::FrameStack;
use crate::ql::learn::replay_buffer::ReplaySamples;
use crate::ql::ml_model::model::FunctionEstimator;
use crate::ql::prelude::{Action, QlError};

/// Builds the regression targets for a one-step temporal-difference update.
///
/// For every sample `i` with action `a`:
///   - `y[i] = state_values[i]` (untaken actions keep the current estimate and so contribute no gradient)
///   - `y[i][a] = reward[i]` for terminal samples
///   - `y[i][a] = reward[i] + 𝛾 * max(next_state_values[i])` otherwise
pub fn build_targets<S, A: Action>(
    samples: &ReplaySamples<S, A>,
    state_values: Vec<Vec<f32>>,
    next_state_values: &[Vec<f32>],
    gamma: f32,
) -> Result<Vec<Vec<f32>>> {
    let batch_size = samples.len();
    if state_values.len() != batch_size || next_state_values.len() != batch_size {
        Err(QlError::shape(format!(
            "expected {} value rows, got {} for states and {} for next states",
            batch_size,
            state_values.len(),
            next_state_values.len()
        )))?
    }

    let mut targets = state_values;
    for (i, y) in targets.iter_mut().enumerate() {
        let a = samples.action[i].numeric();
        if a >= y.len() {
            Err(QlError::shape(format!("action {} outside of {} estimated action values", a, y.len())))?
        }

        y[a] = samples.reward[i];
        if !samples.done[i] {
            let max_future_reward = next_state_values[i]
                .iter()
                .copied()
                .reduce(max_propagating_nan)
                .ok_or_else(|| QlError::shape("empty next state values"))?;
            y[a] += gamma * max_future_reward;
        }
    }
    Ok(targets)
}

/// Like `f32::max`, but a NaN on either side yields NaN
fn max_propagating_nan(
    a: f32,
    b: f32,
) -> f32 {
    if a.is_nan() || b.is_nan() { f32::NAN } else { a.max(b) }
}

/// Evaluates the model on states and next states of the batch (two passes) and builds the targets
pub fn compute_targets<M: FunctionEstimator, A: Action>(
    model: &M,
    samples: &ReplaySamples<FrameStack, A>,
    gamma: f32,
) -> Result<Vec<Vec<f32>>> {
    let state_values = model.predict(&samples.states())?;
    let next_state_values = model.predict(&samples.next_states())?;
    build_targets(samples, state_values, &next_state_values, gamma)
}
