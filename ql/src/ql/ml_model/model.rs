use std::fmt::{Display, Formatter};

use anyhow::Result;

use crate::ql::learn::observation::{FrameStack, ImageSize};

/// Everything needed to build a value-function estimator for a learning run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelShape {
    pub image_size: ImageSize,
    pub frames_per_action: usize,
    pub num_actions: usize,
    pub learning_rate: f32,
}

impl ModelShape {
    /// Dimensions of a single input state `[F, H, W]`
    pub fn state_dims(&self) -> [usize; 3] {
        [
            self.frames_per_action,
            self.image_size.height as usize,
            self.image_size.width as usize,
        ]
    }
}

impl Display for ModelShape {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        let [frames, h, w] = self.state_dims();
        write!(f, "[{}, {}, {}] -> [{}], α={}", frames, h, w, self.num_actions, self.learning_rate)
    }
}

/// 'Physical' AI model abstraction: a black-box value-function estimator.
///
/// The learner never changes the architecture, only the weights via [Self::train_on_batch].
pub trait FunctionEstimator {
    /// Number of action values produced per state
    fn num_actions(&self) -> usize;

    /// Estimates the action values for a batch of states.
    ///
    /// # Arguments
    /// * `states` batch of stacked frames, `[batch, F, H, W]`
    ///
    /// # Returns
    ///   action values `[batch, num_actions]`
    fn predict(
        &self,
        states: &[&FrameStack],
    ) -> Result<Vec<Vec<f32>>>;

    /// Performs a single training step using a batch of data.
    ///
    /// # Arguments
    /// * `states` `[batch, F, H, W]`
    /// * `targets` `[batch, num_actions]` - same shape as returned by [Self::predict]
    ///
    /// # Returns
    ///   calculated loss
    fn train_on_batch(
        &mut self,
        states: &[&FrameStack],
        targets: &[Vec<f32>],
    ) -> Result<f32>;
}
