use std::fmt::{Debug, Display, Formatter};
use std::hash::Hash;
use std::str::FromStr;

use anyhow::Result;
use image::{ImageBuffer, Luma, Rgb};
use thiserror::Error;

/// Data type we use to encode an `Action` to feed the model.
pub type ModelActionType = usize;

/// Raw color frame as delivered by the game environment
pub type RgbFrame = ImageBuffer<Rgb<u8>, Vec<u8>>;

/// Gray-scaled, reduced frame
pub type GrayFrame = ImageBuffer<Luma<u8>, Vec<u8>>;

pub trait Action: Display + Debug + Sized + Clone + Copy + Hash + PartialEq + Eq {
    /// Number of possible actions (`action_space.n`)
    const ACTION_SPACE: ModelActionType;
    /// Identifying the Action as a unique value in range (0..Self::ACTION_SPACE)
    fn numeric(&self) -> ModelActionType;
    fn try_from_numeric(value: ModelActionType) -> Result<Self>;
}

/// Outcome of a single environment step
#[derive(Debug, Clone)]
pub struct Step<I> {
    pub frame: RgbFrame,
    pub reward: f32,
    pub done: bool,
    pub info: I,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    #[default]
    Human,
    RgbArray,
}

impl Display for RenderMode {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            RenderMode::Human => f.write_str("human"),
            RenderMode::RgbArray => f.write_str("rgb_array"),
        }
    }
}

impl FromStr for RenderMode {
    type Err = QlError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "human" => Ok(RenderMode::Human),
            "rgb_array" => Ok(RenderMode::RgbArray),
            other => Err(QlError::Configuration(format!("unknown render mode '{}'", other))),
        }
    }
}

/// Learning environment, modeling the world of a learning agent.
///
/// Usually a game wrapped by the typical preprocessing stack (discrete action space,
/// death penalty, reward clipping ...). Frame skip and frame stacking are done by the learner.
pub trait Environment {
    type A: Action;
    /// Auxiliary diagnostic information returned with every step
    type Info: Debug;

    /// Resets the environment to a defined starting point and returns the first frame
    fn reset(&mut self) -> Result<RgbFrame>;

    /// Performs one time/action-step.
    ///
    /// Applies the given `action` to the environment and returns:
    ///   - next frame
    ///   - immediate reward earned during performing that step
    ///   - done flag (e.g. game ended)
    ///   - info
    fn step(
        &mut self,
        action: Self::A,
    ) -> Result<Step<Self::Info>>;

    fn render(
        &mut self,
        mode: RenderMode,
    ) -> Result<()>;
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QlError {
    /// Unknown option or option value of the wrong type
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Option or argument out of its valid range
    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// Model output with unexpected dimensions
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
}

impl QlError {
    pub fn invalid(msg: impl Into<String>) -> Self { QlError::InvalidValue(msg.into()) }

    pub fn configuration(msg: impl Into<String>) -> Self { QlError::Configuration(msg.into()) }

    pub fn shape(msg: impl Into<String>) -> Self { QlError::ShapeMismatch(msg.into()) }
}
