use std::fmt::{Display, Formatter};

use anyhow::Result;
use image::imageops::{self, FilterType};

use crate::ql::prelude::{Environment, GrayFrame, QlError, RenderMode, RgbFrame};

/// Resolution of a reduced frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const fn new(width: u32, height: u32) -> Self { Self { width, height } }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            Err(QlError::invalid(format!("image_size must consist of two positive integers, got {}", self)))?
        }
        Ok(())
    }
}

impl Display for ImageSize {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "({}, {})", self.width, self.height)
    }
}

/// The `F` most recent reduced frames, oldest first.
///
/// A stack is never partial: it is either seeded by replicating one frame or
/// assembled from a full action-repeat window.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameStack {
    layers: Vec<GrayFrame>,
}

impl FrameStack {
    pub fn replicate(
        frame: GrayFrame,
        num_frames: usize,
    ) -> Self {
        assert!(num_frames > 0);
        Self {
            layers: vec![frame; num_frames],
        }
    }

    pub fn from_frames(layers: Vec<GrayFrame>) -> Result<Self> {
        let Some(first) = layers.first() else {
            return Err(QlError::invalid("a frame stack needs at least one frame").into());
        };
        let dims = first.dimensions();
        if layers.iter().any(|l| l.dimensions() != dims) {
            Err(QlError::shape("all frames of a stack must have the same dimensions"))?
        }
        Ok(Self { layers })
    }

    pub fn layers(&self) -> &[GrayFrame] { &self.layers }

    pub fn num_frames(&self) -> usize { self.layers.len() }

    /// `[F, H, W]`
    pub fn dims(&self) -> [usize; 3] {
        let (w, h) = self.layers[0].dimensions();
        [self.layers.len(), h as usize, w as usize]
    }

    /// Pixel values as `f32`, laid out in `[F, H, W]` order
    pub fn to_values(&self) -> Vec<f32> {
        let [f, h, w] = self.dims();
        let mut values = Vec::with_capacity(f * h * w);
        for layer in &self.layers {
            values.extend(layer.as_raw().iter().map(|&p| p as f32));
        }
        values
    }
}

/// Result of holding one action for a full action-repeat window
#[derive(Debug, Clone)]
pub struct Advance {
    pub state: FrameStack,
    pub reward: f32,
    pub done: bool,
}

/// Frame reduction, frame skip and temporal stacking
#[derive(Debug, Clone)]
pub struct ObservationPipeline {
    image_size: ImageSize,
    frames_per_action: usize,
    terminal_penalty: f32,
    render_mode: RenderMode,
}

impl ObservationPipeline {
    pub fn new(
        image_size: ImageSize,
        frames_per_action: usize,
        terminal_penalty: f32,
        render_mode: RenderMode,
    ) -> Result<Self> {
        image_size.validate()?;
        if frames_per_action < 1 {
            Err(QlError::invalid("frames_per_action must be >= 1"))?
        }
        Ok(Self {
            image_size,
            frames_per_action,
            terminal_penalty,
            render_mode,
        })
    }

    pub fn image_size(&self) -> ImageSize { self.image_size }

    pub fn frames_per_action(&self) -> usize { self.frames_per_action }

    /// Down-samples a color frame to a single luma channel of the configured size
    pub fn reduce(
        &self,
        frame: &RgbFrame,
    ) -> GrayFrame {
        let gray = imageops::grayscale(frame);
        imageops::resize(&gray, self.image_size.width, self.image_size.height, FilterType::Triangle)
    }

    /// Resets the environment and seeds the stack with the first frame replicated `F` times
    pub fn initial_state<E: Environment>(
        &self,
        environment: &mut E,
    ) -> Result<FrameStack> {
        let frame = environment.reset()?;
        Ok(FrameStack::replicate(self.reduce(&frame), self.frames_per_action))
    }

    /// Holds `action` for `F` environment steps.
    ///
    /// All `F` steps are executed even if the episode terminates early in the window;
    /// every terminated sub-step contributes the terminal penalty instead of its reward.
    pub fn advance<E: Environment>(
        &self,
        environment: &mut E,
        action: E::A,
    ) -> Result<Advance> {
        let mut frames = Vec::with_capacity(self.frames_per_action);
        let mut reward = 0.0;
        let mut done = false;

        for _ in 0..self.frames_per_action {
            environment.render(self.render_mode)?;
            let step = environment.step(action)?;
            log::trace!(
                "sub-step with action {} resulted in reward: {:.2}, done: {}, info: {:?}",
                action,
                step.reward,
                step.done,
                step.info
            );
            frames.push(self.reduce(&step.frame));
            reward += if step.done { self.terminal_penalty } else { step.reward };
            done |= step.done;
        }

        Ok(Advance {
            state: FrameStack::from_frames(frames)?,
            reward,
            done,
        })
    }
}
