#![allow(dead_code)]

use image::{GrayImage, Luma};
use ql::ql::learn::observation::{FrameStack, ImageSize};
use ql::ql::learn::deep_q_agent::Parameter;
use ql::ql::prelude::RenderMode;

pub const BATCH_SIZE: usize = 8;

/// Parameter set sized for the corridor test environment (48x16 frames)
pub fn corridor_param() -> Parameter {
    Parameter {
        learning_rate: 0.01,
        discount_factor: 0.9,
        exploration_decay: 0.99,
        image_size: ImageSize::new(12, 4),
        frames_per_action: 2,
        replay_size: 200,
        render_mode: RenderMode::RgbArray,
        stats_after_steps: 25,
        seed: Some(7),
        ..Parameter::default()
    }
}

/// A stack of `frames` uniformly gray 4x4 frames
pub fn uniform_state(value: u8, frames: usize) -> FrameStack {
    FrameStack::replicate(GrayImage::from_pixel(4, 4, Luma([value])), frames)
}
