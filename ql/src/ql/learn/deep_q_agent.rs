use std::any::type_name;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use std::str::FromStr;

use anyhow::Result;
use itertools::Itertools;
use num_format::ToFormattedString;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::FxHashMap;

use crate::ql::learn::bellman::compute_targets;
use crate::ql::learn::exploration::ExplorationPolicy;
use crate::ql::learn::observation::{FrameStack, ImageSize, ObservationPipeline};
use crate::ql::learn::replay_buffer::{EpisodeRewardHistory, ReplayBuffer, Transition};
use crate::ql::ml_model::model::{FunctionEstimator, ModelShape};
use crate::ql::prelude::{Action, Environment, QlError, RenderMode};
use crate::util::format;
use crate::util::immutable::Immutable;

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Step size of the estimator's optimizer, α
    pub learning_rate: f32,
    /// Discount factor for future rewards, 𝛾
    pub discount_factor: f32,
    /// Initial probability of taking a random action, 𝜀
    pub exploration_rate: f64,
    /// Multiplicative decay of 𝜀, applied after every training step
    pub exploration_decay: f64,
    /// Lower bound for the exploration rate. Validated, but the decay schedule does not clamp to it.
    pub exploration_min: f64,
    /// Resolution of the reduced frames
    pub image_size: ImageSize,
    /// Number of frames an action is held (frame-skip); equals the depth of the frame stack
    pub frames_per_action: usize,
    /// Capacity of the replay buffer
    pub replay_size: usize,
    /// Reward replacing the environment's reward on a sub-step which ended the episode
    pub terminal_penalty: f32,
    pub render_mode: RenderMode,
    pub stats_after_steps: usize,
    /// Number of recent episode rewards the running reward is averaged over
    pub episode_reward_history_len: usize,
    /// Seed for exploration and replay sampling; `None` seeds from system entropy
    pub seed: Option<u64>,
}

impl Default for Parameter {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            discount_factor: 0.99,
            exploration_rate: 1.0,
            exploration_decay: 0.9998,
            exploration_min: 0.1,
            image_size: ImageSize::new(84, 84),
            frames_per_action: 4,
            replay_size: 20_000,
            terminal_penalty: -10.0,
            render_mode: RenderMode::Human,
            stats_after_steps: 10_000,
            episode_reward_history_len: 100,
            seed: None,
        }
    }
}

impl Parameter {
    pub fn validate(&self) -> Result<()> {
        // negated comparisons reject NaN as well
        if !(self.learning_rate >= 0.0) {
            Err(QlError::invalid("learning_rate must be positive"))?
        }
        if !(self.discount_factor >= 0.0) {
            Err(QlError::invalid("discount_factor must be positive"))?
        }
        if !(0.0..=1.0).contains(&self.exploration_rate) {
            Err(QlError::invalid("exploration_rate must be in [0,1]"))?
        }
        if !(self.exploration_decay >= 0.0) {
            Err(QlError::invalid("exploration_decay must be positive"))?
        }
        if !(self.exploration_min >= 0.0) {
            Err(QlError::invalid("exploration_min must be positive"))?
        }
        self.image_size.validate()?;
        if self.frames_per_action < 1 {
            Err(QlError::invalid("frames_per_action must be >= 1"))?
        }
        if self.replay_size < 1 {
            Err(QlError::invalid("replay_size must be >= 1"))?
        }
        if !self.terminal_penalty.is_finite() {
            Err(QlError::invalid("terminal_penalty must be a finite number"))?
        }
        if self.stats_after_steps < 1 {
            Err(QlError::invalid("stats_after_steps must be >= 1"))?
        }
        if self.episode_reward_history_len < 1 {
            Err(QlError::invalid("episode_reward_history_len must be >= 1"))?
        }
        Ok(())
    }

    /// Builds a validated parameter set from loosely typed `key = value` options, starting from the defaults.
    ///
    /// Unknown keys and values of the wrong type yield [QlError::Configuration],
    /// values out of range yield [QlError::InvalidValue].
    pub fn from_options<I, K, V>(options: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut param = Parameter::default();
        for (key, value) in options {
            let (key, value) = (key.as_ref().trim(), value.as_ref().trim());
            match key {
                "learning_rate" => param.learning_rate = parse_option(key, value)?,
                "discount_factor" => param.discount_factor = parse_option(key, value)?,
                "exploration_rate" => param.exploration_rate = parse_option(key, value)?,
                "exploration_decay" => param.exploration_decay = parse_option(key, value)?,
                "exploration_min" => param.exploration_min = parse_option(key, value)?,
                "image_size" => param.image_size = parse_image_size(value)?,
                "frames_per_action" => param.frames_per_action = parse_option(key, value)?,
                "replay_size" => param.replay_size = parse_option(key, value)?,
                "terminal_penalty" => param.terminal_penalty = parse_option(key, value)?,
                "render_mode" => param.render_mode = value.parse()?,
                "stats_after_steps" => param.stats_after_steps = parse_option(key, value)?,
                "episode_reward_history_len" => param.episode_reward_history_len = parse_option(key, value)?,
                "seed" => {
                    param.seed = match value {
                        "none" | "" => None,
                        v => Some(parse_option(key, v)?),
                    }
                }
                other => Err(QlError::configuration(format!("unknown option '{}'", other)))?,
            }
        }
        param.validate()?;
        Ok(param)
    }
}

fn parse_option<T: FromStr>(
    key: &str,
    value: &str,
) -> Result<T> {
    value.parse::<T>().map_err(|_| {
        QlError::configuration(format!("{} must be of type {}, got '{}'", key, type_name::<T>(), value)).into()
    })
}

/// Accepts `84,84`, `(84, 84)` or `84x84`
fn parse_image_size(value: &str) -> Result<ImageSize> {
    let inner = value.trim_start_matches('(').trim_end_matches(')');
    let parts: Vec<&str> = inner.split([',', 'x']).map(str::trim).collect();
    if parts.len() != 2 {
        Err(QlError::invalid(format!("image_size must be a tuple of two integers, got '{}'", value)))?
    }
    Ok(ImageSize::new(parse_option("image_size", parts[0])?, parse_option("image_size", parts[1])?))
}

/// Summary of one finished training episode, handed to the training callback
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeReport {
    pub episode: usize,
    /// Sum of the (penalized) rewards over the episode
    pub score: f32,
    /// Sum of the training losses over the episode
    pub loss: f32,
    pub steps: usize,
    pub exploration_rate: f64,
}

/// Deep-Q-Learning agent.
///
/// Drives the environment through the observation pipeline, picks actions epsilon-greedy,
/// records every step in the replay buffer and trains the estimator on a sampled mini-batch after each step.
///
/// Algorithm:
/// ```text
///   observe initial state s
///   while not done:
///     select and perform an action a (held for `frames_per_action` frames)
///     observe a reward r and new state s'
///     store (s, a, r, done, s')
///     sample a batch and fit Q[s, a] to r + 𝛾 max_a'(Q[s', a'])
///     decay 𝜀
///     s ← s'
/// ```
pub struct DeepQAgent<E, M>
where
    E: Environment,
    M: FunctionEstimator,
{
    environment: E,
    param: Immutable<Parameter>,
    model: M,
    pipeline: ObservationPipeline,
    policy: ExplorationPolicy,
    replay_buffer: ReplayBuffer<FrameStack, E::A>,
    episode_rewards: EpisodeRewardHistory,
    rng: StdRng,
    step_count: usize,
    episode_count: usize,
}

impl<E, M> DeepQAgent<E, M>
where
    E: Environment,
    M: FunctionEstimator,
{
    /// Validates `param`, then builds the estimator (once) and all learning state
    pub fn new<F>(
        environment: E,
        param: Parameter,
        build_model: F,
    ) -> Result<Self>
    where
        F: FnOnce(&ModelShape) -> Result<M>,
    {
        param.validate()?;

        let shape = ModelShape {
            image_size: param.image_size,
            frames_per_action: param.frames_per_action,
            num_actions: E::A::ACTION_SPACE,
            learning_rate: param.learning_rate,
        };
        let model = build_model(&shape)?;
        if model.num_actions() != shape.num_actions {
            Err(QlError::shape(format!(
                "model produces {} action values, environment has {} actions",
                model.num_actions(),
                shape.num_actions
            )))?
        }

        let pipeline = ObservationPipeline::new(param.image_size, param.frames_per_action, param.terminal_penalty, param.render_mode)?;
        let policy = ExplorationPolicy::new(param.exploration_rate, param.exploration_decay);
        let replay_buffer = ReplayBuffer::new(param.replay_size)?;
        let episode_rewards = EpisodeRewardHistory::new(param.episode_reward_history_len);
        let rng = match param.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        log::debug!("model shape: {}", shape);

        Ok(Self {
            environment,
            param: Immutable::new(param),
            model,
            pipeline,
            policy,
            replay_buffer,
            episode_rewards,
            rng,
            step_count: 0,
            episode_count: 0,
        })
    }

    pub fn param(&self) -> &Parameter { &self.param }

    pub fn model(&self) -> &M { &self.model }

    pub fn environment(&self) -> &E { &self.environment }

    pub fn replay_buffer(&self) -> &ReplayBuffer<FrameStack, E::A> { &self.replay_buffer }

    pub fn exploration_rate(&self) -> f64 { self.policy.rate() }

    pub fn num_actions(&self) -> usize { self.model.num_actions() }

    /// Input shape of the estimator for a single state: `[1, F, H, W]`
    pub fn input_shape(&self) -> [usize; 4] {
        let size = self.pipeline.image_size();
        [1, self.pipeline.frames_per_action(), size.height as usize, size.width as usize]
    }

    pub fn step_count(&self) -> usize { self.step_count }

    pub fn episode_count(&self) -> usize { self.episode_count }

    /// Average reward over the recent training episodes
    pub fn running_reward(&self) -> Option<f32> { self.episode_rewards.avg() }

    /// Picks an action for `state` epsilon-greedy.
    ///
    /// Returns the action and the estimated value of that action.
    pub fn predict_action(
        &mut self,
        state: &FrameStack,
    ) -> Result<(E::A, f32)> {
        let values = self
            .model
            .predict(&[state])?
            .into_iter()
            .next()
            .ok_or_else(|| QlError::shape("model returned no values for a single state"))?;
        if values.len() != E::A::ACTION_SPACE {
            Err(QlError::shape(format!("expected {} action values, got {}", E::A::ACTION_SPACE, values.len())))?
        }

        let selected = self.policy.select_action(&mut self.rng, &values)?;
        let action = E::A::try_from_numeric(selected.action)?;
        log::trace!("{:?} action {} with Q={:.3}", selected.selection, action, selected.value);
        Ok((action, selected.value))
    }

    /// Trains for a number of episodes (games), handing a report to `callback` after each one
    pub fn train<C>(
        &mut self,
        episodes: usize,
        batch_size: usize,
        mut callback: C,
    ) -> Result<()>
    where
        C: FnMut(&EpisodeReport),
    {
        if batch_size < 1 {
            Err(QlError::invalid("batch_size must be >= 1"))?
        }

        for _ in 0..episodes {
            let report = self.learn_episode(batch_size)?;
            callback(&report);
        }

        log::info!(
            "trained {} episodes, steps: {}, 𝜀={:.3}, running_reward: {:.2}",
            episodes,
            self.step_count.to_formatted_string(&format::number_format()),
            self.policy.rate(),
            self.running_reward().unwrap_or_default()
        );
        Ok(())
    }

    pub fn learn_episode(
        &mut self,
        batch_size: usize,
    ) -> Result<EpisodeReport> {
        let mut state = Rc::new(self.pipeline.initial_state(&mut self.environment)?);
        log::trace!("started learning episode {}", self.episode_count);

        let mut score: f32 = 0.0;
        let mut loss: f32 = 0.0;
        let mut steps: usize = 0;
        let mut done = false;

        while !done {
            let (action, _) = self.predict_action(&state)?;

            // hold the action for `frames_per_action` frames
            let advance = self.pipeline.advance(&mut self.environment, action)?;
            score += advance.reward;
            done = advance.done;

            let state_next = Rc::new(advance.state);
            self.replay_buffer.push(Transition {
                state,
                action,
                reward: advance.reward,
                done,
                state_next: Rc::clone(&state_next),
            });
            state = state_next;

            loss += self.train_on_replay_batch(batch_size)?;

            self.policy.decay();
            self.step_count += 1;
            steps += 1;

            if self.step_count % self.param.stats_after_steps == 0 {
                self.learning_update_log();
            }
        }

        self.episode_rewards.add(score);
        let report = EpisodeReport {
            episode: self.episode_count,
            score,
            loss,
            steps,
            exploration_rate: self.policy.rate(),
        };
        self.episode_count += 1;
        log::debug!("episode {} finished after {} steps, score: {:.2}, loss: {:.4}", report.episode, steps, score, loss);

        Ok(report)
    }

    /// Samples a mini-batch from replay memory and performs one training step on it; returns the loss
    fn train_on_replay_batch(
        &mut self,
        batch_size: usize,
    ) -> Result<f32> {
        let samples = self.replay_buffer.sample(&mut self.rng, batch_size)?;
        let targets = compute_targets(&self.model, &samples, self.param.discount_factor)?;
        self.model.train_on_batch(&samples.states(), &targets)
    }

    /// Plays a number of games without learning and returns their scores.
    ///
    /// Nothing is recorded or trained and the exploration rate stays frozen at its current value.
    pub fn run(
        &mut self,
        games: usize,
    ) -> Result<Vec<f32>> {
        let mut scores = Vec::with_capacity(games);
        for game in 0..games {
            let mut state = self.pipeline.initial_state(&mut self.environment)?;
            let mut score: f32 = 0.0;
            let mut done = false;
            while !done {
                let (action, _) = self.predict_action(&state)?;
                let advance = self.pipeline.advance(&mut self.environment, action)?;
                score += advance.reward;
                done = advance.done;
                state = advance.state;
            }
            log::debug!("game {} score: {:.2}", game, score);
            scores.push(score);
        }
        Ok(scores)
    }

    fn learning_update_log(&self) {
        let number_format = format::number_format();

        let mut action_counts = FxHashMap::<E::A, usize>::default();
        for a in self.replay_buffer.actions() {
            action_counts.entry(a).and_modify(|e| *e += 1).or_insert(1);
        }

        let total_actions = self.replay_buffer.len();
        let action_distribution_line = action_counts
            .iter()
            .sorted_by_key(|(a, _)| a.numeric())
            .map(|(&action, &count)| {
                let ratio = 100.0 * count as f32 / total_actions as f32;
                format!("{} {:.1}%", action, ratio)
            })
            .join(", ");

        log::info!(
            "\n\
    episode: {}, steps: {}, 𝛾={:.2}, 𝜀={:.3}, current_rewards: {{mean: {:.1}, low: {:.1}}}\n\
    action_distribution (of last {}): {}",
            self.episode_count.to_formatted_string(&number_format),
            self.step_count.to_formatted_string(&number_format),
            self.param.discount_factor,
            self.policy.rate(),
            self.episode_rewards.avg().unwrap_or_default(),
            self.episode_rewards.min().unwrap_or_default(),
            total_actions.to_formatted_string(&number_format),
            action_distribution_line
        );
    }
}

impl<E, M> Display for DeepQAgent<E, M>
where
    E: Environment,
    M: FunctionEstimator,
{
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        writeln!(f, "DeepQAgent(")?;
        writeln!(f, "    env={},", type_name::<E>())?;
        writeln!(f, "    learning_rate={},", self.param.learning_rate)?;
        writeln!(f, "    discount_factor={},", self.param.discount_factor)?;
        writeln!(f, "    exploration_rate={},", self.policy.rate())?;
        writeln!(f, "    exploration_decay={},", self.param.exploration_decay)?;
        writeln!(f, "    exploration_min={},", self.param.exploration_min)?;
        writeln!(f, "    image_size={},", self.param.image_size)?;
        writeln!(f, "    frames_per_action={},", self.param.frames_per_action)?;
        writeln!(f, "    replay_size={}", self.replay_buffer.capacity())?;
        write!(f, ")")
    }
}
