use std::collections::VecDeque;
use std::rc::Rc;

use anyhow::Result;
use rand::distributions::{Distribution, Uniform};
use rand::Rng;

use crate::ql::prelude::QlError;

/// One recorded decision step
#[derive(Debug)]
pub struct Transition<S, A> {
    pub state: Rc<S>,
    pub action: A,
    pub reward: f32,
    pub done: bool,
    pub state_next: Rc<S>,
}

impl<S, A: Copy> Clone for Transition<S, A> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
            action: self.action,
            reward: self.reward,
            done: self.done,
            state_next: Rc::clone(&self.state_next),
        }
    }
}

/// A mini-batch drawn from the replay buffer; all vectors are index-aligned
#[derive(Debug)]
pub struct ReplaySamples<S, A> {
    pub state: Vec<Rc<S>>,
    pub action: Vec<A>,
    pub reward: Vec<f32>,
    pub done: Vec<bool>,
    pub state_next: Vec<Rc<S>>,
}

impl<S, A> ReplaySamples<S, A> {
    pub fn len(&self) -> usize { self.state.len() }

    pub fn is_empty(&self) -> bool { self.state.is_empty() }

    pub fn states(&self) -> Vec<&S> { self.state.iter().map(|s| s.as_ref()).collect() }

    pub fn next_states(&self) -> Vec<&S> { self.state_next.iter().map(|s| s.as_ref()).collect() }
}

/// Experience replay buffer.
///
/// Fixed capacity; once full, the oldest transition is overwritten at the write cursor.
pub struct ReplayBuffer<S, A> {
    capacity: usize,
    slots: Vec<Transition<S, A>>,
    /// next slot to write
    index: usize,
    /// number of written slots; saturates at `capacity`
    occupied: usize,
}

impl<S, A: Copy> ReplayBuffer<S, A> {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            Err(QlError::invalid("replay_size must be >= 1"))?
        }
        Ok(Self {
            capacity,
            slots: Vec::with_capacity(capacity),
            index: 0,
            occupied: 0,
        })
    }

    pub fn capacity(&self) -> usize { self.capacity }

    pub fn len(&self) -> usize { self.occupied }

    pub fn is_empty(&self) -> bool { self.occupied == 0 }

    pub fn push(
        &mut self,
        transition: Transition<S, A>,
    ) {
        if self.occupied < self.capacity {
            debug_assert_eq!(self.index, self.slots.len());
            self.slots.push(transition);
            self.occupied += 1;
        } else {
            self.slots[self.index] = transition;
        }
        self.index = (self.index + 1) % self.capacity;
    }

    /// Stored transitions in slot order (not in insertion order once the buffer wrapped)
    pub fn iter(&self) -> impl Iterator<Item = &Transition<S, A>> { self.slots.iter() }

    pub fn actions(&self) -> impl Iterator<Item = A> + '_ { self.slots.iter().map(|t| t.action) }

    /// Draws `batch_size` slot indices uniformly, with replacement, from the written slots
    pub fn sample_indices<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        batch_size: usize,
    ) -> Result<Vec<usize>> {
        if self.occupied == 0 {
            Err(QlError::InsufficientData("cannot sample from an empty replay buffer".to_string()))?
        }
        let distribution = Uniform::from(0..self.occupied);
        Ok((0..batch_size).map(|_| distribution.sample(rng)).collect())
    }

    /// Draws a mini-batch. The same transition may appear more than once.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        batch_size: usize,
    ) -> Result<ReplaySamples<S, A>> {
        let indices = self.sample_indices(rng, batch_size)?;
        self.get_many(&indices)
    }

    /// Collects the transitions at the given slot indices; every index must address a written slot
    pub fn get_many(
        &self,
        indices: &[usize],
    ) -> Result<ReplaySamples<S, A>> {
        if let Some(i) = indices.iter().find(|&&i| i >= self.occupied) {
            Err(QlError::invalid(format!("index {} outside of {} stored transitions", i, self.occupied)))?
        }
        let mut samples = ReplaySamples {
            state: Vec::with_capacity(indices.len()),
            action: Vec::with_capacity(indices.len()),
            reward: Vec::with_capacity(indices.len()),
            done: Vec::with_capacity(indices.len()),
            state_next: Vec::with_capacity(indices.len()),
        };
        for &i in indices {
            let t = &self.slots[i];
            samples.state.push(Rc::clone(&t.state));
            samples.action.push(t.action);
            samples.reward.push(t.reward);
            samples.done.push(t.done);
            samples.state_next.push(Rc::clone(&t.state_next));
        }
        Ok(samples)
    }
}

/// Bounded history of the most recent episode rewards
pub struct EpisodeRewardHistory {
    max_len: usize,
    rewards: VecDeque<f32>,
}

impl EpisodeRewardHistory {
    pub fn new(max_len: usize) -> Self {
        assert!(max_len > 0);
        Self {
            max_len,
            rewards: VecDeque::with_capacity(max_len),
        }
    }

    pub fn add(
        &mut self,
        episode_reward: f32,
    ) {
        if self.rewards.len() == self.max_len {
            self.rewards.pop_front();
        }
        self.rewards.push_back(episode_reward);
    }

    pub fn len(&self) -> usize { self.rewards.len() }

    pub fn is_empty(&self) -> bool { self.rewards.is_empty() }

    pub fn avg(&self) -> Option<f32> {
        if self.rewards.is_empty() {
            None
        } else {
            Some(self.rewards.iter().sum::<f32>() / self.rewards.len() as f32)
        }
    }

    pub fn min(&self) -> Option<f32> { self.rewards.iter().copied().reduce(f32::min) }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rstest::rstest;

    use super::*;

    fn transition(n: usize) -> Transition<usize, usize> {
        Transition {
            state: Rc::new(n),
            action: n,
            reward: n as f32,
            done: false,
            state_next: Rc::new(n + 1),
        }
    }

    fn filled(
        capacity: usize,
        pushes: usize,
    ) -> ReplayBuffer<usize, usize> {
        let mut buffer = ReplayBuffer::new(capacity).unwrap();
        for n in 1..=pushes {
            buffer.push(transition(n));
        }
        buffer
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let err = ReplayBuffer::<usize, usize>::new(0).err().unwrap();
        assert!(matches!(err.downcast_ref::<QlError>(), Some(QlError::InvalidValue(_))));
    }

    #[rstest]
    #[case(1, 1)]
    #[case(5, 3)]
    #[case(5, 5)]
    #[case(5, 17)]
    fn test_occupied_saturates_at_capacity(
        #[case] capacity: usize,
        #[case] pushes: usize,
    ) {
        let buffer = filled(capacity, pushes);
        assert_eq!(buffer.len(), usize::min(capacity, pushes));
        assert_eq!(buffer.capacity(), capacity);
    }

    #[test]
    fn test_full_buffer_only_returns_written_transitions() -> Result<()> {
        let buffer = filled(8, 20);
        let mut rng = StdRng::seed_from_u64(7);
        let samples = buffer.sample(&mut rng, 256)?;
        assert!(samples.action.iter().all(|a| (13..=20).contains(a)));
        Ok(())
    }

    #[test]
    fn test_circular_overwrite_replaces_oldest() {
        let buffer = filled(4, 5);
        let mut actions: Vec<usize> = buffer.actions().collect();
        assert_eq!(actions, vec![5, 2, 3, 4]);
        actions.sort();
        assert_eq!(actions, vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_sample_never_exceeds_occupied() -> Result<()> {
        let buffer = filled(100, 7);
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..10_000 {
            let indices = buffer.sample_indices(&mut rng, 1)?;
            assert_eq!(indices.len(), 1);
            assert!(indices[0] < 7);
        }
        Ok(())
    }

    #[test]
    fn test_sample_from_empty_buffer_fails() {
        let buffer = filled(4, 0);
        let mut rng = StdRng::seed_from_u64(1);
        let err = buffer.sample(&mut rng, 1).err().unwrap();
        assert!(matches!(err.downcast_ref::<QlError>(), Some(QlError::InsufficientData(_))));
    }

    #[test]
    fn test_batch_larger_than_content_contains_duplicates() -> Result<()> {
        let buffer = filled(10, 2);
        let mut rng = StdRng::seed_from_u64(3);
        let samples = buffer.sample(&mut rng, 32)?;
        assert_eq!(samples.len(), 32);
        assert!(samples.action.iter().all(|a| [1, 2].contains(a)));
        Ok(())
    }

    #[rstest]
    #[case(&[3])]
    #[case(&[0, 1, 7])]
    fn test_get_many_rejects_unwritten_slots(#[case] indices: &[usize]) {
        let buffer = filled(8, 3);
        let err = buffer.get_many(indices).err().unwrap();
        assert!(matches!(err.downcast_ref::<QlError>(), Some(QlError::InvalidValue(_))));
    }

    #[test]
    fn test_get_many_keeps_index_order() -> Result<()> {
        let samples = filled(8, 3).get_many(&[2, 0, 2])?;
        assert_eq!(samples.action, vec![3, 1, 3]);
        Ok(())
    }

    #[test]
    fn test_samples_are_index_aligned() -> Result<()> {
        let buffer = filled(16, 16);
        let mut rng = StdRng::seed_from_u64(11);
        let samples = buffer.sample(&mut rng, 64)?;
        for i in 0..samples.len() {
            let n = samples.action[i];
            assert_eq!(*samples.state[i], n);
            assert_eq!(samples.reward[i], n as f32);
            assert!(!samples.done[i]);
            assert_eq!(*samples.state_next[i], n + 1);
        }
        Ok(())
    }

    #[test]
    fn test_episode_reward_history_is_bounded() {
        let mut history = EpisodeRewardHistory::new(3);
        assert_eq!(history.avg(), None);
        for r in [10.0, -4.0, 1.0, 6.0] {
            history.add(r);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.avg(), Some(1.0));
        assert_eq!(history.min(), Some(-4.0));
    }
}
