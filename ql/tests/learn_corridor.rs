use anyhow::Result;

use common::{corridor_param, BATCH_SIZE};
use ql::ql::learn::deep_q_agent::{DeepQAgent, EpisodeReport, Parameter};
use ql::test::corridor_test_environment::CorridorTestEnvironment;
use ql::test::test_estimators::LinearTestEstimator;
use ql::util::log::init_logging;

mod common;

fn corridor_agent(param: Parameter) -> Result<DeepQAgent<CorridorTestEnvironment, LinearTestEstimator>> {
    DeepQAgent::new(CorridorTestEnvironment::new(), param, LinearTestEstimator::new)
}

#[test]
fn test_learner_plays_corridor_episodes() -> Result<()> {
    init_logging();

    let mut agent = corridor_agent(corridor_param())?;
    let mut reports: Vec<EpisodeReport> = vec![];

    agent.train(20, BATCH_SIZE, |r| reports.push(r.clone()))?;

    assert_eq!(reports.len(), 20);
    assert!(reports.iter().enumerate().all(|(i, r)| r.episode == i && r.steps >= 1));
    assert!(reports.iter().all(|r| r.loss.is_finite() && r.score.is_finite()));

    let total_steps: usize = reports.iter().map(|r| r.steps).sum();
    assert_eq!(agent.step_count(), total_steps);
    assert_eq!(agent.episode_count(), 20);
    assert_eq!(agent.replay_buffer().len(), usize::min(200, total_steps));
    assert_eq!(agent.environment().render_calls(), 2 * total_steps);

    let expected_rate = (0..total_steps).fold(1.0, |rate, _| rate * 0.99);
    assert!((agent.exploration_rate() - expected_rate).abs() < 1e-12);
    assert_eq!(reports.last().map(|r| r.exploration_rate), Some(agent.exploration_rate()));
    Ok(())
}

#[test]
fn test_evaluation_keeps_learning_state() -> Result<()> {
    let mut agent = corridor_agent(corridor_param())?;
    agent.train(3, BATCH_SIZE, |_| {})?;
    let (steps, rate, stored) = (agent.step_count(), agent.exploration_rate(), agent.replay_buffer().len());

    let scores = agent.run(5)?;

    assert_eq!(scores.len(), 5);
    assert!(scores.iter().all(|s| s.is_finite()));
    assert_eq!(agent.step_count(), steps);
    assert_eq!(agent.exploration_rate(), rate);
    assert_eq!(agent.replay_buffer().len(), stored);
    Ok(())
}

#[test]
fn test_same_seed_reproduces_training() -> Result<()> {
    let mut scores = vec![];
    for _ in 0..2 {
        let mut agent = corridor_agent(corridor_param())?;
        let mut episode_scores = vec![];
        agent.train(5, BATCH_SIZE, |r| episode_scores.push((r.score, r.steps)))?;
        scores.push(episode_scores);
    }
    assert_eq!(scores[0], scores[1]);
    Ok(())
}

#[test]
fn test_agent_describes_itself() -> Result<()> {
    let agent = corridor_agent(corridor_param())?;
    let description = agent.to_string();
    assert!(description.contains("CorridorTestEnvironment"));
    assert!(description.contains("frames_per_action=2"));
    assert_eq!(agent.input_shape(), [1, 2, 4, 12]);
    Ok(())
}
