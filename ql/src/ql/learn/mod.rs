pub mod bellman;
pub mod deep_q_agent;
pub mod exploration;
pub mod observation;
pub mod replay_buffer;
