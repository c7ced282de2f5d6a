pub mod api;
pub mod stats;

pub use api::{sample_loop, setup, Agent, Api};
pub use stats::{AgentError, Sampler, ALL_INTERFACES};
