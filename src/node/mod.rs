mod node;
mod registry;

pub use node::{to_json_indented, NodeConfig, NodeStatus};
pub use registry::{NodeRegistry, RegistryError};
