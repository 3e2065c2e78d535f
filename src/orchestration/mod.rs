pub mod error;
pub mod evaluation;
pub mod flow_spec;
pub mod pipeline;
pub mod plan;
pub mod plan_store;
pub mod run_state;
pub mod synthetic_nodes;

pub use error::OrchestratorError;
pub use pipeline::PromptPipeline;
pub use plan::{NodeStatus, PlanDocument, PlanStatus, PRIMARY_NODE_ID};
pub use run_state::{PromptRequest, RunState, Stage, StateUpdate};
