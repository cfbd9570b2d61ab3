//! Task graph engine: status documents, dependency graph, plan import,
//! and execution briefs.

mod brief;
mod engine;
mod graph;
mod model;
mod plan;

pub use brief::{build_spec_content, BriefInputs};
pub use engine::{TaskEngine, TaskError, TaskUpdate};
pub use graph::{
    compute_runnable_and_blocked, resolve_dependencies, validate_dependency_graph, GraphError,
    TaskNode, TaskPartition,
};
pub use model::{
    folder_id, make_slug, parse_folder_id, TaskDocument, TaskInfo, TaskOrigin, TaskStatus,
    WorkerSession, SCHEMA_VERSION,
};
pub use plan::{parse_plan, PlannedTask};
