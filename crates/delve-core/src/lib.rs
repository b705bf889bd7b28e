pub mod config;
pub mod orchestrator;
pub mod parse;
pub mod prompts;
pub mod research;

pub use config::{ConfigStore, EngineConfig, StageModels};
pub use orchestrator::{route_after_reflection, Engine, Route, Stage};
pub use research::{run_research_batch, ResearchBranch};
