//! Compilation pipeline: virtual source view, dependency pre-flight, build
//! cache, engine seam and the orchestrator that ties them together.
//! （編譯流程：虛擬來源、相依檢查、建置快取、引擎介面與協調器。）

pub mod cache;
pub mod deps;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod request;
pub mod resolver;

pub use cache::{BuildArtifact, BuildCache};
pub use deps::{Dependency, DependencyKind};
pub use engine::{Engine, EngineFailure, EngineJob, ProcessEngine};
pub use error::{from_engine, from_io, from_sandbox, CompileError, ErrorKind};
pub use orchestrator::{CompileTicket, Orchestrator, OrchestratorConfig};
pub use request::{CompileOutcome, CompileRequest, CompileStage};
pub use resolver::{ScratchTree, SourceRead, VirtualSource};
