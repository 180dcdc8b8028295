//! Decoy agent runtime.
//!
//! Wires the deterministic `engagement` core to its external collaborators:
//! reasoning backends over HTTP, the persona registry, the encrypted storage
//! actor and the session orchestrator.

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod orchestrator;
pub mod personas;
pub mod reasoning;
pub mod simulation;
pub mod storage;
pub mod telemetry;

pub use config::AgentConfig;
pub use orchestrator::{Engine, EngineError, EngineParts, EngineReply, IntelligenceReport, SessionInfo, SystemStatus};
pub use personas::{PersonaDescriptor, PersonaRegistry};
pub use reasoning::{ReasoningError, ReasoningRequest, ReasoningResponse, ReasoningService};
pub use simulation::Script;
pub use storage::{BlobKind, NewBlob, StorageSink, StoreHandle};
