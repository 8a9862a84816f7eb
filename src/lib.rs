//! Multi-phase workflow orchestration.
//!
//! A workflow is a set of named phases with dependencies. Phases run as
//! external worker processes (shell commands or agent invocations); every
//! start and terminal outcome is appended to a JSONL audit log that doubles
//! as the resume state. After the phases, an optional validation cascade and
//! quality gate decide whether the result is accepted.

pub mod audit;
pub mod conductor_config;
pub mod config;
pub mod errors;
pub mod executor;
pub mod graph;
pub mod group;
pub mod logging;
pub mod operator;
pub mod phase;
pub mod quality;
pub mod report;
pub mod retry;
pub mod runner;
pub mod ui;
pub mod validation;
pub mod workflow;
pub mod workflow_name;
