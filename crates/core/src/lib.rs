//! # Concord Core
//!
//! Multi-worker analysis pipeline with contradiction detection and
//! versioned state.
//!
//! ## Architecture
//!
//! - `workers/` - Worker, resolver and synthesizer capabilities plus the registry
//! - `contradiction/` - Rule-based cross-worker contradiction detection
//! - `models` - Coordinator, detector and triage configuration
//! - `state/` - Pipeline state types and the append-only version store
//! - `swarm/` - Triage, fan-out, refinement and the pipeline controller
//!
//! ## Usage
//!
//! ```rust,ignore
//! use concord_core::models::CoordinatorConfig;
//! use concord_core::state::CaseContext;
//! use concord_core::swarm::Controller;
//! use concord_core::workers::WorkerRegistry;
//!
//! let registry = WorkerRegistry::new().with(my_cam_worker).with(my_risk_worker);
//! let controller = Controller::new(CoordinatorConfig::from_env()?, registry);
//! let result = controller.run_pipeline("Explain the CPI drop", CaseContext::default()).await?;
//! ```

pub mod contradiction;
pub mod error;
pub mod models;
pub mod state;
pub mod swarm;
pub mod workers;

pub use error::{ConfigError, StoreError, StoreResult};
