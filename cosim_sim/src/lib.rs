//! Co-simulation Deterministic Simulation Harness
//!
//! An in-process federation runtime plus the scenarios that exercise the
//! coordination protocol end to end.
//!
//! # Core Principle: One Broker, No Wall Clock
//!
//! All shared state lives in a single broker behind one lock:
//! - **Time**: granted only when every executing federate is blocked in a request
//! - **Data**: values and messages become visible atomically with a grant
//! - **Randomness**: every random filter draws from a stream derived from one seed
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        SimBroker                          │
//! │   lifecycles · granted times · value inboxes · filters    │
//! └──────▲──────────────────▲──────────────────▲──────────────┘
//!        │ oneshot replies  │                  │
//!  ┌─────┴──────┐    ┌──────┴─────┐     ┌──────┴─────┐
//!  │SimFederate │    │SimFederate │ ... │SimFederate │
//!  │ + coupler  │    │ + coupler  │     │ + filter   │
//!  └────────────┘    └────────────┘     └────────────┘
//!         one tokio task each, on a current-thread runtime
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use cosim_sim::{ScenarioRunner, ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::Nonlinear);
//! assert!(result.passed);
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod exporter;
pub mod federate;
pub mod filter;
pub mod oracle;
pub mod runner;
pub mod scenarios;

pub use broker::{BrokerConfig, BrokerStats, SimBroker};
pub use config::SimConfig;
pub use error::SimError;
pub use exporter::{RunExport, SimEvent, TraceFrame, ValueSample};
pub use federate::SimFederate;
pub use filter::{FilterVerdict, SimFilter};
pub use oracle::{CoupledSystemOracle, OracleSolution};
pub use runner::{run_pair, ParticipantReport, ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
