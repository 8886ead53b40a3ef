//! Co-simulation Environment Abstraction Layer
//!
//! This crate describes the federation runtime a co-simulation participant
//! talks to, without providing one. Protocol code in `cosim_core` is written
//! against these traits and runs unchanged on the deterministic in-process
//! runtime in `cosim_sim` or on any other implementation.
//!
//! # Core Concept: Time Requests Are the Only Suspension Point
//!
//! A participant never observes a peer except through a grant:
//! - Values (`publish()`, `read()`)
//! - Messages (`send_message()`, `get_message()`)
//! - Time (`request_time()`, `request_time_iterative()`)
//!
//! Everything published or sent with a time at or before the granted time
//! is visible when the grant returns; nothing later is.
//!
//! # Example
//!
//! ```ignore
//! use cosim_env::{Federate, IterationRequest, SimTime, ValueKind};
//!
//! async fn participant<F: Federate>(fed: &mut F) -> Result<(), cosim_env::FederationError> {
//!     let out = fed.register_publication("fed1/x", ValueKind::Double)?;
//!     let input = fed.register_subscription("fed2/y")?;
//!     fed.enter_initializing().await?;
//!     fed.enter_executing().await?;
//!     fed.publish(out, 1.0.into())?;
//!     let step = fed
//!         .request_time_iterative(SimTime::from_secs_f64(0.01), IterationRequest::ForceIteration)
//!         .await?;
//!     let reading = fed.read(input)?;
//!     fed.finalize().await
//! }
//! ```

mod config;
mod error;
mod federate;
mod filter;
mod message;
mod types;
mod value;

pub use config::FederateInfo;
pub use error::FederationError;
pub use federate::{Federate, Federation};
pub use filter::{DelayDistribution, FilterSpec, FilterTarget};
pub use message::Message;
pub use types::{
    EndpointId, FederateId, FilterId, InputId, IterationOutcome, IterationRequest,
    LifecycleState, PublicationId, SimTime, TimeStep,
};
pub use value::{Reading, Value, ValueKind};
