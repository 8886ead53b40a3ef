//! Capability traits of the federation runtime.

use async_trait::async_trait;

use crate::config::FederateInfo;
use crate::error::FederationError;
use crate::filter::{FilterSpec, FilterTarget};
use crate::message::Message;
use crate::types::{
    EndpointId, FilterId, InputId, IterationRequest, LifecycleState, PublicationId, SimTime,
    TimeStep,
};
use crate::value::{Reading, Value, ValueKind};

/// One participant's view of the federation.
///
/// Handles returned by the `register_*` calls are only meaningful to the
/// participant that created them.
///
/// # Lifecycle
///
/// ```text
/// Created --enter_initializing--> Initializing --enter_executing--> Executing --finalize--> Finalized
/// ```
///
/// Time requests are the only suspension point. Values and messages from
/// other participants become visible atomically with a grant.
#[async_trait]
pub trait Federate: Send + 'static {
    /// Returns this participant's name.
    fn name(&self) -> &str;

    /// Returns the current lifecycle state.
    fn state(&self) -> LifecycleState;

    /// Returns the most recently granted time.
    fn granted_time(&self) -> SimTime;

    /// Registers an output coupling variable under a federation-wide key.
    ///
    /// # Returns
    /// * `Err(FederationError::InvalidArgument)` - The key is already taken
    fn register_publication(
        &mut self,
        key: &str,
        kind: ValueKind,
    ) -> Result<PublicationId, FederationError>;

    /// Registers an input targeting a publication key.
    ///
    /// The target does not need to exist yet.
    fn register_subscription(&mut self, target: &str) -> Result<InputId, FederationError>;

    /// Registers an endpoint named `"{federate}/{local}"`.
    fn register_endpoint(&mut self, local: &str) -> Result<EndpointId, FederationError>;

    /// Registers an endpoint under a federation-wide name.
    fn register_global_endpoint(&mut self, name: &str) -> Result<EndpointId, FederationError>;

    /// Attaches a filter to an endpoint. The caller owns the filter.
    fn register_filter(
        &mut self,
        target: FilterTarget,
        spec: FilterSpec,
    ) -> Result<FilterId, FederationError>;

    /// Reconfigures an owned filter.
    ///
    /// Only messages admitted after the call see the new behavior.
    fn set_filter(&mut self, filter: FilterId, spec: FilterSpec) -> Result<(), FederationError>;

    /// Enters initialization mode. Waits for every participant.
    async fn enter_initializing(&mut self) -> Result<(), FederationError>;

    /// Enters executing mode. Waits for every participant.
    ///
    /// # Returns
    /// The first granted time (zero).
    async fn enter_executing(&mut self) -> Result<SimTime, FederationError>;

    /// Requests a time advance without iteration.
    ///
    /// # Returns
    /// The granted time. It never decreases across calls.
    async fn request_time(&mut self, time: SimTime) -> Result<SimTime, FederationError>;

    /// Requests a time advance with an iteration hint.
    ///
    /// # Arguments
    /// * `time` - Requested time for a non-iterating advance
    /// * `iterate` - Whether the current instant should be re-offered
    ///
    /// # Returns
    /// The granted time and the iteration outcome. If the federation fails
    /// while the request is pending the outcome is `Error`.
    async fn request_time_iterative(
        &mut self,
        time: SimTime,
        iterate: IterationRequest,
    ) -> Result<TimeStep, FederationError>;

    /// Publishes a value at the current granted time.
    fn publish(&mut self, publication: PublicationId, value: Value) -> Result<(), FederationError>;

    /// Reads the latest visible value of an input and clears its updated flag.
    fn read(&mut self, input: InputId) -> Result<Reading, FederationError>;

    /// Sends a message from `endpoint` to the endpoint named `destination`.
    ///
    /// The send time is `max(time, granted_time)`.
    fn send_message(
        &mut self,
        endpoint: EndpointId,
        destination: &str,
        payload: Vec<u8>,
        time: SimTime,
    ) -> Result<(), FederationError>;

    /// Returns true if a delivered message is queued at `endpoint`.
    fn has_message(&self, endpoint: EndpointId) -> Result<bool, FederationError>;

    /// Pops the next delivered message from `endpoint`.
    fn get_message(&mut self, endpoint: EndpointId) -> Result<Option<Message>, FederationError>;

    /// Leaves the federation. Valid from executing mode only; terminal.
    async fn finalize(&mut self) -> Result<(), FederationError>;
}

/// A federation capable of creating participants.
pub trait Federation {
    type Federate: Federate;

    /// Creates a participant in the `Created` state.
    ///
    /// # Returns
    /// * `Err(FederationError::Connection)` - The federation refused the participant
    fn create_federate(&self, info: FederateInfo) -> Result<Self::Federate, FederationError>;
}
