//! Single-participant federates for driver tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cosim_env::{
    EndpointId, Federate, FederationError, FilterId, FilterSpec, FilterTarget, InputId,
    IterationOutcome, IterationRequest, LifecycleState, Message, PublicationId, Reading, SimTime,
    TimeStep, Value, ValueKind,
};

use crate::lifecycle::ParticipantLifecycle;

type Peer = Box<dyn FnMut(Option<&Value>) -> Option<Value> + Send>;

/// Federate whose only input is produced by a closure reacting to the
/// participant's latest publication at every grant.
pub struct ScriptedFederate {
    name: String,
    lifecycle: ParticipantLifecycle,
    granted: SimTime,
    published: Option<Value>,
    input: Reading,
    peer: Peer,
    requests: Arc<Mutex<Vec<(SimTime, IterationRequest)>>>,
}

impl ScriptedFederate {
    pub fn new(
        name: &str,
        peer: impl FnMut(Option<&Value>) -> Option<Value> + Send + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            lifecycle: ParticipantLifecycle::new(),
            granted: SimTime::ZERO,
            published: None,
            input: Reading::default(),
            peer: Box::new(peer),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn request_log(&self) -> Arc<Mutex<Vec<(SimTime, IterationRequest)>>> {
        Arc::clone(&self.requests)
    }

    /// Runs the peer; returns true if its value changed.
    fn react(&mut self) -> bool {
        match (self.peer)(self.published.as_ref()) {
            Some(value) => {
                let changed = self.input.value.as_ref() != Some(&value);
                self.input = Reading {
                    value: Some(value),
                    updated: true,
                };
                changed
            }
            None => false,
        }
    }
}

#[async_trait]
impl Federate for ScriptedFederate {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    fn granted_time(&self) -> SimTime {
        self.granted
    }

    fn register_publication(
        &mut self,
        _key: &str,
        _kind: ValueKind,
    ) -> Result<PublicationId, FederationError> {
        self.lifecycle.ensure_configurable("register_publication")?;
        Ok(PublicationId(0))
    }

    fn register_subscription(&mut self, _target: &str) -> Result<InputId, FederationError> {
        self.lifecycle.ensure_configurable("register_subscription")?;
        Ok(InputId(0))
    }

    fn register_endpoint(&mut self, _local: &str) -> Result<EndpointId, FederationError> {
        Err(FederationError::invalid_argument("no endpoints in scripted federate"))
    }

    fn register_global_endpoint(&mut self, _name: &str) -> Result<EndpointId, FederationError> {
        Err(FederationError::invalid_argument("no endpoints in scripted federate"))
    }

    fn register_filter(
        &mut self,
        _target: FilterTarget,
        _spec: FilterSpec,
    ) -> Result<FilterId, FederationError> {
        Err(FederationError::invalid_argument("no filters in scripted federate"))
    }

    fn set_filter(&mut self, _filter: FilterId, _spec: FilterSpec) -> Result<(), FederationError> {
        Err(FederationError::invalid_argument("no filters in scripted federate"))
    }

    async fn enter_initializing(&mut self) -> Result<(), FederationError> {
        self.lifecycle.enter_initializing()
    }

    async fn enter_executing(&mut self) -> Result<SimTime, FederationError> {
        self.lifecycle.enter_executing()?;
        self.react();
        Ok(self.granted)
    }

    async fn request_time(&mut self, time: SimTime) -> Result<SimTime, FederationError> {
        let step = self
            .request_time_iterative(time, IterationRequest::NoIteration)
            .await?;
        Ok(step.granted)
    }

    async fn request_time_iterative(
        &mut self,
        time: SimTime,
        iterate: IterationRequest,
    ) -> Result<TimeStep, FederationError> {
        self.lifecycle.ensure_executing("request_time")?;
        if let Ok(mut log) = self.requests.lock() {
            log.push((time, iterate));
        }

        let changed = self.react();
        let iterating = match iterate {
            IterationRequest::ForceIteration => true,
            IterationRequest::IterateIfNeeded => changed,
            IterationRequest::NoIteration => false,
        };

        let (granted, outcome) = if iterating {
            (self.granted, IterationOutcome::Iterating)
        } else {
            (time.max(self.granted), IterationOutcome::NextStep)
        };
        self.granted = granted;
        Ok(TimeStep {
            requested: time,
            granted,
            outcome,
        })
    }

    fn publish(&mut self, _publication: PublicationId, value: Value) -> Result<(), FederationError> {
        self.lifecycle.ensure_active("publish")?;
        self.published = Some(value);
        Ok(())
    }

    fn read(&mut self, _input: InputId) -> Result<Reading, FederationError> {
        self.lifecycle.ensure_active("read")?;
        let reading = self.input.clone();
        self.input.updated = false;
        Ok(reading)
    }

    fn send_message(
        &mut self,
        _endpoint: EndpointId,
        _destination: &str,
        _payload: Vec<u8>,
        _time: SimTime,
    ) -> Result<(), FederationError> {
        Err(FederationError::invalid_argument("no endpoints in scripted federate"))
    }

    fn has_message(&self, _endpoint: EndpointId) -> Result<bool, FederationError> {
        Ok(false)
    }

    fn get_message(&mut self, _endpoint: EndpointId) -> Result<Option<Message>, FederationError> {
        Ok(None)
    }

    async fn finalize(&mut self) -> Result<(), FederationError> {
        self.lifecycle.finalize()
    }
}

type FilterLog = Arc<Mutex<Vec<(SimTime, FilterSpec)>>>;

/// Federate whose one endpoint receives everything it sends.
///
/// Messages are stamped with the current `Delay` filter when sent and
/// delivered at the first grant at or after their delivery time. A pending
/// message interrupts a time request, as in a conservative runtime.
pub struct LoopbackFederate {
    name: String,
    lifecycle: ParticipantLifecycle,
    granted: SimTime,
    endpoint: Option<String>,
    delay: SimTime,
    next_id: u64,
    in_flight: Vec<Message>,
    inbox: VecDeque<Message>,
    grants: Arc<Mutex<Vec<SimTime>>>,
    filters: FilterLog,
}

impl LoopbackFederate {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            lifecycle: ParticipantLifecycle::new(),
            granted: SimTime::ZERO,
            endpoint: None,
            delay: SimTime::ZERO,
            next_id: 0,
            in_flight: Vec::new(),
            inbox: VecDeque::new(),
            grants: Arc::new(Mutex::new(Vec::new())),
            filters: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every time granted, in order.
    pub fn grant_log(&self) -> Arc<Mutex<Vec<SimTime>>> {
        Arc::clone(&self.grants)
    }

    /// Every filter setting with the granted time it was made at.
    pub fn filter_log(&self) -> FilterLog {
        Arc::clone(&self.filters)
    }

    fn apply_filter(&mut self, spec: FilterSpec) -> Result<(), FederationError> {
        let FilterSpec::Delay { delay } = spec else {
            return Err(FederationError::invalid_argument("loopback supports delay filters only"));
        };
        self.delay = delay;
        if let Ok(mut log) = self.filters.lock() {
            log.push((self.granted, spec));
        }
        Ok(())
    }

    fn grant(&mut self, time: SimTime) -> SimTime {
        let earliest = self
            .in_flight
            .iter()
            .map(|m| m.time)
            .filter(|&t| t > self.granted)
            .min();
        let mut granted = time.max(self.granted);
        if let Some(event) = earliest {
            granted = granted.min(event);
        }
        self.granted = granted;

        let (mut arrived, remaining): (Vec<Message>, Vec<Message>) =
            self.in_flight.drain(..).partition(|m| m.time <= granted);
        self.in_flight = remaining;
        arrived.sort_by_key(|m| (m.time, m.id));
        self.inbox.extend(arrived);

        if let Ok(mut log) = self.grants.lock() {
            log.push(granted);
        }
        granted
    }

    fn no_values() -> FederationError {
        FederationError::invalid_argument("no values in loopback federate")
    }
}

#[async_trait]
impl Federate for LoopbackFederate {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    fn granted_time(&self) -> SimTime {
        self.granted
    }

    fn register_publication(
        &mut self,
        _key: &str,
        _kind: ValueKind,
    ) -> Result<PublicationId, FederationError> {
        Err(Self::no_values())
    }

    fn register_subscription(&mut self, _target: &str) -> Result<InputId, FederationError> {
        Err(Self::no_values())
    }

    fn register_endpoint(&mut self, local: &str) -> Result<EndpointId, FederationError> {
        let name = format!("{}/{}", self.name, local);
        self.register_global_endpoint(&name)
    }

    fn register_global_endpoint(&mut self, name: &str) -> Result<EndpointId, FederationError> {
        self.lifecycle.ensure_configurable("register_endpoint")?;
        if self.endpoint.is_some() {
            return Err(FederationError::invalid_argument("loopback has a single endpoint"));
        }
        self.endpoint = Some(name.to_string());
        Ok(EndpointId(0))
    }

    fn register_filter(
        &mut self,
        _target: FilterTarget,
        spec: FilterSpec,
    ) -> Result<FilterId, FederationError> {
        self.lifecycle.ensure_configurable("register_filter")?;
        self.apply_filter(spec)?;
        Ok(FilterId(0))
    }

    fn set_filter(&mut self, _filter: FilterId, spec: FilterSpec) -> Result<(), FederationError> {
        self.lifecycle.ensure_active("set_filter")?;
        self.apply_filter(spec)
    }

    async fn enter_initializing(&mut self) -> Result<(), FederationError> {
        self.lifecycle.enter_initializing()
    }

    async fn enter_executing(&mut self) -> Result<SimTime, FederationError> {
        self.lifecycle.enter_executing()?;
        Ok(self.granted)
    }

    async fn request_time(&mut self, time: SimTime) -> Result<SimTime, FederationError> {
        self.lifecycle.ensure_executing("request_time")?;
        Ok(self.grant(time))
    }

    async fn request_time_iterative(
        &mut self,
        time: SimTime,
        _iterate: IterationRequest,
    ) -> Result<TimeStep, FederationError> {
        let granted = self.request_time(time).await?;
        Ok(TimeStep {
            requested: time,
            granted,
            outcome: IterationOutcome::NextStep,
        })
    }

    fn publish(&mut self, _publication: PublicationId, _value: Value) -> Result<(), FederationError> {
        Err(Self::no_values())
    }

    fn read(&mut self, _input: InputId) -> Result<Reading, FederationError> {
        Err(Self::no_values())
    }

    fn send_message(
        &mut self,
        _endpoint: EndpointId,
        destination: &str,
        payload: Vec<u8>,
        time: SimTime,
    ) -> Result<(), FederationError> {
        self.lifecycle.ensure_executing("send_message")?;
        let source = match &self.endpoint {
            Some(name) if name == destination => name.clone(),
            _ => {
                return Err(FederationError::invalid_argument(format!(
                    "unknown destination endpoint {destination}"
                )))
            }
        };
        let send_time = time.max(self.granted);
        let id = self.next_id;
        self.next_id += 1;
        self.in_flight.push(Message {
            id,
            source: source.clone(),
            destination: source.clone(),
            original_source: source.clone(),
            original_destination: source,
            send_time,
            time: send_time + self.delay,
            payload,
        });
        Ok(())
    }

    fn has_message(&self, _endpoint: EndpointId) -> Result<bool, FederationError> {
        Ok(!self.inbox.is_empty())
    }

    fn get_message(&mut self, _endpoint: EndpointId) -> Result<Option<Message>, FederationError> {
        self.lifecycle.ensure_active("get_message")?;
        Ok(self.inbox.pop_front())
    }

    async fn finalize(&mut self) -> Result<(), FederationError> {
        self.lifecycle.finalize()
    }
}
