//! Deterministic in-process federation broker.
//!
//! Owns all shared federation state: lifecycles, granted times, value
//! queues, endpoint queues and filters. Federates talk to it through
//! [`crate::federate::SimFederate`]; blocking calls park a oneshot sender
//! here and are released by the broker.
//!
//! # Time Granting
//!
//! ```text
//! every executing federate blocked?
//!        │ yes
//!        ▼
//! candidate(k) = g_k                if iterating (FORCE, or IF_NEEDED with data ≤ g_k)
//!              = snap(max(req, g_k + Δ)), lowered to the next pending event
//!        │
//!        ▼
//! T = min candidate ─► grant every k with candidate(k) = T, deliver data ≤ T
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cosim_core::ParticipantLifecycle;
use cosim_env::{
    EndpointId, FederateId, FederateInfo, Federation, FederationError, FilterId, FilterSpec,
    FilterTarget, InputId, IterationOutcome, IterationRequest, LifecycleState, Message,
    PublicationId, Reading, SimTime, TimeStep, Value, ValueKind,
};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::federate::SimFederate;
use crate::filter::{FilterVerdict, SimFilter};

/// Broker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Federates that must join before the barriers open.
    pub expected_federates: usize,

    /// Seed for every random filter.
    pub seed: u64,

    /// Grants never exceed this time.
    pub stop_time: SimTime,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            expected_federates: 2,
            seed: 42,
            stop_time: SimTime::MAX,
        }
    }
}

/// Counters collected over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub grants: u64,
    pub iteration_grants: u64,
    pub values_published: u64,
    pub messages_admitted: u64,
    pub messages_dropped: u64,
    pub messages_delivered: u64,
}

type Reply<T> = oneshot::Sender<Result<T, FederationError>>;

struct PendingRequest {
    requested: SimTime,
    /// `None` for non-iterative requests.
    iterate: Option<IterationRequest>,
    reply: Reply<TimeStep>,
}

struct FederateSlot {
    info: FederateInfo,
    lifecycle: ParticipantLifecycle,
    granted: SimTime,
    /// Iteration grants at `granted`.
    iterations: u32,
    pending: Option<PendingRequest>,
}

struct PublicationSlot {
    key: String,
    owner: FederateId,
    kind: ValueKind,
}

/// A published value waiting for delivery.
struct Stamped {
    time: SimTime,
    seq: u64,
    value: Value,
}

struct InputSlot {
    owner: FederateId,
    target: String,
    inbox: Vec<Stamped>,
    visible: Option<Value>,
    updated: bool,
}

struct EndpointSlot {
    owner: FederateId,
    name: String,
    queue: VecDeque<Message>,
}

/// A barrier over all expected federates.
#[derive(Default)]
struct Barrier {
    waiting: Vec<Reply<()>>,
    arrived: usize,
    opened: bool,
}

struct BrokerState {
    config: BrokerConfig,
    federates: Vec<FederateSlot>,
    names: HashMap<String, FederateId>,
    publications: Vec<PublicationSlot>,
    publication_keys: HashMap<String, PublicationId>,
    inputs: Vec<InputSlot>,
    endpoints: Vec<EndpointSlot>,
    endpoint_names: HashMap<String, EndpointId>,
    filters: Vec<SimFilter>,
    in_flight: Vec<Message>,
    initializing: Barrier,
    executing: Barrier,
    aborted: Option<String>,
    next_message_id: u64,
    next_seq: u64,
    stats: BrokerStats,
}

/// Shared handle to the federation. Cheap to clone.
#[derive(Clone)]
pub struct SimBroker {
    inner: Arc<Mutex<BrokerState>>,
}

impl SimBroker {
    pub fn new(config: BrokerConfig) -> Self {
        let state = BrokerState {
            config,
            federates: Vec::new(),
            names: HashMap::new(),
            publications: Vec::new(),
            publication_keys: HashMap::new(),
            inputs: Vec::new(),
            endpoints: Vec::new(),
            endpoint_names: HashMap::new(),
            filters: Vec::new(),
            in_flight: Vec::new(),
            initializing: Barrier::default(),
            executing: Barrier::default(),
            aborted: None,
            next_message_id: 0,
            next_seq: 0,
            stats: BrokerStats::default(),
        };
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> BrokerConfig {
        self.lock().config.clone()
    }

    pub fn stats(&self) -> BrokerStats {
        self.lock().stats
    }

    /// Reason the federation was aborted, if it was.
    pub fn abort_reason(&self) -> Option<String> {
        self.lock().aborted.clone()
    }

    /// Dropped/admitted counters per filter.
    pub fn filter_counters(&self) -> Vec<(FilterId, u64, u64)> {
        self.lock()
            .filters
            .iter()
            .map(|f| (f.id, f.admitted, f.dropped))
            .collect()
    }

    // =========================================================================
    // Calls from SimFederate
    // =========================================================================

    pub(crate) fn state_of(&self, id: FederateId) -> LifecycleState {
        self.lock().slot(id).lifecycle.state()
    }

    pub(crate) fn granted_of(&self, id: FederateId) -> SimTime {
        self.lock().slot(id).granted
    }

    pub(crate) fn register_publication(
        &self,
        id: FederateId,
        key: &str,
        kind: ValueKind,
    ) -> Result<PublicationId, FederationError> {
        self.lock().register_publication(id, key, kind)
    }

    pub(crate) fn register_subscription(
        &self,
        id: FederateId,
        target: &str,
    ) -> Result<InputId, FederationError> {
        self.lock().register_subscription(id, target)
    }

    pub(crate) fn register_endpoint(&self, id: FederateId, name: String) -> Result<EndpointId, FederationError> {
        self.lock().register_endpoint(id, name)
    }

    pub(crate) fn register_filter(
        &self,
        id: FederateId,
        target: FilterTarget,
        spec: FilterSpec,
    ) -> Result<FilterId, FederationError> {
        self.lock().register_filter(id, target, spec)
    }

    pub(crate) fn set_filter(
        &self,
        id: FederateId,
        filter: FilterId,
        spec: FilterSpec,
    ) -> Result<(), FederationError> {
        self.lock().set_filter(id, filter, spec)
    }

    pub(crate) fn enter_initializing(
        &self,
        id: FederateId,
    ) -> Result<oneshot::Receiver<Result<(), FederationError>>, FederationError> {
        self.lock().enter_initializing(id)
    }

    pub(crate) fn enter_executing(
        &self,
        id: FederateId,
    ) -> Result<oneshot::Receiver<Result<(), FederationError>>, FederationError> {
        self.lock().enter_executing(id)
    }

    pub(crate) fn request_time(
        &self,
        id: FederateId,
        time: SimTime,
        iterate: Option<IterationRequest>,
    ) -> Result<oneshot::Receiver<Result<TimeStep, FederationError>>, FederationError> {
        self.lock().request_time(id, time, iterate)
    }

    pub(crate) fn publish(
        &self,
        id: FederateId,
        publication: PublicationId,
        value: Value,
    ) -> Result<(), FederationError> {
        self.lock().publish(id, publication, value)
    }

    pub(crate) fn read(&self, id: FederateId, input: InputId) -> Result<Reading, FederationError> {
        self.lock().read(id, input)
    }

    pub(crate) fn send_message(
        &self,
        id: FederateId,
        endpoint: EndpointId,
        destination: &str,
        payload: Vec<u8>,
        time: SimTime,
    ) -> Result<(), FederationError> {
        self.lock().send_message(id, endpoint, destination, payload, time)
    }

    pub(crate) fn has_message(&self, id: FederateId, endpoint: EndpointId) -> Result<bool, FederationError> {
        let mut state = self.lock();
        Ok(!state.endpoint_mut(id, endpoint, "has_message")?.queue.is_empty())
    }

    pub(crate) fn get_message(
        &self,
        id: FederateId,
        endpoint: EndpointId,
    ) -> Result<Option<Message>, FederationError> {
        let mut state = self.lock();
        Ok(state.endpoint_mut(id, endpoint, "get_message")?.queue.pop_front())
    }

    pub(crate) fn finalize(&self, id: FederateId) -> Result<(), FederationError> {
        self.lock().finalize(id)
    }

    /// Called when a federate handle is dropped.
    pub(crate) fn disconnect(&self, id: FederateId) {
        let mut state = self.lock();
        let slot = state.slot(id);
        if !slot.lifecycle.is_finalized() {
            let reason = format!("{} disconnected before finalizing", slot.info.name);
            state.abort(reason);
        }
    }
}

impl Federation for SimBroker {
    type Federate = SimFederate;

    fn create_federate(&self, info: FederateInfo) -> Result<SimFederate, FederationError> {
        let id = self.lock().add_federate(info.clone())?;
        Ok(SimFederate::new(id, info.name, self.clone()))
    }
}

impl BrokerState {
    // The id space is dense and only ever issued by `add_federate`
    fn slot(&self, id: FederateId) -> &FederateSlot {
        &self.federates[id.index()]
    }

    fn slot_mut(&mut self, id: FederateId) -> &mut FederateSlot {
        &mut self.federates[id.index()]
    }

    fn check_aborted(&self) -> Result<(), FederationError> {
        match &self.aborted {
            Some(reason) => Err(FederationError::aborted(reason.clone())),
            None => Ok(()),
        }
    }

    fn add_federate(&mut self, info: FederateInfo) -> Result<FederateId, FederationError> {
        self.check_aborted()
            .map_err(|e| FederationError::connection(e.to_string()))?;
        if info.name.is_empty() {
            return Err(FederationError::connection("federate name must not be empty"));
        }
        if self.initializing.arrived > 0 || self.executing.opened {
            return Err(FederationError::connection("federation is already initializing"));
        }
        if self.federates.len() >= self.config.expected_federates {
            return Err(FederationError::connection(format!(
                "federation is full ({} federates)",
                self.config.expected_federates
            )));
        }
        if self.names.contains_key(&info.name) {
            return Err(FederationError::connection(format!(
                "federate name {} already in use",
                info.name
            )));
        }

        let id = FederateId(self.federates.len() as u32);
        debug!(federate = %info.name, id = %id, "Federate joined");
        self.names.insert(info.name.clone(), id);
        self.federates.push(FederateSlot {
            info,
            lifecycle: ParticipantLifecycle::new(),
            granted: SimTime::ZERO,
            iterations: 0,
            pending: None,
        });
        Ok(id)
    }

    // =========================================================================
    // Registration
    // =========================================================================

    fn register_publication(
        &mut self,
        id: FederateId,
        key: &str,
        kind: ValueKind,
    ) -> Result<PublicationId, FederationError> {
        self.slot(id).lifecycle.ensure_configurable("register_publication")?;
        if self.publication_keys.contains_key(key) {
            return Err(FederationError::invalid_argument(format!(
                "publication key {key} already registered"
            )));
        }
        let pub_id = PublicationId(self.publications.len() as u32);
        self.publications.push(PublicationSlot {
            key: key.to_string(),
            owner: id,
            kind,
        });
        self.publication_keys.insert(key.to_string(), pub_id);
        Ok(pub_id)
    }

    fn register_subscription(&mut self, id: FederateId, target: &str) -> Result<InputId, FederationError> {
        self.slot(id).lifecycle.ensure_configurable("register_subscription")?;
        if target.is_empty() {
            return Err(FederationError::invalid_argument("subscription target must not be empty"));
        }
        let input = InputId(self.inputs.len() as u32);
        self.inputs.push(InputSlot {
            owner: id,
            target: target.to_string(),
            inbox: Vec::new(),
            visible: None,
            updated: false,
        });
        Ok(input)
    }

    fn register_endpoint(&mut self, id: FederateId, name: String) -> Result<EndpointId, FederationError> {
        self.slot(id).lifecycle.ensure_configurable("register_endpoint")?;
        if self.endpoint_names.contains_key(&name) {
            return Err(FederationError::invalid_argument(format!(
                "endpoint {name} already registered"
            )));
        }
        let endpoint = EndpointId(self.endpoints.len() as u32);
        self.endpoint_names.insert(name.clone(), endpoint);
        self.endpoints.push(EndpointSlot {
            owner: id,
            name,
            queue: VecDeque::new(),
        });
        Ok(endpoint)
    }

    fn register_filter(
        &mut self,
        id: FederateId,
        target: FilterTarget,
        spec: FilterSpec,
    ) -> Result<FilterId, FederationError> {
        self.slot(id).lifecycle.ensure_configurable("register_filter")?;
        spec.validate()?;
        let filter = FilterId(self.filters.len() as u32);
        debug!(filter = %filter, target = %target, kind = spec.type_name(), "Filter registered");
        self.filters
            .push(SimFilter::new(filter, id, target, spec, self.config.seed));
        Ok(filter)
    }

    fn set_filter(&mut self, id: FederateId, filter: FilterId, spec: FilterSpec) -> Result<(), FederationError> {
        self.slot(id).lifecycle.ensure_active("set_filter")?;
        spec.validate()?;
        let slot = self
            .filters
            .get_mut(filter.index())
            .filter(|f| f.owner == id)
            .ok_or_else(|| FederationError::invalid_argument(format!("{filter} is not owned by caller")))?;
        slot.reconfigure(spec);
        Ok(())
    }

    // =========================================================================
    // Lifecycle barriers
    // =========================================================================

    fn enter_initializing(
        &mut self,
        id: FederateId,
    ) -> Result<oneshot::Receiver<Result<(), FederationError>>, FederationError> {
        self.check_aborted()?;
        self.slot_mut(id).lifecycle.enter_initializing()?;

        let (tx, rx) = oneshot::channel();
        self.initializing.waiting.push(tx);
        self.initializing.arrived += 1;
        if self.initializing.arrived >= self.config.expected_federates {
            info!(federates = self.federates.len(), "Federation entered initializing mode");
            self.initializing.opened = true;
            for waiter in self.initializing.waiting.drain(..) {
                let _ = waiter.send(Ok(()));
            }
        }
        Ok(rx)
    }

    fn enter_executing(
        &mut self,
        id: FederateId,
    ) -> Result<oneshot::Receiver<Result<(), FederationError>>, FederationError> {
        self.check_aborted()?;
        self.slot_mut(id).lifecycle.enter_executing()?;

        let (tx, rx) = oneshot::channel();
        self.executing.waiting.push(tx);
        self.executing.arrived += 1;
        if self.executing.arrived >= self.config.expected_federates {
            self.open_executing();
        }
        Ok(rx)
    }

    fn open_executing(&mut self) {
        for input in &self.inputs {
            if !self.publication_keys.contains_key(&input.target) {
                warn!(
                    federate = %self.slot(input.owner).info.name,
                    target = %input.target,
                    "Subscription target was never registered"
                );
            }
        }
        for filter in &self.filters {
            if !self.endpoint_names.contains_key(filter.target.endpoint()) {
                warn!(filter = %filter.id, target = %filter.target, "Filter target endpoint was never registered");
            }
        }

        for index in 0..self.federates.len() {
            self.deliver(FederateId(index as u32), SimTime::ZERO);
        }

        info!(federates = self.federates.len(), "Federation entered executing mode");
        self.executing.opened = true;
        for waiter in self.executing.waiting.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    fn finalize(&mut self, id: FederateId) -> Result<(), FederationError> {
        let slot = self.slot_mut(id);
        slot.lifecycle.finalize()?;
        info!(federate = %slot.info.name, time = %slot.granted, "Federate finalized");
        self.try_advance();
        Ok(())
    }

    /// Fails the federation and releases every parked call.
    fn abort(&mut self, reason: String) {
        if self.aborted.is_some() {
            return;
        }
        warn!(reason = %reason, "Federation aborted");
        self.aborted = Some(reason.clone());

        for barrier in [&mut self.initializing, &mut self.executing] {
            for waiter in barrier.waiting.drain(..) {
                let _ = waiter.send(Err(FederationError::aborted(reason.clone())));
            }
        }
        for slot in &mut self.federates {
            if let Some(request) = slot.pending.take() {
                let reply = match request.iterate {
                    Some(_) => Ok(TimeStep {
                        requested: request.requested,
                        granted: slot.granted,
                        outcome: IterationOutcome::Error,
                    }),
                    None => Err(FederationError::aborted(reason.clone())),
                };
                let _ = request.reply.send(reply);
            }
        }
    }

    // =========================================================================
    // Time granting
    // =========================================================================

    fn request_time(
        &mut self,
        id: FederateId,
        time: SimTime,
        iterate: Option<IterationRequest>,
    ) -> Result<oneshot::Receiver<Result<TimeStep, FederationError>>, FederationError> {
        self.check_aborted()?;
        let slot = self.slot_mut(id);
        slot.lifecycle.ensure_executing("request_time")?;

        let (tx, rx) = oneshot::channel();
        slot.pending = Some(PendingRequest {
            requested: time,
            iterate,
            reply: tx,
        });
        self.try_advance();
        Ok(rx)
    }

    /// Grants time if every executing federate is blocked.
    fn try_advance(&mut self) {
        if self.aborted.is_some() || !self.executing.opened {
            return;
        }

        let active: Vec<FederateId> = (0..self.federates.len())
            .map(|i| FederateId(i as u32))
            .filter(|&id| self.slot(id).lifecycle.state() == LifecycleState::Executing)
            .collect();
        if active.is_empty() || active.iter().any(|&id| self.slot(id).pending.is_none()) {
            return;
        }

        let candidates: Vec<(FederateId, SimTime, bool)> = active
            .iter()
            .map(|&id| {
                let (time, iterating) = self.candidate(id);
                (id, time, iterating)
            })
            .collect();
        let Some(grant_time) = candidates.iter().map(|&(_, time, _)| time).min() else {
            return;
        };

        for (id, time, iterating) in candidates {
            if time == grant_time {
                self.grant(id, grant_time, iterating);
            }
        }
    }

    /// Earliest time federate `id` could be granted, and whether it iterates.
    fn candidate(&self, id: FederateId) -> (SimTime, bool) {
        let slot = self.slot(id);
        let Some(request) = &slot.pending else {
            return (SimTime::MAX, false);
        };
        let g = slot.granted;
        let cap_left = slot.iterations < slot.info.max_iterations;

        let iterating = match request.iterate {
            Some(IterationRequest::ForceIteration) => cap_left,
            Some(IterationRequest::IterateIfNeeded) => cap_left && self.has_pending_at_or_before(id, g),
            Some(IterationRequest::NoIteration) | None => false,
        };
        if iterating {
            return (g, true);
        }

        let info = &slot.info;
        let mut target = request
            .requested
            .max(g + info.time_delta)
            .snap_up(info.period, info.offset);
        if !info.uninterruptible {
            if let Some(event) = self.earliest_pending_after(id, g) {
                target = target.min(event.snap_up(info.period, info.offset));
            }
        }
        (target.min(self.config.stop_time), false)
    }

    fn grant(&mut self, id: FederateId, time: SimTime, iterating: bool) {
        let stop_time = self.config.stop_time;
        let slot = self.slot_mut(id);
        let Some(request) = slot.pending.take() else {
            return;
        };

        let outcome = if iterating {
            slot.iterations += 1;
            IterationOutcome::Iterating
        } else {
            if time > slot.granted {
                slot.iterations = 0;
            }
            slot.granted = time;
            if time >= stop_time || time.is_max() {
                IterationOutcome::Halted
            } else {
                IterationOutcome::NextStep
            }
        };
        debug!(
            federate = %slot.info.name,
            granted = %slot.granted,
            outcome = %outcome,
            iteration = slot.iterations,
            "Time granted"
        );

        let step = TimeStep {
            requested: request.requested,
            granted: slot.granted,
            outcome,
        };
        let granted = slot.granted;

        self.stats.grants += 1;
        if iterating {
            self.stats.iteration_grants += 1;
        }
        self.deliver(id, granted);
        let _ = request.reply.send(Ok(step));
    }

    fn has_pending_at_or_before(&self, id: FederateId, time: SimTime) -> bool {
        self.inputs
            .iter()
            .filter(|input| input.owner == id)
            .any(|input| input.inbox.iter().any(|s| s.time <= time))
            || self
                .in_flight
                .iter()
                .any(|m| m.time <= time && self.endpoint_owner(&m.destination) == Some(id))
    }

    fn earliest_pending_after(&self, id: FederateId, time: SimTime) -> Option<SimTime> {
        let values = self
            .inputs
            .iter()
            .filter(|input| input.owner == id)
            .flat_map(|input| input.inbox.iter().map(|s| s.time));
        let messages = self
            .in_flight
            .iter()
            .filter(|m| self.endpoint_owner(&m.destination) == Some(id))
            .map(|m| m.time);
        values.chain(messages).filter(|&t| t > time).min()
    }

    /// Makes everything stamped at or before `time` visible to `id`.
    fn deliver(&mut self, id: FederateId, time: SimTime) {
        for input in self.inputs.iter_mut().filter(|input| input.owner == id) {
            let mut latest: Option<(SimTime, u64, Value)> = None;
            let mut keep = Vec::new();
            for stamped in input.inbox.drain(..) {
                if stamped.time <= time {
                    let newer = latest
                        .as_ref()
                        .map(|(t, seq, _)| (stamped.time, stamped.seq) > (*t, *seq))
                        .unwrap_or(true);
                    if newer {
                        latest = Some((stamped.time, stamped.seq, stamped.value));
                    }
                } else {
                    keep.push(stamped);
                }
            }
            input.inbox = keep;
            if let Some((_, _, value)) = latest {
                input.visible = Some(value);
                input.updated = true;
            }
        }

        let mut arrived = Vec::new();
        let mut remaining = Vec::new();
        for message in self.in_flight.drain(..) {
            let owner = self
                .endpoint_names
                .get(&message.destination)
                .map(|e| self.endpoints[e.index()].owner);
            if message.time <= time && owner == Some(id) {
                arrived.push(message);
            } else {
                remaining.push(message);
            }
        }
        self.in_flight = remaining;

        arrived.sort_by_key(|m| (m.time, m.id));
        self.stats.messages_delivered += arrived.len() as u64;
        for message in arrived {
            if let Some(endpoint) = self.endpoint_names.get(&message.destination) {
                self.endpoints[endpoint.index()].queue.push_back(message);
            }
        }
    }

    fn endpoint_owner(&self, name: &str) -> Option<FederateId> {
        self.endpoint_names
            .get(name)
            .map(|e| self.endpoints[e.index()].owner)
    }

    // =========================================================================
    // Values
    // =========================================================================

    fn publish(&mut self, id: FederateId, publication: PublicationId, value: Value) -> Result<(), FederationError> {
        let slot = self.slot(id);
        slot.lifecycle.ensure_active("publish")?;
        if slot.lifecycle.state() == LifecycleState::Created {
            return Err(FederationError::InvalidState {
                state: LifecycleState::Created,
                operation: "publish",
            });
        }
        let stamp = slot.granted;

        let publication = self
            .publications
            .get(publication.index())
            .filter(|p| p.owner == id)
            .ok_or_else(|| FederationError::invalid_argument(format!("{publication} is not owned by caller")))?;
        if !publication.kind.accepts(value.kind()) {
            return Err(FederationError::invalid_argument(format!(
                "publication {} expects {}, got {}",
                publication.key,
                publication.kind,
                value.kind()
            )));
        }

        let key = publication.key.clone();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.stats.values_published += 1;
        for input in self.inputs.iter_mut().filter(|input| input.target == key) {
            input.inbox.push(Stamped {
                time: stamp,
                seq,
                value: value.clone(),
            });
        }
        Ok(())
    }

    fn read(&mut self, id: FederateId, input: InputId) -> Result<Reading, FederationError> {
        self.slot(id).lifecycle.ensure_active("read")?;
        let slot = self
            .inputs
            .get_mut(input.index())
            .filter(|i| i.owner == id)
            .ok_or_else(|| FederationError::invalid_argument(format!("{input} is not owned by caller")))?;
        let reading = Reading {
            value: slot.visible.clone(),
            updated: slot.updated,
        };
        slot.updated = false;
        Ok(reading)
    }

    // =========================================================================
    // Messages
    // =========================================================================

    fn endpoint_mut(
        &mut self,
        id: FederateId,
        endpoint: EndpointId,
        operation: &'static str,
    ) -> Result<&mut EndpointSlot, FederationError> {
        self.federates[id.index()].lifecycle.ensure_active(operation)?;
        self.endpoints
            .get_mut(endpoint.index())
            .filter(|e| e.owner == id)
            .ok_or_else(|| FederationError::invalid_argument(format!("{endpoint} is not owned by caller")))
    }

    fn send_message(
        &mut self,
        id: FederateId,
        endpoint: EndpointId,
        destination: &str,
        payload: Vec<u8>,
        time: SimTime,
    ) -> Result<(), FederationError> {
        self.slot(id).lifecycle.ensure_executing("send_message")?;
        let source = self.endpoint_mut(id, endpoint, "send_message")?.name.clone();
        if !self.endpoint_names.contains_key(destination) {
            return Err(FederationError::invalid_argument(format!(
                "unknown destination endpoint {destination}"
            )));
        }

        let send_time = time.max(self.slot(id).granted);
        let message_id = self.next_message_id;
        self.next_message_id += 1;
        let message = Message {
            id: message_id,
            source: source.clone(),
            destination: destination.to_string(),
            original_source: source,
            original_destination: destination.to_string(),
            send_time,
            time: send_time,
            payload,
        };
        self.admit(message);
        Ok(())
    }

    /// Runs source filters, then destination filters, then queues the message.
    fn admit(&mut self, mut message: Message) {
        self.stats.messages_admitted += 1;

        let source = message.source.clone();
        for filter in self
            .filters
            .iter_mut()
            .filter(|f| matches!(&f.target, FilterTarget::Source(name) if *name == source))
        {
            if filter.apply(&mut message) == FilterVerdict::Drop {
                self.stats.messages_dropped += 1;
                debug!(message = message.id, filter = %filter.id, "Message dropped");
                return;
            }
        }

        let destination = message.destination.clone();
        for filter in self
            .filters
            .iter_mut()
            .filter(|f| matches!(&f.target, FilterTarget::Destination(name) if *name == destination))
        {
            if filter.apply(&mut message) == FilterVerdict::Drop {
                self.stats.messages_dropped += 1;
                debug!(message = message.id, filter = %filter.id, "Message dropped");
                return;
            }
        }

        if !self.endpoint_names.contains_key(&message.destination) {
            warn!(
                message = message.id,
                destination = %message.destination,
                "Rerouted to an unknown endpoint; dropping"
            );
            self.stats.messages_dropped += 1;
            return;
        }
        self.in_flight.push(message);
    }
}
