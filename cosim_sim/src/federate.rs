//! Participant handle backed by a [`SimBroker`].

use async_trait::async_trait;
use cosim_env::{
    EndpointId, Federate, FederateId, FederationError, FilterId, FilterSpec, FilterTarget, InputId,
    IterationRequest, LifecycleState, Message, PublicationId, Reading, SimTime, TimeStep, Value,
    ValueKind,
};
use tokio::sync::oneshot;

use crate::broker::SimBroker;

/// A federate in an in-process federation.
///
/// Dropping it before `finalize` aborts the whole federation.
pub struct SimFederate {
    id: FederateId,
    name: String,
    broker: SimBroker,
}

impl SimFederate {
    pub(crate) fn new(id: FederateId, name: String, broker: SimBroker) -> Self {
        Self { id, name, broker }
    }

    pub fn id(&self) -> FederateId {
        self.id
    }
}

/// Waits for the broker's reply. A dropped sender means the federation went away.
async fn wait<T>(rx: oneshot::Receiver<Result<T, FederationError>>) -> Result<T, FederationError> {
    rx.await
        .unwrap_or_else(|_| Err(FederationError::aborted("broker dropped the request")))
}

#[async_trait]
impl Federate for SimFederate {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> LifecycleState {
        self.broker.state_of(self.id)
    }

    fn granted_time(&self) -> SimTime {
        self.broker.granted_of(self.id)
    }

    fn register_publication(&mut self, key: &str, kind: ValueKind) -> Result<PublicationId, FederationError> {
        self.broker.register_publication(self.id, key, kind)
    }

    fn register_subscription(&mut self, target: &str) -> Result<InputId, FederationError> {
        self.broker.register_subscription(self.id, target)
    }

    fn register_endpoint(&mut self, local: &str) -> Result<EndpointId, FederationError> {
        self.broker
            .register_endpoint(self.id, format!("{}/{}", self.name, local))
    }

    fn register_global_endpoint(&mut self, name: &str) -> Result<EndpointId, FederationError> {
        if name.is_empty() {
            return Err(FederationError::invalid_argument("endpoint name must not be empty"));
        }
        self.broker.register_endpoint(self.id, name.to_string())
    }

    fn register_filter(&mut self, target: FilterTarget, spec: FilterSpec) -> Result<FilterId, FederationError> {
        self.broker.register_filter(self.id, target, spec)
    }

    fn set_filter(&mut self, filter: FilterId, spec: FilterSpec) -> Result<(), FederationError> {
        self.broker.set_filter(self.id, filter, spec)
    }

    async fn enter_initializing(&mut self) -> Result<(), FederationError> {
        let rx = self.broker.enter_initializing(self.id)?;
        wait(rx).await
    }

    async fn enter_executing(&mut self) -> Result<SimTime, FederationError> {
        let rx = self.broker.enter_executing(self.id)?;
        wait(rx).await?;
        Ok(self.broker.granted_of(self.id))
    }

    async fn request_time(&mut self, time: SimTime) -> Result<SimTime, FederationError> {
        let rx = self.broker.request_time(self.id, time, None)?;
        Ok(wait(rx).await?.granted)
    }

    async fn request_time_iterative(
        &mut self,
        time: SimTime,
        iterate: IterationRequest,
    ) -> Result<TimeStep, FederationError> {
        let rx = self.broker.request_time(self.id, time, Some(iterate))?;
        wait(rx).await
    }

    fn publish(&mut self, publication: PublicationId, value: Value) -> Result<(), FederationError> {
        self.broker.publish(self.id, publication, value)
    }

    fn read(&mut self, input: InputId) -> Result<Reading, FederationError> {
        self.broker.read(self.id, input)
    }

    fn send_message(
        &mut self,
        endpoint: EndpointId,
        destination: &str,
        payload: Vec<u8>,
        time: SimTime,
    ) -> Result<(), FederationError> {
        self.broker
            .send_message(self.id, endpoint, destination, payload, time)
    }

    fn has_message(&self, endpoint: EndpointId) -> Result<bool, FederationError> {
        self.broker.has_message(self.id, endpoint)
    }

    fn get_message(&mut self, endpoint: EndpointId) -> Result<Option<Message>, FederationError> {
        self.broker.get_message(self.id, endpoint)
    }

    async fn finalize(&mut self) -> Result<(), FederationError> {
        self.broker.finalize(self.id)
    }
}

impl Drop for SimFederate {
    fn drop(&mut self) {
        self.broker.disconnect(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerConfig;
    use cosim_env::{FederateInfo, Federation};

    struct Pair {
        a: SimFederate,
        b: SimFederate,
        ea: EndpointId,
        eb: EndpointId,
        filter: Option<FilterId>,
    }

    async fn executing_pair(filter: Option<FilterSpec>) -> Pair {
        let broker = SimBroker::new(BrokerConfig::default());
        let mut a = broker.create_federate(FederateInfo::new("a")).unwrap();
        let mut b = broker.create_federate(FederateInfo::new("b")).unwrap();
        let ea = a.register_endpoint("ept").unwrap();
        let eb = b.register_endpoint("ept").unwrap();
        let filter = filter.map(|spec| {
            a.register_filter(FilterTarget::Source("a/ept".into()), spec)
                .unwrap()
        });

        let (ra, rb) = tokio::join!(a.enter_initializing(), b.enter_initializing());
        ra.unwrap();
        rb.unwrap();
        let (ra, rb) = tokio::join!(a.enter_executing(), b.enter_executing());
        ra.unwrap();
        rb.unwrap();
        Pair { a, b, ea, eb, filter }
    }

    #[tokio::test]
    async fn test_unknown_destination_and_delivery_on_next_grant() {
        let Pair { mut a, mut b, ea, eb, .. } = executing_pair(None).await;

        let err = a.send_message(ea, "nobody/ept", b"x".to_vec(), SimTime::ZERO);
        assert!(matches!(err, Err(FederationError::InvalidArgument(_))));
        a.send_message(ea, "b/ept", b"hello".to_vec(), SimTime::ZERO).unwrap();
        assert!(!b.has_message(eb).unwrap());

        let one = SimTime::from_secs_f64(1.0);
        let (ta, tb) = tokio::join!(a.request_time(one), b.request_time(one));
        assert_eq!(ta.unwrap(), one);
        assert_eq!(tb.unwrap(), one);
        assert!(b.has_message(eb).unwrap());

        a.finalize().await.unwrap();
        b.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn test_message_wakes_receiver_early() {
        let Pair { mut a, mut b, ea, eb, .. } = executing_pair(None).await;

        let half = SimTime::from_secs_f64(0.5);
        let ten = SimTime::from_secs_f64(10.0);
        a.send_message(ea, "b/ept", b"hello".to_vec(), half).unwrap();

        let task = tokio::spawn(async move {
            let granted = a.request_time(ten).await;
            (a, granted)
        });

        // b asks for 10s but is interrupted by the message at 0.5s
        assert_eq!(b.request_time(ten).await.unwrap(), half);
        let message = b.get_message(eb).unwrap().unwrap();
        assert_eq!(message.payload_str(), "hello");
        assert_eq!(message.source, "a/ept");
        assert_eq!(message.send_time, half);

        assert_eq!(b.request_time(ten).await.unwrap(), ten);
        let (mut a, granted) = task.await.unwrap();
        assert_eq!(granted.unwrap(), ten);

        a.finalize().await.unwrap();
        b.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn test_filter_reconfiguration_leaves_in_flight_alone() {
        let half = SimTime::from_secs_f64(0.5);
        let two = SimTime::from_secs_f64(2.0);
        let ten = SimTime::from_secs_f64(10.0);
        let Pair { mut a, mut b, ea, eb, filter } =
            executing_pair(Some(FilterSpec::Delay { delay: half })).await;
        let filter = filter.unwrap();

        a.send_message(ea, "b/ept", b"first".to_vec(), SimTime::ZERO).unwrap();
        a.set_filter(filter, FilterSpec::Delay { delay: two }).unwrap();
        a.send_message(ea, "b/ept", b"second".to_vec(), SimTime::ZERO).unwrap();

        let task = tokio::spawn(async move {
            let granted = a.request_time(ten).await;
            (a, granted)
        });

        assert_eq!(b.request_time(ten).await.unwrap(), half);
        let first = b.get_message(eb).unwrap().unwrap();
        assert_eq!(first.payload_str(), "first");
        assert_eq!(first.time, half);

        assert_eq!(b.request_time(ten).await.unwrap(), two);
        let second = b.get_message(eb).unwrap().unwrap();
        assert_eq!(second.payload_str(), "second");
        assert_eq!(second.send_time, SimTime::ZERO);
        assert_eq!(second.delay(), two);

        assert_eq!(b.request_time(ten).await.unwrap(), ten);
        let (mut a, granted) = task.await.unwrap();
        assert_eq!(granted.unwrap(), ten);

        a.finalize().await.unwrap();
        b.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn test_foreign_filter_and_late_registration_rejected() {
        let Pair { mut a, mut b, filter, .. } =
            executing_pair(Some(FilterSpec::RandomDrop { probability: 0.5 })).await;
        let filter = filter.unwrap();

        let err = b
            .set_filter(filter, FilterSpec::RandomDrop { probability: 0.1 })
            .unwrap_err();
        assert!(matches!(err, FederationError::InvalidArgument(_)));
        let err = a
            .set_filter(filter, FilterSpec::RandomDrop { probability: 1.5 })
            .unwrap_err();
        assert!(matches!(err, FederationError::InvalidArgument(_)));

        let err = a.register_publication("late", ValueKind::Double).unwrap_err();
        assert!(matches!(err, FederationError::InvalidState { .. }));

        a.finalize().await.unwrap();
        b.finalize().await.unwrap();
    }
}
