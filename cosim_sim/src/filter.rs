//! Message filters applied at admission time.

use cosim_env::{DelayDistribution, FederateId, FilterId, FilterSpec, FilterTarget, Message, SimTime};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp, Normal};

/// What a filter did to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    Pass,
    Drop,
}

/// A filter living inside the broker.
///
/// Each filter owns a ChaCha8 stream seeded from the broker seed and its
/// id, so random filters replay identically for the same seed.
pub struct SimFilter {
    pub id: FilterId,
    pub owner: FederateId,
    pub target: FilterTarget,
    spec: FilterSpec,
    rng: ChaCha8Rng,

    /// Messages seen by this filter.
    pub admitted: u64,

    /// Messages this filter dropped.
    pub dropped: u64,
}

impl SimFilter {
    pub fn new(id: FilterId, owner: FederateId, target: FilterTarget, spec: FilterSpec, seed: u64) -> Self {
        Self {
            id,
            owner,
            target,
            spec,
            rng: ChaCha8Rng::seed_from_u64(seed ^ u64::from(id.0)),
            admitted: 0,
            dropped: 0,
        }
    }

    pub fn spec(&self) -> &FilterSpec {
        &self.spec
    }

    /// Replaces the behavior for messages admitted from now on.
    pub fn reconfigure(&mut self, spec: FilterSpec) {
        self.spec = spec;
    }

    /// Applies the filter to a message being admitted.
    ///
    /// Delays are added to the delivery time, never to the send time.
    pub fn apply(&mut self, message: &mut Message) -> FilterVerdict {
        self.admitted += 1;
        match &self.spec {
            FilterSpec::Delay { delay } => {
                message.time = message.time + *delay;
            }
            FilterSpec::RandomDrop { probability } => {
                if self.rng.gen::<f64>() < *probability {
                    self.dropped += 1;
                    return FilterVerdict::Drop;
                }
            }
            FilterSpec::RandomDelay { distribution, max } => {
                let delay = sample_delay(&mut self.rng, *distribution, *max);
                message.time = message.time + delay;
            }
            FilterSpec::Reroute { destination } => {
                message.destination = destination.clone();
            }
        }
        FilterVerdict::Pass
    }
}

/// Draws a delay in `[0, max]`.
pub fn sample_delay<R: Rng>(rng: &mut R, distribution: DelayDistribution, max: SimTime) -> SimTime {
    let max_secs = max.as_secs_f64();
    if max_secs <= 0.0 {
        return SimTime::ZERO;
    }

    let secs = match distribution {
        DelayDistribution::Uniform => rng.gen_range(0.0..=max_secs),
        DelayDistribution::Exponential => Exp::new(2.0 / max_secs)
            .map(|d| d.sample(rng))
            .unwrap_or(0.0),
        DelayDistribution::Normal => Normal::new(max_secs / 2.0, max_secs / 6.0)
            .map(|d| d.sample(rng))
            .unwrap_or(0.0),
    };
    SimTime::from_secs_f64(secs.clamp(0.0, max_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(time: f64) -> Message {
        Message {
            id: 0,
            source: "a/ept".into(),
            destination: "b/ept".into(),
            original_source: "a/ept".into(),
            original_destination: "b/ept".into(),
            send_time: SimTime::from_secs_f64(time),
            time: SimTime::from_secs_f64(time),
            payload: Vec::new(),
        }
    }

    fn filter(spec: FilterSpec, seed: u64) -> SimFilter {
        SimFilter::new(
            FilterId(0),
            FederateId(0),
            FilterTarget::Source("a/ept".into()),
            spec,
            seed,
        )
    }

    #[test]
    fn test_delay_then_reconfigure() {
        let mut f = filter(FilterSpec::Delay { delay: SimTime::from_secs_f64(0.5) }, 42);

        let mut first = message(1.0);
        f.apply(&mut first);
        assert_eq!(first.time, SimTime::from_secs_f64(1.5));

        f.reconfigure(FilterSpec::Delay { delay: SimTime::from_secs_f64(1.5) });
        let mut second = message(2.0);
        f.apply(&mut second);

        // Already-admitted message keeps its delivery time
        assert_eq!(first.time, SimTime::from_secs_f64(1.5));
        assert_eq!(second.time, SimTime::from_secs_f64(3.5));
        assert_eq!(second.send_time, SimTime::from_secs_f64(2.0));
    }

    #[test]
    fn test_reroute_keeps_original_destination() {
        let mut f = filter(FilterSpec::Reroute { destination: "c/ept".into() }, 42);
        let mut msg = message(0.0);
        f.apply(&mut msg);

        assert_eq!(msg.destination, "c/ept");
        assert_eq!(msg.original_destination, "b/ept");
    }

    #[test]
    fn test_random_drop_extremes() {
        let mut never = filter(FilterSpec::RandomDrop { probability: 0.0 }, 7);
        let mut always = filter(FilterSpec::RandomDrop { probability: 1.0 }, 7);

        for _ in 0..100 {
            assert_eq!(never.apply(&mut message(0.0)), FilterVerdict::Pass);
            assert_eq!(always.apply(&mut message(0.0)), FilterVerdict::Drop);
        }
        assert_eq!(always.dropped, 100);
        assert_eq!(never.admitted, 100);
    }

    #[test]
    fn test_random_delay_is_seeded_and_bounded() {
        let spec = FilterSpec::RandomDelay {
            distribution: DelayDistribution::Normal,
            max: SimTime::from_secs_f64(2.0),
        };
        let mut a = filter(spec.clone(), 99);
        let mut b = filter(spec, 99);

        for i in 0..50 {
            let mut ma = message(i as f64);
            let mut mb = message(i as f64);
            a.apply(&mut ma);
            b.apply(&mut mb);

            assert_eq!(ma.time, mb.time);
            assert!(ma.delay() <= SimTime::from_secs_f64(2.0));
        }
    }

    #[test]
    fn test_sample_delay_distributions_stay_in_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let max = SimTime::from_secs_f64(1.0);
        for dist in [
            DelayDistribution::Uniform,
            DelayDistribution::Exponential,
            DelayDistribution::Normal,
        ] {
            for _ in 0..200 {
                let d = sample_delay(&mut rng, dist, max);
                assert!(d >= SimTime::ZERO && d <= max);
            }
        }
        assert_eq!(sample_delay(&mut rng, DelayDistribution::Uniform, SimTime::ZERO), SimTime::ZERO);
    }
}
