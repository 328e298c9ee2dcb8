use super::{message, BeaconSignature, Config, Error, NAMESPACE};
use crate::{
    store::{Observer, Store},
    wire::{Partial, BEACON_CHANNEL},
};
use beacon_codec::DecodeExt;
use beacon_cryptography::bls12381::primitives::{
    group::{self, Share},
    ops::{partial_sign_message, partial_verify_message, threshold_signature_recover},
    poly::{self, PartialSignature},
};
use beacon_p2p::{Receiver, Router};
use beacon_utils::{hex, now_millis, signal::Signal};
use futures::StreamExt;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use std::{collections::BTreeMap, mem, sync::Arc, time::Duration};
use tokio::{
    select,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};

#[derive(Default)]
struct Metrics {
    beacons: Counter,
    missed_rounds: Counter,
    invalid_partials: Counter,
    round: Gauge,
}

/// Partials collected for one round, grouped by the previous signature they are chained to.
struct Round {
    round: u64,
    signed: bool,
    done: bool,
    partials: Vec<(Option<group::Signature>, BTreeMap<u32, PartialSignature>)>,
}

impl Round {
    fn new(round: u64) -> Self {
        Self {
            round,
            signed: false,
            done: false,
            partials: Vec::new(),
        }
    }
}

/// Produce a [BeaconSignature] every period.
pub struct Engine {
    share: Share,
    public: poly::Public,
    threshold: u32,
    genesis: u64,
    period: u64,
    max_pending: usize,

    store: Arc<dyn Store>,
    observers: Vec<Arc<dyn Observer>>,

    metrics: Metrics,
}

impl Engine {
    pub fn new(config: Config, store: Arc<dyn Store>, observers: Vec<Arc<dyn Observer>>) -> Self {
        let metrics = Metrics::default();
        {
            let mut registry = config.registry.lock().unwrap();
            registry.register("beacons", "beacons produced", metrics.beacons.clone());
            registry.register(
                "missed_rounds",
                "rounds that ended without a beacon",
                metrics.missed_rounds.clone(),
            );
            registry.register(
                "invalid_partials",
                "partial signatures that failed verification",
                metrics.invalid_partials.clone(),
            );
            registry.register("round", "current round", metrics.round.clone());
        }

        Self {
            threshold: config.public.required(),
            share: config.share,
            public: config.public,
            genesis: config.genesis,
            period: config.period.as_millis().max(1) as u64,
            max_pending: config.max_pending,

            store,
            observers,

            metrics,
        }
    }

    /// Start of `round`, in milliseconds since the unix epoch.
    fn start_of(&self, round: u64) -> u64 {
        self.genesis
            .saturating_add(round.saturating_sub(1).saturating_mul(self.period))
    }

    /// The round in progress at `now` (0 before genesis).
    fn round_at(&self, now: u64) -> u64 {
        if now < self.genesis {
            return 0;
        }
        (now - self.genesis) / self.period + 1
    }

    /// Produce beacons until `signal` resolves or the store fails.
    ///
    /// The engine joins at the round in progress and never produces beacons for
    /// rounds that already ended.
    pub async fn run(
        self,
        router: Arc<Router>,
        mut receiver: Receiver,
        mut signal: Signal,
    ) -> Result<(), Error> {
        let mut round = self.round_at(now_millis()).max(1);
        let mut previous = match round {
            1 => None,
            _ => self
                .store
                .load_beacon(round - 1)?
                .map(|beacon| beacon.signature),
        };
        info!(round, genesis = self.genesis, "starting beacon");

        let mut next: Vec<(u32, Partial)> = Vec::new();
        loop {
            self.metrics.round.set(round as i64);
            let start = deadline(self.start_of(round));
            let end = deadline(self.start_of(round + 1));
            let mut state = Round::new(round);
            for (sender, partial) in mem::take(&mut next) {
                self.handle(&mut state, &mut previous, sender, partial)?;
            }

            loop {
                select! {
                    biased;

                    _ = &mut signal => {
                        info!(round, "beacon stopped");
                        return Ok(());
                    },
                    _ = sleep_until(start), if !state.signed => {
                        state.signed = true;
                        let chain = previous;
                        let partial = partial_sign_message(
                            &self.share,
                            Some(NAMESPACE),
                            &message(round, chain.as_ref()),
                        );
                        let outgoing = Partial {
                            round,
                            previous: chain,
                            partial,
                        }
                        .serialize();
                        let router = router.clone();
                        tokio::spawn(async move {
                            if let Err(err) = router.broadcast(BEACON_CHANNEL, outgoing).await {
                                debug!(round, ?err, "failed to broadcast partial");
                            }
                        });
                        debug!(round, chained = chain.is_some(), "signed round");
                        self.collect(&mut state, &mut previous, chain, partial)?;
                    },
                    _ = sleep_until(end) => {
                        break;
                    },
                    message = receiver.next() => {
                        let Some((sender, message)) = message else {
                            info!(round, "network closed");
                            return Ok(());
                        };
                        let partial = match Partial::decode(message) {
                            Ok(partial) => partial,
                            Err(err) => {
                                self.metrics.invalid_partials.inc();
                                warn!(sender, ?err, "received malformed partial");
                                continue;
                            }
                        };
                        if partial.round == round + 1 {
                            if next.len() < self.max_pending {
                                next.push((sender, partial));
                            } else {
                                debug!(sender, round = partial.round, "dropping early partial");
                            }
                            continue;
                        }
                        self.handle(&mut state, &mut previous, sender, partial)?;
                    },
                }
            }

            if !state.done {
                self.metrics.missed_rounds.inc();
                warn!(round, "missed round");
                previous = None;
            }

            // Skip any rounds that ended while this one was being processed
            let upcoming = self.round_at(now_millis()).max(round + 1);
            if upcoming > round + 1 {
                let skipped = upcoming - round - 1;
                self.metrics.missed_rounds.inc_by(skipped);
                warn!(from = round + 1, skipped, "fell behind");
                previous = None;
                next.clear();
            }
            round = upcoming;
        }
    }

    /// Verify a partial received for the current round and collect it.
    fn handle(
        &self,
        state: &mut Round,
        previous: &mut Option<group::Signature>,
        sender: u32,
        partial: Partial,
    ) -> Result<(), Error> {
        if partial.round != state.round {
            debug!(sender, round = partial.round, current = state.round, "ignoring partial");
            return Ok(());
        }
        if partial.partial.index != sender {
            self.metrics.invalid_partials.inc();
            warn!(sender, index = partial.partial.index, "partial signed by another node");
            return Ok(());
        }
        let expected = message(partial.round, partial.previous.as_ref());
        if let Err(err) =
            partial_verify_message(&self.public, Some(NAMESPACE), &expected, &partial.partial)
        {
            self.metrics.invalid_partials.inc();
            warn!(sender, round = partial.round, ?err, "invalid partial");
            return Ok(());
        }
        self.collect(state, previous, partial.previous, partial.partial)
    }

    /// Add a verified partial and, once `threshold` partials over the same message are
    /// held, recover, persist and publish the beacon.
    fn collect(
        &self,
        state: &mut Round,
        previous: &mut Option<group::Signature>,
        chain: Option<group::Signature>,
        partial: PartialSignature,
    ) -> Result<(), Error> {
        if state.done {
            return Ok(());
        }
        let position = match state.partials.iter().position(|(c, _)| *c == chain) {
            Some(position) => position,
            None => {
                state.partials.push((chain, BTreeMap::new()));
                state.partials.len() - 1
            }
        };
        let evals = &mut state.partials[position].1;
        if evals.contains_key(&partial.index) {
            return Ok(());
        }
        evals.insert(partial.index, partial);
        if (evals.len() as u32) < self.threshold {
            return Ok(());
        }

        let round = state.round;
        let signature = match threshold_signature_recover(self.threshold, evals.values()) {
            Ok(signature) => signature,
            Err(err) => {
                warn!(round, ?err, "failed to recover signature");
                return Ok(());
            }
        };
        let beacon = BeaconSignature {
            round,
            previous: chain,
            signature,
        };
        if !beacon.verify(&self.public) {
            warn!(round, "recovered signature is invalid");
            return Ok(());
        }
        state.done = true;

        if !self.store.save_beacon(&beacon)? {
            debug!(round, "beacon already stored");
        }
        self.metrics.beacons.inc();
        info!(
            round,
            chained = chain.is_some(),
            randomness = hex(&beacon.randomness()),
            "produced beacon"
        );
        for observer in &self.observers {
            observer.on_beacon(&beacon);
        }
        *previous = Some(signature);
        Ok(())
    }
}

/// Convert a wall-clock time in milliseconds into a tokio deadline.
fn deadline(at: u64) -> Instant {
    Instant::now() + Duration::from_millis(at.saturating_sub(now_millis()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        key::{Group, Pair},
        store::Memory,
    };
    use beacon_cryptography::bls12381::dkg::ops::generate_shares;
    use prometheus_client::registry::Registry;
    use rand::{rngs::StdRng, SeedableRng};
    use std::sync::Mutex;

    fn engine(genesis: u64, period: Duration) -> (Engine, Vec<Share>, Arc<Memory>) {
        let mut rng = StdRng::seed_from_u64(0);
        let (public, shares) = generate_shares(&mut rng, 4, 3);
        let identities = (0..4)
            .map(|i| Pair::new(&mut rng, format!("127.0.0.1:{}", 3000 + i)).public().clone())
            .collect();
        let store = Arc::new(Memory::new(Group::new(identities, 3).unwrap()));
        let engine = Engine::new(
            Config {
                share: shares[0].clone(),
                public,
                genesis,
                period,
                max_pending: 16,
                registry: Arc::new(Mutex::new(Registry::default())),
            },
            store.clone(),
            Vec::new(),
        );
        (engine, shares, store)
    }

    fn partial(shares: &[Share], signer: u32, round: u64, previous: Option<group::Signature>) -> Partial {
        Partial {
            round,
            previous,
            partial: partial_sign_message(
                &shares[signer as usize],
                Some(NAMESPACE),
                &message(round, previous.as_ref()),
            ),
        }
    }

    #[test]
    fn test_rounds() {
        let (engine, _, _) = engine(10_000, Duration::from_secs(2));
        assert_eq!(engine.round_at(0), 0);
        assert_eq!(engine.round_at(10_000), 1);
        assert_eq!(engine.round_at(11_999), 1);
        assert_eq!(engine.round_at(12_000), 2);
        assert_eq!(engine.start_of(1), 10_000);
        assert_eq!(engine.start_of(3), 14_000);
    }

    #[test]
    fn test_quorum() {
        let (engine, shares, store) = engine(0, Duration::from_secs(1));
        let mut state = Round::new(5);
        let mut previous = None;

        // Partials from the wrong round or over another index are ignored
        engine
            .handle(&mut state, &mut previous, 1, partial(&shares, 1, 4, None))
            .unwrap();
        engine
            .handle(&mut state, &mut previous, 2, partial(&shares, 1, 5, None))
            .unwrap();
        assert!(state.partials.is_empty());

        // Duplicates do not count towards the threshold
        engine
            .handle(&mut state, &mut previous, 1, partial(&shares, 1, 5, None))
            .unwrap();
        engine
            .handle(&mut state, &mut previous, 1, partial(&shares, 1, 5, None))
            .unwrap();
        engine
            .handle(&mut state, &mut previous, 2, partial(&shares, 2, 5, None))
            .unwrap();
        assert!(!state.done);
        assert!(store.load_beacon(5).unwrap().is_none());

        engine
            .handle(&mut state, &mut previous, 3, partial(&shares, 3, 5, None))
            .unwrap();
        assert!(state.done);
        let beacon = store.load_beacon(5).unwrap().unwrap();
        assert_eq!(previous, Some(beacon.signature));
        assert!(beacon.verify(&engine.public));
        assert_eq!(engine.metrics.beacons.get(), 1);
    }

    #[test]
    fn test_partials_grouped_by_previous() {
        let (engine, shares, store) = engine(0, Duration::from_secs(1));
        let chain = partial(&shares, 0, 1, None).partial.value;
        let mut state = Round::new(2);
        let mut previous = None;

        // Two partials over each message never combine
        engine
            .handle(&mut state, &mut previous, 1, partial(&shares, 1, 2, None))
            .unwrap();
        engine
            .handle(&mut state, &mut previous, 2, partial(&shares, 2, 2, None))
            .unwrap();
        engine
            .handle(&mut state, &mut previous, 3, partial(&shares, 3, 2, Some(chain)))
            .unwrap();
        engine
            .handle(&mut state, &mut previous, 0, partial(&shares, 0, 2, Some(chain)))
            .unwrap();
        assert!(!state.done);
        assert_eq!(state.partials.len(), 2);

        // A third partial over the chained message completes the round
        engine
            .handle(&mut state, &mut previous, 1, partial(&shares, 1, 2, Some(chain)))
            .unwrap();
        let beacon = store.load_beacon(2).unwrap().unwrap();
        assert_eq!(beacon.previous, Some(chain));
        assert!(beacon.verify(&engine.public));
    }

    #[test]
    fn test_invalid_partial() {
        let (engine, shares, store) = engine(0, Duration::from_secs(1));
        let mut state = Round::new(1);
        let mut previous = None;

        // Signed over another round's message
        let mut forged = partial(&shares, 1, 2, None);
        forged.round = 1;
        engine.handle(&mut state, &mut previous, 1, forged).unwrap();
        assert_eq!(engine.metrics.invalid_partials.get(), 1);
        assert!(state.partials.is_empty());
        assert!(store.load_beacon(1).unwrap().is_none());
    }
}
