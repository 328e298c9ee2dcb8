use super::{Config, Error, Output};
use crate::{
    key::{Group, Pair},
    wire::{Dkg, Payload, DKG_CHANNEL},
};
use beacon_codec::{Decode, Encode};
use beacon_cryptography::bls12381::{
    dkg::{dealer::Dealer, ops, player::Player},
    primitives::{
        group::{self, Share},
        poly,
    },
};
use beacon_p2p::{Receiver, Router};
use beacon_utils::{hex, now_millis, signal::Signal, DIGEST_LENGTH};
use bytes::Bytes;
use futures::{
    future::BoxFuture,
    stream::FuturesUnordered,
    FutureExt, StreamExt,
};
use prometheus_client::metrics::counter::Counter;
use rand::rngs::OsRng;
use std::{collections::BTreeSet, time::Duration};
use tokio::{
    select,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};

#[derive(Default)]
struct Metrics {
    runs: Counter,
    failures: Counter,
    complaints: Counter,
}

/// Drives this node through one DKG session.
pub struct Engine {
    identity: Pair,
    group: Group,
    me: u32,

    phase_timeout: Duration,
    start_timeout: Duration,
    genesis_delay: Duration,

    metrics: Metrics,
}

impl Engine {
    /// Create a new engine, returning `None` if the identity is not part of the group.
    pub fn new(config: Config) -> Option<Self> {
        let me = config.group.index_of(&config.identity.public().key)?;

        let metrics = Metrics::default();
        {
            let mut registry = config.registry.lock().unwrap();
            registry.register("dkg_runs", "DKG sessions started", metrics.runs.clone());
            registry.register(
                "dkg_failures",
                "DKG sessions that ended without output",
                metrics.failures.clone(),
            );
            registry.register(
                "dkg_complaints",
                "complaints issued against dealers",
                metrics.complaints.clone(),
            );
        }

        Some(Self {
            identity: config.identity,
            group: config.group,
            me,

            phase_timeout: config.phase_timeout,
            start_timeout: config.start_timeout,
            genesis_delay: config.genesis_delay,

            metrics,
        })
    }

    /// Run a session to completion.
    ///
    /// The leader starts the session. Everyone else waits for it to be started.
    pub async fn run(
        &self,
        router: &Router,
        receiver: &mut Receiver,
        leader: bool,
        signal: &mut Signal,
    ) -> Result<Output, Error> {
        self.metrics.runs.inc();
        let result = self.execute(router, receiver, leader, signal).await;
        match &result {
            Ok(output) => info!(
                genesis = output.genesis,
                qualified = ?output.qualified,
                public = hex(&poly::public(&output.public).encode()),
                "dkg finalized"
            ),
            Err(err) => {
                self.metrics.failures.inc();
                warn!(?err, "dkg aborted");
            }
        }
        result
    }

    /// Messages of any kind that may be held before a session starts.
    fn max_pending(&self) -> usize {
        let n = self.group.len() as usize;
        3 * n * n
    }

    fn decode(&self, sender: u32, message: Bytes) -> Option<Dkg> {
        match Dkg::decode_cfg(message, &self.group.threshold()) {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(sender, ?err, "received invalid message");
                None
            }
        }
    }

    async fn await_start(
        &self,
        receiver: &mut Receiver,
        signal: &mut Signal,
        pending: &mut Vec<(u32, Dkg)>,
    ) -> Result<u64, Error> {
        let deadline = Instant::now() + self.start_timeout;
        loop {
            select! {
                biased;

                _ = &mut *signal => {
                    return Err(Error::Shutdown);
                },
                _ = sleep_until(deadline) => {
                    return Err(Error::StartTimeout);
                },
                message = receiver.next() => {
                    let Some((sender, message)) = message else {
                        return Err(Error::Closed);
                    };
                    let Some(message) = self.decode(sender, message) else {
                        continue;
                    };
                    let genesis = message.genesis;
                    match message.payload {
                        Payload::Start => {
                            info!(sender, genesis, "received start");
                            return Ok(genesis);
                        }
                        Payload::Deal { .. } => {
                            info!(sender, genesis, "received deal before start");
                            pending.push((sender, message));
                            return Ok(genesis);
                        }
                        _ => {
                            if pending.len() >= self.max_pending() {
                                debug!(sender, "dropping message received before start");
                                continue;
                            }
                            pending.push((sender, message));
                        }
                    }
                },
            }
        }
    }

    async fn execute(
        &self,
        router: &Router,
        receiver: &mut Receiver,
        leader: bool,
        signal: &mut Signal,
    ) -> Result<Output, Error> {
        // Idle
        let mut pending = Vec::new();
        let genesis = if leader {
            let genesis = now_millis() + self.genesis_delay.as_millis() as u64;
            let start = Dkg::new(genesis, Payload::Start).serialize();
            let delivered = router.broadcast(DKG_CHANNEL, start).await?;
            info!(genesis, delivered = ?delivered, "started dkg");
            genesis
        } else {
            self.await_start(receiver, signal, &mut pending).await?
        };
        let mut deadline = Instant::now() + self.phase_timeout;

        // DealGeneration
        let mut session = Session::new(self, router, genesis)?;
        session.deal()?;

        // DealCollection and ResponseCollection
        for (sender, message) in pending {
            session.handle(sender, message);
        }
        loop {
            select! {
                biased;

                _ = &mut *signal => {
                    return Err(Error::Shutdown);
                },
                _ = sleep_until(deadline) => {
                    match session.phase {
                        Phase::DealCollection => {
                            session.complain_missing();
                            deadline += self.phase_timeout;
                        }
                        Phase::ResponseCollection => break,
                    }
                },
                Some((recipient, result)) = session.outbound.next(), if !session.outbound.is_empty() => {
                    if let Err(err) = result {
                        debug!(recipient, ?err, "failed to deliver message");
                    }
                },
                message = receiver.next() => {
                    let Some((sender, message)) = message else {
                        return Err(Error::Closed);
                    };
                    if let Some(message) = self.decode(sender, message) {
                        session.handle(sender, message);
                    }
                },
            }
        }

        // Certification
        session.finalize()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    DealCollection,
    ResponseCollection,
}

type Delivery<'a> = BoxFuture<'a, (u32, Result<(), beacon_p2p::Error>)>;

/// State of one DKG session.
struct Session<'a> {
    engine: &'a Engine,
    router: &'a Router,
    genesis: u64,
    phase: Phase,

    dealer: Dealer,
    player: Player,
    dealt: BTreeSet<u32>,

    outbound: FuturesUnordered<Delivery<'a>>,
}

impl<'a> Session<'a> {
    fn new(engine: &'a Engine, router: &'a Router, genesis: u64) -> Result<Self, Error> {
        let n = engine.group.len();
        let t = engine.group.threshold();
        let dealer = Dealer::new(&mut OsRng, engine.me, n, t);
        let mut player = Player::new(engine.me, n, t);
        if let Some(share) = dealer.share(engine.me) {
            player.deal(engine.me, dealer.commitment().clone(), share.clone())?;
        }
        Ok(Self {
            engine,
            router,
            genesis,
            phase: Phase::DealCollection,

            dealer,
            player,
            dealt: BTreeSet::from([engine.me]),

            outbound: FuturesUnordered::new(),
        })
    }

    fn send(&mut self, recipient: u32, message: Bytes) {
        let router = self.router;
        self.outbound.push(
            async move { (recipient, router.send(DKG_CHANNEL, recipient, message).await) }.boxed(),
        );
    }

    fn broadcast(&mut self, payload: Payload) {
        let message = Dkg::new(self.genesis, payload).serialize();
        let recipients: Vec<u32> = self
            .engine
            .group
            .iter()
            .map(|node| node.index)
            .filter(|index| *index != self.engine.me)
            .collect();
        for recipient in recipients {
            self.send(recipient, message.clone());
        }
    }

    /// Encrypt and send a share to every other node.
    fn deal(&mut self) -> Result<(), Error> {
        let commitment = self.dealer.commitment().clone();
        let mut deals = Vec::new();
        for node in self.engine.group.iter() {
            if node.index == self.engine.me {
                continue;
            }
            let Some(share) = self.dealer.share(node.index) else {
                continue;
            };
            let (ephemeral, ciphertext) =
                ops::encrypt_share(&mut OsRng, self.engine.me, &node.identity.key, share)?;
            let deal = Payload::Deal {
                commitment: commitment.clone(),
                ephemeral,
                ciphertext: ciphertext.into(),
            };
            deals.push((node.index, Dkg::new(self.genesis, deal).serialize()));
        }
        debug!(deals = deals.len(), "sending deals");
        for (recipient, deal) in deals {
            self.send(recipient, deal);
        }
        Ok(())
    }

    fn handle(&mut self, sender: u32, message: Dkg) {
        if message.genesis != self.genesis {
            debug!(sender, genesis = message.genesis, "ignoring message from another session");
            return;
        }
        match message.payload {
            Payload::Start => {}
            Payload::Deal {
                commitment,
                ephemeral,
                ciphertext,
            } => self.handle_deal(sender, commitment, ephemeral, &ciphertext),
            Payload::Response {
                dealer,
                approved,
                digest,
            } => self.handle_response(sender, dealer, approved, digest),
            Payload::Justification {
                dealer,
                commitment,
                share,
            } => self.handle_justification(sender, dealer, commitment, share),
        }
    }

    fn handle_deal(
        &mut self,
        dealer: u32,
        commitment: poly::Public,
        ephemeral: group::Public,
        ciphertext: &[u8],
    ) {
        if self.phase != Phase::DealCollection {
            debug!(dealer, "ignoring late deal");
            return;
        }
        if !self.dealt.insert(dealer) {
            debug!(dealer, "ignoring duplicate deal");
            return;
        }

        let me = self.engine.me;
        let private = self.engine.identity.private();
        let approved = match ops::decrypt_share(private, dealer, me, &ephemeral, ciphertext) {
            Ok(share) => match self.player.deal(dealer, commitment, share) {
                Ok(()) => true,
                Err(err) => {
                    warn!(dealer, ?err, "invalid deal");
                    false
                }
            },
            Err(err) => {
                warn!(dealer, ?err, "failed to decrypt deal");
                if let Err(err) = self.player.commitment(dealer, commitment) {
                    debug!(dealer, ?err, "invalid commitment");
                }
                false
            }
        };
        self.respond(dealer, approved);
    }

    /// Record and broadcast our response about `dealer`.
    fn respond(&mut self, dealer: u32, approved: bool) {
        let digest = self.player.digest(dealer).unwrap_or([0; DIGEST_LENGTH]);
        if let Err(err) = self.player.response(self.engine.me, dealer, approved, digest) {
            debug!(dealer, ?err, "already responded");
            return;
        }
        if !approved {
            self.engine.metrics.complaints.inc();
        }
        debug!(dealer, approved, "responding to deal");
        self.broadcast(Payload::Response {
            dealer,
            approved,
            digest,
        });
    }

    fn handle_response(
        &mut self,
        sender: u32,
        dealer: u32,
        approved: bool,
        digest: [u8; DIGEST_LENGTH],
    ) {
        if dealer == sender {
            debug!(sender, "ignoring response about own deal");
            return;
        }
        if let Err(err) = self.player.response(sender, dealer, approved, digest) {
            debug!(sender, dealer, ?err, "ignoring response");
            return;
        }
        if approved || dealer != self.engine.me {
            return;
        }

        // Answer the complaint by revealing the complainer's share
        let share = match self.dealer.complaint(sender) {
            Ok(share) => share,
            Err(err) => {
                debug!(player = sender, ?err, "ignoring complaint");
                return;
            }
        };
        info!(player = sender, "justifying deal");
        let commitment = self.dealer.commitment().clone();
        if let Err(err) = self
            .player
            .justification(self.engine.me, commitment.clone(), share.clone())
        {
            warn!(?err, "own justification rejected");
        }
        self.broadcast(Payload::Justification {
            dealer: self.engine.me,
            commitment,
            share,
        });
    }

    fn handle_justification(
        &mut self,
        sender: u32,
        dealer: u32,
        commitment: poly::Public,
        share: Share,
    ) {
        if dealer != sender {
            warn!(sender, dealer, "ignoring justification for another dealer");
            return;
        }
        let player = share.index;
        match self.player.justification(dealer, commitment, share) {
            Ok(()) => debug!(dealer, player, "accepted justification"),
            Err(err) => warn!(dealer, player, ?err, "invalid justification"),
        }
    }

    /// Complain about every dealer that did not deal and move to response collection.
    fn complain_missing(&mut self) {
        let missing: Vec<u32> = self
            .engine
            .group
            .iter()
            .map(|node| node.index)
            .filter(|index| !self.dealt.contains(index))
            .collect();
        for dealer in missing {
            warn!(dealer, "no deal received");
            self.respond(dealer, false);
        }
        self.phase = Phase::ResponseCollection;
        debug!(genesis = self.genesis, "collecting responses");
    }

    fn finalize(self) -> Result<Output, Error> {
        debug!(
            genesis = self.genesis,
            complained = ?self.player.complained(),
            answered = self.dealer.complaints(),
            "closing session"
        );
        let output = self.player.finalize()?;
        Ok(Output {
            genesis: self.genesis,
            public: output.public,
            share: output.share,
            qualified: output.qualified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_utils::signal::Signaler;
    use futures::channel::mpsc;
    use prometheus_client::registry::Registry;
    use rand::{rngs::StdRng, SeedableRng};
    use std::sync::{Arc, Mutex};

    fn setup() -> (Engine, Router) {
        let mut rng = StdRng::seed_from_u64(0);
        let pairs: Vec<Pair> = (0..4)
            .map(|i| Pair::new(&mut rng, format!("127.0.0.1:{}", i + 1)))
            .collect();
        let group =
            Group::with_default_threshold(pairs.iter().map(|p| p.public().clone()).collect())
                .unwrap();
        let registry = Arc::new(Mutex::new(Registry::default()));
        let router = Router::new(beacon_p2p::Config::aggressive(
            0,
            *pairs[0].private(),
            group.peers().unwrap(),
            registry.clone(),
        ))
        .unwrap();
        let engine = Engine::new(Config {
            identity: pairs[0].clone(),
            group,
            phase_timeout: Duration::from_secs(1),
            start_timeout: Duration::from_secs(10),
            genesis_delay: Duration::from_secs(3),
            registry,
        })
        .unwrap();
        (engine, router)
    }

    /// A closed network and a raised signal are both ready when a node stops.
    fn stopped() -> (Receiver, Signal) {
        let (sender, receiver) = mpsc::channel(1);
        drop(sender);
        let (signaler, signal) = Signaler::new();
        signaler.signal(0);
        (receiver, signal)
    }

    #[tokio::test]
    async fn test_shutdown_wins_over_closed_network() {
        let (engine, router) = setup();
        for _ in 0..16 {
            let (mut receiver, mut signal) = stopped();
            assert!(matches!(
                engine.run(&router, &mut receiver, false, &mut signal).await,
                Err(Error::Shutdown)
            ));
        }

        let (mut receiver, mut signal) = stopped();
        assert!(matches!(
            engine.run(&router, &mut receiver, true, &mut signal).await,
            Err(Error::Shutdown)
        ));
        assert_eq!(engine.metrics.failures.get(), 17);
        router.stop().await;
    }
}
