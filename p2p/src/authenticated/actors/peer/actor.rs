use super::{ingress::Message, Mailbox};
use crate::{
    authenticated::{
        connection::{dial, send_frame},
        metrics,
        types::Data,
        Config, Error,
    },
    Channel,
};
use beacon_codec::Encode;
use beacon_utils::signal::Signal;
use bytes::Bytes;
use futures::{channel::mpsc, StreamExt};
use governor::DefaultKeyedRateLimiter;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::TcpStream,
    select,
    time::{sleep, timeout},
};
use tracing::{debug, trace};

/// Owns the outbound connection to one peer and writes queued messages to it.
pub struct Actor {
    config: Arc<Config>,
    metrics: Arc<metrics::Metrics>,
    dial_limiter: Arc<DefaultKeyedRateLimiter<u32>>,

    peer: u32,
    address: SocketAddr,
    stream: Option<TcpStream>,

    receiver: mpsc::Receiver<Message>,
}

impl Actor {
    pub fn new(
        config: Arc<Config>,
        metrics: Arc<metrics::Metrics>,
        dial_limiter: Arc<DefaultKeyedRateLimiter<u32>>,
        peer: u32,
        address: SocketAddr,
    ) -> (Self, Mailbox) {
        let (sender, receiver) = mpsc::channel(config.mailbox_size);
        (
            Self {
                config,
                metrics,
                dial_limiter,

                peer,
                address,
                stream: None,

                receiver,
            },
            Mailbox::new(sender),
        )
    }

    /// Writes `frame`, (re)dialing the peer as needed.
    async fn deliver(&mut self, frame: &[u8]) -> Result<(), Error> {
        let mut last = Error::Unreachable(self.peer);
        for attempt in 0..self.config.dial_attempts {
            if attempt > 0 {
                sleep(self.config.dial_backoff).await;
            }

            if self.stream.is_none() {
                if self.dial_limiter.check_key(&self.peer).is_err() {
                    debug!(peer = self.peer, "dial rate limited");
                    last = Error::RateLimited;
                    continue;
                }
                self.metrics
                    .dial_attempts
                    .get_or_create(&metrics::Peer::new(self.peer))
                    .inc();
                match dial(&self.config, self.peer, self.address).await {
                    Ok(stream) => {
                        debug!(peer = self.peer, address = ?self.address, "dialed peer");
                        self.stream = Some(stream);
                    }
                    Err(err) => {
                        debug!(peer = self.peer, ?err, attempt, "failed to dial peer");
                        last = err;
                        continue;
                    }
                }
            }
            let Some(stream) = self.stream.as_mut() else {
                continue;
            };

            match timeout(
                self.config.write_timeout,
                send_frame(stream, frame, self.config.max_message_size),
            )
            .await
            {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(err)) => last = err,
                Err(_) => last = Error::WriteTimeout,
            }
            debug!(peer = self.peer, err = ?last, "dropping connection");
            self.stream = None;
        }
        Err(last)
    }

    async fn handle(&mut self, channel: Channel, message: Bytes) -> Result<(), Error> {
        let frame = Data { channel, message }.encode();
        let result = self.deliver(&frame).await;
        match &result {
            Ok(()) => {
                trace!(peer = self.peer, channel, "sent message");
                self.metrics
                    .messages_sent
                    .get_or_create(&metrics::Message::new_data(self.peer, channel))
                    .inc();
            }
            Err(err) => {
                debug!(peer = self.peer, channel, ?err, "failed to send message");
                self.metrics
                    .send_failures
                    .get_or_create(&metrics::Peer::new(self.peer))
                    .inc();
            }
        }
        result
    }

    pub async fn run(mut self, mut signal: Signal) {
        loop {
            select! {
                _ = &mut signal => {
                    debug!(peer = self.peer, "shutdown");
                    return;
                },
                message = self.receiver.next() => {
                    let Some(Message::Send { channel, message, result }) = message else {
                        debug!(peer = self.peer, "mailbox closed");
                        return;
                    };

                    // Dropping `result` on shutdown reports the router as closed
                    select! {
                        _ = &mut signal => {
                            debug!(peer = self.peer, "shutdown");
                            return;
                        },
                        outcome = self.handle(channel, message) => {
                            let _ = result.send(outcome);
                        },
                    }
                },
            }
        }
    }
}
