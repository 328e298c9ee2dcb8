//! Accept inbound connections and route their messages to registered channels.

use crate::{
    authenticated::{
        connection::{accept, recv_frame},
        metrics,
        types::Data,
        Config,
    },
    Channel, Message,
};
use beacon_codec::Decode;
use beacon_utils::signal::Signal;
use futures::{channel::mpsc, SinkExt};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    task::JoinSet,
    time::timeout,
};
use tracing::{debug, info, trace};

/// Senders for every registered channel.
pub type Channels = Arc<Mutex<HashMap<Channel, mpsc::Sender<Message>>>>;

/// Tracks an open inbound connection for as long as it is held.
struct Open(Arc<metrics::Metrics>);

impl Open {
    fn new(metrics: Arc<metrics::Metrics>) -> Self {
        metrics.connections.inc();
        Self(metrics)
    }
}

impl Drop for Open {
    fn drop(&mut self) {
        self.0.connections.dec();
    }
}

pub struct Actor {
    config: Arc<Config>,
    metrics: Arc<metrics::Metrics>,
    channels: Channels,
    listener: TcpListener,
}

impl Actor {
    pub fn new(
        config: Arc<Config>,
        metrics: Arc<metrics::Metrics>,
        channels: Channels,
        listener: TcpListener,
    ) -> Self {
        Self {
            config,
            metrics,
            channels,
            listener,
        }
    }

    pub async fn run(self, mut signal: Signal) {
        let mut readers = JoinSet::new();
        loop {
            select! {
                _ = &mut signal => {
                    debug!("shutdown");
                    break;
                },
                accepted = self.listener.accept() => {
                    let (stream, address) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            debug!(?err, "failed to accept connection");
                            continue;
                        }
                    };
                    trace!(?address, "accepted connection");
                    readers.spawn(read(
                        self.config.clone(),
                        self.metrics.clone(),
                        self.channels.clone(),
                        stream,
                        address,
                    ));
                },
                Some(_) = readers.join_next(), if !readers.is_empty() => {},
            }
        }

        // Dropping the listener releases the port
        drop(self.listener);
        readers.shutdown().await;
        info!("listener stopped");
    }
}

/// Authenticates an inbound connection and forwards its messages until it closes.
async fn read(
    config: Arc<Config>,
    metrics: Arc<metrics::Metrics>,
    channels: Channels,
    mut stream: TcpStream,
    address: SocketAddr,
) {
    let peer = match timeout(config.handshake_timeout, accept(&config, &mut stream)).await {
        Ok(Ok(peer)) => peer,
        Ok(Err(err)) => {
            debug!(?address, ?err, "rejected handshake");
            metrics.rejected_handshakes.inc();
            return;
        }
        Err(_) => {
            debug!(?address, "handshake timed out");
            metrics.rejected_handshakes.inc();
            return;
        }
    };
    debug!(peer, ?address, "peer connected");
    let _open = Open::new(metrics.clone());

    loop {
        let frame = match recv_frame(&mut stream, config.max_message_size).await {
            Ok(frame) => frame,
            Err(err) => {
                debug!(peer, ?err, "connection closed");
                return;
            }
        };
        let data = match Data::decode_cfg(frame.as_slice(), &config.max_message_size) {
            Ok(data) => data,
            Err(err) => {
                debug!(peer, ?err, "failed to decode message");
                metrics
                    .messages_received
                    .get_or_create(&metrics::Message::new_invalid(peer))
                    .inc();
                return;
            }
        };
        metrics
            .messages_received
            .get_or_create(&metrics::Message::new_data(peer, data.channel))
            .inc();

        let sender = channels.lock().unwrap().get(&data.channel).cloned();
        let Some(mut sender) = sender else {
            debug!(peer, channel = data.channel, "dropping message for unregistered channel");
            continue;
        };
        if sender.send((peer, data.message)).await.is_err() {
            debug!(peer, channel = data.channel, "channel receiver dropped");
        }
    }
}
