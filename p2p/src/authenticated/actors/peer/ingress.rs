use crate::{authenticated::Error, Channel};
use bytes::Bytes;
use futures::{
    channel::{mpsc, oneshot},
    SinkExt,
};

/// Messages that can be processed by the peer actor.
pub enum Message {
    Send {
        channel: Channel,
        message: Bytes,
        result: oneshot::Sender<Result<(), Error>>,
    },
}

/// Mailbox for sending messages to the peer actor.
#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
}

impl Mailbox {
    pub(super) fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }

    /// Queue `message` for delivery and wait for the outcome.
    ///
    /// Messages queued on the same mailbox are written in order.
    pub async fn send(&mut self, channel: Channel, message: Bytes) -> Result<(), Error> {
        let (result, receiver) = oneshot::channel();
        self.sender
            .send(Message::Send {
                channel,
                message,
                result,
            })
            .await
            .map_err(|_| Error::Closed)?;
        receiver.await.map_err(|_| Error::Closed)?
    }
}
