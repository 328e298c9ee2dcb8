//! Framing and handshakes on top of TCP.

use super::{types::Hello, Config, Error};
use beacon_codec::{DecodeExt, Encode, FixedSize};
use beacon_utils::now_millis;
use std::net::SocketAddr;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

/// Sends a frame prefixed by its length (u32, big-endian).
pub async fn send_frame<S: AsyncWrite + Unpin>(
    stream: &mut S,
    buf: &[u8],
    max_message_size: usize,
) -> Result<(), Error> {
    let n = buf.len();
    if n == 0 {
        return Err(Error::SendZeroSize);
    }
    if n > max_message_size {
        return Err(Error::SendTooLarge(n));
    }
    let len: u32 = n.try_into().map_err(|_| Error::SendTooLarge(n))?;

    let mut frame = Vec::with_capacity(4 + n);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(buf);
    stream.write_all(&frame).await.map_err(Error::SendFailed)?;
    stream.flush().await.map_err(Error::SendFailed)
}

/// Receives a frame prefixed by its length (u32, big-endian).
pub async fn recv_frame<S: AsyncRead + Unpin>(
    stream: &mut S,
    max_message_size: usize,
) -> Result<Vec<u8>, Error> {
    let mut prefix = [0u8; 4];
    stream
        .read_exact(&mut prefix)
        .await
        .map_err(Error::RecvFailed)?;
    let len = u32::from_be_bytes(prefix) as usize;
    if len == 0 {
        return Err(Error::RecvZeroSize);
    }
    if len > max_message_size {
        return Err(Error::RecvTooLarge(len));
    }

    let mut buf = vec![0u8; len];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(Error::RecvFailed)?;
    Ok(buf)
}

/// Opens a connection to `peer` and presents a signed [Hello].
pub async fn dial(config: &Config, peer: u32, address: SocketAddr) -> Result<TcpStream, Error> {
    let mut stream = match timeout(config.dial_timeout, TcpStream::connect(address)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => return Err(Error::DialFailed(err)),
        Err(_) => return Err(Error::DialTimeout),
    };
    stream.set_nodelay(true).map_err(Error::DialFailed)?;

    let hello = Hello::sign(
        &config.signer,
        &config.namespace,
        config.me,
        peer,
        now_millis(),
    );
    timeout(
        config.write_timeout,
        send_frame(&mut stream, &hello.encode(), Hello::SIZE),
    )
    .await
    .map_err(|_| Error::WriteTimeout)??;
    Ok(stream)
}

/// Reads and verifies the [Hello] of an inbound connection, returning the dialer's index.
pub async fn accept<S: AsyncRead + Unpin>(config: &Config, stream: &mut S) -> Result<u32, Error> {
    let frame = recv_frame(stream, Hello::SIZE).await?;
    let hello = Hello::decode(frame.as_slice())?;

    if hello.recipient != config.me {
        return Err(Error::WrongRecipient(hello.recipient));
    }
    if hello.dialer == config.me {
        return Err(Error::HandshakeFromSelf);
    }
    let Some(peer) = config.peers.get(&hello.dialer) else {
        return Err(Error::UnknownPeer(hello.dialer));
    };

    let now = now_millis();
    let bound = config.synchrony_bound.as_millis() as u64;
    if hello.timestamp > now.saturating_add(bound) {
        return Err(Error::InvalidTimestamp(hello.timestamp));
    }
    let age = config.max_handshake_age.as_millis() as u64;
    if hello.timestamp < now.saturating_sub(age) {
        return Err(Error::InvalidTimestamp(hello.timestamp));
    }

    hello.verify(&config.namespace, &peer.public)?;
    Ok(hello.dialer)
}
