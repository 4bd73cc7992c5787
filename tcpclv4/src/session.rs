use crate::codec::{self, Message, MessageType};
use futures::{SinkExt, StreamExt};
use mule_bpa::cla::{Connection, IncomingBundle, IngressSender};
use mule_bpv7::bundle::Bundle;
use std::collections::VecDeque;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Peer closed the connection")]
    Hangup,

    #[error("Peer is ending the session: {0:?}")]
    Terminate(codec::SessionTermMessage),

    #[error("Shutting down session: {0:?}")]
    Shutdown(codec::SessionTermReason),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] codec::Error),
}

/// Negotiated session parameters, fixed after the SESS_INIT exchange.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub keepalive: Option<tokio::time::Duration>,
    pub segment_mru: usize,
    pub transfer_mru: usize,
    pub peer_node: Option<mule_bpv7::eid::Eid>,
}

/// A bundle the CLA wants on the wire, and where to report the outcome.
pub type ForwardRequest = (Vec<u8>, tokio::sync::oneshot::Sender<bool>);

/// Session lifecycle; handshake states are handled before `Session::run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Established,
    Terminating,
    Closed,
}

struct PendingAck {
    transfer_id: u64,
    length: u64,
}

/// The post-handshake message loop of one TCPCL session.
pub struct Session<T>
where
    T: StreamExt<Item = Result<Message, codec::Error>>
        + futures::Sink<Message, Error = codec::Error>
        + Unpin,
{
    transport: T,
    params: SessionParams,
    incoming: IngressSender,
    connection: Connection,
    from_cla: tokio::sync::mpsc::Receiver<ForwardRequest>,
    next_transfer_id: u64,
    pending_acks: VecDeque<PendingAck>,
    ingress: Option<(u64, Vec<u8>)>,
    state: SessionState,
    last_sent: tokio::time::Instant,
    cancel_token: CancellationToken,
}

impl<T> Session<T>
where
    T: StreamExt<Item = Result<Message, codec::Error>>
        + futures::Sink<Message, Error = codec::Error>
        + Unpin,
{
    pub fn new(
        transport: T,
        params: SessionParams,
        incoming: IngressSender,
        connection: Connection,
        from_cla: tokio::sync::mpsc::Receiver<ForwardRequest>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            transport,
            params,
            incoming,
            connection,
            from_cla,
            next_transfer_id: 0,
            pending_acks: VecDeque::new(),
            ingress: None,
            state: SessionState::Established,
            last_sent: tokio::time::Instant::now(),
            cancel_token,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    async fn send(&mut self, msg: Message) -> Result<(), Error> {
        let msg_type = msg.message_type();
        self.transport
            .send(msg)
            .await
            .inspect_err(|e| info!("Failed to send {msg_type:?}: {e:?}"))?;
        self.last_sent = tokio::time::Instant::now();
        Ok(())
    }

    async fn reject(
        &mut self,
        reason: codec::MessageRejectReason,
        rejected_type: u8,
    ) -> Result<(), Error> {
        self.send(Message::Reject(codec::MessageRejectMessage {
            reason,
            rejected_type,
        }))
        .await
    }

    async fn refuse(
        &mut self,
        reason: codec::TransferRefuseReason,
        transfer_id: u64,
    ) -> Result<(), Error> {
        self.send(Message::TransferRefuse(codec::TransferRefuseMessage {
            reason,
            transfer_id,
        }))
        .await
    }

    /// One XFER_SEGMENT carrying the whole bundle, START and END set.
    async fn forward_to_peer(&mut self, data: Vec<u8>) -> Result<(), Error> {
        let transfer_id = self.next_transfer_id;
        self.next_transfer_id += 1;

        self.pending_acks.push_back(PendingAck {
            transfer_id,
            length: data.len() as u64,
        });

        let length = data.len() as u64;
        self.send(Message::TransferSegment(codec::TransferSegmentMessage {
            flags: codec::TransferFlags {
                start: true,
                end: true,
            },
            transfer_id,
            extensions: vec![codec::transfer_length_extension(length)],
            data,
        }))
        .await
    }

    async fn on_transfer(&mut self, msg: codec::TransferSegmentMessage) -> Result<(), Error> {
        if msg.flags.start {
            if self.ingress.is_some() {
                info!("Out of order START segment");
                return self
                    .reject(
                        codec::MessageRejectReason::Unexpected,
                        MessageType::XFER_SEGMENT as u8,
                    )
                    .await;
            }
            if let Some(total) = msg.transfer_length() {
                if total as usize > self.params.transfer_mru {
                    return self
                        .refuse(codec::TransferRefuseReason::NoResources, msg.transfer_id)
                        .await;
                }
            }
            self.ingress = Some((msg.transfer_id, Vec::with_capacity(msg.data.len())));
        }

        let Some((transfer_id, buffer)) = &mut self.ingress else {
            info!("Segment without a transfer in progress");
            return self
                .reject(
                    codec::MessageRejectReason::Unexpected,
                    MessageType::XFER_SEGMENT as u8,
                )
                .await;
        };
        if *transfer_id != msg.transfer_id {
            info!("Interleaved transfer ids are not supported");
            self.ingress = None;
            return self
                .refuse(codec::TransferRefuseReason::NotAcceptable, msg.transfer_id)
                .await;
        }

        if buffer.len() + msg.data.len() > self.params.transfer_mru {
            info!("Transfer exceeds the negotiated MRU");
            self.ingress = None;
            return self
                .refuse(codec::TransferRefuseReason::NoResources, msg.transfer_id)
                .await;
        }
        buffer.extend_from_slice(&msg.data);
        let acknowledged_length = buffer.len() as u64;

        if msg.flags.end {
            let (_, data) = self.ingress.take().expect("transfer state vanished");
            match Bundle::from_cbor(&data) {
                Ok(bundle) => {
                    trace!("Received {} byte bundle transfer", data.len());
                    _ = self.incoming.send(IncomingBundle {
                        bundle,
                        connection: self.connection.clone(),
                    });
                }
                Err(e) => {
                    info!("Refusing undecodable transfer: {e}");
                    return self
                        .refuse(codec::TransferRefuseReason::NotAcceptable, msg.transfer_id)
                        .await;
                }
            }
        }

        self.send(Message::TransferAck(codec::TransferAckMessage {
            flags: msg.flags,
            transfer_id: msg.transfer_id,
            acknowledged_length,
        }))
        .await
    }

    fn on_ack(&mut self, msg: codec::TransferAckMessage) {
        match self.pending_acks.pop_front() {
            Some(pending) if pending.transfer_id == msg.transfer_id => {
                if pending.length != msg.acknowledged_length {
                    info!(
                        "Short acknowledgement for transfer {}: {} of {}",
                        msg.transfer_id, msg.acknowledged_length, pending.length
                    );
                }
            }
            Some(pending) => {
                info!(
                    "Acknowledgement for unexpected transfer {} (awaiting {})",
                    msg.transfer_id, pending.transfer_id
                );
            }
            None => info!("Unsolicited acknowledgement for transfer {}", msg.transfer_id),
        }
    }

    async fn on_message(&mut self, msg: Message) -> Result<(), Error> {
        match msg {
            Message::TransferSegment(msg) => self.on_transfer(msg).await,
            Message::TransferAck(msg) => {
                self.on_ack(msg);
                Ok(())
            }
            Message::TransferRefuse(msg) => {
                info!(
                    "Peer refused transfer {}: {:?}",
                    msg.transfer_id, msg.reason
                );
                self.pending_acks
                    .retain(|p| p.transfer_id != msg.transfer_id);
                Ok(())
            }
            Message::Keepalive => Ok(()),
            Message::SessionTerm(msg) => Err(Error::Terminate(msg)),
            Message::Reject(msg) => {
                warn!(
                    "Peer rejected our message type {}: {:?}",
                    msg.rejected_type, msg.reason
                );
                Ok(())
            }
            Message::SessionInit(_) => {
                self.reject(
                    codec::MessageRejectReason::Unexpected,
                    MessageType::SESS_INIT as u8,
                )
                .await
            }
        }
    }

    /// Graceful termination, ours or a reply to theirs.
    async fn terminate(&mut self, msg: codec::SessionTermMessage) {
        self.state = SessionState::Terminating;
        self.from_cla.close();

        if self.cancel_token.is_cancelled() {
            _ = self.transport.close().await;
            self.state = SessionState::Closed;
            return;
        }

        let reply = msg.flags & 0x01 != 0;
        if !reply {
            // Their SESS_TERM; acknowledge it
            let mut reply_msg = msg;
            reply_msg.flags |= 0x01;
            _ = self.send(Message::SessionTerm(reply_msg)).await;
        }

        _ = self.transport.close().await;
        self.state = SessionState::Closed;
    }

    async fn shutdown(&mut self, reason: codec::SessionTermReason) {
        self.state = SessionState::Terminating;
        self.from_cla.close();

        if !self.cancel_token.is_cancelled()
            && self
                .send(Message::SessionTerm(codec::SessionTermMessage {
                    flags: 0,
                    reason,
                }))
                .await
                .is_ok()
        {
            // Wait briefly for the reply; anything else is moot now
            let deadline = tokio::time::Duration::from_secs(2);
            loop {
                match tokio::time::timeout(deadline, self.transport.next()).await {
                    Ok(Some(Ok(Message::SessionTerm(msg)))) if msg.flags & 0x01 != 0 => break,
                    Ok(Some(Ok(Message::TransferSegment(msg)))) => {
                        _ = self
                            .refuse(
                                codec::TransferRefuseReason::SessionTerminating,
                                msg.transfer_id,
                            )
                            .await;
                    }
                    Ok(Some(_)) => continue,
                    _ => break,
                }
            }
        }

        _ = self.transport.close().await;
        self.state = SessionState::Closed;
    }

    pub async fn run(mut self) {
        let cancel_token = self.cancel_token.clone();
        let error = loop {
            let keepalive = self.params.keepalive;
            let result = if let Some(keepalive) = keepalive {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        Err(Error::Shutdown(codec::SessionTermReason::Unknown))
                    }
                    r = tokio::time::timeout(
                        keepalive.saturating_sub(self.last_sent.elapsed()),
                        self.from_cla.recv(),
                    ) => match r {
                        Ok(Some((data, result))) => {
                            let sent = self.forward_to_peer(data).await;
                            _ = result.send(sent.is_ok());
                            sent
                        }
                        Ok(None) => Err(Error::Shutdown(codec::SessionTermReason::Unknown)),
                        Err(_) => self.send(Message::Keepalive).await,
                    },
                    r = tokio::time::timeout(keepalive.saturating_mul(2), self.transport.next()) => match r {
                        Ok(Some(Ok(msg))) => self.on_message(msg).await,
                        Ok(Some(Err(codec::Error::InvalidMessageType(t)))) => {
                            _ = self.reject(codec::MessageRejectReason::Unknown, t).await;
                            Err(Error::Codec(codec::Error::InvalidMessageType(t)))
                        }
                        Ok(Some(Err(e))) => Err(Error::Codec(e)),
                        Ok(None) => Err(Error::Hangup),
                        Err(_) => Err(Error::Shutdown(codec::SessionTermReason::IdleTimeout)),
                    }
                }
            } else {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        Err(Error::Shutdown(codec::SessionTermReason::Unknown))
                    }
                    r = self.from_cla.recv() => match r {
                        Some((data, result)) => {
                            let sent = self.forward_to_peer(data).await;
                            _ = result.send(sent.is_ok());
                            sent
                        }
                        None => Err(Error::Shutdown(codec::SessionTermReason::Unknown)),
                    },
                    msg = self.transport.next() => match msg {
                        Some(Ok(msg)) => self.on_message(msg).await,
                        Some(Err(e)) => Err(Error::Codec(e)),
                        None => Err(Error::Hangup),
                    }
                }
            };

            if let Err(e) = result {
                break e;
            }
        };

        match error {
            Error::Terminate(msg) => {
                debug!("Peer ended the session: {:?}", msg.reason);
                self.terminate(msg).await;
            }
            Error::Shutdown(reason) => {
                debug!("Ending session: {reason:?}");
                self.shutdown(reason).await;
            }
            Error::Hangup => {
                info!("Peer hung up");
                self.from_cla.close();
                _ = self.transport.close().await;
                self.state = SessionState::Closed;
            }
            Error::Io(e) => {
                info!("Session I/O failure: {e}");
                self.from_cla.close();
                _ = self.transport.close().await;
                self.state = SessionState::Closed;
            }
            Error::Codec(e) => {
                info!("Peer sent garbage: {e}");
                self.shutdown(codec::SessionTermReason::Unknown).await;
            }
        }
    }
}
