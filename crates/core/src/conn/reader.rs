//! The dedicated reader task of a connection.
//!
//! Pulls one frame at a time from the socket and posts it to the owning
//! connection's event loop. Requests block on the event loop's
//! acknowledgment, so at most one request is in flight per connection and
//! replies stay in wire order. Interleaved frames never enter the event
//! loop: they are dispatched synchronously to the channel-keyed callbacks,
//! gated by `allow_interleaved_frames`.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, RtspError};
use crate::protocol::{Message, Request};
use crate::transport::framed::FrameReader;

/// Callback receiving the payload of an interleaved frame, keyed by channel.
/// Runs on the reader task, concurrently with the connection event loop.
pub(crate) type FrameCallback = Box<dyn Fn(Bytes) + Send>;

/// The two fields shared between the reader task and the event loop. This
/// is the only lock in the pipeline; it guards plain reads and writes, no
/// business logic runs under it.
pub(crate) struct ReaderState {
    pub(crate) allow_interleaved_frames: bool,
    pub(crate) callbacks: HashMap<u8, FrameCallback>,
    /// Whether reads run under the read deadline. Armed while the
    /// connection has no bound session.
    pub(crate) deadline_armed: bool,
}

impl ReaderState {
    pub(crate) fn new() -> Self {
        ReaderState {
            allow_interleaved_frames: false,
            callbacks: HashMap::new(),
            deadline_armed: true,
        }
    }
}

/// A request handed to the event loop. The reader blocks until `ack`
/// resolves; an error in the acknowledgment terminates the reader, which
/// reports it back through the error channel.
pub(crate) struct ReadRequest {
    pub(crate) req: Request,
    pub(crate) ack: oneshot::Sender<Result<()>>,
}

pub(crate) struct ConnReader {
    reader: FrameReader,
    state: Arc<Mutex<ReaderState>>,
    req_tx: mpsc::Sender<ReadRequest>,
    err_tx: mpsc::Sender<RtspError>,
    token: CancellationToken,
}

impl ConnReader {
    pub(crate) fn new(
        reader: FrameReader,
        state: Arc<Mutex<ReaderState>>,
        req_tx: mpsc::Sender<ReadRequest>,
        err_tx: mpsc::Sender<RtspError>,
        token: CancellationToken,
    ) -> Self {
        ConnReader {
            reader,
            state,
            req_tx,
            err_tx,
            token,
        }
    }

    pub(crate) async fn run(mut self) {
        let err = self.run_inner().await;
        tokio::select! {
            _ = self.err_tx.send(err) => {}
            _ = self.token.cancelled() => {}
        }
    }

    async fn run_inner(&mut self) -> RtspError {
        loop {
            let deadline_armed = self.state.lock().deadline_armed;
            let message = tokio::select! {
                message = self.reader.read(deadline_armed) => message,
                _ = self.token.cancelled() => return RtspError::Terminated,
            };
            let message = match message {
                Ok(message) => message,
                Err(err) => return err,
            };

            match message {
                Message::Request(req) => {
                    let (ack_tx, ack_rx) = oneshot::channel();
                    let read_req = ReadRequest { req, ack: ack_tx };
                    tokio::select! {
                        sent = self.req_tx.send(read_req) => {
                            if sent.is_err() {
                                return RtspError::Terminated;
                            }
                        }
                        _ = self.token.cancelled() => return RtspError::Terminated,
                    }
                    match ack_rx.await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => return err,
                        Err(_) => return RtspError::Terminated,
                    }
                }

                Message::Response(_) => return RtspError::UnexpectedResponse,

                Message::Interleaved(frame) => {
                    let state = self.state.lock();
                    if !state.allow_interleaved_frames {
                        return RtspError::UnexpectedFrame;
                    }
                    if let Some(callback) = state.callbacks.get(&frame.channel) {
                        callback(frame.payload);
                    }
                }
            }
        }
    }
}
