/*
 * Copyright 2017-2026 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

mod inner;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_channel::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::connect::ConnectionSettings;

use crate::{
    backoff::Backoff,
    error::{ConnectionReason, Error},
    protocol::{Command, FromResp, RespValue},
    task::spawn,
};

use self::inner::DispatcherInner;

/// Where out-of-band pub/sub frames are delivered.  An `Err` means the subscriptions on the
/// connection were lost.
pub(crate) type PushSink = mpsc::UnboundedSender<Result<RespValue, Error>>;

type Responder = oneshot::Sender<Result<Vec<RespValue>, Error>>;

/// How many frames make up the reply to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplyKind {
    Single,
    /// One acknowledgement per channel or pattern
    Subscription(usize),
}

impl ReplyKind {
    fn expected_frames(self) -> usize {
        match self {
            ReplyKind::Single => 1,
            ReplyKind::Subscription(n) => n,
        }
    }
}

#[derive(Debug)]
pub(crate) struct PendingRequest {
    command: Command,
    kind: ReplyKind,
    responder: Responder,
}

/// The chunks of work processed, strictly in order, by the dispatcher's task.
#[derive(Debug)]
pub(crate) enum Work {
    Command(PendingRequest),
    Connect(oneshot::Sender<Result<(), Error>>),
    Reconnect(oneshot::Sender<Result<(), Error>>),
    HealthCheck,
}

impl Work {
    fn reject(self, reason: ConnectionReason) {
        let closed = || Error::Connection(reason);
        match self {
            Work::Command(request) => {
                let _ = request.responder.send(Err(closed()));
            }
            Work::Connect(tx) | Work::Reconnect(tx) => {
                let _ = tx.send(Err(closed()));
            }
            Work::HealthCheck => (),
        }
    }
}

/// Flags readable from any handle, written only by the dispatcher's task and `close`.
#[derive(Debug, Default)]
pub(crate) struct ConnectionState {
    connected: AtomicBool,
    closed: AtomicBool,
    retry_count: AtomicU32,
}

impl ConnectionState {
    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn set_retry_count(&self, retry_count: u32) {
        self.retry_count.store(retry_count, Ordering::SeqCst);
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub(crate) struct DispatcherConfig {
    pub(crate) settings: ConnectionSettings,
    pub(crate) max_retry_count: u32,
    pub(crate) backoff: Arc<dyn Backoff>,
    pub(crate) health_check_interval: Option<Duration>,
    pub(crate) push_sink: Option<PushSink>,
}

struct Shared {
    queue: mpsc::UnboundedSender<Work>,
    state: Arc<ConnectionState>,
    shutdown: CancellationToken,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if !self.state.is_closed() {
            log::debug!("Last handle dropped, closing dispatcher");
        }
        self.state.mark_closed();
        self.shutdown.cancel();
    }
}

/// A shareable and cheaply cloneable connection to which Redis commands can be sent.
///
/// Commands are written one at a time, in the order they were enqueued, and each reply is
/// paired with its command.  Should the connection fail with a retriable error the command is
/// re-sent over a new connection, waiting according to the configured `Backoff` between
/// attempts.  Commands queued behind it wait their turn and are never reordered.
///
/// Dropping the last clone closes the dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("connected", &self.is_connected())
            .field("closed", &self.is_closed())
            .field("retry_count", &self.retry_count())
            .finish()
    }
}

impl Dispatcher {
    /// Spawn the dispatcher's task.  Nothing is dialled until the first `connect` or command.
    pub(crate) fn start(config: DispatcherConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded();
        let state = Arc::new(ConnectionState::default());
        let shutdown = CancellationToken::new();

        if let Some(interval) = config.health_check_interval {
            spawn(inner::health_check(
                queue_tx.clone(),
                interval,
                shutdown.clone(),
            ));
        }

        let inner = DispatcherInner::new(config, state.clone(), shutdown.clone(), queue_rx);
        spawn(inner.run());

        Dispatcher {
            shared: Arc::new(Shared {
                queue: queue_tx,
                state,
                shutdown,
            }),
        }
    }

    fn submit(&self, work: Work) -> Result<(), Error> {
        if self.is_closed() {
            work.reject(ConnectionReason::Closed);
            return Err(Error::Connection(ConnectionReason::Closed));
        }
        self.shared
            .queue
            .unbounded_send(work)
            .map_err(|_| Error::Connection(ConnectionReason::Closed))
    }

    async fn control<F>(&self, work: F) -> Result<(), Error>
    where
        F: FnOnce(oneshot::Sender<Result<(), Error>>) -> Work,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(work(tx))?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::Connection(ConnectionReason::Closed)),
        }
    }

    /// Dial, authenticate and select the database.
    ///
    /// Retriable failures are retried up to the configured `max_retry_count`; running out of
    /// retries closes the dispatcher.  An authentication failure is returned straight away.
    /// Does nothing if already connected.
    pub async fn connect(&self) -> Result<(), Error> {
        self.control(Work::Connect).await
    }

    /// Drop the current connection (if any), dial a new one and check it answers a `PING`.
    ///
    /// Subscriptions held by the old connection are not carried over.
    pub async fn reconnect(&self) -> Result<(), Error> {
        self.control(Work::Reconnect).await
    }

    /// Close the connection.  Every command still pending is rejected with
    /// `Error::Connection(ConnectionReason::Closed)`, as is everything sent afterwards.
    ///
    /// Closing more than once is harmless.
    pub fn close(&self) {
        if !self.shared.state.is_closed() {
            log::info!("Closing dispatcher");
        }
        self.shared.state.mark_closed();
        self.shared.shutdown.cancel();
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.connected.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.is_closed()
    }

    /// The number of retries made since the last successful connection.
    pub fn retry_count(&self) -> u32 {
        self.shared.state.retry_count.load(Ordering::SeqCst)
    }

    fn request(
        &self,
        command: Command,
        kind: ReplyKind,
    ) -> oneshot::Receiver<Result<Vec<RespValue>, Error>> {
        let (tx, rx) = oneshot::channel();
        let work = Work::Command(PendingRequest {
            command,
            kind,
            responder: tx,
        });
        // A failed submit has already answered through `tx`
        let _ = self.submit(work);
        rx
    }

    /// Queue a command, returning a future of its reply.
    ///
    /// The command is queued when `enqueue` is called, not when the future is first polled, so
    /// commands are sent in the order `enqueue` is called regardless of the order the futures
    /// are awaited.  An error reply resolves to `Error::Remote`.
    pub fn enqueue(&self, command: Command) -> impl Future<Output = Result<RespValue, Error>> {
        let rx = self.request(command, ReplyKind::Single);
        async move {
            let mut replies = match rx.await {
                Ok(result) => result?,
                Err(_) => return Err(Error::Connection(ConnectionReason::Closed)),
            };
            match replies.pop() {
                Some(reply) => reply.into_result(),
                None => Err(Error::EndOfStream),
            }
        }
    }

    /// Send a command and convert its reply.
    pub fn send<T>(&self, command: Command) -> impl Future<Output = Result<T, Error>>
    where
        T: FromResp,
    {
        let reply_f = self.enqueue(command);
        async move { T::from_resp(reply_f.await?) }
    }

    /// Send a command, ignoring the reply.  Any error is logged.
    pub fn send_and_forget(&self, command: Command) {
        let send_f = self.send::<RespValue>(command);
        let forget_f = async {
            if let Err(e) = send_f.await {
                log::error!("Error in send_and_forget: {}", e);
            }
        };
        spawn(forget_f);
    }

    /// Queue a (un)subscribe command, resolving to one acknowledgement frame per topic.
    pub(crate) fn subscription(
        &self,
        command: Command,
        topics: usize,
    ) -> impl Future<Output = Result<Vec<RespValue>, Error>> {
        let rx = self.request(command, ReplyKind::Subscription(topics));
        async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(Error::Connection(ConnectionReason::Closed)),
            }
        }
    }
}
