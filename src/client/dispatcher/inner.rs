/*
 * Copyright 2017-2026 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures_channel::mpsc;
use futures_util::{future, SinkExt, StreamExt};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{
    backoff::Backoff,
    client::{
        connect::{establish, ConnectionSettings, HandshakeError, RespConnection},
        pubsub::message::{frame_kind, FrameKind},
    },
    error::{self, ConnectionReason, Error},
    protocol::{Command, RespValue},
    task::sleep_unless_cancelled,
};

use super::{ConnectionState, DispatcherConfig, PendingRequest, PushSink, ReplyKind, Work};

/// Routes pub/sub frames that arrive on the connection away from the replies they are
/// interleaved with.
#[derive(Debug)]
struct PushRouter {
    sink: Option<PushSink>,
    /// Whether the connection has active subscriptions, according to the last acknowledgement
    subscribed: bool,
}

impl PushRouter {
    /// Read the connection between commands?
    fn is_listening(&self) -> bool {
        self.sink.is_some() && self.subscribed
    }

    /// Returns the frame if it is a reply, or `None` if it was consumed.
    fn intercept(&mut self, frame: RespValue, awaiting_acks: bool) -> Option<RespValue> {
        let is_push = matches!(frame, RespValue::Push(_));
        match frame_kind(&frame) {
            FrameKind::Message if is_push || self.subscribed => {
                self.deliver(frame);
                None
            }
            FrameKind::Ack(count) if is_push || awaiting_acks => {
                self.subscribed = count > 0;
                Some(frame)
            }
            _ if is_push => {
                log::debug!("Discarding push frame: {:?}", frame);
                None
            }
            _ => Some(frame),
        }
    }

    fn deliver(&self, frame: RespValue) {
        match &self.sink {
            Some(sink) => {
                if let Err(e) = sink.unbounded_send(Ok(frame)) {
                    log::debug!("Pub/Sub receiver has gone away: {}", e);
                }
            }
            None => log::warn!("Pub/Sub message with nowhere to go: {:?}", frame),
        }
    }

    /// The connection has gone, so have its subscriptions.
    fn connection_lost(&mut self, cause: &Error) {
        if !self.subscribed {
            return;
        }
        self.subscribed = false;
        if let Some(sink) = &self.sink {
            let _ = sink.unbounded_send(Err(lost_connection_error(cause)));
        }
    }
}

/// A copy of `cause` that keeps its retry classification.
fn lost_connection_error(cause: &Error) -> Error {
    match cause {
        Error::Transport(err) => Error::transport(
            io::Error::new(err.kind(), cause.to_string()),
            err.is_retriable(),
        ),
        Error::EndOfStream => Error::EndOfStream,
        other => error::internal(format!("Connection lost: {}", other)),
    }
}

/// A failed attempt, sorted by whether another attempt could succeed.
enum Failure {
    Retriable(Error),
    Final(Error),
}

impl From<Error> for Failure {
    fn from(e: Error) -> Self {
        if e.is_retriable() {
            Failure::Retriable(e)
        } else {
            Failure::Final(e)
        }
    }
}

impl From<HandshakeError> for Failure {
    fn from(e: HandshakeError) -> Self {
        match e {
            HandshakeError::Rejected(e) => Failure::Final(e),
            HandshakeError::Failed(e) => Failure::Retriable(e),
        }
    }
}

/// Marks the dispatcher closed when the task ends, including by panic.
struct CloseOnExit {
    state: Arc<ConnectionState>,
    shutdown: CancellationToken,
}

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        self.state.mark_closed();
        self.shutdown.cancel();
    }
}

enum Event {
    Work(Work),
    Frame(Option<Result<RespValue, Error>>),
    Shutdown,
}

async fn next_frame(connection: &mut Option<RespConnection>) -> Option<Result<RespValue, Error>> {
    match connection {
        Some(connection) => connection.next().await,
        None => future::pending().await,
    }
}

/// Resolve to `Closed` as soon as the dispatcher is closed, whatever `f` is doing.
async fn until_closed<F, T>(shutdown: CancellationToken, f: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Err(Error::Connection(ConnectionReason::Closed)),
        result = f => result,
    }
}

/// Send a command and read the frames that make up its reply, forwarding any pub/sub messages
/// that arrive in between.
async fn exchange(
    connection: &mut RespConnection,
    pushes: &mut PushRouter,
    command: &Command,
    kind: ReplyKind,
) -> Result<Vec<RespValue>, Error> {
    connection.send(command).await?;

    let expected = kind.expected_frames();
    let awaiting_acks = matches!(kind, ReplyKind::Subscription(_));
    let mut replies = Vec::with_capacity(expected);
    while replies.len() < expected {
        let frame = match connection.next().await {
            Some(frame) => frame?,
            None => return Err(Error::EndOfStream),
        };
        if let Some(reply) = pushes.intercept(frame, awaiting_acks) {
            // An error replaces all the acknowledgements
            let is_error = matches!(reply, RespValue::Error(_));
            replies.push(reply);
            if is_error {
                break;
            }
        }
    }
    Ok(replies)
}

/// A spawned future that owns the connection, processes the queue of work one item at a time,
/// and reconnects as needed.
pub(super) struct DispatcherInner {
    settings: ConnectionSettings,
    max_retry_count: u32,
    backoff: Arc<dyn Backoff>,
    state: Arc<ConnectionState>,
    shutdown: CancellationToken,
    queue: mpsc::UnboundedReceiver<Work>,
    connection: Option<RespConnection>,
    pushes: PushRouter,
}

impl DispatcherInner {
    pub(super) fn new(
        config: DispatcherConfig,
        state: Arc<ConnectionState>,
        shutdown: CancellationToken,
        queue: mpsc::UnboundedReceiver<Work>,
    ) -> Self {
        DispatcherInner {
            settings: config.settings,
            max_retry_count: config.max_retry_count,
            backoff: config.backoff,
            state,
            shutdown,
            queue,
            connection: None,
            pushes: PushRouter {
                sink: config.push_sink,
                subscribed: false,
            },
        }
    }

    pub(super) async fn run(mut self) {
        let _close_on_exit = CloseOnExit {
            state: self.state.clone(),
            shutdown: self.shutdown.clone(),
        };
        loop {
            let listening = self.pushes.is_listening() && self.connection.is_some();
            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => Event::Shutdown,
                work = self.queue.next() => match work {
                    Some(work) => Event::Work(work),
                    None => Event::Shutdown,
                },
                frame = next_frame(&mut self.connection), if listening => Event::Frame(frame),
            };

            match event {
                Event::Work(work) => self.process(work).await,
                Event::Frame(Some(Ok(frame))) => {
                    if let Some(frame) = self.pushes.intercept(frame, false) {
                        log::warn!("Unexpected frame while idle: {:?}", frame);
                    }
                }
                Event::Frame(Some(Err(e))) => {
                    log::warn!("Connection failed while idle: {}", e);
                    self.connection_lost(&e);
                }
                Event::Frame(None) => {
                    log::warn!("Connection closed by server");
                    self.connection_lost(&Error::EndOfStream);
                }
                Event::Shutdown => break,
            }
        }
        self.shut_down();
    }

    async fn process(&mut self, work: Work) {
        match work {
            Work::Command(PendingRequest {
                command,
                kind,
                responder,
            }) => {
                let result =
                    until_closed(self.shutdown.clone(), self.execute(&command, kind)).await;
                if responder.send(result).is_err() {
                    log::trace!("Reply to {:?} no longer wanted", command);
                }
            }
            Work::Connect(tx) => {
                let result = if self.connection.is_some() {
                    Ok(())
                } else {
                    until_closed(self.shutdown.clone(), self.connect_with_retry()).await
                };
                if let Err(Error::RetriesExhausted(attempts, cause)) = &result {
                    log::error!(
                        "Could not connect after {} retries, closing: {}",
                        attempts,
                        cause
                    );
                    self.state.mark_closed();
                    self.shutdown.cancel();
                }
                let _ = tx.send(result);
            }
            Work::Reconnect(tx) => {
                let result = until_closed(self.shutdown.clone(), self.reconnect()).await;
                let _ = tx.send(result);
            }
            Work::HealthCheck => {
                if self.connection.is_some() {
                    if let Err(e) = until_closed(self.shutdown.clone(), self.probe()).await {
                        log::warn!("Health check failed: {}", e);
                    }
                }
            }
        }
    }

    /// Run a command, reconnecting and re-sending it after retriable failures.
    async fn execute(
        &mut self,
        command: &Command,
        kind: ReplyKind,
    ) -> Result<Vec<RespValue>, Error> {
        let mut attempt = 0;
        loop {
            let e = match self.try_execute(command, kind).await {
                Ok(replies) => return Ok(replies),
                Err(Failure::Retriable(e)) => e,
                Err(Failure::Final(e)) => return Err(e),
            };
            if self.state.is_closed() {
                return Err(e);
            }
            if attempt >= self.max_retry_count {
                log::error!("Giving up on {:?} after {} retries: {}", command, attempt, e);
                return Err(Error::RetriesExhausted(attempt, Box::new(e)));
            }
            attempt += 1;
            self.state.set_retry_count(attempt);
            let delay = self.backoff.delay(attempt);
            log::warn!(
                "{:?} failed: {}, retry {} of {} in {:?}",
                command,
                e,
                attempt,
                self.max_retry_count,
                delay
            );
            if !sleep_unless_cancelled(delay, &self.shutdown).await {
                return Err(Error::Connection(ConnectionReason::Closed));
            }
        }
    }

    /// One attempt: connect if needed, then one exchange.  Any failure other than an error reply
    /// leaves the connection dropped.  A handshake failure is retriable unless the server
    /// rejected the connection, whatever the underlying error.
    async fn try_execute(
        &mut self,
        command: &Command,
        kind: ReplyKind,
    ) -> Result<Vec<RespValue>, Failure> {
        if self.connection.is_none() {
            let connection = establish(&self.settings).await?;
            self.connected(connection);
        }
        Ok(self.try_once(command, kind).await?)
    }

    async fn connect_with_retry(&mut self) -> Result<(), Error> {
        let mut attempt = 0;
        loop {
            log::debug!("Connecting, attempt {}", attempt + 1);
            let e = match establish(&self.settings).await.map_err(Failure::from) {
                Ok(connection) => {
                    self.connected(connection);
                    return Ok(());
                }
                Err(Failure::Final(e)) => {
                    log::error!("Connection rejected: {}", e);
                    return Err(e);
                }
                Err(Failure::Retriable(e)) => e,
            };
            if attempt >= self.max_retry_count {
                return Err(Error::RetriesExhausted(attempt, Box::new(e)));
            }
            attempt += 1;
            self.state.set_retry_count(attempt);
            let delay = self.backoff.delay(attempt);
            log::warn!(
                "Connection attempt failed: {}, retry {} of {} in {:?}",
                e,
                attempt,
                self.max_retry_count,
                delay
            );
            if !sleep_unless_cancelled(delay, &self.shutdown).await {
                return Err(Error::Connection(ConnectionReason::Closed));
            }
        }
    }

    async fn reconnect(&mut self) -> Result<(), Error> {
        log::info!("Reconnecting");
        // Whoever asked for the reconnect restores any subscriptions
        self.pushes.subscribed = false;
        self.connection_lost(&Error::EndOfStream);
        self.connect_with_retry().await?;
        self.probe().await
    }

    /// A `PING` with no retry, failure drops the connection.
    async fn probe(&mut self) -> Result<(), Error> {
        let replies = self.try_once(&cmd!["PING"], ReplyKind::Single).await?;
        match replies.into_iter().next() {
            Some(RespValue::SimpleString(ref pong)) if pong == "PONG" => Ok(()),
            // The reply while subscribed
            Some(RespValue::Array(ref parts)) if parts.first() == Some(&RespValue::from("pong")) => {
                Ok(())
            }
            Some(RespValue::Error(msg)) => Err(Error::Remote(msg)),
            other => {
                let e = error::unexpected(format!("Unexpected reply to PING: {:?}", other));
                self.connection_lost(&e);
                Err(e)
            }
        }
    }

    async fn try_once(
        &mut self,
        command: &Command,
        kind: ReplyKind,
    ) -> Result<Vec<RespValue>, Error> {
        let mut connection = match self.connection.take() {
            Some(connection) => connection,
            None => return Err(Error::Connection(ConnectionReason::NotConnected)),
        };
        match exchange(&mut connection, &mut self.pushes, command, kind).await {
            Ok(replies) => {
                self.connection = Some(connection);
                Ok(replies)
            }
            Err(e) => {
                self.connection_lost(&e);
                Err(e)
            }
        }
    }

    fn connected(&mut self, connection: RespConnection) {
        log::info!("Connected");
        self.connection = Some(connection);
        self.pushes.subscribed = false;
        self.state.set_connected(true);
        self.state.set_retry_count(0);
    }

    fn connection_lost(&mut self, cause: &Error) {
        self.connection = None;
        self.state.set_connected(false);
        self.pushes.connection_lost(cause);
    }

    fn shut_down(&mut self) {
        log::debug!("Dispatcher shutting down");
        self.state.mark_closed();
        self.connection = None;
        self.pushes.sink = None;
        self.queue.close();
        while let Ok(Some(work)) = self.queue.try_next() {
            work.reject(ConnectionReason::Closed);
        }
    }
}

/// Enqueue a health check every `interval` until the dispatcher is closed.
pub(super) async fn health_check(
    queue: mpsc::UnboundedSender<Work>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if queue.unbounded_send(Work::HealthCheck).is_err() {
                    break;
                }
            }
        }
    }
}
