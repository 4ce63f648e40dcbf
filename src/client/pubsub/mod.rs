/*
 * Copyright 2017-2026 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

pub(crate) mod message;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_channel::mpsc;
use futures_util::stream::{self, Stream, StreamExt};

use crate::{
    error::Error,
    protocol::{Command, RespValue},
    task,
};

use super::{builder::ConnectionBuilder, dispatcher::Dispatcher};

use self::message::Ack;

pub use self::message::PubsubMessage;

/// How long `close` waits for the server to confirm the final unsubscribe.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type MessageReceiver = mpsc::UnboundedReceiver<Result<RespValue, Error>>;

/// The channels and patterns the server has confirmed.
#[derive(Debug, Default)]
struct Subscriptions {
    channels: BTreeSet<String>,
    patterns: BTreeSet<String>,
}

impl Subscriptions {
    fn apply(&mut self, ack: Ack) {
        match ack {
            Ack::Subscribe(channel) => {
                self.channels.insert(channel);
            }
            Ack::Psubscribe(pattern) => {
                self.patterns.insert(pattern);
            }
            Ack::Unsubscribe(Some(channel)) => {
                self.channels.remove(&channel);
            }
            Ack::Punsubscribe(Some(pattern)) => {
                self.patterns.remove(&pattern);
            }
            Ack::Unsubscribe(None) | Ack::Punsubscribe(None) => (),
        }
    }
}

/// A shareable connection dedicated to Pub/Sub.
///
/// All subscriptions share a single connection and a single stream of messages, see
/// `receive`.  If the connection is lost it is re-established, and every channel and pattern
/// subscribed to is subscribed to again, before the stream continues.
#[derive(Clone)]
pub struct PubsubConnection {
    dispatcher: Dispatcher,
    subscriptions: Arc<Mutex<Subscriptions>>,
    messages: Arc<tokio::sync::Mutex<MessageReceiver>>,
}

impl std::fmt::Debug for PubsubConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PubsubConnection")
            .field("dispatcher", &self.dispatcher)
            .field("subscriptions", &*self.subscriptions())
            .finish()
    }
}

impl ConnectionBuilder {
    pub async fn pubsub_connect(&self) -> Result<PubsubConnection, Error> {
        let (push_tx, push_rx) = mpsc::unbounded();
        let dispatcher = self.start(Some(push_tx));
        dispatcher.connect().await?;
        Ok(PubsubConnection {
            dispatcher,
            subscriptions: Arc::new(Mutex::new(Subscriptions::default())),
            messages: Arc::new(tokio::sync::Mutex::new(push_rx)),
        })
    }
}

/// Used for Redis's PUBSUB functionality.
///
/// Returns a future that resolves to a `PubsubConnection`. The future will only resolve once the
/// connection is established.
pub async fn pubsub_connect(
    host: impl Into<String>,
    port: u16,
) -> Result<PubsubConnection, Error> {
    ConnectionBuilder::new(host, port)?.pubsub_connect().await
}

impl PubsubConnection {
    fn subscriptions(&self) -> MutexGuard<'_, Subscriptions> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Send a (un)subscribe command and record what the server acknowledges.
    async fn request(&self, name: &'static str, topics: Vec<String>) -> Result<(), Error> {
        if topics.is_empty() {
            return Ok(());
        }
        let count = topics.len();
        let acks = self
            .dispatcher
            .subscription(Command::new(name).args(topics), count)
            .await?;

        let mut subscriptions = self.subscriptions();
        for ack in acks {
            subscriptions.apply(Ack::from_frame(ack)?);
        }
        Ok(())
    }

    /// Subscribe to one or more channels.  Resolves once the server has acknowledged every one.
    pub async fn subscribe<I, T>(&self, channels: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let channels = channels.into_iter().map(Into::into).collect();
        self.request("SUBSCRIBE", channels).await
    }

    /// Subscribe to one or more glob-style patterns.
    pub async fn psubscribe<I, T>(&self, patterns: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let patterns = patterns.into_iter().map(Into::into).collect();
        self.request("PSUBSCRIBE", patterns).await
    }

    pub async fn unsubscribe<I, T>(&self, channels: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let channels = channels.into_iter().map(Into::into).collect();
        self.request("UNSUBSCRIBE", channels).await
    }

    pub async fn punsubscribe<I, T>(&self, patterns: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let patterns = patterns.into_iter().map(Into::into).collect();
        self.request("PUNSUBSCRIBE", patterns).await
    }

    /// The channels currently subscribed to.
    pub fn channels(&self) -> Vec<String> {
        self.subscriptions().channels.iter().cloned().collect()
    }

    /// The patterns currently subscribed to.
    pub fn patterns(&self) -> Vec<String> {
        self.subscriptions().patterns.iter().cloned().collect()
    }

    pub fn is_connected(&self) -> bool {
        self.dispatcher.is_connected()
    }

    /// Reconnect, then subscribe again to everything that was subscribed to.
    async fn recover(&self) -> Result<(), Error> {
        self.dispatcher.reconnect().await?;

        let (channels, patterns) = (self.channels(), self.patterns());
        log::info!(
            "Resubscribing to {} channel(s) and {} pattern(s)",
            channels.len(),
            patterns.len()
        );
        self.request("SUBSCRIBE", channels).await?;
        self.request("PSUBSCRIBE", patterns).await
    }

    async fn next_message(&self) -> Option<Result<PubsubMessage, Error>> {
        loop {
            let frame = self.messages.lock().await.next().await;
            match frame {
                None => return None,
                Some(Ok(frame)) => return Some(PubsubMessage::from_frame(frame)),
                Some(Err(_)) if self.dispatcher.is_closed() => return None,
                Some(Err(e)) if e.is_retriable() => {
                    log::warn!("Pub/Sub connection lost: {}", e);
                    if let Err(e) = self.recover().await {
                        if self.dispatcher.is_closed() {
                            return None;
                        }
                        log::error!("Could not restore subscriptions: {}", e);
                        return Some(Err(e));
                    }
                }
                Some(Err(e)) => return Some(Err(e)),
            }
        }
    }

    /// The messages published to every channel and pattern subscribed to, in the order they
    /// arrive.
    ///
    /// Reconnection is invisible to the stream, which carries on once the subscriptions are
    /// restored.  It ends after yielding an error that could not be recovered from, or,
    /// without an error, once the connection is closed.
    ///
    /// All streams returned from the same connection share one source of messages, each
    /// message goes to only one of them.
    pub fn receive(&self) -> impl Stream<Item = Result<PubsubMessage, Error>> {
        stream::unfold((self.clone(), false), |(connection, done)| async move {
            if done {
                return None;
            }
            let item = connection.next_message().await?;
            let done = item.is_err();
            Some((item, (connection, done)))
        })
    }

    /// Unsubscribe from everything, then close the connection.  Any `receive` stream ends.
    pub async fn close(&self) {
        if self.dispatcher.is_connected() {
            let (channels, patterns) = (self.channels(), self.patterns());
            let unsubscribe = async {
                self.request("UNSUBSCRIBE", channels).await?;
                self.request("PUNSUBSCRIBE", patterns).await
            };
            match task::timeout(CLOSE_TIMEOUT, unsubscribe).await {
                Some(Ok(())) => (),
                Some(Err(e)) => log::warn!("Could not unsubscribe before closing: {}", e),
                None => log::warn!("Timed out unsubscribing before closing"),
            }
        }
        self.dispatcher.close();
    }
}
