/*
 * Copyright 2020-2026 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    backoff::{Backoff, ExponentialBackoff},
    error,
};

use super::{
    connect::{ConnectionSettings, Connector, ProtocolVersion, TcpConnector},
    dispatcher::{Dispatcher, DispatcherConfig, PushSink},
};

const DEFAULT_MAX_RETRY_COUNT: u32 = 10;

#[derive(Clone)]
/// Connection builder
pub struct ConnectionBuilder {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) username: Option<Arc<str>>,
    pub(crate) password: Option<Arc<str>>,
    pub(crate) db: Option<u32>,
    #[cfg(feature = "tls")]
    pub(crate) tls: bool,
    pub(crate) protocol: ProtocolVersion,
    pub(crate) max_retry_count: u32,
    pub(crate) backoff: Arc<dyn Backoff>,
    pub(crate) health_check_interval: Option<Duration>,
    pub(crate) keepalive: Option<Duration>,
    pub(crate) connector: Option<Arc<dyn Connector>>,
}

impl fmt::Debug for ConnectionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ConnectionBuilder")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("db", &self.db)
            .field("protocol", &self.protocol)
            .field("max_retry_count", &self.max_retry_count)
            .field("health_check_interval", &self.health_check_interval)
            .finish()
    }
}

impl ConnectionBuilder {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, error::Error> {
        Ok(Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            db: None,
            #[cfg(feature = "tls")]
            tls: false,
            protocol: ProtocolVersion::default(),
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
            backoff: Arc::new(ExponentialBackoff::default()),
            health_check_interval: None,
            keepalive: None,
            connector: None,
        })
    }

    /// Set the password used when connecting
    pub fn password<V: Into<Arc<str>>>(&mut self, password: V) -> &mut Self {
        self.password = Some(password.into());
        self
    }

    /// Set the username used when connecting, only sent alongside a password
    pub fn username<V: Into<Arc<str>>>(&mut self, username: V) -> &mut Self {
        self.username = Some(username.into());
        self
    }

    /// The database to `SELECT` after connecting
    pub fn db(&mut self, db: u32) -> &mut Self {
        self.db = Some(db);
        self
    }

    #[cfg(feature = "tls")]
    pub fn tls(&mut self) -> &mut Self {
        self.tls = true;
        self
    }

    pub fn protocol(&mut self, protocol: ProtocolVersion) -> &mut Self {
        self.protocol = protocol;
        self
    }

    /// How many times a failed connection or command is retried before giving up.  Defaults
    /// to 10.
    pub fn max_retry_count(&mut self, max_retry_count: u32) -> &mut Self {
        self.max_retry_count = max_retry_count;
        self
    }

    /// How long to wait before each retry.  Defaults to `ExponentialBackoff::default()`.
    pub fn backoff<B: Backoff + 'static>(&mut self, backoff: B) -> &mut Self {
        self.backoff = Arc::new(backoff);
        self
    }

    /// Send a `PING` this often, marking the connection as disconnected if it fails.
    pub fn health_check_interval(&mut self, interval: Duration) -> &mut Self {
        self.health_check_interval = Some(interval);
        self
    }

    /// Enable TCP keepalive on the socket
    pub fn keepalive(&mut self, keepalive: Duration) -> &mut Self {
        self.keepalive = Some(keepalive);
        self
    }

    /// Open connections with `connector` instead of dialling `host:port` over TCP.
    pub fn connector<C: Connector>(&mut self, connector: C) -> &mut Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    fn tcp_connector(&self) -> TcpConnector {
        let connector = TcpConnector::new(self.host.clone(), self.port).keepalive(self.keepalive);
        #[cfg(feature = "tls")]
        let connector = connector.tls(self.tls);
        connector
    }

    pub(crate) fn settings(&self) -> ConnectionSettings {
        let connector = match &self.connector {
            Some(connector) => connector.clone(),
            None => Arc::new(self.tcp_connector()),
        };
        ConnectionSettings {
            connector,
            username: self.username.clone(),
            password: self.password.clone(),
            db: self.db,
            protocol: self.protocol,
        }
    }

    pub(crate) fn start(&self, push_sink: Option<PushSink>) -> Dispatcher {
        Dispatcher::start(DispatcherConfig {
            settings: self.settings(),
            max_retry_count: self.max_retry_count,
            backoff: self.backoff.clone(),
            health_check_interval: self.health_check_interval,
            push_sink,
        })
    }

    /// A `Dispatcher` that has not connected yet; the first command, or `connect`, dials.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn dispatcher(&self) -> Dispatcher {
        self.start(None)
    }

    /// A connected `Dispatcher`.
    pub async fn connect(&self) -> Result<Dispatcher, error::Error> {
        let dispatcher = self.dispatcher();
        dispatcher.connect().await?;
        Ok(dispatcher)
    }
}

/// The default starting point to use most default Redis functionality.
///
/// Returns a future that resolves to a `Dispatcher`. The future will complete when the
/// initial connection is established.
///
/// Once the initial connection is established, commands that fail because the connection was
/// lost (e.g. the Redis server being restarted) are re-sent over a new connection, up to ten
/// times with exponentially increasing pauses.
pub async fn connect(host: impl Into<String>, port: u16) -> Result<Dispatcher, error::Error> {
    ConnectionBuilder::new(host, port)?.connect().await
}
