/*
 * Copyright 2017-2026 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Framed};

use crate::{
    error::Error,
    protocol::{Command, FromResp, RespCodec, RespValue},
};

/// Any duplex byte stream a connection can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type Transport = Box<dyn AsyncStream>;

/// A framed connection, it implements both `Sink<&Command>` and `Stream<Item = Result<RespValue, Error>>`.
pub type RespConnection = Framed<Transport, RespCodec>;

pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = Result<Transport, Error>> + Send + 'a>>;

/// Dials a new transport.  Called once per connection attempt, including every reconnect.
///
/// Errors should carry their retry classification; `io::Error`s converted with `?` are
/// classified by kind, or use `Error::transport` to state it explicitly.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> ConnectFuture<'_>;
}

/// The default `Connector`: a TCP socket, optionally wrapped in TLS.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
    #[cfg(feature = "tls")]
    tls: bool,
    keepalive: Option<Duration>,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        TcpConnector {
            host: host.into(),
            port,
            #[cfg(feature = "tls")]
            tls: false,
            keepalive: None,
        }
    }

    #[cfg(feature = "tls")]
    pub fn tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.keepalive = keepalive;
        self
    }

    async fn dial(&self) -> Result<Transport, Error> {
        let tcp_stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        tcp_stream.set_nodelay(true)?;
        if let Some(keepalive) = self.keepalive {
            let socket = socket2::SockRef::from(&tcp_stream);
            socket.set_tcp_keepalive(&socket2::TcpKeepalive::new().with_time(keepalive))?;
        }

        #[cfg(feature = "tls")]
        if self.tls {
            return connect_tls(&self.host, tcp_stream).await;
        }

        Ok(Box::new(tcp_stream))
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> ConnectFuture<'_> {
        Box::pin(self.dial())
    }
}

#[cfg(feature = "with-rustls")]
async fn connect_tls(host: &str, tcp_stream: TcpStream) -> Result<Transport, Error> {
    use tokio_rustls::{
        rustls::{pki_types::ServerName, ClientConfig, RootCertStore},
        TlsConnector,
    };

    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    let server_name = ServerName::try_from(host.to_owned())
        .map_err(|_| crate::error::internal(format!("Invalid DNS name: {}", host)))?;
    let stream = connector.connect(server_name, tcp_stream).await?;
    Ok(Box::new(stream))
}

#[cfg(all(feature = "tls", not(feature = "with-rustls")))]
async fn connect_tls(_host: &str, _tcp_stream: TcpStream) -> Result<Transport, Error> {
    Err(crate::error::internal(
        "TLS was requested but no TLS implementation is enabled, use the `with-rustls` feature",
    ))
}

/// Which RESP version the connection negotiates during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    #[default]
    Resp2,
    /// Sends `HELLO 3` after authenticating
    Resp3,
}

/// Everything needed to open and prepare one connection.
#[derive(Clone)]
pub(crate) struct ConnectionSettings {
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) username: Option<Arc<str>>,
    pub(crate) password: Option<Arc<str>>,
    pub(crate) db: Option<u32>,
    pub(crate) protocol: ProtocolVersion,
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<hidden>"))
            .field("db", &self.db)
            .field("protocol", &self.protocol)
            .finish()
    }
}

/// Why opening a connection failed.
#[derive(Debug)]
pub(crate) enum HandshakeError {
    /// The server refused the credentials or the protocol version, retrying cannot help
    Rejected(Error),
    /// Anything else: dialling, IO, or a setup command failing
    Failed(Error),
}

impl HandshakeError {
    pub(crate) fn into_inner(self) -> Error {
        match self {
            HandshakeError::Rejected(e) | HandshakeError::Failed(e) => e,
        }
    }
}

/// Send one command and read one frame, with no retry and no push routing.
pub(crate) async fn round_trip(
    connection: &mut RespConnection,
    command: &Command,
) -> Result<RespValue, Error> {
    connection.send(command).await?;
    match connection.next().await {
        Some(result) => result,
        None => Err(Error::EndOfStream),
    }
}

/// Sort the outcome of an AUTH or HELLO: a refusal from the server is final.
fn rejectable(result: Result<RespValue, Error>) -> Result<RespValue, HandshakeError> {
    match result {
        Ok(RespValue::Error(msg)) => Err(HandshakeError::Rejected(Error::Remote(msg))),
        Ok(value) => Ok(value),
        Err(e) => Err(HandshakeError::Failed(e)),
    }
}

/// AUTH, then HELLO when RESP3 is wanted, then SELECT.
pub(crate) async fn handshake(
    connection: &mut RespConnection,
    settings: &ConnectionSettings,
) -> Result<(), HandshakeError> {
    if let Some(password) = &settings.password {
        let auth = Command::new("AUTH")
            .arg(settings.username.clone())
            .arg(password.clone());
        let reply = rejectable(round_trip(connection, &auth).await)?;
        <()>::from_resp(reply).map_err(HandshakeError::Rejected)?;
    }

    if settings.protocol == ProtocolVersion::Resp3 {
        let reply = rejectable(round_trip(connection, &cmd!["HELLO", 3]).await)?;
        log::debug!("Negotiated RESP3: {:?}", reply);
    }

    if let Some(db) = settings.db {
        round_trip(connection, &cmd!["SELECT", db])
            .await
            .and_then(<()>::from_resp)
            .map_err(HandshakeError::Failed)?;
        log::debug!("Selected database {}", db);
    }

    Ok(())
}

/// Dial and handshake a single connection.
pub(crate) async fn establish(
    settings: &ConnectionSettings,
) -> Result<RespConnection, HandshakeError> {
    let transport = settings
        .connector
        .connect()
        .await
        .map_err(HandshakeError::Failed)?;
    let mut connection = RespCodec::default().framed(transport);
    handshake(&mut connection, settings).await?;
    Ok(connection)
}

/// Connect to a Redis server and return a Future that resolves to a
/// `RespConnection` for reading and writing asynchronously.
///
/// This is a low-level interface to enable the creation of higher-level
/// functionality.
///
/// The sink and stream sides behave independently of each other, it is the
/// responsibility of the calling application to determine what results are
/// paired to a particular command.
///
/// But since most Redis usages involve issue commands that result in one
/// single result, this library also implements `Dispatcher`.
pub async fn connect(host: &str, port: u16) -> Result<RespConnection, Error> {
    connect_with_auth(host, port, None, None).await
}

/// As `connect`, but authenticates before returning the connection.
pub async fn connect_with_auth(
    host: &str,
    port: u16,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<RespConnection, Error> {
    let settings = ConnectionSettings {
        connector: Arc::new(TcpConnector::new(host, port)),
        username: username.map(Arc::from),
        password: password.map(Arc::from),
        db: None,
        protocol: ProtocolVersion::Resp2,
    };
    establish(&settings).await.map_err(HandshakeError::into_inner)
}
