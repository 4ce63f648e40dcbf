/*
 * Copyright 2026 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! An in-process stand-in for a Redis server, with hooks to break connections on demand.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_channel::mpsc;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio_util::{
    codec::{Decoder, Framed},
    sync::CancellationToken,
};

use crate::{
    error::Error,
    protocol::{RespCodec, RespValue},
};

use super::{
    builder::ConnectionBuilder,
    connect::{ConnectFuture, Connector, Transport},
};

const DATABASES: u32 = 16;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// One connected client, as seen by `PUBLISH`.
struct Subscriber {
    channels: BTreeSet<String>,
    patterns: BTreeSet<String>,
    resp3: bool,
    outbound: mpsc::UnboundedSender<RespValue>,
}

impl Subscriber {
    fn count(&self) -> i64 {
        (self.channels.len() + self.patterns.len()) as i64
    }

    fn frame(&self, parts: Vec<RespValue>) -> RespValue {
        if self.resp3 {
            RespValue::Push(parts)
        } else {
            RespValue::Array(parts)
        }
    }
}

#[derive(Default)]
struct ServerState {
    password: Option<String>,
    dials: AtomicU32,
    refused_dials: AtomicU32,
    write_failure: AtomicU32,
    hang_up_after: Mutex<Option<u32>>,
    raw_reply: Mutex<Option<Vec<u8>>>,
    injected_errors: Mutex<HashMap<String, String>>,
    kill: Mutex<CancellationToken>,
    live: AtomicUsize,
    next_session: AtomicU64,
    commands: Mutex<Vec<String>>,
    data: Mutex<HashMap<(u32, String), Vec<u8>>>,
    sessions: Mutex<HashMap<u64, Subscriber>>,
}

/// Per-connection state that only the session's own task touches.
struct Session {
    id: u64,
    db: u32,
    authed: bool,
    resp3: bool,
}

#[derive(Clone, Default)]
pub(crate) struct MockServer {
    state: Arc<ServerState>,
}

impl MockServer {
    pub(crate) fn new() -> Self {
        MockServer::default()
    }

    /// A server that requires `AUTH` before anything else.  Any username is accepted.
    pub(crate) fn with_password(password: &str) -> Self {
        MockServer {
            state: Arc::new(ServerState {
                password: Some(password.to_string()),
                ..ServerState::default()
            }),
        }
    }

    pub(crate) fn connector(&self) -> MockConnector {
        MockConnector {
            state: self.state.clone(),
        }
    }

    /// A builder that connects to this server, retrying quickly.
    pub(crate) fn builder(&self) -> ConnectionBuilder {
        let mut builder = ConnectionBuilder::new("mock", 6379).expect("Cannot create builder");
        builder
            .connector(self.connector())
            .backoff(|_: u32| Duration::from_millis(5));
        builder
    }

    /// Every command executed so far, arguments joined by spaces.
    pub(crate) fn commands(&self) -> Vec<String> {
        lock(&self.state.commands).clone()
    }

    /// Connection attempts so far, refused ones included.
    pub(crate) fn dials(&self) -> u32 {
        self.state.dials.load(Ordering::SeqCst)
    }

    pub(crate) fn live_connections(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    /// Refuse the next `n` connection attempts, `u32::MAX` refuses until told otherwise.
    pub(crate) fn refuse_dials(&self, n: u32) {
        self.state.refused_dials.store(n, Ordering::SeqCst);
    }

    /// The `n`th write by any client from now fails with a broken pipe.
    pub(crate) fn fail_nth_write(&self, n: u32) {
        self.state.write_failure.store(n, Ordering::SeqCst);
    }

    /// Execute `n` more commands, then hang up on the next one without executing it.
    pub(crate) fn drop_after(&self, n: u32) {
        *lock(&self.state.hang_up_after) = Some(n);
    }

    /// Answer the next command, on any connection, with `bytes` instead of a reply.
    pub(crate) fn reply_with_raw(&self, bytes: &[u8]) {
        *lock(&self.state.raw_reply) = Some(bytes.to_vec());
    }

    /// The next `command` gets the error reply `msg` instead of running.
    pub(crate) fn fail_next(&self, command: &str, msg: &str) {
        lock(&self.state.injected_errors).insert(command.to_ascii_uppercase(), msg.to_string());
    }

    /// Hang up on every client connected right now.
    pub(crate) fn kill_connections(&self) {
        let mut kill = lock(&self.state.kill);
        kill.cancel();
        *kill = CancellationToken::new();
    }
}

pub(crate) struct MockConnector {
    state: Arc<ServerState>,
}

impl Connector for MockConnector {
    fn connect(&self) -> ConnectFuture<'_> {
        Box::pin(async move { self.state.clone().dial() })
    }
}

impl ServerState {
    fn dial(self: Arc<Self>) -> Result<Transport, Error> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refused_dials
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        if refused {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "Connection refused").into());
        }

        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve(self.clone(), server));
        Ok(Box::new(FlakyStream {
            inner: client,
            state: self,
        }))
    }

    /// Counts down a pending write failure, `true` when it is this write's turn to fail.
    fn take_write_failure(&self) -> bool {
        let previous = self
            .write_failure
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        previous == Ok(1)
    }

    fn should_hang_up(&self) -> bool {
        let mut hang_up_after = lock(&self.hang_up_after);
        match *hang_up_after {
            Some(0) => {
                *hang_up_after = None;
                true
            }
            Some(n) => {
                *hang_up_after = Some(n - 1);
                false
            }
            None => false,
        }
    }

    fn execute(&self, session: &mut Session, args: Vec<String>) -> Vec<RespValue> {
        lock(&self.commands).push(args.join(" "));

        let name = args[0].to_ascii_uppercase();
        let args = &args[1..];

        if !session.authed && name != "AUTH" && name != "HELLO" {
            return vec![error("NOAUTH Authentication required.")];
        }
        if let Some(msg) = lock(&self.injected_errors).remove(&name) {
            return vec![error(&msg)];
        }

        let reply = match (name.as_str(), args) {
            ("PING", []) => {
                let subscribed = self.subscription_count(session) > 0;
                if subscribed && !session.resp3 {
                    RespValue::Array(vec!["pong".into(), "".into()])
                } else {
                    RespValue::SimpleString("PONG".into())
                }
            }
            ("PING", [message]) | ("ECHO", [message]) => message.as_str().into(),
            ("AUTH", [.., password]) if args.len() <= 2 => match &self.password {
                Some(expected) if expected == password => {
                    session.authed = true;
                    ok()
                }
                Some(_) => error("WRONGPASS invalid username-password pair or user is disabled."),
                None => error("ERR AUTH called without any password configured"),
            },
            ("HELLO", [version, ..]) => match version.as_str() {
                "2" | "3" => {
                    session.resp3 = version == "3";
                    if let Some(subscriber) = lock(&self.sessions).get_mut(&session.id) {
                        subscriber.resp3 = session.resp3;
                    }
                    RespValue::Map(vec![
                        ("server".into(), "redis".into()),
                        ("proto".into(), RespValue::Integer(version.parse().unwrap_or(2))),
                    ])
                }
                _ => error("NOPROTO unsupported protocol version"),
            },
            ("SELECT", [db]) => match db.parse::<u32>() {
                Ok(db) if db < DATABASES => {
                    session.db = db;
                    ok()
                }
                _ => error("ERR DB index is out of range"),
            },
            ("SET", [key, value]) => {
                lock(&self.data).insert((session.db, key.clone()), value.clone().into_bytes());
                ok()
            }
            ("GET", [key]) => match lock(&self.data).get(&(session.db, key.clone())) {
                Some(value) => RespValue::BulkString(value.clone()),
                None => RespValue::Nil,
            },
            ("DEL", keys) if !keys.is_empty() => {
                let mut data = lock(&self.data);
                let removed = keys
                    .iter()
                    .filter(|key| data.remove(&(session.db, (*key).clone())).is_some())
                    .count();
                RespValue::Integer(removed as i64)
            }
            ("INCR", [key]) => {
                let mut data = lock(&self.data);
                let entry = data.entry((session.db, key.clone())).or_insert_with(|| b"0".to_vec());
                let current = String::from_utf8_lossy(entry).parse::<i64>();
                match current {
                    Ok(n) => {
                        *entry = (n + 1).to_string().into_bytes();
                        RespValue::Integer(n + 1)
                    }
                    Err(_) => error("ERR value is not an integer or out of range"),
                }
            }
            ("EVAL", [..]) => error(
                "ERR Error compiling script (new function): user_script:1: syntax error near 'is'",
            ),
            ("SUBSCRIBE", topics) if !topics.is_empty() => {
                return self.subscribe(session, "subscribe", topics, |s| &mut s.channels)
            }
            ("PSUBSCRIBE", topics) if !topics.is_empty() => {
                return self.subscribe(session, "psubscribe", topics, |s| &mut s.patterns)
            }
            ("UNSUBSCRIBE", topics) => {
                return self.unsubscribe(session, "unsubscribe", topics, |s| &mut s.channels)
            }
            ("PUNSUBSCRIBE", topics) => {
                return self.unsubscribe(session, "punsubscribe", topics, |s| &mut s.patterns)
            }
            ("PUBLISH", [channel, message]) => RespValue::Integer(self.publish(channel, message)),
            (
                "PING" | "ECHO" | "AUTH" | "HELLO" | "SELECT" | "SET" | "GET" | "DEL" | "INCR"
                | "SUBSCRIBE" | "PSUBSCRIBE" | "PUBLISH",
                _,
            ) => error(&format!(
                "ERR wrong number of arguments for '{}' command",
                name.to_lowercase()
            )),
            _ => error(&format!("ERR unknown command '{}'", name)),
        };
        vec![reply]
    }

    fn subscription_count(&self, session: &Session) -> i64 {
        lock(&self.sessions)
            .get(&session.id)
            .map(Subscriber::count)
            .unwrap_or(0)
    }

    fn subscribe(
        &self,
        session: &Session,
        kind: &str,
        topics: &[String],
        set: fn(&mut Subscriber) -> &mut BTreeSet<String>,
    ) -> Vec<RespValue> {
        let mut sessions = lock(&self.sessions);
        let subscriber = match sessions.get_mut(&session.id) {
            Some(subscriber) => subscriber,
            None => return vec![error("ERR no such session")],
        };
        topics
            .iter()
            .map(|topic| {
                set(subscriber).insert(topic.clone());
                let count = subscriber.count();
                subscriber.frame(vec![
                    kind.into(),
                    topic.as_str().into(),
                    RespValue::Integer(count),
                ])
            })
            .collect()
    }

    fn unsubscribe(
        &self,
        session: &Session,
        kind: &str,
        topics: &[String],
        set: fn(&mut Subscriber) -> &mut BTreeSet<String>,
    ) -> Vec<RespValue> {
        let mut sessions = lock(&self.sessions);
        let subscriber = match sessions.get_mut(&session.id) {
            Some(subscriber) => subscriber,
            None => return vec![error("ERR no such session")],
        };
        let topics: Vec<String> = if topics.is_empty() {
            set(subscriber).iter().cloned().collect()
        } else {
            topics.to_vec()
        };
        if topics.is_empty() {
            let count = subscriber.count();
            return vec![subscriber.frame(vec![
                kind.into(),
                RespValue::Nil,
                RespValue::Integer(count),
            ])];
        }
        topics
            .into_iter()
            .map(|topic| {
                set(subscriber).remove(&topic);
                let count = subscriber.count();
                subscriber.frame(vec![kind.into(), topic.into(), RespValue::Integer(count)])
            })
            .collect()
    }

    fn publish(&self, channel: &str, message: &str) -> i64 {
        let sessions = lock(&self.sessions);
        let mut receivers = 0;
        for subscriber in sessions.values() {
            if subscriber.channels.contains(channel) {
                let frame = subscriber.frame(vec![
                    "message".into(),
                    channel.into(),
                    message.into(),
                ]);
                if subscriber.outbound.unbounded_send(frame).is_ok() {
                    receivers += 1;
                }
            }
            for pattern in &subscriber.patterns {
                if glob_match(pattern.as_bytes(), channel.as_bytes()) {
                    let frame = subscriber.frame(vec![
                        "pmessage".into(),
                        pattern.as_str().into(),
                        channel.into(),
                        message.into(),
                    ]);
                    if subscriber.outbound.unbounded_send(frame).is_ok() {
                        receivers += 1;
                    }
                }
            }
        }
        receivers
    }
}

fn ok() -> RespValue {
    RespValue::SimpleString("OK".into())
}

fn error(msg: &str) -> RespValue {
    RespValue::Error(msg.to_string())
}

/// `*` and `?` wildcards, as used by `PSUBSCRIBE`.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|skip| glob_match(rest, &text[skip..])),
        Some((b'?', rest)) => !text.is_empty() && glob_match(rest, &text[1..]),
        Some((c, rest)) => text.first() == Some(c) && glob_match(rest, &text[1..]),
    }
}

fn command_args(request: RespValue) -> Option<Vec<String>> {
    let parts = match request {
        RespValue::Array(parts) if !parts.is_empty() => parts,
        _ => return None,
    };
    parts
        .into_iter()
        .map(|part| match part {
            RespValue::BulkString(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            _ => None,
        })
        .collect()
}

enum Outgoing {
    Replies(Vec<RespValue>),
    Raw(Vec<u8>),
}

enum Incoming {
    Request(RespValue),
    Push(RespValue),
    HangUp,
}

async fn serve(state: Arc<ServerState>, stream: DuplexStream) {
    let id = state.next_session.fetch_add(1, Ordering::SeqCst);
    let kill = lock(&state.kill).clone();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded();
    lock(&state.sessions).insert(
        id,
        Subscriber {
            channels: BTreeSet::new(),
            patterns: BTreeSet::new(),
            resp3: false,
            outbound: outbound_tx,
        },
    );
    state.live.fetch_add(1, Ordering::SeqCst);

    let mut session = Session {
        id,
        db: 0,
        authed: state.password.is_none(),
        resp3: false,
    };
    let mut framed = RespCodec::default().framed(stream);
    loop {
        let incoming = tokio::select! {
            biased;
            _ = kill.cancelled() => Incoming::HangUp,
            push = outbound_rx.next() => match push {
                Some(push) => Incoming::Push(push),
                None => Incoming::HangUp,
            },
            request = framed.next() => match request {
                Some(Ok(request)) => Incoming::Request(request),
                _ => Incoming::HangUp,
            },
        };

        let outgoing = match incoming {
            Incoming::Push(push) => Outgoing::Replies(vec![push]),
            Incoming::Request(request) => {
                if state.should_hang_up() {
                    break;
                }
                let raw_reply = lock(&state.raw_reply).take();
                match command_args(request) {
                    Some(args) => match raw_reply {
                        Some(bytes) => {
                            lock(&state.commands).push(args.join(" "));
                            Outgoing::Raw(bytes)
                        }
                        None => Outgoing::Replies(state.execute(&mut session, args)),
                    },
                    None => Outgoing::Replies(vec![error(
                        "ERR Protocol error: expected an array of bulk strings",
                    )]),
                }
            }
            Incoming::HangUp => break,
        };
        let sent = match outgoing {
            Outgoing::Replies(replies) => send_replies(&mut framed, replies).await,
            // Replies are flushed as they are sent, so nothing is buffered ahead of these
            Outgoing::Raw(bytes) => framed.get_mut().write_all(&bytes).await,
        };
        if sent.is_err() {
            break;
        }
    }

    lock(&state.sessions).remove(&id);
    state.live.fetch_sub(1, Ordering::SeqCst);
}

async fn send_replies(
    framed: &mut Framed<DuplexStream, RespCodec>,
    replies: Vec<RespValue>,
) -> io::Result<()> {
    for reply in replies {
        framed.feed(reply).await?;
    }
    SinkExt::<RespValue>::flush(framed).await
}

/// The client's end of a mock connection, able to fail writes on request.
struct FlakyStream {
    inner: DuplexStream,
    state: Arc<ServerState>,
}

impl AsyncRead for FlakyStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for FlakyStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.state.take_write_failure() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "Injected write failure",
            )));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::glob_match;

    #[test]
    fn glob_patterns() {
        assert!(glob_match(b"news.*", b"news.sport"));
        assert!(glob_match(b"news.*", b"news."));
        assert!(!glob_match(b"news.*", b"weather"));
        assert!(glob_match(b"h?llo", b"hello"));
        assert!(!glob_match(b"h?llo", b"hllo"));
        assert!(glob_match(b"*", b""));
    }
}
