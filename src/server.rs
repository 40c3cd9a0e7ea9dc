//! The server side: accept loop, per-connection dispatcher, Root DSE
//! synthesis and in-band StartTLS upgrade.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Notify};
use tokio::time;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::ber::{BerError, Packet};
use crate::error::{Error, Result};
use crate::messages::{
    password_modify_response_value, parse_abandon, AddRequest, BindRequest, CompareRequest,
    DeleteRequest, ExtendedRequest, ExtendedResponse, ModifyDnRequest, ModifyRequest,
    PasswordModifyRequest, Scope, SearchRequest, SearchResponse, SearchResult,
};
use crate::proto::{
    self, LdapResult, ResultCode, APP_ABANDON_REQUEST, APP_ADD_REQUEST, APP_ADD_RESPONSE,
    APP_BIND_REQUEST, APP_BIND_RESPONSE, APP_COMPARE_REQUEST, APP_COMPARE_RESPONSE,
    APP_DEL_REQUEST, APP_DEL_RESPONSE, APP_EXTENDED_REQUEST, APP_EXTENDED_RESPONSE,
    APP_MODIFY_DN_REQUEST, APP_MODIFY_DN_RESPONSE, APP_MODIFY_REQUEST, APP_MODIFY_RESPONSE,
    APP_SEARCH_REQUEST, APP_UNBIND_REQUEST, OID_PASSWORD_MODIFY, OID_START_TLS, OID_WHO_AM_I,
};

const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
const READ_CHUNK: usize = 4096;

/// Server-side transport: plain TCP or TLS.
pub enum ServerStream {
    Tcp(TcpStream),
    Tls(TlsStream<TcpStream>),
}

impl AsyncRead for ServerStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            ServerStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            ServerStream::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ServerStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            ServerStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            ServerStream::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            ServerStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            ServerStream::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            ServerStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            ServerStream::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

struct ServerInner<B: Backend> {
    backend: B,
    root_dse: HashMap<String, Vec<String>>,
    tls_acceptor: Option<TlsAcceptor>,
    processing_timeout: Duration,
    response_timeout: Duration,
    shutdown: watch::Sender<bool>,
    active: AtomicUsize,
    drained: Notify,
}

/// An LDAP server bound to a [`Backend`].
pub struct Server<B: Backend> {
    inner: Arc<ServerInner<B>>,
}

impl<B: Backend> Clone for Server<B> {
    fn clone(&self) -> Self {
        Server {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> Server<B> {
    pub fn new(backend: B, tls_config: Option<Arc<rustls::ServerConfig>>) -> Server<B> {
        let mut root_dse = proto::default_root_dse();
        if tls_config.is_some() {
            root_dse
                .entry("supportedExtension".to_string())
                .or_default()
                .push(OID_START_TLS.to_string());
        }
        let (shutdown, _) = watch::channel(false);
        Server {
            inner: Arc::new(ServerInner {
                backend,
                root_dse,
                tls_acceptor: tls_config.map(TlsAcceptor::from),
                processing_timeout: DEFAULT_PROCESSING_TIMEOUT,
                response_timeout: DEFAULT_RESPONSE_TIMEOUT,
                shutdown,
                active: AtomicUsize::new(0),
                drained: Notify::new(),
            }),
        }
    }

    /// Replace or extend Root DSE attributes advertised by this server.
    pub fn set_root_dse_attribute(&mut self, name: &str, values: Vec<String>) {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("root DSE must be configured before the server is shared");
        inner.root_dse.insert(name.to_string(), values);
    }

    pub fn set_timeouts(&mut self, processing: Duration, response: Duration) {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("timeouts must be configured before the server is shared");
        inner.processing_timeout = processing;
        inner.response_timeout = response;
    }

    /// Build a server from a [`crate::config::Config`]: TLS credentials,
    /// timeouts and extra Root DSE attributes.
    pub fn from_config(backend: B, config: &crate::config::Config) -> anyhow::Result<Server<B>> {
        let tls_config = match &config.tls {
            Some(tls) => Some(crate::tls::server_config_from_files(
                &tls.cert_file,
                &tls.key_file,
            )?),
            None => None,
        };
        let mut server = Server::new(backend, tls_config);
        server.set_timeouts(config.processing_timeout(), config.response_timeout());
        if let Some(extra) = &config.root_dse {
            for (name, values) in extra {
                server.set_root_dse_attribute(name, values.clone());
            }
        }
        Ok(server)
    }

    /// Listen on `addr` and serve cleartext LDAP until [`Server::shutdown`].
    pub async fn serve(&self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("ldap server listening on {}", listener.local_addr()?);
        self.serve_listener(listener).await
    }

    /// Listen on `addr` and wrap every accepted connection in TLS.
    pub async fn serve_tls(&self, addr: &str) -> Result<()> {
        if self.inner.tls_acceptor.is_none() {
            return Err(Error::protocol("no TLS config"));
        }
        let listener = TcpListener::bind(addr).await?;
        info!("ldaps server listening on {}", listener.local_addr()?);
        self.serve_listener_tls(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve_listener(&self, listener: TcpListener) -> Result<()> {
        self.accept_loop(listener, false).await
    }

    pub async fn serve_listener_tls(&self, listener: TcpListener) -> Result<()> {
        if self.inner.tls_acceptor.is_none() {
            return Err(Error::protocol("no TLS config"));
        }
        self.accept_loop(listener, true).await
    }

    async fn accept_loop(&self, listener: TcpListener, wrap_tls: bool) -> Result<()> {
        let mut shutdown_rx = self.inner.shutdown.subscribe();
        if *shutdown_rx.borrow() {
            return Ok(());
        }
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!("accept failed: {}", e);
                            continue;
                        }
                    };
                    debug!("new connection from {}", peer);
                    let inner = Arc::clone(&self.inner);
                    inner.active.fetch_add(1, Ordering::AcqRel);
                    tokio::spawn(async move {
                        let stream = if wrap_tls {
                            let acceptor = inner.tls_acceptor.clone().expect("checked");
                            match acceptor.accept(stream).await {
                                Ok(tls) => ServerStream::Tls(tls),
                                Err(e) => {
                                    error!("TLS handshake failed for {}: {}", peer, e);
                                    connection_done(&inner);
                                    return;
                                }
                            }
                        } else {
                            ServerStream::Tcp(stream)
                        };
                        if let Err(e) = serve_conn(&inner, stream, peer).await {
                            debug!("connection {} closed: {}", peer, e);
                        }
                        connection_done(&inner);
                    });
                }
                _ = shutdown_rx.changed() => break,
            }
        }
        Ok(())
    }

    /// Stop accepting and wait until in-flight connections drain.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
        loop {
            let notified = self.inner.drained.notified();
            if self.inner.active.load(Ordering::Acquire) == 0 {
                break;
            }
            notified.await;
        }
    }
}

fn connection_done<B: Backend>(inner: &ServerInner<B>) {
    if inner.active.fetch_sub(1, Ordering::AcqRel) == 1 {
        inner.drained.notify_waiters();
    }
}

async fn serve_conn<B: Backend>(
    inner: &Arc<ServerInner<B>>,
    stream: ServerStream,
    peer: SocketAddr,
) -> Result<()> {
    let mut state = match inner.backend.connect(peer).await {
        Ok(state) => state,
        Err(e) => {
            debug!("backend refused connection from {}: {}", peer, e);
            return Ok(());
        }
    };
    let res = conn_loop(inner, stream, &mut state, peer).await;
    inner.backend.disconnect(state).await;
    res
}

/// What the dispatcher wants done with the connection after one message.
enum Action {
    /// Write these application-tagged packets and continue.
    Reply(Vec<Packet>),
    /// No response at all (Abandon).
    None,
    /// Close cleanly (Unbind).
    Close,
    /// Write this reply, then close.
    ReplyThenClose(Packet),
    /// Write this success reply, then run the TLS handshake.
    StartTls(Packet),
}

async fn conn_loop<B: Backend>(
    inner: &Arc<ServerInner<B>>,
    mut stream: ServerStream,
    state: &mut B::State,
    peer: SocketAddr,
) -> Result<()> {
    let mut shutdown_rx = inner.shutdown.subscribe();
    let mut buffer = BytesMut::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        // Drain complete messages already buffered.
        loop {
            let (pkt, consumed) = match Packet::parse(&buffer) {
                Ok(ok) => ok,
                Err(BerError::ShortPacket) => break,
                Err(e) => {
                    warn!("invalid BER from {}: {}", peer, e);
                    return Err(e.into());
                }
            };
            let _ = buffer.split_to(consumed);

            match handle_message(inner, &mut stream, state, pkt, peer).await? {
                Flow::Continue => {}
                Flow::Close => return Ok(()),
                Flow::UpgradeTls => {
                    if !buffer.is_empty() {
                        warn!("{} sent data before the TLS handshake", peer);
                        return Err(Error::protocol("data received before TLS handshake"));
                    }
                    let acceptor = inner.tls_acceptor.clone().expect("checked in dispatch");
                    stream = match stream {
                        ServerStream::Tcp(tcp) => ServerStream::Tls(acceptor.accept(tcp).await?),
                        tls @ ServerStream::Tls(_) => tls,
                    };
                    debug!("{} upgraded to TLS", peer);
                }
            }
        }

        tokio::select! {
            read = stream.read(&mut chunk) => match read {
                Ok(0) => {
                    debug!("{} disconnected", peer);
                    return Ok(());
                }
                Ok(n) => buffer.extend_from_slice(&chunk[..n]),
                Err(e) => return Err(e.into()),
            },
            _ = shutdown_rx.changed() => {
                debug!("closing {} for shutdown", peer);
                return Ok(());
            }
        }
    }
}

enum Flow {
    Continue,
    Close,
    UpgradeTls,
}

async fn handle_message<B: Backend>(
    inner: &Arc<ServerInner<B>>,
    stream: &mut ServerStream,
    state: &mut B::State,
    pkt: Packet,
    peer: SocketAddr,
) -> Result<Flow> {
    // A malformed envelope is fatal to the connection.
    let (msg_id, _) = proto::open_envelope(&pkt)?;
    let op = &pkt.items[1];
    let req_tag = op.tag;
    let is_tls = matches!(stream, ServerStream::Tls(_));

    let action = match time::timeout(
        inner.processing_timeout,
        dispatch(inner, state, is_tls, op),
    )
    .await
    {
        Ok(Ok(action)) => action,
        Ok(Err(e)) => {
            warn!("request from {} failed: {}", peer, e);
            error_action(req_tag, e)
        }
        Err(_) => {
            warn!("request from {} exceeded the processing deadline", peer);
            Action::ReplyThenClose(
                LdapResult::new(ResultCode::TIME_LIMIT_EXCEEDED, "processing deadline exceeded")
                    .to_packet(response_tag(req_tag)),
            )
        }
    };

    match action {
        Action::None => Ok(Flow::Continue),
        Action::Close => Ok(Flow::Close),
        Action::Reply(ops) => {
            write_replies(inner, stream, msg_id, ops).await?;
            Ok(Flow::Continue)
        }
        Action::ReplyThenClose(op) => {
            // Best effort: the connection is closing either way.
            if let Err(e) = write_replies(inner, stream, msg_id, vec![op]).await {
                debug!("failed to flush error reply to {}: {}", peer, e);
            }
            Ok(Flow::Close)
        }
        Action::StartTls(op) => {
            write_replies(inner, stream, msg_id, vec![op]).await?;
            Ok(Flow::UpgradeTls)
        }
    }
}

/// Tag of the response corresponding to a request tag.
fn response_tag(req_tag: u32) -> u32 {
    // Responses follow their request in the application tag registry. For
    // tags without a registered successor fall back to ExtendedResponse.
    if req_tag + 1 <= 30 {
        req_tag + 1
    } else {
        APP_EXTENDED_RESPONSE
    }
}

/// Map a dispatch error to a reply: protocol errors keep the connection,
/// unsupported tags and backend failures close it after one reply.
fn error_action(req_tag: u32, e: Error) -> Action {
    let tag = response_tag(req_tag);
    match e {
        Error::Protocol(msg) => {
            Action::Reply(vec![
                LdapResult::new(ResultCode::PROTOCOL_ERROR, msg).to_packet(tag)
            ])
        }
        Error::UnsupportedTag(t) => Action::ReplyThenClose(
            LdapResult::new(
                ResultCode::UNWILLING_TO_PERFORM,
                format!("unsupported request tag {}", t),
            )
            .to_packet(tag),
        ),
        _ => Action::ReplyThenClose(LdapResult::new(ResultCode::OTHER, "ERROR").to_packet(tag)),
    }
}

async fn dispatch<B: Backend>(
    inner: &Arc<ServerInner<B>>,
    state: &mut B::State,
    is_tls: bool,
    op: &Packet,
) -> Result<Action> {
    match op.tag {
        APP_UNBIND_REQUEST => Ok(Action::Close),
        APP_BIND_REQUEST => {
            let req = BindRequest::parse(op)?;
            let res = inner.backend.bind(state, &req).await?;
            Ok(Action::Reply(vec![res.to_packet(APP_BIND_RESPONSE)]))
        }
        APP_SEARCH_REQUEST => {
            let req = SearchRequest::parse(op)?;
            let resp = if req.base_dn.is_empty() && req.scope == Scope::BaseObject {
                root_dse_response(&inner.root_dse, &req)
            } else {
                inner.backend.search(state, &req).await?
            };
            Ok(Action::Reply(resp.to_packets()))
        }
        APP_ADD_REQUEST => {
            let req = AddRequest::parse(op)?;
            let res = inner.backend.add(state, &req).await?;
            Ok(Action::Reply(vec![res.to_packet(APP_ADD_RESPONSE)]))
        }
        APP_DEL_REQUEST => {
            let req = DeleteRequest::parse(op)?;
            let res = inner.backend.delete(state, &req).await?;
            Ok(Action::Reply(vec![res.to_packet(APP_DEL_RESPONSE)]))
        }
        APP_MODIFY_REQUEST => {
            let req = ModifyRequest::parse(op)?;
            let res = inner.backend.modify(state, &req).await?;
            Ok(Action::Reply(vec![res.to_packet(APP_MODIFY_RESPONSE)]))
        }
        APP_MODIFY_DN_REQUEST => {
            let req = ModifyDnRequest::parse(op)?;
            let res = inner.backend.modify_dn(state, &req).await?;
            Ok(Action::Reply(vec![res.to_packet(APP_MODIFY_DN_RESPONSE)]))
        }
        APP_COMPARE_REQUEST => {
            let req = CompareRequest::parse(op)?;
            let res = inner.backend.compare(state, &req).await?;
            Ok(Action::Reply(vec![res.to_packet(APP_COMPARE_RESPONSE)]))
        }
        APP_ABANDON_REQUEST => {
            // Best-effort cancellation target; there is never a concurrent
            // operation on this connection, and Abandon gets no reply.
            match parse_abandon(op) {
                Ok(id) => debug!("abandon request for message {} ignored", id),
                Err(e) => debug!("unparseable abandon request ignored: {}", e),
            }
            Ok(Action::None)
        }
        APP_EXTENDED_REQUEST => dispatch_extended(inner, state, is_tls, op).await,
        tag => Err(Error::UnsupportedTag(tag)),
    }
}

async fn dispatch_extended<B: Backend>(
    inner: &Arc<ServerInner<B>>,
    state: &mut B::State,
    is_tls: bool,
    op: &Packet,
) -> Result<Action> {
    let req = ExtendedRequest::parse(op)?;
    match req.name.as_str() {
        OID_START_TLS => {
            if is_tls {
                let res = ExtendedResponse {
                    result: LdapResult::new(
                        ResultCode::OPERATIONS_ERROR,
                        "TLS already established",
                    ),
                    name: Some(OID_START_TLS.to_string()),
                    value: None,
                };
                return Ok(Action::Reply(vec![res.to_packet()]));
            }
            if inner.tls_acceptor.is_none() {
                let res = ExtendedResponse {
                    result: LdapResult::new(ResultCode::UNAVAILABLE, "TLS not configured"),
                    name: Some(OID_START_TLS.to_string()),
                    value: None,
                };
                return Ok(Action::Reply(vec![res.to_packet()]));
            }
            let res = ExtendedResponse {
                result: LdapResult::default(),
                name: Some(OID_START_TLS.to_string()),
                value: None,
            };
            Ok(Action::StartTls(res.to_packet()))
        }
        OID_PASSWORD_MODIFY => {
            let pm = match &req.value {
                Some(v) if !v.is_empty() => {
                    let (pkt, _) = Packet::parse(v)?;
                    PasswordModifyRequest::parse(&pkt)?
                }
                _ => PasswordModifyRequest::default(),
            };
            let gen = inner.backend.password_modify(state, &pm).await?;
            let res = ExtendedResponse {
                result: LdapResult::default(),
                name: None,
                value: Some(password_modify_response_value(gen.as_deref())?),
            };
            Ok(Action::Reply(vec![res.to_packet()]))
        }
        OID_WHO_AM_I => {
            let authz = inner.backend.whoami(state).await?;
            let res = ExtendedResponse {
                result: LdapResult::default(),
                name: None,
                value: Some(authz.into_bytes()),
            };
            Ok(Action::Reply(vec![res.to_packet()]))
        }
        _ => {
            let res = inner.backend.extended(state, &req).await?;
            Ok(Action::Reply(vec![res.to_packet()]))
        }
    }
}

/// Synthesize the Root DSE entry for a base-scope search at the empty DN.
fn root_dse_response(
    root_dse: &HashMap<String, Vec<String>>,
    req: &SearchRequest,
) -> SearchResponse {
    let mut entry = SearchResult::default();
    if req.attributes.is_empty() {
        entry
            .attributes
            .insert("objectClass".to_string(), vec![b"top".to_vec()]);
    } else {
        let requested: HashSet<String> = req
            .attributes
            .iter()
            .map(|a| a.to_ascii_lowercase())
            .collect();
        let all_operational = requested.contains("+");
        for (name, values) in root_dse {
            if all_operational || requested.contains(&name.to_ascii_lowercase()) {
                entry.attributes.insert(
                    name.clone(),
                    values.iter().map(|v| v.as_bytes().to_vec()).collect(),
                );
            }
        }
    }
    SearchResponse {
        result: LdapResult::default(),
        results: vec![entry],
    }
}

/// Write the envelopes for one request's replies under the response
/// deadline. The deadline covers the whole write and clears with the flush.
async fn write_replies<B: Backend>(
    inner: &ServerInner<B>,
    stream: &mut ServerStream,
    msg_id: i64,
    ops: Vec<Packet>,
) -> Result<()> {
    let mut buf = Vec::new();
    for op in ops {
        buf.extend_from_slice(&proto::envelope(msg_id, op).encode()?);
    }
    match time::timeout(inner.response_timeout, async {
        stream.write_all(&buf).await?;
        stream.flush().await?;
        Ok::<(), Error>(())
    })
    .await
    {
        Ok(res) => res,
        Err(_) => Err(Error::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            "response write deadline exceeded",
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::messages::DerefAliases;

    fn dse() -> HashMap<String, Vec<String>> {
        let mut dse = proto::default_root_dse();
        dse.insert("vendorName".to_string(), vec!["example".to_string()]);
        dse
    }

    fn root_req(attrs: &[&str]) -> SearchRequest {
        SearchRequest {
            base_dn: String::new(),
            scope: Scope::BaseObject,
            deref_aliases: DerefAliases::Never,
            size_limit: 0,
            time_limit: 0,
            types_only: false,
            filter: Filter::Present {
                attribute: "objectClass".into(),
            },
            attributes: attrs.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn root_dse_default_is_object_class_top() {
        let resp = root_dse_response(&dse(), &root_req(&[]));
        assert_eq!(resp.results.len(), 1);
        let entry = &resp.results[0];
        assert_eq!(entry.dn, "");
        assert_eq!(entry.attributes["objectClass"], vec![b"top".to_vec()]);
        assert_eq!(entry.attributes.len(), 1);
    }

    #[test]
    fn root_dse_matches_case_insensitively() {
        let resp = root_dse_response(&dse(), &root_req(&["SUPPORTEDldapVERSION"]));
        let entry = &resp.results[0];
        assert_eq!(entry.attributes["supportedLDAPVersion"], vec![b"3".to_vec()]);
        assert!(!entry.attributes.contains_key("vendorName"));
    }

    #[test]
    fn root_dse_plus_returns_all_operational_attributes() {
        let resp = root_dse_response(&dse(), &root_req(&["+"]));
        let entry = &resp.results[0];
        assert!(entry.attributes.contains_key("supportedLDAPVersion"));
        assert!(entry.attributes.contains_key("supportedFeatures"));
        assert!(entry.attributes.contains_key("vendorName"));
    }

    #[test]
    fn response_tag_follows_request() {
        assert_eq!(response_tag(APP_BIND_REQUEST), APP_BIND_RESPONSE);
        assert_eq!(response_tag(APP_DEL_REQUEST), APP_DEL_RESPONSE);
        assert_eq!(response_tag(30), APP_EXTENDED_RESPONSE);
    }

    #[test]
    fn error_action_policy() {
        match error_action(APP_BIND_REQUEST, Error::protocol("bad")) {
            Action::Reply(ops) => {
                let res = LdapResult::parse(&ops[0]).unwrap();
                assert_eq!(res.code, ResultCode::PROTOCOL_ERROR);
                assert_eq!(res.message, "bad");
            }
            _ => panic!("protocol errors keep the connection"),
        }
        match error_action(20, Error::UnsupportedTag(20)) {
            Action::ReplyThenClose(op) => {
                let res = LdapResult::parse(&op).unwrap();
                assert_eq!(res.code, ResultCode::UNWILLING_TO_PERFORM);
                assert!(res.message.contains("20"));
            }
            _ => panic!("unsupported tags close after one reply"),
        }
        match error_action(APP_BIND_REQUEST, Error::ConnectionClosed) {
            Action::ReplyThenClose(op) => {
                let res = LdapResult::parse(&op).unwrap();
                assert_eq!(res.code, ResultCode::OTHER);
            }
            _ => panic!("other errors close after one reply"),
        }
    }

    #[test]
    fn start_tls_advertised_only_with_tls_config() {
        let server = Server::new(crate::backend::DebugBackend, None);
        assert!(!server.inner.root_dse["supportedExtension"]
            .iter()
            .any(|v| v == OID_START_TLS));
    }

    #[test]
    fn from_config_applies_timeouts() {
        let config = crate::config::Config::from_str(
            "listen:\n  url: ldap://127.0.0.1:1389\nlimits:\n  processing_timeout_sec: 3\n",
        )
        .unwrap();
        let server = Server::from_config(crate::backend::DebugBackend, &config).unwrap();
        assert_eq!(server.inner.processing_timeout, Duration::from_secs(3));
        assert_eq!(server.inner.response_timeout, Duration::from_secs(5));
        assert!(server.inner.tls_acceptor.is_none());
    }
}
