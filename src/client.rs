//! LDAP client with a message-ID multiplexer over one stream.
//!
//! One send task serializes requests, one receive task routes responses to
//! the callers waiting in the pending map. The transport halves can be
//! reclaimed from both tasks through pause gates, which is how StartTLS
//! swaps the stream underneath a live mux.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::AbortHandle;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::ber::Packet;
use crate::error::{Error, Result};
use crate::messages::{
    BindRequest, CompareRequest, DeleteRequest, ExtendedRequest, ExtendedResponse, Mod,
    ModifyDnRequest, ModifyRequest, PasswordModifyRequest, SearchRequest, SearchResult,
    parse_password_modify_response_value, AddRequest,
};
use crate::proto::{
    self, LdapResult, ResultCode, APP_SEARCH_RESULT_DONE, APP_SEARCH_RESULT_ENTRY,
    APP_SEARCH_RESULT_REFERENCE,
};

/// Outstanding requests queued for the send task.
const REQUEST_QUEUE_CAPACITY: usize = 16;
/// Delivery buffer for search responses, sized so the receive task is not
/// held up by a consumer that lags a few entries behind.
const SEARCH_CHANNEL_CAPACITY: usize = 128;

/// Client-side transport: plain TCP or TLS.
pub enum ClientStream {
    Tcp(TcpStream),
    Tls(TlsStream<TcpStream>),
}

impl AsyncRead for ClientStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            ClientStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            ClientStream::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClientStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            ClientStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            ClientStream::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            ClientStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            ClientStream::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            ClientStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            ClientStream::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

type ReadEnd = io::ReadHalf<ClientStream>;
type WriteEnd = io::WriteHalf<ClientStream>;

/// Message-ID → delivery channel, with a tombstone so an entry can never be
/// registered after the receive loop has already torn the map down.
#[derive(Default)]
struct Pending {
    map: HashMap<u32, mpsc::Sender<Result<Packet>>>,
    closed: bool,
}

type PendingMap = Arc<Mutex<Pending>>;

/// Sentinel handed to a loop: yield your stream half, then wait for a
/// (possibly different) half before resuming.
struct PauseGate<T> {
    give: oneshot::Sender<T>,
    take: oneshot::Receiver<T>,
}

struct QueuedRequest {
    id: u32,
    pkt: Packet,
    tx: mpsc::Sender<Result<Packet>>,
}

pub struct Client {
    msg_id: AtomicU32,
    is_tls: AtomicBool,
    rq: mpsc::Sender<QueuedRequest>,
    pending: PendingMap,
    pause_send: mpsc::Sender<PauseGate<WriteEnd>>,
    pause_recv: mpsc::Sender<PauseGate<ReadEnd>>,
    send_task: AbortHandle,
    recv_task: AbortHandle,
}

impl Client {
    /// Wrap an established connection. The stream is owned by the client
    /// from here on.
    pub fn new(stream: ClientStream, is_tls: bool) -> Client {
        let (rd, wr) = io::split(stream);
        let (rq_tx, rq_rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let (pause_send_tx, pause_send_rx) = mpsc::channel(1);
        let (pause_recv_tx, pause_recv_rx) = mpsc::channel(1);
        let pending: PendingMap = Arc::new(Mutex::new(Pending::default()));

        let send_task = tokio::spawn(send_loop(
            BufWriter::new(wr),
            rq_rx,
            Arc::clone(&pending),
            pause_send_rx,
        ))
        .abort_handle();
        let recv_task =
            tokio::spawn(recv_loop(rd, Arc::clone(&pending), pause_recv_rx)).abort_handle();

        Client {
            msg_id: AtomicU32::new(1),
            is_tls: AtomicBool::new(is_tls),
            rq: rq_tx,
            pending,
            pause_send: pause_send_tx,
            pause_recv: pause_recv_tx,
            send_task,
            recv_task,
        }
    }

    /// Connect to a server without TLS.
    pub async fn dial(addr: &str) -> Result<Client> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Client::new(ClientStream::Tcp(stream), false))
    }

    /// Connect to a server over TLS.
    pub async fn dial_tls(
        addr: &str,
        config: Arc<rustls::ClientConfig>,
        server_name: &str,
    ) -> Result<Client> {
        let stream = TcpStream::connect(addr).await?;
        let name = rustls::pki_types::ServerName::try_from(server_name.to_string())
            .map_err(|_| Error::InvalidServerName(server_name.to_string()))?;
        let tls = TlsConnector::from(config).connect(name, stream).await?;
        Ok(Client::new(ClientStream::Tls(tls), true))
    }

    fn next_id(&self) -> u32 {
        self.msg_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn enqueue(
        &self,
        op: Packet,
        capacity: usize,
    ) -> Result<(u32, mpsc::Receiver<Result<Packet>>)> {
        let id = self.next_id();
        let (tx, rx) = mpsc::channel(capacity);
        let pkt = proto::envelope(i64::from(id), op);
        self.rq
            .send(QueuedRequest { id, pkt, tx })
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        Ok((id, rx))
    }

    async fn finish_message(&self, id: u32) {
        self.pending.lock().await.map.remove(&id);
    }

    /// Send one request and wait for its single response packet.
    async fn request(&self, op: Packet) -> Result<Packet> {
        let (id, mut rx) = self.enqueue(op, 1).await?;
        let res = rx.recv().await.ok_or(Error::ConnectionClosed);
        self.finish_message(id).await;
        res?
    }

    /// Authenticate with a simple bind.
    pub async fn bind(&self, dn: &str, password: &[u8]) -> Result<()> {
        let req = BindRequest {
            dn: dn.to_string(),
            password: password.to_vec(),
        };
        let pkt = self.request(req.to_packet()).await?;
        LdapResult::parse(&pkt)?.into_result()
    }

    /// Delete an entry.
    pub async fn delete(&self, dn: &str) -> Result<()> {
        let req = DeleteRequest { dn: dn.to_string() };
        let pkt = self.request(req.to_packet()).await?;
        LdapResult::parse(&pkt)?.into_result()
    }

    /// Apply a sequence of modifications to an entry.
    pub async fn modify(&self, dn: &str, mods: Vec<Mod>) -> Result<()> {
        let req = ModifyRequest {
            dn: dn.to_string(),
            mods,
        };
        let pkt = self.request(req.to_packet()).await?;
        LdapResult::parse(&pkt)?.into_result()
    }

    /// Add an entry.
    pub async fn add(&self, req: &AddRequest) -> Result<()> {
        let pkt = self.request(req.to_packet()).await?;
        LdapResult::parse(&pkt)?.into_result()
    }

    /// Rename or move an entry.
    pub async fn modify_dn(&self, req: &ModifyDnRequest) -> Result<()> {
        let pkt = self.request(req.to_packet()).await?;
        LdapResult::parse(&pkt)?.into_result()
    }

    /// Compare an attribute value assertion against an entry.
    pub async fn compare(&self, dn: &str, attribute: &str, value: &[u8]) -> Result<bool> {
        let req = CompareRequest {
            dn: dn.to_string(),
            attribute: attribute.to_string(),
            value: value.to_vec(),
        };
        let pkt = self.request(req.to_packet()).await?;
        let res = LdapResult::parse(&pkt)?;
        if res.code == ResultCode::COMPARE_TRUE {
            Ok(true)
        } else if res.code == ResultCode::COMPARE_FALSE {
            Ok(false)
        } else {
            res.into_result()?;
            Err(Error::protocol("compare response without compare result"))
        }
    }

    /// Run a search, collecting entries until the server sends done.
    /// Search references are not chased.
    pub async fn search(&self, req: &SearchRequest) -> Result<Vec<SearchResult>> {
        let (id, mut rx) = self.enqueue(req.to_packet(), SEARCH_CHANNEL_CAPACITY).await?;
        let mut results = Vec::new();
        let outcome: Result<()> = loop {
            let Some(item) = rx.recv().await else {
                break Err(Error::ConnectionClosed);
            };
            let pkt = match item {
                Ok(p) => p,
                Err(e) => break Err(e),
            };
            match pkt.tag {
                APP_SEARCH_RESULT_ENTRY => match SearchResult::parse(&pkt) {
                    Ok(entry) => results.push(entry),
                    Err(e) => break Err(e),
                },
                APP_SEARCH_RESULT_REFERENCE => {}
                APP_SEARCH_RESULT_DONE => {
                    break LdapResult::parse(&pkt).and_then(LdapResult::into_result)
                }
                _ => break Err(Error::protocol("unexpected tag for search response")),
            }
        };
        self.finish_message(id).await;
        outcome.map(|()| results)
    }

    /// Issue an arbitrary extended request.
    pub async fn extended(&self, name: &str, value: Option<Vec<u8>>) -> Result<ExtendedResponse> {
        let req = ExtendedRequest {
            name: name.to_string(),
            value,
        };
        let pkt = self.request(req.to_packet()).await?;
        ExtendedResponse::parse(&pkt)
    }

    /// Ask the server for the authorization identity of this connection
    /// (RFC 4532).
    pub async fn whoami(&self) -> Result<String> {
        let res = self.extended(proto::OID_WHO_AM_I, None).await?;
        res.result.into_result()?;
        match res.value {
            Some(v) if !v.is_empty() => Ok(String::from_utf8_lossy(&v).into_owned()),
            _ => Ok("anonymous".to_string()),
        }
    }

    /// Change a password (RFC 3062). Returns the generated password when the
    /// server chose one.
    pub async fn password_modify(
        &self,
        user_identity: Option<&str>,
        old_password: Option<&[u8]>,
        new_password: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>> {
        let req = PasswordModifyRequest {
            user_identity: user_identity.map(str::to_string),
            old_password: old_password.map(<[u8]>::to_vec),
            new_password: new_password.map(<[u8]>::to_vec),
        };
        let res = self
            .extended(proto::OID_PASSWORD_MODIFY, Some(req.to_value()?))
            .await?;
        res.result.into_result()?;
        match res.value {
            Some(v) => parse_password_modify_response_value(&v),
            None => Ok(None),
        }
    }

    /// Upgrade the connection to TLS in band (RFC 4511 StartTLS).
    ///
    /// Both mux loops are quiesced after their current packet, the extended
    /// request runs over the old stream, then the raw connection is wrapped
    /// and both loops resume on the TLS stream. Must not be called
    /// concurrently with other requests on this client.
    pub async fn start_tls(
        &self,
        config: Arc<rustls::ClientConfig>,
        server_name: &str,
    ) -> Result<()> {
        if self.is_tls.load(Ordering::Acquire) {
            return Err(Error::AlreadyTls);
        }
        let name = rustls::pki_types::ServerName::try_from(server_name.to_string())
            .map_err(|_| Error::InvalidServerName(server_name.to_string()))?;

        let (give_wr_tx, give_wr_rx) = oneshot::channel();
        let (take_wr_tx, take_wr_rx) = oneshot::channel();
        let (give_rd_tx, give_rd_rx) = oneshot::channel();
        let (take_rd_tx, take_rd_rx) = oneshot::channel();
        self.pause_send
            .send(PauseGate {
                give: give_wr_tx,
                take: take_wr_rx,
            })
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        self.pause_recv
            .send(PauseGate {
                give: give_rd_tx,
                take: take_rd_rx,
            })
            .await
            .map_err(|_| Error::ConnectionClosed)?;

        let response = self
            .request(ExtendedRequest::new(proto::OID_START_TLS).to_packet())
            .await;

        // The send loop parks right after writing the request, the receive
        // loop right after delivering the response; collect both halves.
        let wr = give_wr_rx.await.map_err(|_| Error::ConnectionClosed)?;
        let rd = give_rd_rx.await.map_err(|_| Error::ConnectionClosed)?;

        let accepted = response.and_then(|pkt| {
            let res = ExtendedResponse::parse(&pkt)?;
            res.result.into_result()
        });
        if let Err(e) = accepted {
            // Resume on the untouched stream.
            let _ = take_wr_tx.send(wr);
            let _ = take_rd_tx.send(rd);
            return Err(e);
        }

        let tcp = match rd.unsplit(wr) {
            ClientStream::Tcp(tcp) => tcp,
            ClientStream::Tls(_) => return Err(Error::AlreadyTls),
        };
        let tls = TlsConnector::from(config).connect(name, tcp).await?;
        let (rd, wr) = io::split(ClientStream::Tls(tls));
        let _ = take_wr_tx.send(wr);
        let _ = take_rd_tx.send(rd);
        self.is_tls.store(true, Ordering::Release);
        Ok(())
    }

    /// Tear down the connection. In-flight callers observe closure.
    pub async fn close(&self) {
        self.send_task.abort();
        self.recv_task.abort();
        let mut pending = self.pending.lock().await;
        pending.closed = true;
        pending.map.clear();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.send_task.abort();
        self.recv_task.abort();
    }
}

async fn write_request(wr: &mut BufWriter<WriteEnd>, pkt: &Packet) -> Result<()> {
    pkt.write(wr).await?;
    wr.flush().await?;
    Ok(())
}

/// Only this task writes the transport. The pending entry is inserted after
/// the flush; responses cannot arrive for an ID before its request bytes
/// are on the wire.
async fn send_loop(
    mut wr: BufWriter<WriteEnd>,
    mut rq: mpsc::Receiver<QueuedRequest>,
    pending: PendingMap,
    mut pause: mpsc::Receiver<PauseGate<WriteEnd>>,
) {
    while let Some(req) = rq.recv().await {
        if let Err(e) = write_request(&mut wr, &req.pkt).await {
            debug!("ldap client: error on send: {}", e);
            let _ = req.tx.send(Err(e)).await;
            break;
        }
        {
            let mut p = pending.lock().await;
            if p.closed {
                // Receive side is gone; dropping tx wakes the caller.
                break;
            }
            p.map.insert(req.id, req.tx);
        }

        if let Ok(gate) = pause.try_recv() {
            // Buffer is empty after the flush above.
            let raw = wr.into_inner();
            if gate.give.send(raw).is_err() {
                break;
            }
            match gate.take.await {
                Ok(raw) => wr = BufWriter::new(raw),
                Err(_) => break,
            }
        }
    }
}

/// Only this task reads the transport. Unknown message IDs are logged and
/// dropped; a dead connection wakes every pending caller by clearing the
/// map, which closes their delivery channels.
async fn recv_loop(mut rd: ReadEnd, pending: PendingMap, mut pause: mpsc::Receiver<PauseGate<ReadEnd>>) {
    loop {
        let pkt = match Packet::read(&mut rd).await {
            Ok(pkt) => pkt,
            Err(e) => {
                debug!("ldap client: error on receive: {}", e);
                break;
            }
        };
        let msg_id = match proto::open_envelope(&pkt) {
            Ok((id, _)) => id,
            Err(e) => {
                warn!("ldap client: invalid response packet: {}", e);
                break;
            }
        };
        let op = pkt.items.into_iter().nth(1).expect("envelope validated");

        let tx = pending.lock().await.map.get(&(msg_id as u32)).cloned();
        match tx {
            Some(tx) => {
                let _ = tx.send(Ok(op)).await;
            }
            None => debug!("ldap client: response for unknown message id {}", msg_id),
        }

        if let Ok(gate) = pause.try_recv() {
            if gate.give.send(rd).is_err() {
                break;
            }
            match gate.take.await {
                Ok(raw) => rd = raw,
                Err(_) => break,
            }
        }
    }
    let mut p = pending.lock().await;
    p.closed = true;
    p.map.clear();
}
