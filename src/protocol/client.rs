//! Client-side request correlation.
//!
//! Every outgoing request gets a fresh id and a one-shot delivery slot in the
//! pending table. A single reader task owns the inbound side of the transport
//! and hands each response to the slot registered under its id.

use crate::error::{ClientError, ClientResult, ProtocolError};
use crate::protocol::codec::Frame;
use crate::protocol::transport::Transport;
use crate::protocol::types::*;
use crate::schema::methods;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace, warn};

type Slot = oneshot::Sender<ClientResult<RawJson>>;

/// Connection-scoped state shared with the reader task.
struct Shared {
    pending: DashMap<RequestId, Slot>,
    initialized: AtomicBool,
    closed: AtomicBool,
    /// Present only once someone has taken the notification stream.
    subscriber: Mutex<Option<mpsc::UnboundedSender<JsonRpcNotification>>>,
    subscribed: AtomicBool,
}

impl Shared {
    /// Hand a response to its waiter. Unknown ids are dropped.
    fn deliver(&self, response: JsonRpcResponse) {
        let Some((_, slot)) = self.pending.remove(&response.id) else {
            debug!(id = %response.id, "Dropping response with no pending request");
            return;
        };
        let outcome = match response.payload {
            ResponsePayload::Result(result) => Ok(result),
            ResponsePayload::Error(error) => Err(ClientError::Rpc {
                code: error.code,
                message: error.message,
                data: error.data,
            }),
        };
        // The waiter may have gone away in the meantime.
        let _ = slot.send(outcome);
    }

    /// Hand a server notification to the subscriber, or drop it.
    fn forward(&self, notification: JsonRpcNotification) {
        let mut subscriber = self.subscriber.lock();
        let Some(tx) = subscriber.as_ref() else {
            trace!(method = %notification.method, "No notification subscriber, dropping");
            return;
        };
        if tx.send(notification).is_err() {
            trace!("Notification receiver dropped");
            *subscriber = None;
        }
    }

    /// Mark the connection closed and fail every waiter.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let ids: Vec<RequestId> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, slot)) = self.pending.remove(&id) {
                let _ = slot.send(Err(ClientError::ConnectionClosed));
            }
        }
    }
}

/// Removes a pending entry unless the response was delivered.
struct PendingGuard {
    shared: Arc<Shared>,
    id: RequestId,
    armed: bool,
}

impl PendingGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.armed {
            self.shared.pending.remove(&self.id);
        }
    }
}

/// A request that has been written and awaits its response.
///
/// Dropping it retracts the request locally.
pub struct PendingCall {
    id: RequestId,
    method: String,
    rx: oneshot::Receiver<ClientResult<RawJson>>,
    guard: PendingGuard,
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("id", &self.id)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

impl PendingCall {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

/// JSON-RPC client over one connection.
pub struct RpcClient<T: Transport + 'static> {
    transport: Arc<T>,
    shared: Arc<Shared>,
    next_id: AtomicI64,
    request_timeout: Option<Duration>,
    stop: CancellationToken,
    reader: JoinHandle<()>,
}

impl<T: Transport + 'static> RpcClient<T> {
    /// Start the reader task. Must be called inside a tokio runtime.
    pub fn new(transport: Arc<T>) -> Self {
        let shared = Arc::new(Shared {
            pending: DashMap::new(),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            subscriber: Mutex::new(None),
            subscribed: AtomicBool::new(false),
        });
        let stop = CancellationToken::new();
        let reader = spawn_reader(Arc::clone(&transport), Arc::clone(&shared), stop.clone());

        Self {
            transport,
            shared,
            next_id: AtomicI64::new(1),
            request_timeout: None,
            stop,
            reader,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Server-originated notifications. Available once.
    ///
    /// Notifications that arrive before this is called are dropped.
    pub fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<JsonRpcNotification>> {
        if self.shared.subscribed.swap(true, Ordering::SeqCst) {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.subscriber.lock() = Some(tx);
        Some(rx)
    }

    /// Register and write a request.
    ///
    /// Only `initialize` may be sent before the handshake has completed.
    #[instrument(skip_all, fields(method = %method))]
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<RawJson>,
    ) -> ClientResult<PendingCall> {
        if method != methods::INITIALIZE && !self.is_initialized() {
            return Err(ClientError::NotInitialized);
        }
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }

        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(id.clone(), tx);
        let guard = PendingGuard {
            shared: Arc::clone(&self.shared),
            id: id.clone(),
            armed: true,
        };

        // The reader may have drained the table just before the insert.
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }

        let mut request = JsonRpcRequest::new(id.clone(), method);
        request.params = params;
        let line = Envelope::Request(request)
            .encode()
            .map_err(ClientError::Encode)?;
        trace!(%id, "Sending request");
        self.transport.write_line(Bytes::from(line)).await?;

        Ok(PendingCall {
            id,
            method: method.to_string(),
            rx,
            guard,
        })
    }

    /// Wait for the response to a sent request.
    ///
    /// Cancellation or timeout retracts the request; a response arriving
    /// afterwards is discarded by the reader.
    pub async fn await_response(
        &self,
        call: PendingCall,
        cancel: &CancellationToken,
    ) -> ClientResult<RawJson> {
        let PendingCall {
            id,
            method,
            rx,
            mut guard,
        } = call;

        let outcome = tokio::select! {
            biased;
            delivered = rx => {
                guard.disarm();
                delivered.unwrap_or(Err(ClientError::ConnectionClosed))
            }
            () = cancel.cancelled() => {
                debug!(%id, %method, "Request cancelled");
                Err(ClientError::Cancelled)
            }
            () = expire(self.request_timeout) => {
                warn!(%id, %method, "Request timed out");
                Err(ClientError::Timeout(self.request_timeout.unwrap_or_default()))
            }
        };
        drop(guard);

        if method == methods::INITIALIZE && outcome.is_ok() {
            self.shared.initialized.store(true, Ordering::SeqCst);
        }
        outcome
    }

    /// Send a request and wait for its response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<RawJson>,
        cancel: &CancellationToken,
    ) -> ClientResult<RawJson> {
        let call = self.send_request(method, params).await?;
        self.await_response(call, cancel).await
    }

    /// Send a notification. Nothing is registered and nothing comes back.
    pub async fn notify(&self, method: &str, params: Option<RawJson>) -> ClientResult<()> {
        if !self.is_initialized() {
            return Err(ClientError::NotInitialized);
        }
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }

        let mut notification = JsonRpcNotification::new(method);
        notification.params = params;
        let line = Envelope::Notification(notification)
            .encode()
            .map_err(ClientError::Encode)?;
        self.transport.write_line(Bytes::from(line)).await?;
        Ok(())
    }

    /// Stop the reader and fail every outstanding request.
    pub fn close(&self) {
        self.stop.cancel();
        self.shared.close();
    }
}

impl<T: Transport + 'static> Drop for RpcClient<T> {
    fn drop(&mut self) {
        self.stop.cancel();
        self.shared.close();
        self.reader.abort();
    }
}

async fn expire(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

fn spawn_reader<T: Transport + 'static>(
    transport: Arc<T>,
    shared: Arc<Shared>,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                biased;
                () = stop.cancelled() => break,
                frame = transport.read_frame() => frame,
            };

            let line = match frame {
                Ok(Some(Frame::Line(line))) => line,
                Ok(Some(Frame::Oversized { len })) => {
                    warn!(len, "Skipping oversized message");
                    continue;
                }
                Ok(None) => {
                    debug!("Server closed connection");
                    break;
                }
                Err(e) => {
                    error!("Transport error: {}", e);
                    break;
                }
            };

            match Envelope::decode(&line) {
                Ok(Envelope::Response(response)) => shared.deliver(response),
                Ok(Envelope::Notification(notification)) => shared.forward(notification),
                Ok(Envelope::Request(request)) => {
                    if request.method.starts_with(NOTIFICATION_PREFIX) {
                        shared.forward(JsonRpcNotification {
                            jsonrpc: request.jsonrpc,
                            method: request.method,
                            params: request.params,
                        });
                        continue;
                    }
                    // Answer off the reader so it never waits on the write lock.
                    let transport = Arc::clone(&transport);
                    tokio::spawn(async move {
                        debug!(method = %request.method, "Rejecting server request");
                        let response = JsonRpcResponse::error(
                            request.id,
                            ProtocolError::MethodNotFound(request.method).into(),
                        );
                        if let Err(e) = transport.send(&response.into()).await {
                            warn!("Failed to answer server request: {}", e);
                        }
                    });
                }
                Err(e) => warn!(error = %e, "Skipping malformed message"),
            }
        }

        shared.close();
    })
}
