//! Message exchanges: the per-thread conversation state.
//!
//! A [`MessageExchange`] records the ordered messages of one thread together
//! with out-of-band attachments (connection, invitation, wallet, DID
//! documents) and a set of futures for replies the local party is waiting
//! for.
//!
//! # Futures
//!
//! A protocol step that expects a reply places a future keyed by the reply's
//! message type. When the reply arrives the receiving protocol completes the
//! future, and the waiting step resumes from
//! [`MessageExchange::await_endpoint_message`]:
//!
//! ```rust
//! use std::time::Duration;
//! use didcomm_agent_core::{EndpointMessage, MessageExchange, Result};
//!
//! # async fn example(reply: EndpointMessage) -> Result<()> {
//! let mex = MessageExchange::new("thread-1", None);
//! mex.place_endpoint_message_future("https://didcomm.org/trust_ping/1.0/ping_response")?;
//! mex.complete_endpoint_message_future("https://didcomm.org/trust_ping/1.0/ping_response", reply)?;
//! let reply = mex
//!     .await_endpoint_message(
//!         "https://didcomm.org/trust_ping/1.0/ping_response",
//!         Duration::from_secs(10),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

use crate::attachment::{AttachmentKey, Attachments};
use crate::connection::SharedConnection;
use crate::did::DidDoc;
use crate::endpoint::EndpointMessage;
use crate::error::{Error, Result};
use crate::invitation::SharedInvitation;

/// The connection the exchange runs on.
pub const CONNECTION: AttachmentKey<SharedConnection> = AttachmentKey::new("Connection");
/// The invitation the exchange was started from.
pub const INVITATION: AttachmentKey<SharedInvitation> = AttachmentKey::new("Invitation");
/// Id of the wallet that owns the exchange.
pub const WALLET: AttachmentKey<String> = AttachmentKey::new("Wallet");
/// DID document of the DID exchange requester.
pub const REQUESTER_DID_DOC: AttachmentKey<DidDoc> = AttachmentKey::new("RequesterDidDoc");
/// DID document of the DID exchange responder.
pub const RESPONDER_DID_DOC: AttachmentKey<DidDoc> = AttachmentKey::new("ResponderDidDoc");
/// A presentation received by a verifier.
pub const PRESENTATION: AttachmentKey<Value> = AttachmentKey::new("Presentation");

#[derive(Debug)]
enum FutureSlot {
    Pending,
    Completed(EndpointMessage),
}

#[derive(Debug, Default)]
struct ExchangeState {
    messages: Vec<EndpointMessage>,
    futures: HashMap<String, FutureSlot>,
    attachments: Attachments,
}

/// The messages and state of one conversation thread.
pub struct MessageExchange {
    id: String,
    thread_id: String,
    parent: Option<Arc<MessageExchange>>,
    state: Mutex<ExchangeState>,
    notify: Notify,
}

impl MessageExchange {
    /// Creates an empty exchange for `thread_id`.
    pub fn new(thread_id: impl Into<String>, parent: Option<Arc<MessageExchange>>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            parent,
            state: Mutex::new(ExchangeState::default()),
            notify: Notify::new(),
        }
    }

    /// Unique exchange id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The thread every message of this exchange belongs to.
    #[must_use]
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// The exchange this one was spun off from.
    #[must_use]
    pub fn parent(&self) -> Option<&Arc<MessageExchange>> {
        self.parent.as_ref()
    }

    fn lock(&self) -> MutexGuard<'_, ExchangeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a message to the log.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ThreadMismatch`] if the message belongs to another
    /// thread.
    pub fn add_message(&self, msg: EndpointMessage) -> Result<()> {
        if msg.thid() != self.thread_id {
            return Err(Error::ThreadMismatch {
                expected: self.thread_id.clone(),
                actual: msg.thid().to_string(),
            });
        }
        info!(
            mex = %self.id,
            thid = %self.thread_id,
            message_type = msg.message_type().unwrap_or("none"),
            "Add message {}",
            msg.id()
        );
        self.lock().messages.push(msg);
        Ok(())
    }

    /// A copy of the message log.
    #[must_use]
    pub fn messages(&self) -> Vec<EndpointMessage> {
        self.lock().messages.clone()
    }

    /// The most recent message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingContext`] if the log is empty.
    pub fn last(&self) -> Result<EndpointMessage> {
        self.lock()
            .messages
            .last()
            .cloned()
            .ok_or(Error::MissingContext("message"))
    }

    /// Ensures the most recent message has the expected type.
    ///
    /// # Errors
    ///
    /// Fails if the log is empty or the type differs.
    pub fn check_last_message_type(&self, expected: &str) -> Result<()> {
        self.last()?.check_message_type(expected)
    }

    /// Registers interest in the next message of `message_type`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FutureAlreadyPlaced`] while a previous future for the
    /// same type is pending or completed but not yet awaited.
    pub fn place_endpoint_message_future(&self, message_type: &str) -> Result<()> {
        let mut state = self.lock();
        if state.futures.contains_key(message_type) {
            return Err(Error::FutureAlreadyPlaced(message_type.to_string()));
        }
        state
            .futures
            .insert(message_type.to_string(), FutureSlot::Pending);
        debug!(mex = %self.id, message_type, "Placed future");
        Ok(())
    }

    /// Whether a future for `message_type` is waiting to be completed.
    #[must_use]
    pub fn has_endpoint_message_future(&self, message_type: &str) -> bool {
        matches!(
            self.lock().futures.get(message_type),
            Some(FutureSlot::Pending)
        )
    }

    /// Completes the pending future for `message_type`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchFuture`] if no future for the type is pending.
    pub fn complete_endpoint_message_future(
        &self,
        message_type: &str,
        msg: EndpointMessage,
    ) -> Result<()> {
        {
            let mut state = self.lock();
            let slot = state
                .futures
                .get_mut(message_type)
                .filter(|slot| matches!(slot, FutureSlot::Pending))
                .ok_or_else(|| Error::NoSuchFuture(message_type.to_string()))?;
            *slot = FutureSlot::Completed(msg);
        }
        debug!(mex = %self.id, message_type, "Completed future");
        self.notify.notify_waiters();
        Ok(())
    }

    /// Waits for the future of `message_type` to complete and consumes it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if no completed future is available within
    /// `timeout`. A pending future is discarded on timeout. A completion that
    /// lands at the deadline is still returned, so no slot for the type
    /// outlives the call.
    pub async fn await_endpoint_message(
        &self,
        message_type: &str,
        timeout: Duration,
    ) -> Result<EndpointMessage> {
        debug!(mex = %self.id, message_type, ?timeout, "Wait for future");
        let wait = async {
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if let Some(msg) = self.take_completed(message_type) {
                    return msg;
                }
                notified.await;
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(msg) => {
                debug!(mex = %self.id, message_type, "Consumed future");
                Ok(msg)
            }
            Err(_) => {
                let slot = self.lock().futures.remove(message_type);
                if let Some(FutureSlot::Completed(msg)) = slot {
                    debug!(mex = %self.id, message_type, "Consumed future at deadline");
                    return Ok(msg);
                }
                Err(Error::Timeout {
                    message_type: message_type.to_string(),
                    timeout,
                })
            }
        }
    }

    fn take_completed(&self, message_type: &str) -> Option<EndpointMessage> {
        let mut state = self.lock();
        match state.futures.remove(message_type) {
            Some(FutureSlot::Completed(msg)) => Some(msg),
            Some(pending) => {
                state.futures.insert(message_type.to_string(), pending);
                None
            }
            None => None,
        }
    }

    /// The connection of this exchange.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingContext`] if none is set.
    pub fn connection(&self) -> Result<SharedConnection> {
        self.attachment(CONNECTION)
            .ok_or(Error::MissingContext("connection"))
    }

    /// Sets the connection of this exchange.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] if a different connection is
    /// already set.
    pub fn set_connection(&self, con: SharedConnection) -> Result<()> {
        let mut state = self.lock();
        if let Some(existing) = state.attachments.get(CONNECTION) {
            if !existing.ptr_eq(&con) {
                return Err(Error::violation(format!(
                    "Connection already set on mex={}",
                    self.id
                )));
            }
        }
        state.attachments.put(CONNECTION, con);
        Ok(())
    }

    /// The invitation this exchange was started from.
    #[must_use]
    pub fn invitation(&self) -> Option<SharedInvitation> {
        self.attachment(INVITATION)
    }

    /// Id of the owning wallet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingContext`] if none is set.
    pub fn wallet_id(&self) -> Result<String> {
        self.attachment(WALLET).ok_or(Error::MissingContext("wallet"))
    }

    /// A copy of the attachment under `key`.
    #[must_use]
    pub fn attachment<T: Any + Clone + Send + Sync>(&self, key: AttachmentKey<T>) -> Option<T> {
        self.lock().attachments.get(key).cloned()
    }

    /// Stores an attachment, replacing any previous value.
    pub fn put_attachment<T: Any + Send + Sync>(&self, key: AttachmentKey<T>, value: T) {
        self.lock().attachments.put(key, value);
    }

    /// Whether an attachment is stored under `key`.
    #[must_use]
    pub fn has_attachment<T>(&self, key: AttachmentKey<T>) -> bool {
        self.lock().attachments.contains(key)
    }

    /// Compact description for logs.
    #[must_use]
    pub fn short_string(&self) -> String {
        let state = self.lock();
        let verkey = state
            .attachments
            .get(CONNECTION)
            .map(|con| con.read().my_did.verkey.clone());
        format!(
            "[id={}, thid={}, size={}, verkey={}]",
            self.id,
            self.thread_id,
            state.messages.len(),
            verkey.as_deref().unwrap_or("none")
        )
    }

    /// Logs the message log at info level.
    pub fn show_messages(&self, name: &str) {
        info!("MessageExchange ({name}) {}", self.short_string());
        for msg in &self.lock().messages {
            info!(
                "+ (id={}, thid={}) {}",
                msg.id(),
                msg.thid(),
                msg.message_type().unwrap_or("none")
            );
        }
    }
}

impl fmt::Debug for MessageExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageExchange")
            .field("id", &self.id)
            .field("thread_id", &self.thread_id)
            .field("parent", &self.parent.as_ref().map(|p| p.id.as_str()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{AgentType, Connection, ConnectionParams, ConnectionRole};
    use crate::did::{Did, DidMethod};
    use serde_json::json;

    const PING_RESPONSE: &str = "https://didcomm.org/trust_ping/1.0/ping_response";

    fn message(id: &str, thid: &str, typ: &str) -> EndpointMessage {
        let body = json!({ "@id": id, "@type": typ, "~thread": { "thid": thid } }).to_string();
        EndpointMessage::builder(body).build().unwrap()
    }

    fn connection() -> SharedConnection {
        Connection::new(ConnectionParams {
            invitation_key: "inv".to_string(),
            agent: AgentType::Native,
            my_did: Did::generate(DidMethod::Key),
            my_role: ConnectionRole::Inviter,
            my_label: "Faber".to_string(),
            my_endpoint: None,
            their_did: None,
            their_role: ConnectionRole::Invitee,
            their_label: None,
            their_endpoint: None,
        })
        .shared()
    }

    #[test]
    fn test_add_message_enforces_thread() {
        let mex = MessageExchange::new("t-1", None);
        mex.add_message(message("m-1", "t-1", "a")).unwrap();
        let err = mex.add_message(message("m-2", "t-2", "b")).unwrap_err();
        assert!(matches!(err, Error::ThreadMismatch { .. }));
        assert_eq!(mex.messages().len(), 1);
        assert_eq!(mex.last().unwrap().id(), "m-1");
        assert!(mex.check_last_message_type("a").is_ok());
        assert!(mex.check_last_message_type("b").is_err());
    }

    #[test]
    fn test_empty_log() {
        let mex = MessageExchange::new("t-1", None);
        assert!(matches!(mex.last(), Err(Error::MissingContext("message"))));
    }

    #[tokio::test]
    async fn test_place_complete_await() {
        let mex = Arc::new(MessageExchange::new("t-1", None));
        mex.place_endpoint_message_future(PING_RESPONSE).unwrap();
        assert!(mex.has_endpoint_message_future(PING_RESPONSE));

        let waiter = {
            let mex = Arc::clone(&mex);
            tokio::spawn(async move {
                mex.await_endpoint_message(PING_RESPONSE, Duration::from_secs(5))
                    .await
            })
        };
        tokio::task::yield_now().await;

        mex.complete_endpoint_message_future(PING_RESPONSE, message("m-1", "t-1", PING_RESPONSE))
            .unwrap();
        let received = waiter.await.unwrap().unwrap();
        assert_eq!(received.id(), "m-1");

        let err = mex
            .await_endpoint_message(PING_RESPONSE, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_concurrent_await_delivers_once() {
        let mex = Arc::new(MessageExchange::new("t-1", None));
        mex.place_endpoint_message_future(PING_RESPONSE).unwrap();

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let mex = Arc::clone(&mex);
                tokio::spawn(async move {
                    mex.await_endpoint_message(PING_RESPONSE, Duration::from_millis(200))
                        .await
                })
            })
            .collect();
        tokio::task::yield_now().await;
        mex.complete_endpoint_message_future(PING_RESPONSE, message("m-1", "t-1", PING_RESPONSE))
            .unwrap();

        let mut delivered = 0;
        let mut timed_out = 0;
        for waiter in waiters {
            match waiter.await.unwrap() {
                Ok(_) => delivered += 1,
                Err(err) if err.is_timeout() => timed_out += 1,
                Err(err) => panic!("unexpected error: {err}"),
            }
        }
        assert_eq!((delivered, timed_out), (1, 1));
    }

    #[test]
    fn test_place_twice_fails_until_consumed() {
        let mex = MessageExchange::new("t-1", None);
        mex.place_endpoint_message_future(PING_RESPONSE).unwrap();
        assert!(matches!(
            mex.place_endpoint_message_future(PING_RESPONSE),
            Err(Error::FutureAlreadyPlaced(_))
        ));

        mex.complete_endpoint_message_future(PING_RESPONSE, message("m-1", "t-1", PING_RESPONSE))
            .unwrap();
        assert!(!mex.has_endpoint_message_future(PING_RESPONSE));
        assert!(matches!(
            mex.place_endpoint_message_future(PING_RESPONSE),
            Err(Error::FutureAlreadyPlaced(_))
        ));
    }

    #[test]
    fn test_complete_without_future_fails() {
        let mex = MessageExchange::new("t-1", None);
        let err = mex
            .complete_endpoint_message_future(PING_RESPONSE, message("m-1", "t-1", PING_RESPONSE))
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchFuture(_)));
    }

    #[tokio::test]
    async fn test_await_without_future_times_out() {
        let mex = MessageExchange::new("t-1", None);
        let err = mex
            .await_endpoint_message(PING_RESPONSE, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_timeout_discards_pending_future() {
        let mex = MessageExchange::new("t-1", None);
        mex.place_endpoint_message_future(PING_RESPONSE).unwrap();
        assert!(mex
            .await_endpoint_message(PING_RESPONSE, Duration::from_millis(20))
            .await
            .is_err());
        assert!(mex.place_endpoint_message_future(PING_RESPONSE).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_completion_at_deadline_leaves_no_slot() {
        for round in 0..20 {
            let mex = Arc::new(MessageExchange::new("t-1", None));
            mex.place_endpoint_message_future(PING_RESPONSE).unwrap();
            let completer = {
                let mex = Arc::clone(&mex);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    mex.complete_endpoint_message_future(
                        PING_RESPONSE,
                        message("m-1", "t-1", PING_RESPONSE),
                    )
                })
            };
            let awaited = mex
                .await_endpoint_message(PING_RESPONSE, Duration::from_millis(10))
                .await;
            let completed = completer.await.unwrap();

            // Either the waiter got the message or the completion found no slot.
            assert_ne!(awaited.is_ok(), completed.is_err(), "round {round}");
            assert!(!mex.has_endpoint_message_future(PING_RESPONSE));
            assert!(mex.place_endpoint_message_future(PING_RESPONSE).is_ok());
        }
    }

    #[test]
    fn test_attachments() {
        let parent = Arc::new(MessageExchange::new("t-0", None));
        let mex = MessageExchange::new("t-1", Some(Arc::clone(&parent)));
        assert_eq!(mex.parent().map(|p| p.thread_id()), Some("t-0"));
        assert!(mex.connection().is_err());

        let con = connection();
        mex.set_connection(con.clone()).unwrap();
        mex.set_connection(con.clone()).unwrap();
        assert!(mex.set_connection(connection()).is_err());
        assert!(mex.connection().unwrap().ptr_eq(&con));

        mex.put_attachment(WALLET, "wallet-1".to_string());
        assert_eq!(mex.wallet_id().unwrap(), "wallet-1");
        assert!(mex.has_attachment(WALLET));
        assert!(mex.invitation().is_none());
        assert!(mex.short_string().contains(&con.read().my_did.verkey));
    }
}
