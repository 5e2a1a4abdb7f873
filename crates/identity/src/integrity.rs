//! Integrity token negotiation with a remote attestation service.
//!
//! A request is submitted to an [`IntegrityService`], which answers with a
//! [`PendingToken`]. The service completes the request through the paired
//! [`TokenCompleter`], usually from another thread. The client blocks on the
//! completion channel until the request reaches a terminal state or the
//! configured deadline passes. On timeout the request is marked cancelled so
//! the service can stop working on it.

use crate::error::{FingerprintError, FingerprintResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const UNKNOWN_SERVICE_ERROR: &str = "unknown integrity token error";

/// Request sent to the attestation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityTokenRequest {
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_project_number: Option<u64>,
}

impl IntegrityTokenRequest {
    /// Cloud project scoping is included only for positive project numbers.
    pub fn new(nonce: impl Into<String>, cloud_project_number: i64) -> Self {
        Self {
            nonce: nonce.into(),
            cloud_project_number: u64::try_from(cloud_project_number)
                .ok()
                .filter(|n| *n > 0),
        }
    }
}

/// State of a pending request as seen by [`PendingToken::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStatus {
    Pending,
    Success(String),
    /// The service failed the request, with its error message if it gave one
    Failure(Option<String>),
}

type TokenOutcome = Result<String, Option<String>>;

/// Cancellation flag a service can block on.
#[derive(Debug, Default)]
struct Cancellation {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

impl Cancellation {
    fn cancel(&self) {
        *self.cancelled.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.signal.notify_all();
    }

    fn is_cancelled(&self) -> bool {
        *self.cancelled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait(&self, timeout: Duration) -> bool {
        let guard = self.cancelled.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .signal
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Caller side of an in-flight token request.
#[derive(Debug)]
pub struct PendingToken {
    outcome: Receiver<TokenOutcome>,
    cancellation: Arc<Cancellation>,
    settled: Option<TokenOutcome>,
}

/// Service side of an in-flight token request.
#[derive(Debug)]
pub struct TokenCompleter {
    outcome: SyncSender<TokenOutcome>,
    cancellation: Arc<Cancellation>,
}

/// Create a linked pending token and completer.
pub fn pending_token() -> (PendingToken, TokenCompleter) {
    let (tx, rx) = mpsc::sync_channel(1);
    let cancellation = Arc::new(Cancellation::default());
    (
        PendingToken {
            outcome: rx,
            cancellation: cancellation.clone(),
            settled: None,
        },
        TokenCompleter {
            outcome: tx,
            cancellation,
        },
    )
}

impl TokenCompleter {
    pub fn succeed(self, token: impl Into<String>) {
        // The caller may have timed out and dropped its side
        let _ = self.outcome.send(Ok(token.into()));
    }

    pub fn fail(self, error: Option<String>) {
        let _ = self.outcome.send(Err(error));
    }

    /// Whether the caller gave up on this request.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Block for up to `timeout` or until the caller gives up. Returns
    /// whether the request was cancelled.
    pub fn wait_cancelled(&self, timeout: Duration) -> bool {
        self.cancellation.wait(timeout)
    }
}

impl PendingToken {
    /// Non-blocking status check.
    pub fn poll(&mut self) -> TokenStatus {
        if self.settled.is_none() {
            match self.outcome.try_recv() {
                Ok(outcome) => self.settled = Some(outcome),
                Err(TryRecvError::Empty) => return TokenStatus::Pending,
                Err(TryRecvError::Disconnected) => {
                    self.settled = Some(Err(Some(dropped_message())))
                }
            }
        }
        match &self.settled {
            Some(Ok(token)) => TokenStatus::Success(token.clone()),
            Some(Err(message)) => TokenStatus::Failure(message.clone()),
            None => TokenStatus::Pending,
        }
    }

    /// Block until the request settles or `timeout` elapses.
    pub fn wait(mut self, timeout: Duration) -> FingerprintResult<String> {
        let outcome = match self.settled.take() {
            Some(outcome) => outcome,
            None => match self.outcome.recv_timeout(timeout) {
                Ok(outcome) => outcome,
                Err(RecvTimeoutError::Disconnected) => Err(Some(dropped_message())),
                Err(RecvTimeoutError::Timeout) => {
                    self.cancel();
                    return Err(FingerprintError::Timeout(timeout));
                }
            },
        };

        outcome.map_err(|message| {
            FingerprintError::IntegrityService(
                message.unwrap_or_else(|| UNKNOWN_SERVICE_ERROR.to_string()),
            )
        })
    }

    /// Abandon the request.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }
}

fn dropped_message() -> String {
    "integrity service dropped the request without a result".to_string()
}

/// Remote integrity attestation service.
pub trait IntegrityService: Send + Sync {
    /// Submit `request`; the returned handle settles when the service answers.
    fn submit(&self, request: &IntegrityTokenRequest) -> Result<PendingToken, String>;
}

/// Blocking client with a caller-visible timeout.
#[derive(Clone)]
pub struct IntegrityTokenClient {
    service: Arc<dyn IntegrityService>,
    timeout: Duration,
}

impl std::fmt::Debug for IntegrityTokenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityTokenClient")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl IntegrityTokenClient {
    pub fn new(service: Arc<dyn IntegrityService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Request a token bound to `nonce`. Blocks for at most the configured timeout.
    pub fn request_token(
        &self,
        nonce: &str,
        cloud_project_number: i64,
    ) -> FingerprintResult<String> {
        if nonce.is_empty() {
            return Err(FingerprintError::InvalidRequest(
                "integrity token nonce must not be empty".to_string(),
            ));
        }

        let request = IntegrityTokenRequest::new(nonce, cloud_project_number);
        debug!(
            scoped = request.cloud_project_number.is_some(),
            timeout_ms = self.timeout.as_millis() as u64,
            "submitting integrity token request"
        );

        let pending = self
            .service
            .submit(&request)
            .map_err(FingerprintError::IntegrityService)?;

        pending.wait(self.timeout).map_err(|e| {
            warn!(error = %e, "integrity token request failed");
            e
        })
    }
}

/// Development attestation service that answers locally.
///
/// Each request is completed on a background thread after `latency` with an
/// unsigned token: URL-safe base64 of the JSON request plus issue time. A
/// request cancelled before the latency elapses is never answered, and its
/// worker exits as soon as the cancellation arrives.
#[derive(Debug, Clone)]
pub struct LocalIntegrityService {
    latency: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LocalToken<'a> {
    #[serde(flatten)]
    request: &'a IntegrityTokenRequest,
    issued_at: u64,
}

impl LocalIntegrityService {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }

    /// Decode a token issued by this service back into its request.
    pub fn decode_token(token: &str) -> Result<IntegrityTokenRequest, String> {
        let json = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| format!("token is not base64: {e}"))?;
        serde_json::from_slice(&json).map_err(|e| format!("token is not a request: {e}"))
    }
}

impl IntegrityService for LocalIntegrityService {
    fn submit(&self, request: &IntegrityTokenRequest) -> Result<PendingToken, String> {
        let (pending, completer) = pending_token();
        let request = request.clone();
        let latency = self.latency;

        thread::Builder::new()
            .name("auroprint-integrity".to_string())
            .spawn(move || {
                if completer.wait_cancelled(latency) {
                    debug!("local integrity request cancelled");
                    return;
                }
                let issued_at = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs();
                match serde_json::to_vec(&LocalToken {
                    request: &request,
                    issued_at,
                }) {
                    Ok(json) => completer.succeed(URL_SAFE_NO_PAD.encode(json)),
                    Err(e) => completer.fail(Some(e.to_string())),
                }
            })
            .map_err(|e| format!("failed to spawn integrity worker: {e}"))?;

        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn project_scoping_only_for_positive_numbers() {
        assert_eq!(IntegrityTokenRequest::new("n", 0).cloud_project_number, None);
        assert_eq!(IntegrityTokenRequest::new("n", -4).cloud_project_number, None);
        assert_eq!(
            IntegrityTokenRequest::new("n", 555).cloud_project_number,
            Some(555)
        );
        assert_eq!(
            serde_json::to_string(&IntegrityTokenRequest::new("abc123", 0)).unwrap(),
            r#"{"nonce":"abc123"}"#
        );
    }

    #[test]
    fn poll_reports_pending_then_settles() {
        let (mut pending, completer) = pending_token();
        assert_eq!(pending.poll(), TokenStatus::Pending);

        completer.succeed("tok");
        assert_eq!(pending.poll(), TokenStatus::Success("tok".to_string()));
        assert_eq!(pending.poll(), TokenStatus::Success("tok".to_string()));
        assert_eq!(pending.wait(Duration::from_millis(1)).unwrap(), "tok");
    }

    #[test]
    fn failure_without_message_becomes_generic_error() {
        let (pending, completer) = pending_token();
        completer.fail(None);
        match pending.wait(Duration::from_secs(1)) {
            Err(FingerprintError::IntegrityService(message)) => {
                assert_eq!(message, UNKNOWN_SERVICE_ERROR)
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn dropped_completer_is_a_service_error() {
        let (pending, completer) = pending_token();
        drop(completer);
        assert!(matches!(
            pending.wait(Duration::from_secs(1)),
            Err(FingerprintError::IntegrityService(_))
        ));
    }

    #[test]
    fn timeout_cancels_the_request() {
        let (pending, completer) = pending_token();
        let err = pending.wait(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, FingerprintError::Timeout(_)));
        assert!(completer.is_cancelled());
    }

    #[test]
    fn cancel_wakes_a_waiting_completer() {
        let (pending, completer) = pending_token();
        let waiter = thread::spawn(move || completer.wait_cancelled(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        pending.cancel();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn uncancelled_wait_runs_to_its_timeout() {
        let (_pending, completer) = pending_token();
        assert!(!completer.wait_cancelled(Duration::from_millis(10)));
    }

    #[test]
    fn cancelled_local_request_releases_its_worker() {
        let service = LocalIntegrityService::new(Duration::from_secs(30));
        let mut pending = service
            .submit(&IntegrityTokenRequest::new("abc123", 0))
            .unwrap();
        pending.cancel();

        // The worker drops its completer on exit, which disconnects the channel
        let started = Instant::now();
        while pending.poll() == TokenStatus::Pending {
            assert!(started.elapsed() < Duration::from_secs(5), "worker still running");
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(pending.poll(), TokenStatus::Failure(Some(dropped_message())));
    }

    #[test]
    fn local_service_round_trips_the_request() {
        let client = IntegrityTokenClient::new(
            Arc::new(LocalIntegrityService::new(Duration::from_millis(5))),
            Duration::from_secs(5),
        );
        let token = client.request_token("abc123", 555).unwrap();
        let decoded = LocalIntegrityService::decode_token(&token).unwrap();
        assert_eq!(decoded, IntegrityTokenRequest::new("abc123", 555));
    }

    #[test]
    fn empty_nonce_is_rejected_before_submission() {
        let client = IntegrityTokenClient::new(
            Arc::new(LocalIntegrityService::new(Duration::ZERO)),
            Duration::from_secs(1),
        );
        assert!(matches!(
            client.request_token("", 0),
            Err(FingerprintError::InvalidRequest(_))
        ));
    }
}
