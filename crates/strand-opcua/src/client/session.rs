// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session management.
//!
//! A [`Session`] owns the current [`ServiceTransport`] and the server-side
//! session bound to it. It stamps every request with the authentication
//! token and a unique request handle, maps bad service results to typed
//! errors and re-establishes itself after a transport fault:
//!
//! 1. open a new transport through the [`TransportFactory`]
//! 2. re-activate the existing session on it
//! 3. if the server no longer knows the session, create a new one
//!
//! The caller learns which of the two happened from [`ReconnectOutcome`]
//! and decides how to recover subscriptions.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;

use super::transport::{ServiceTransport, TransportFactory};
use crate::channel::ChannelState;
use crate::codec::{ByteString, LocalizedText, NodeId, StatusCode};
use crate::error::{
    OpcUaError, OpcUaResult, PeerError, ProtocolError, SecurityError, SessionError,
};
use crate::services::{
    identity_token, ActivateSessionRequest, ApplicationDescription, ApplicationType,
    CloseSessionRequest, CreateSessionRequest, EndpointDescription, ReadRequest, ReadValueId,
    RequestHeader, ServiceCall, ServiceRequest, ServiceResponse, TimestampsToReturn,
};
use crate::types::ClientConfig;

/// Product URI announced in `CreateSession`.
const PRODUCT_URI: &str = "urn:strand:opcua";

/// Length of the client nonce.
const NONCE_LENGTH: usize = 32;

// =============================================================================
// SessionState
// =============================================================================

/// State of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session.
    #[default]
    Closed,

    /// CreateSession in progress.
    Creating,

    /// ActivateSession in progress.
    Activating,

    /// Active and ready for use.
    Active,

    /// The transport or the server invalidated the session.
    Faulted,

    /// A new transport is being opened and the session re-established.
    Reconnecting,
}

impl SessionState {
    /// Returns `true` if the session is active and ready for use.
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns `true` if the session is in a transitional state.
    #[inline]
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Creating | Self::Activating | Self::Reconnecting)
    }

    /// Returns `true` if the session has failed.
    #[inline]
    pub fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Creating => write!(f, "Creating"),
            Self::Activating => write!(f, "Activating"),
            Self::Active => write!(f, "Active"),
            Self::Faulted => write!(f, "Faulted"),
            Self::Reconnecting => write!(f, "Reconnecting"),
        }
    }
}

// =============================================================================
// SessionInfo
// =============================================================================

/// Information about the server-side session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Session id assigned by the server.
    pub session_id: NodeId,

    /// Token quoted in every request header.
    pub authentication_token: NodeId,

    /// Session timeout revised by the server.
    pub revised_timeout: Duration,

    /// Largest request the server accepts (0 = no limit).
    pub max_request_message_size: u32,

    /// Latest server nonce.
    pub server_nonce: ByteString,

    /// Endpoints the server returned with CreateSession.
    pub server_endpoints: Vec<EndpointDescription>,

    /// Creation time.
    pub created_at: Instant,
}

impl SessionInfo {
    /// Time since the session was created.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// How [`Session::reconnect`] re-established the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// The existing session was activated on the new transport.
    Reactivated,
    /// The server lost the session; a new one was created.
    NewSession {
        /// Id of the abandoned session.
        previous_session_id: NodeId,
    },
}

// =============================================================================
// Session
// =============================================================================

/// A session bound to a replaceable transport.
///
/// # Thread Safety
///
/// All methods take `&self`; requests may be issued concurrently.
pub struct Session {
    config: ClientConfig,
    factory: Arc<dyn TransportFactory>,
    transport: RwLock<Arc<dyn ServiceTransport>>,
    info: RwLock<Option<SessionInfo>>,
    next_handle: AtomicU32,
    last_activity: Mutex<Instant>,
    stats: SessionStats,
    state: watch::Sender<SessionState>,
}

impl Session {
    /// Opens a transport and creates and activates a session on it.
    pub async fn connect(
        factory: Arc<dyn TransportFactory>,
        config: ClientConfig,
    ) -> OpcUaResult<Self> {
        tracing::info!(endpoint = factory.endpoint_url(), "Connecting session");
        let transport = factory.open().await?;
        let (state, _) = watch::channel(SessionState::Closed);
        let session = Self {
            config,
            factory,
            transport: RwLock::new(Arc::clone(&transport)),
            info: RwLock::new(None),
            next_handle: AtomicU32::new(1),
            last_activity: Mutex::new(Instant::now()),
            stats: SessionStats::new(),
            state,
        };

        if let Err(e) = session.establish(&transport).await {
            session.stats.record_failure();
            session.set_state(SessionState::Closed);
            transport.close().await;
            return Err(e);
        }
        Ok(session)
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver for state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Session information, if a session exists.
    pub fn info(&self) -> Option<SessionInfo> {
        self.info.read().clone()
    }

    /// Statistics.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// State of the current transport.
    pub fn transport_state(&self) -> ChannelState {
        self.transport.read().state()
    }

    /// Time since the last successful response.
    pub fn idle_time(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Calls a service with the configured request timeout.
    pub async fn call<R: ServiceCall>(&self, request: R) -> OpcUaResult<R::Response> {
        self.call_with_timeout(request, self.config.request_timeout)
            .await
    }

    /// Calls a service with an explicit timeout.
    ///
    /// A bad service result becomes [`PeerError::ServiceFault`]; codes that
    /// invalidate the session become [`SessionError::Invalidated`] and move
    /// the session to `Faulted`.
    pub async fn call_with_timeout<R: ServiceCall>(
        &self,
        request: R,
        timeout: Duration,
    ) -> OpcUaResult<R::Response> {
        let state = self.state();
        if !state.is_active() {
            return Err(match state {
                SessionState::Closed => SessionError::Closed.into(),
                _ => SessionError::NotActive.into(),
            });
        }
        let token = self
            .info
            .read()
            .as_ref()
            .map(|info| info.authentication_token.clone())
            .unwrap_or_else(NodeId::null);
        let transport = Arc::clone(&*self.transport.read());

        match self.exchange::<R>(&transport, request, token, timeout).await {
            Ok(response) => Ok(response),
            Err(e) => {
                if e.requires_reconnect() {
                    self.stats.record_failure();
                    self.set_state(SessionState::Faulted);
                }
                Err(e)
            }
        }
    }

    /// Reads the server state node to keep the session alive.
    pub async fn keep_alive(&self) -> OpcUaResult<()> {
        let request = ReadRequest {
            timestamps_to_return: TimestampsToReturn::Neither,
            nodes_to_read: vec![ReadValueId::value(NodeId::SERVER_STATE)],
            ..Default::default()
        };
        match self.call(request).await {
            Ok(response) => {
                let status = response
                    .results
                    .first()
                    .map(|value| value.status())
                    .unwrap_or(StatusCode::BAD_NOTHING_TO_DO);
                if status.is_bad() {
                    tracing::warn!(status = %status, "Server state read returned bad status");
                }
                tracing::trace!("Session keep-alive succeeded");
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::Faulted);
                Err(SessionError::keep_alive_failed(e.to_string()).into())
            }
        }
    }

    /// Opens a new transport and re-establishes the session on it.
    ///
    /// The old transport is closed first. Errors opening the transport are
    /// returned unchanged so the caller can retry with backoff.
    pub async fn reconnect(&self) -> OpcUaResult<ReconnectOutcome> {
        self.set_state(SessionState::Reconnecting);
        let old = Arc::clone(&*self.transport.read());
        old.close().await;

        let transport = match self.factory.open().await {
            Ok(transport) => transport,
            Err(e) => {
                self.set_state(SessionState::Faulted);
                return Err(e);
            }
        };
        *self.transport.write() = Arc::clone(&transport);

        let existing = self.info();
        let outcome = match existing {
            Some(info) => match self.activate(&transport, info.authentication_token.clone()).await {
                Ok(()) => ReconnectOutcome::Reactivated,
                Err(e) if is_lost_session(&e) => {
                    tracing::info!(
                        session_id = %info.session_id.to_opc_string(),
                        error = %e,
                        "Session lost on server, creating a new session"
                    );
                    self.establish(&transport).await.map_err(|e| self.faulted(e))?;
                    ReconnectOutcome::NewSession {
                        previous_session_id: info.session_id,
                    }
                }
                Err(e) => return Err(self.faulted(e)),
            },
            None => {
                self.establish(&transport).await.map_err(|e| self.faulted(e))?;
                ReconnectOutcome::NewSession {
                    previous_session_id: NodeId::null(),
                }
            }
        };

        self.stats.record_reconnection();
        self.touch();
        self.set_state(SessionState::Active);
        tracing::info!(outcome = ?outcome, "Session re-established");
        Ok(outcome)
    }

    /// Closes the session and its transport.
    pub async fn close(&self, delete_subscriptions: bool) -> OpcUaResult<()> {
        let transport = Arc::clone(&*self.transport.read());
        let result = if self.state().is_active() {
            let request = CloseSessionRequest {
                delete_subscriptions,
                ..Default::default()
            };
            self.call(request).await.map(|_| ())
        } else {
            Ok(())
        };
        transport.close().await;
        *self.info.write() = None;
        self.set_state(SessionState::Closed);
        tracing::info!("Session closed");
        result
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn establish(&self, transport: &Arc<dyn ServiceTransport>) -> OpcUaResult<()> {
        self.set_state(SessionState::Creating);
        let mut nonce = vec![0u8; NONCE_LENGTH];
        rand::thread_rng().fill_bytes(&mut nonce);

        let request = CreateSessionRequest {
            client_description: ApplicationDescription {
                application_uri: self.config.effective_application_uri(),
                product_uri: PRODUCT_URI.to_string(),
                application_name: LocalizedText::new(self.config.application_name.clone()),
                application_type: ApplicationType::Client,
                ..Default::default()
            },
            endpoint_url: self.factory.endpoint_url().to_string(),
            session_name: self.config.effective_session_name(),
            client_nonce: ByteString(nonce),
            requested_session_timeout: self.config.session_timeout.as_secs_f64() * 1000.0,
            max_response_message_size: u32::try_from(self.config.limits.max_message_size)
                .unwrap_or(0),
            ..Default::default()
        };
        let response = self
            .exchange::<CreateSessionRequest>(
                transport,
                request,
                NodeId::null(),
                self.config.request_timeout,
            )
            .await
            .map_err(|e| match e {
                OpcUaError::Peer(peer) => {
                    SessionError::creation_failed(peer.to_string()).into()
                }
                other => other,
            })?;
        self.stats.record_creation();

        let info = SessionInfo {
            session_id: response.session_id,
            authentication_token: response.authentication_token,
            revised_timeout: Duration::from_secs_f64(
                response.revised_session_timeout.max(0.0) / 1000.0,
            ),
            max_request_message_size: response.max_request_message_size,
            server_nonce: response.server_nonce,
            server_endpoints: response.server_endpoints,
            created_at: Instant::now(),
        };
        tracing::info!(
            session_id = %info.session_id.to_opc_string(),
            revised_timeout = ?info.revised_timeout,
            "Session created"
        );
        let token = info.authentication_token.clone();
        *self.info.write() = Some(info);

        self.activate(transport, token).await?;
        self.touch();
        self.set_state(SessionState::Active);
        Ok(())
    }

    async fn activate(
        &self,
        transport: &Arc<dyn ServiceTransport>,
        token: NodeId,
    ) -> OpcUaResult<()> {
        self.set_state(SessionState::Activating);
        let endpoints = self
            .info
            .read()
            .as_ref()
            .map(|info| info.server_endpoints.clone())
            .unwrap_or_default();

        let request = ActivateSessionRequest {
            locale_ids: vec!["en".to_string()],
            user_identity_token: identity_token(&self.config.identity, &endpoints),
            ..Default::default()
        };
        let response = self
            .exchange::<ActivateSessionRequest>(transport, request, token, self.config.request_timeout)
            .await
            .map_err(|e| match e {
                OpcUaError::Peer(peer) if peer.status().is_security_failure() => {
                    SecurityError::authentication_failed(format!(
                        "{} identity rejected: {}",
                        self.config.identity.type_name(),
                        peer.status()
                    ))
                    .into()
                }
                other => other,
            })?;

        if let Some(info) = self.info.write().as_mut() {
            info.server_nonce = response.server_nonce;
        }
        self.stats.record_activation();
        tracing::debug!(identity = self.config.identity.type_name(), "Session activated");
        Ok(())
    }

    async fn exchange<R: ServiceCall>(
        &self,
        transport: &Arc<dyn ServiceTransport>,
        request: R,
        token: NodeId,
        timeout: Duration,
    ) -> OpcUaResult<R::Response> {
        let mut request: ServiceRequest = request.into();
        let timeout_hint = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        *request.header_mut() = RequestHeader::new(token, self.next_handle(), timeout_hint);

        let response = transport.send(request, timeout).await?;
        self.touch();
        check_response::<R>(response)
    }

    fn next_handle(&self) -> u32 {
        // Handle 0 is reserved.
        loop {
            let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
            if handle != 0 {
                return handle;
            }
        }
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn faulted(&self, error: OpcUaError) -> OpcUaError {
        self.stats.record_failure();
        self.set_state(SessionState::Faulted);
        error
    }

    fn set_state(&self, new_state: SessionState) {
        self.state.send_if_modified(|state| {
            if *state == new_state {
                return false;
            }
            tracing::trace!(old_state = %state, new_state = %new_state, "Session state changed");
            *state = new_state;
            true
        });
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.config.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

/// Maps a response to the typed result of `R`.
fn check_response<R: ServiceCall>(response: ServiceResponse) -> OpcUaResult<R::Response> {
    let status = response.header().service_result;
    if status.is_bad() {
        if status.is_session_fault() {
            return Err(SessionError::Invalidated { status }.into());
        }
        return Err(PeerError::service_fault(R::NAME, status).into());
    }
    R::extract(response)
        .map_err(|other| ProtocolError::unexpected_response(R::NAME, other.name()).into())
}

fn is_lost_session(error: &OpcUaError) -> bool {
    match error {
        OpcUaError::Session(SessionError::Invalidated { .. }) => true,
        OpcUaError::Peer(peer) => !peer.status().is_security_failure(),
        _ => false,
    }
}

// =============================================================================
// SessionStats
// =============================================================================

/// Statistics for session operations.
#[derive(Debug)]
pub struct SessionStats {
    /// Number of sessions created.
    creations: AtomicU64,

    /// Number of session activations.
    activations: AtomicU64,

    /// Number of session failures.
    failures: AtomicU64,

    /// Number of reconnections.
    reconnections: AtomicU64,
}

impl SessionStats {
    /// Creates new session statistics.
    pub fn new() -> Self {
        Self {
            creations: AtomicU64::new(0),
            activations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            reconnections: AtomicU64::new(0),
        }
    }

    /// Records a session creation.
    pub fn record_creation(&self) {
        self.creations.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a session activation.
    pub fn record_activation(&self) {
        self.activations.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a session failure.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a reconnection.
    pub fn record_reconnection(&self) {
        self.reconnections.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of session creations.
    pub fn creations(&self) -> u64 {
        self.creations.load(Ordering::Relaxed)
    }

    /// Returns the number of session activations.
    pub fn activations(&self) -> u64 {
        self.activations.load(Ordering::Relaxed)
    }

    /// Returns the number of session failures.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Returns the number of reconnections.
    pub fn reconnections(&self) -> u64 {
        self.reconnections.load(Ordering::Relaxed)
    }

    /// Resets all statistics.
    pub fn reset(&self) {
        self.creations.store(0, Ordering::Relaxed);
        self.activations.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.reconnections.store(0, Ordering::Relaxed);
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
