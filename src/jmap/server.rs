//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Crymap.
//
// Crymap is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Crymap is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Crymap. If not, see <http://www.gnu.org/licenses/>.

//! The HTTP face of the server: the API endpoint and the session resource.
//!
//! Requests are authenticated here and then handed to the `Dispatcher` on a
//! blocking thread. If the client goes away before the dispatcher finishes,
//! the request is cancelled between invocations.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{self, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{
    HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE,
    USER_AGENT, WWW_AUTHENTICATE,
};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use log::{debug, error, info, warn};
use serde::Serialize;

use super::dispatcher::{Cancellation, Dispatcher, Rejection};
use super::error::{Limit, RequestError};
use crate::account::resolver::{AccountResolver, Principal};
use crate::support::log_prefix::LogPrefix;
use crate::support::system_config::SystemConfig;

/// Establishes who is making a request.
pub trait Authenticator: Send + Sync + 'static {
    /// Return the principal the request runs as, or `None` if the request
    /// is not authenticated.
    fn authenticate(&self, headers: &HeaderMap) -> Option<Principal>;
}

/// HTTP Basic authentication against the password hashes in the system
/// configuration.
pub struct ConfigAuthenticator {
    password_hashes: BTreeMap<String, String>,
}

impl ConfigAuthenticator {
    pub fn new(config: &SystemConfig) -> Self {
        ConfigAuthenticator {
            password_hashes: config
                .users
                .iter()
                .map(|(name, user)| (name.clone(), user.password_hash.clone()))
                .collect(),
        }
    }
}

impl Authenticator for ConfigAuthenticator {
    fn authenticate(&self, headers: &HeaderMap) -> Option<Principal> {
        let (username, password) = basic_credentials(headers)?;
        let hash = self.password_hashes.get(&username)?;
        match argon2::verify_encoded(hash, password.as_bytes()) {
            Ok(true) => Some(Principal::new(username)),
            Ok(false) => None,
            Err(e) => {
                error!("Bad password hash for user {}: {}", username, e);
                None
            }
        }
    }
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = base64::decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_owned(), password.to_owned()))
}

struct ServerState<R: AccountResolver> {
    dispatcher: Arc<Dispatcher<R>>,
    authenticator: Arc<dyn Authenticator>,
}

impl<R: AccountResolver> Clone for ServerState<R> {
    fn clone(&self) -> Self {
        ServerState {
            dispatcher: Arc::clone(&self.dispatcher),
            authenticator: Arc::clone(&self.authenticator),
        }
    }
}

/// Build the router for the API endpoint at `api_path` and the session
/// resource.
pub fn router<R: AccountResolver>(
    dispatcher: Arc<Dispatcher<R>>,
    authenticator: Arc<dyn Authenticator>,
    api_path: &str,
) -> Router {
    Router::new()
        .route(api_path, post(api::<R>))
        .route("/.well-known/jmap", get(session::<R>))
        .route("/jmap/session", get(session::<R>))
        .with_state(ServerState {
            dispatcher,
            authenticator,
        })
}

/// Raises the cancellation flag when the handler future is dropped before
/// completing.
struct CancelOnDrop(Cancellation);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

fn log_prefix(request: &Request) -> LogPrefix {
    let log_prefix = LogPrefix::new("jmap".to_owned());
    if let Some(&ConnectInfo(peer)) =
        request.extensions().get::<ConnectInfo<SocketAddr>>()
    {
        log_prefix.set_peer(peer);
    }
    if let Some(agent) = request
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
    {
        log_prefix.set_user_agent(agent.to_owned());
    }
    log_prefix
}

/// Run the authenticator on a blocking thread, since password verification
/// is deliberately slow.
async fn authenticate(
    authenticator: &Arc<dyn Authenticator>,
    headers: &HeaderMap,
) -> Option<Principal> {
    let authenticator = Arc::clone(authenticator);
    let headers = headers.clone();
    match tokio::task::spawn_blocking(move || {
        authenticator.authenticate(&headers)
    })
    .await
    {
        Ok(principal) => principal,
        Err(e) => {
            error!("Authentication task failed: {}", e);
            None
        }
    }
}

fn unauthorised() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(
            WWW_AUTHENTICATE,
            HeaderValue::from_static("Basic realm=\"crymap-jmap\""),
        )],
    )
        .into_response()
}

/// A JSON response, or a bare 500 if `value` cannot be serialised.
fn json_response(log_prefix: &LogPrefix, value: &impl Serialize) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => (
            [(CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("{} Failed to serialise response: {}", log_prefix, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn problem(e: &RequestError) -> Response {
    match serde_json::to_vec(e) {
        Ok(body) => (
            StatusCode::BAD_REQUEST,
            [(
                CONTENT_TYPE,
                HeaderValue::from_static("application/problem+json"),
            )],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to serialise problem document: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn session<R: AccountResolver>(
    State(state): State<ServerState<R>>,
    request: Request,
) -> Response {
    let log_prefix = log_prefix(&request);
    let principal = match authenticate(&state.authenticator, request.headers())
        .await
    {
        Some(principal) => principal,
        None => {
            warn!("{} Rejected unauthenticated session request", log_prefix);
            return unauthorised();
        }
    };

    match state.dispatcher.session(&principal) {
        Ok(session) => json_response(&log_prefix, &session),
        Err(e) => {
            error!(
                "{} Failed to build session for {}: {}",
                log_prefix, principal.username, e
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn api<R: AccountResolver>(
    State(state): State<ServerState<R>>,
    request: Request,
) -> Response {
    let log_prefix = log_prefix(&request);
    let principal = match authenticate(&state.authenticator, request.headers())
        .await
    {
        Some(principal) => principal,
        None => {
            warn!("{} Rejected unauthenticated API request", log_prefix);
            return unauthorised();
        }
    };
    log_prefix.set_user(principal.username.clone());

    let (parts, request_body) = request.into_parts();
    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let content_length = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let max_size = state.dispatcher.registry().core().max_size_request;
    // An oversized body is not read at all; the dispatcher rejects the
    // request on the declared length.
    let body = if content_length.map_or(false, |len| len > max_size.0) {
        Bytes::new()
    } else {
        match body::to_bytes(request_body, max_size.as_usize()).await {
            Ok(body) => body,
            Err(e) => {
                info!("{} Failed to read request body: {}", log_prefix, e);
                return problem(&RequestError::limit(
                    Limit::MaxSizeRequest,
                    format!("the request is larger than {max_size} bytes"),
                ));
            }
        }
    };

    let cancel = Cancellation::new();
    let _cancel_on_drop = CancelOnDrop(cancel.clone());
    let dispatcher = Arc::clone(&state.dispatcher);
    let task_log_prefix = log_prefix.clone();
    let result = tokio::task::spawn_blocking(move || {
        dispatcher.handle(
            &principal,
            &task_log_prefix,
            content_type.as_deref(),
            content_length,
            &body,
            &cancel,
        )
    })
    .await;

    match result {
        Ok(Ok(response)) => {
            debug!(
                "{} Completed request with {} responses",
                log_prefix,
                response.method_responses.len()
            );
            json_response(&log_prefix, &response)
        }
        Ok(Err(Rejection::Request(e))) => problem(&e),
        Ok(Err(Rejection::Cancelled)) => {
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
        Ok(Err(Rejection::Internal(_))) => {
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            error!("{} Request task failed: {}", log_prefix, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
