// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! HTTP surface.
//!
//! - `GET /.well-known/jmap` and `GET /jmap/session` return the session resource.
//! - `POST /jmap/api` runs one batch.
//!
//! Request-level failures are answered with an RFC 7807 problem document.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::batch::{BatchExecutor, BatchOutcome, BatchPhase, MethodDispatcher};
use crate::capability::{Limit, LimitName, SharedRegistry};
use crate::config::ServerConfig;
use crate::methods::{register_defaults, MailStore};
use crate::model::{Request, RequestError, RequestErrorType};
use crate::session::{SessionAssembler, SessionResource};
use crate::store::StateStore;

pub const WELL_KNOWN_PATH: &str = "/.well-known/jmap";
pub const SESSION_PATH: &str = "/jmap/session";
pub const API_PATH: &str = "/jmap/api";

const PROBLEM_JSON: &str = "application/problem+json";

/// Shared state behind every route.
#[derive(Debug)]
pub struct ApiState {
    executor: BatchExecutor,
    assembler: SessionAssembler,
    username: String,
    /// `None` when `maxConcurrentRequests` is unbounded.
    permits: Option<Semaphore>,
}

impl ApiState {
    /// The concurrency limit is read once, from the registry current at construction.
    pub fn new(
        executor: BatchExecutor,
        assembler: SessionAssembler,
        username: impl Into<String>,
    ) -> Self {
        let permits = match executor.registry().current().limit(LimitName::MaxConcurrentRequests) {
            Limit::Bounded(max) => Some(Semaphore::new(usize::try_from(max).unwrap_or(usize::MAX))),
            Limit::Unbounded => None,
        };
        Self { executor, assembler, username: username.into(), permits }
    }

    /// Wires the default method set over an in-memory mail store with one inbox per mail
    /// account.
    pub fn from_config(config: &ServerConfig) -> Self {
        let mail = Arc::new(MailStore::with_inboxes(config.mail_accounts()));
        let mut dispatcher = MethodDispatcher::new();
        register_defaults(&mut dispatcher, mail);

        let executor = BatchExecutor::new(
            SharedRegistry::new(config.registry()),
            Arc::new(config.directory()),
            Arc::new(dispatcher),
            Arc::new(StateStore::new()),
        )
        .with_timeout(config.request_timeout());
        Self::new(executor, SessionAssembler::new(config.session_urls()), config.username.clone())
    }

    pub fn executor(&self) -> &BatchExecutor {
        &self.executor
    }

    pub fn session(&self) -> SessionResource {
        let registry = self.executor.registry().current();
        self.assembler.assemble(&registry, self.executor.accounts(), &self.username)
    }
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route(WELL_KNOWN_PATH, get(session))
        .route(SESSION_PATH, get(session))
        .route(API_PATH, post(api))
        // `maxSizeRequest` is enforced in `read_body` against the live registry.
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

pub async fn session(State(state): State<Arc<ApiState>>) -> Json<SessionResource> {
    Json(state.session())
}

pub async fn api(State(state): State<Arc<ApiState>>, body: Body) -> Response {
    let _permit = match &state.permits {
        Some(permits) => match permits.try_acquire() {
            Ok(permit) => Some(permit),
            Err(_) => {
                warn!("too many concurrent requests");
                let limit = LimitName::MaxConcurrentRequests;
                return problem(RequestError::limit(
                    limit.as_str(),
                    format!("{limit} reached; retry later"),
                ));
            }
        },
        None => None,
    };

    let bytes = match read_body(&state, body).await {
        Ok(bytes) => bytes,
        Err(error) => return problem(error),
    };
    let request = match parse_request(&bytes) {
        Ok(request) => request,
        Err(error) => {
            debug!(detail = %error.detail, "unparseable request body");
            return problem(error);
        }
    };

    let BatchOutcome { response, phase, .. } = state.executor.execute(request).await;
    if phase == BatchPhase::Rejected {
        if let Some(error) = response.errors.as_ref().and_then(|errors| errors.first()) {
            return problem(error.clone());
        }
    }
    Json(response).into_response()
}

async fn read_body(state: &ApiState, body: Body) -> Result<Bytes, RequestError> {
    let limit = state.executor.registry().current().limit(LimitName::MaxSizeRequest);
    let max = match limit {
        Limit::Bounded(max) => usize::try_from(max).unwrap_or(usize::MAX),
        Limit::Unbounded => usize::MAX,
    };
    // Reading only fails on an oversized body or a broken connection; the client of the
    // latter never sees the answer.
    axum::body::to_bytes(body, max).await.map_err(|_| {
        let name = LimitName::MaxSizeRequest;
        RequestError::limit(name.as_str(), format!("request body exceeds {name} ({limit})"))
    })
}

/// Splits body failures into `notJSON` and `notRequest`.
pub fn parse_request(bytes: &[u8]) -> Result<Request, RequestError> {
    let value: serde_json::Value = serde_json::from_slice(bytes).map_err(|err| {
        RequestError::new(RequestErrorType::NotJson, format!("body is not JSON: {err}"))
    })?;
    serde_json::from_value(value).map_err(|err| {
        RequestError::new(RequestErrorType::NotRequest, format!("body is not a request: {err}"))
    })
}

fn problem(error: RequestError) -> Response {
    let status = StatusCode::from_u16(error.status).unwrap_or(StatusCode::BAD_REQUEST);
    (status, [(header::CONTENT_TYPE, PROBLEM_JSON)], Json(error)).into_response()
}
