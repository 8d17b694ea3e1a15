/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: callback.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-03 09:47:12
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-05 17:02:26
 */

//! Single-shot loopback listener for the OAuth redirect.
//!
//! The listener answers exactly one meaningful request on `/callback`. The
//! first of {code, error, timeout} settles the wait, after which the server
//! is shut down and joined before [`CallbackListener::wait`] returns.

use crate::error::{MailError, Result};
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use log::{debug, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const CALLBACK_ADDR: &str = "127.0.0.1:8089";
pub const REDIRECT_URL: &str = "http://127.0.0.1:8089/callback";
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// How long open connections may delay shutdown before the server is aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const STAGE: &str = "callback";

type Outcome = Result<String>;

#[derive(Clone)]
struct CallbackState {
    expected_state: Arc<str>,
    outcome: Arc<Mutex<Option<oneshot::Sender<Outcome>>>>,
}

impl CallbackState {
    /// Only the first outcome is delivered, later ones are dropped.
    fn settle(&self, outcome: Outcome) {
        let sender = self.outcome.lock().ok().and_then(|mut slot| slot.take());
        if let Some(sender) = sender {
            let _ = sender.send(outcome);
        }
    }
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, &'static str) {
    let received = params.get("state").map(String::as_str).unwrap_or("");
    if received != &*state.expected_state {
        warn!("Rejected OAuth callback with mismatched state");
        state.settle(Err(MailError::auth(STAGE, "invalid state")));
        return (StatusCode::BAD_REQUEST, "Error: invalid state");
    }

    if let Some(error) = params.get("error") {
        state.settle(Err(MailError::auth(
            STAGE,
            format!("authorization denied: {}", error),
        )));
        return (StatusCode::BAD_REQUEST, "Error: authorization denied");
    }

    match params.get("code").filter(|c| !c.is_empty()) {
        Some(code) => {
            state.settle(Ok(code.clone()));
            (
                StatusCode::OK,
                "Authorization successful! You can close this window.",
            )
        }
        None => {
            state.settle(Err(MailError::auth(STAGE, "no code in callback")));
            (StatusCode::BAD_REQUEST, "Error: no code received")
        }
    }
}

/// A running callback server. Dropping it also signals shutdown, but only
/// [`CallbackListener::wait`] waits for the server to be gone.
pub struct CallbackListener {
    local_addr: SocketAddr,
    outcome_rx: oneshot::Receiver<Outcome>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
}

impl CallbackListener {
    /// Binds `addr` and starts serving in the background.
    pub async fn bind(addr: &str, expected_state: &str) -> Result<Self> {
        if expected_state.is_empty() {
            return Err(MailError::auth(STAGE, "expected oauth state is required"));
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MailError::auth(STAGE, format!("cannot listen on {}: {}", addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| MailError::auth(STAGE, e))?;

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state = CallbackState {
            expected_state: Arc::from(expected_state),
            outcome: Arc::new(Mutex::new(Some(outcome_tx))),
        };

        let app = Router::new()
            .route("/callback", get(handle_callback))
            .with_state(state.clone());

        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await;
            if let Err(e) = result {
                state.settle(Err(MailError::auth(STAGE, format!("server error: {}", e))));
            }
        });

        debug!("OAuth callback listener started on {}", local_addr);

        Ok(Self {
            local_addr,
            outcome_rx,
            shutdown_tx: Some(shutdown_tx),
            server: Some(server),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits for the authorization code. The listener is stopped on every
    /// path out of this function.
    pub async fn wait(mut self, timeout: Duration) -> Result<String> {
        let outcome = tokio::time::timeout(timeout, &mut self.outcome_rx).await;
        self.shutdown().await;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(MailError::auth(STAGE, "listener stopped unexpectedly")),
            Err(_) => Err(MailError::auth(
                STAGE,
                "timed out waiting for oauth callback",
            )),
        }
    }

    async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut server) = self.server.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await.is_err() {
                debug!("Callback connections still open, aborting listener");
                server.abort();
                let _ = server.await;
            }
        }
        debug!("OAuth callback listener on {} stopped", self.local_addr);
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
#[path = "./callback_tests.rs"]
mod callback_tests;
