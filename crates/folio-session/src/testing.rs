//! Scripted in-process backend for unit tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use folio_core::{ApiRequest, ClientError, Method, Transport};
use serde_json::{Value, json};
use tokio::sync::Notify;

type Handler = Box<dyn Fn(&ApiRequest) -> Result<Value, ClientError> + Send + Sync>;

/// A request as the backend saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub token: Option<String>,
    pub body: Option<Value>,
}

/// Transport answering from a closure, recording every call.
pub struct FakeBackend {
    handler: Handler,
    calls: Mutex<Vec<Recorded>>,
    delays: Mutex<HashMap<String, Duration>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl FakeBackend {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&ApiRequest) -> Result<Value, ClientError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            delays: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        })
    }

    /// Delay every response on `path`.
    pub fn delay(&self, path: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(path.to_string(), delay);
    }

    /// Hold responses on `path` until the returned handle is notified.
    pub fn gate(&self, path: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(path.to_string(), Arc::clone(&notify));
        notify
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls().iter().filter(|c| c.path == path).count()
    }

    pub fn tokens_for(&self, path: &str) -> Vec<Option<String>> {
        self.calls()
            .into_iter()
            .filter(|c| c.path == path)
            .map(|c| c.token)
            .collect()
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn send(&self, request: ApiRequest) -> Result<Value, ClientError> {
        self.calls.lock().unwrap().push(Recorded {
            method: request.method,
            path: request.path.clone(),
            token: request.token.clone(),
            body: request.body.clone(),
        });

        let delay = self.delays.lock().unwrap().get(&request.path).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let gate = self.gates.lock().unwrap().get(&request.path).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        (self.handler)(&request)
    }
}

pub fn unauthorized() -> ClientError {
    ClientError::from_response(401, Some(json!({"detail": "Could not validate credentials"})))
}

/// The auth flow of the dashboard backend.
///
/// - login `a@b.com`/`secret` issues `AT_EXPIRED`/`RT1`
/// - refresh with `RT1` issues `AT2`/`RT2`
/// - `/api/far/metrics` accepts only `AT2`
/// - `/api/auth/me` accepts `AT1` and `AT2`
/// - FAR customer login with `C-100` issues `FAR1`, which only
///   `/api/far/transactions/C-100` accepts
pub fn dashboard_backend() -> Arc<FakeBackend> {
    FakeBackend::new(|request| {
        let token = request.token.as_deref();
        let body = request.body.clone().unwrap_or(Value::Null);
        match request.path.as_str() {
            "/api/auth/login" => {
                if body["email"] == "a@b.com" && body["password"] == "secret" {
                    Ok(json!({
                        "user": {"id": 1, "email": "a@b.com"},
                        "access_token": "AT_EXPIRED",
                        "refresh_token": "RT1",
                        "token_type": "bearer"
                    }))
                } else {
                    Err(ClientError::from_response(
                        401,
                        Some(json!({"detail": "Incorrect email or password"})),
                    ))
                }
            }
            "/api/auth/refresh" => {
                if body["refresh_token"] == "RT1" {
                    Ok(json!({
                        "user": {"id": 1, "email": "a@b.com"},
                        "access_token": "AT2",
                        "refresh_token": "RT2"
                    }))
                } else {
                    Err(unauthorized())
                }
            }
            "/api/auth/me" => match token {
                Some("AT1" | "AT2") => Ok(json!({"id": 1, "email": "a@b.com", "full_name": "Ada"})),
                _ => Err(unauthorized()),
            },
            "/api/far/metrics" => match token {
                Some("AT2") => Ok(json!({"customers": 42})),
                _ => Err(unauthorized()),
            },
            "/api/auth/far-customer-login" => {
                if body["customer_id"] == "C-100" {
                    Ok(json!({
                        "access_token": "FAR1",
                        "token_type": "bearer",
                        "mode": "far_customer",
                        "customer_id": "C-100"
                    }))
                } else {
                    Err(ClientError::from_response(
                        401,
                        Some(json!({"detail": "Invalid Customer ID"})),
                    ))
                }
            }
            "/api/far/transactions/C-100" => match token {
                Some("FAR1") => Ok(json!({"items": [{"ISIN": "IE00B4L5Y983", "units": 3}]})),
                _ => Err(unauthorized()),
            },
            other => Err(ClientError::from_response(
                404,
                Some(json!({"detail": format!("no route for {other}")})),
            )),
        }
    })
}
