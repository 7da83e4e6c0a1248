//! The `search_hotels` tool: its declaration, the search backend it calls, and
//! the dispatcher that answers the model's tool calls.

use async_trait::async_trait;
use gemini_realtime::protocol::{FunctionCall, ToolCall};
use gemini_realtime::{
    EventKind, FunctionResponse, LiveClient, LiveEvent, SubscriptionId, ToolDeclaration,
    ToolResponse,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

pub const SEARCH_HOTELS: &str = "search_hotels";

pub fn search_hotels_declaration() -> ToolDeclaration {
    ToolDeclaration::new(
        SEARCH_HOTELS,
        "Searches the hotel catalogue with a natural-language description of what the \
         guest wants, such as location, price range or amenities.",
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What the guest is looking for, in their own words."
                }
            },
            "required": ["query"]
        }),
    )
}

/// Failure of a tool's own downstream work. Reported back to the model, never
/// fatal to the session.
#[derive(Debug, thiserror::Error)]
pub enum DownstreamError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Search request failed: {0}")]
    Request(String),
    #[error("Search backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Search backend returned an unreadable body: {0}")]
    InvalidResponse(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: String) -> Result<Value, DownstreamError>;
}

/// Posts `{"query": ...}` to a semantic search endpoint and returns its JSON body.
pub struct HttpSearchBackend {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpSearchBackend {
    pub fn new(url: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            api_key,
        }
    }
}

#[async_trait]
impl SearchBackend for HttpSearchBackend {
    async fn search(&self, query: String) -> Result<Value, DownstreamError> {
        let mut request = self.client.post(&self.url).json(&json!({ "query": query }));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DownstreamError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DownstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| DownstreamError::InvalidResponse(e.to_string()))
    }
}

/// Sends a tool response back to the session.
pub type Responder = Arc<dyn Fn(ToolResponse) -> gemini_realtime::Result<()> + Send + Sync>;

/// Runs each function call of a tool call as its own task and answers it when
/// the task finishes. Cancelled calls are aborted and never answered, and so
/// is everything still running when the session that asked for it closes.
pub struct ToolDispatcher {
    backend: Arc<dyn SearchBackend>,
    in_flight: Mutex<HashMap<String, AbortHandle>>,
}

impl ToolDispatcher {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Subscribes to the client's tool-call, cancellation and close events.
    pub fn attach(self: &Arc<Self>, client: &LiveClient) -> [SubscriptionId; 3] {
        let responder: Responder = {
            let client = client.clone();
            Arc::new(move |response: ToolResponse| client.send_tool_response(response))
        };

        let dispatcher = self.clone();
        let calls = client.on(EventKind::ToolCall, move |event| {
            if let LiveEvent::ToolCall(call) = event {
                dispatcher.dispatch(call, responder.clone());
            }
        });
        let dispatcher = self.clone();
        let cancellations = client.on(EventKind::ToolCallCancellation, move |event| {
            if let LiveEvent::ToolCallCancellation(cancellation) = event {
                dispatcher.cancel(&cancellation.ids);
            }
        });
        let dispatcher = self.clone();
        let closes = client.on(EventKind::Close, move |_| dispatcher.cancel_all());
        [calls, cancellations, closes]
    }

    /// Spawns one task per function call. Must be called within a Tokio runtime.
    pub fn dispatch(self: &Arc<Self>, call: &ToolCall, responder: Responder) {
        for function_call in &call.function_calls {
            let dispatcher = self.clone();
            let responder = responder.clone();
            let function_call = function_call.clone();
            let id = function_call.id.clone();
            debug!(%id, name = %function_call.name, "Dispatching function call.");

            // Held across the spawn so the task cannot finish before it is registered.
            let mut in_flight = self.in_flight.lock();
            let task = tokio::spawn(async move {
                let output = dispatcher.execute(&function_call).await;
                // Held while responding so a concurrent cancel cannot slip in between.
                let mut in_flight = dispatcher.in_flight.lock();
                if in_flight.remove(&function_call.id).is_none() {
                    return;
                }
                let mut response = FunctionResponse::new(function_call.id.clone(), output);
                response.name = Some(function_call.name.clone());
                if let Err(e) = responder(ToolResponse {
                    function_responses: vec![response],
                }) {
                    warn!(id = %function_call.id, error = %e, "Could not send tool response.");
                }
                drop(in_flight);
            });
            in_flight.insert(id, task.abort_handle());
        }
    }

    /// Aborts in-flight calls with the given ids. Unknown ids are ignored.
    pub fn cancel(&self, ids: &[String]) {
        let mut in_flight = self.in_flight.lock();
        for id in ids {
            if let Some(task) = in_flight.remove(id) {
                task.abort();
                info!(%id, "Cancelled function call.");
            }
        }
    }

    /// Aborts every in-flight call. Run when the session closes; its
    /// call ids mean nothing to the next session.
    pub fn cancel_all(&self) {
        let mut in_flight = self.in_flight.lock();
        if in_flight.is_empty() {
            return;
        }
        let ids: Vec<String> = in_flight.keys().cloned().collect();
        for (_, task) in in_flight.drain() {
            task.abort();
        }
        info!(?ids, "Session closed; abandoned in-flight function calls.");
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    async fn execute(&self, call: &FunctionCall) -> Value {
        if call.name != SEARCH_HOTELS {
            warn!(name = %call.name, "Model called an undeclared function.");
            return json!({ "error": format!("Unknown function '{}'", call.name) });
        }
        let result = match query_argument(&call.args) {
            Ok(query) => self.backend.search(query).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(results) => json!({ "output": results }),
            Err(e) => {
                warn!(id = %call.id, error = %e, "Hotel search failed.");
                json!({ "error": e.to_string() })
            }
        }
    }
}

fn query_argument(args: &Value) -> Result<String, DownstreamError> {
    match args.get("query").and_then(Value::as_str).map(str::trim) {
        Some(query) if !query.is_empty() => Ok(query.to_string()),
        _ => Err(DownstreamError::InvalidArguments(
            "'query' must be a non-empty string".to_string(),
        )),
    }
}
