//! RPC handler trait and registry.

use rpc_core::JobRecord;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Result type for RPC handlers. The error string is sent back to the
/// caller as `{"error": ...}`.
pub type HandlerResult = Result<serde_json::Value, String>;

/// Future type for async RPC handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Trait for RPC handlers.
///
/// Implement this trait to define how requests for a specific action are served.
pub trait RpcHandler: Send + Sync + 'static {
    /// The action this handler serves.
    fn action(&self) -> &str;

    /// Serve a request and return the reply payload.
    fn handle(&self, job: &JobRecord) -> HandlerFuture;
}

/// Registry for RPC handlers.
///
/// Maps actions to their handlers for dynamic dispatch.
#[derive(Default)]
pub struct RpcHandlerRegistry {
    handlers: HashMap<String, Arc<dyn RpcHandler>>,
}

impl RpcHandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for an action.
    pub fn register<H: RpcHandler>(&mut self, handler: H) {
        let action = handler.action().to_string();
        self.handlers.insert(action, Arc::new(handler));
    }

    /// Get the handler for an action.
    pub fn get(&self, action: &str) -> Option<Arc<dyn RpcHandler>> {
        self.handlers.get(action).cloned()
    }

    /// List all registered actions.
    pub fn actions(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }
}

/// A simple function-based RPC handler.
pub struct FnHandler<F>
where
    F: Fn(&JobRecord) -> HandlerFuture + Send + Sync + 'static,
{
    action: String,
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&JobRecord) -> HandlerFuture + Send + Sync + 'static,
{
    /// Create a new function-based handler.
    pub fn new(action: impl Into<String>, handler: F) -> Self {
        Self {
            action: action.into(),
            handler,
        }
    }
}

impl<F> RpcHandler for FnHandler<F>
where
    F: Fn(&JobRecord) -> HandlerFuture + Send + Sync + 'static,
{
    fn action(&self) -> &str {
        &self.action
    }

    fn handle(&self, job: &JobRecord) -> HandlerFuture {
        (self.handler)(job)
    }
}

/// Handler that replies with the request payload unchanged.
pub struct EchoHandler;

impl RpcHandler for EchoHandler {
    fn action(&self) -> &str {
        "echo"
    }

    fn handle(&self, job: &JobRecord) -> HandlerFuture {
        let payload = job.payload.clone();
        Box::pin(async move { Ok(payload) })
    }
}

/// Helper macro for creating RPC handlers from async closures.
#[macro_export]
macro_rules! rpc_handler {
    ($action:expr, |$job:ident| $body:expr) => {
        $crate::FnHandler::new($action, |$job: &rpc_core::JobRecord| {
            let $job = $job.clone();
            Box::pin(async move { $body })
        })
    };
}
