//! Actor layer for serving RPC requests.
//!
//! This crate provides the Ractor-based server that turns a server path's
//! job queue into running handlers.
//!
//! # Architecture
//!
//! - `RpcServerActor` - Polls one server path, claims jobs and serves them
//! - `RpcHandlerRegistry` - Maps actions to their handlers
//!
//! Replies go to the job's reply route through the client reply pool, after
//! which the job is marked completed.
//!
//! # Usage
//!
//! ```ignore
//! use actors::{EchoHandler, RpcHandlerRegistry, ServerArgs, start_rpc_server};
//!
//! let mut handlers = RpcHandlerRegistry::new();
//! handlers.register(EchoHandler);
//!
//! let args = ServerArgs::new(queues, server_path, Arc::new(handlers));
//! let (server, handle) = start_rpc_server(args).await?;
//! ```

mod handler;
mod messages;
mod server_actor;

pub use handler::{EchoHandler, FnHandler, HandlerFuture, HandlerResult, RpcHandler, RpcHandlerRegistry};
pub use messages::{ActorError, ActorResult, ServerMessage, ServerStats};
pub use server_actor::{
    DEFAULT_HANDLER_TIMEOUT, DEFAULT_POLL_INTERVAL, RpcServerActor, ServerArgs, ServerState,
    server_stats, start_rpc_server,
};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
