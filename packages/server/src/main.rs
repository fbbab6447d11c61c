//! RPC server binary.
//!
//! Serves one server path from a SurrealDB-backed queue, replying through a
//! reply pool it provisions on first start. Configured through `KB_RPC_*`
//! environment variables; stops on Ctrl-C.

mod config;

use std::error::Error;
use std::sync::Arc;

use actors::{EchoHandler, RpcHandlerRegistry, ServerArgs, ServerMessage, start_rpc_server};
use db::SurrealStore;
use rpc_core::{JobRecord, ReplySlot};
use rpc_queue::RpcQueues;
use tokio::sync::broadcast::error::RecvError;

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = ServerConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    let db_conn = db::init(&config.db_config()).await?;
    let queues = Arc::new(
        RpcQueues::new(
            Arc::new(
                SurrealStore::<JobRecord>::new(db_conn.clone())
                    .with_intent_lease(config.intent_lease),
            ),
            Arc::new(SurrealStore::<ReplySlot>::new(db_conn).with_intent_lease(config.intent_lease)),
        )
        .with_retry_policy(config.retry_policy()),
    );

    let pool = queues.pool_stats(&config.client_path).await?;
    if pool.capacity() == 0 {
        queues
            .provision_pool(&config.client_path, config.pool_depth)
            .await?;
    } else {
        tracing::info!(
            "Reply pool {} already has {} slots ({} waiting)",
            config.client_path,
            pool.capacity(),
            pool.occupied
        );
    }

    let jobs = queues.job_stats(&config.server_path).await?;
    if jobs.active() > 0 {
        tracing::info!(
            "{} has {} unfinished jobs ({} processing)",
            config.server_path,
            jobs.active(),
            jobs.processing
        );
    }

    // Mirror queue activity into the log
    let mut events = queues.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::debug!("{}", event.description()),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Event log skipped {} events", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut handlers = RpcHandlerRegistry::new();
    handlers.register(EchoHandler);

    let args = ServerArgs::new(queues.clone(), config.server_path.clone(), Arc::new(handlers))
        .with_poll_interval(config.poll_interval)
        .with_handler_timeout(config.handler_timeout);
    let (server, handle) = start_rpc_server(args).await?;

    tracing::info!("Serving {} - press Ctrl-C to stop", config.server_path);
    tokio::signal::ctrl_c().await?;

    server.send_message(ServerMessage::Shutdown)?;
    handle.await?;
    Ok(())
}
