//! Server actor serving RPC requests from one server path.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use db::RecordStore;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use rpc_core::{JobRecord, KbPath, ReplySlot, ReplyWrite};
use rpc_queue::RpcQueues;
use serde_json::json;

use crate::handler::RpcHandlerRegistry;
use crate::messages::{ActorError, ActorResult, ServerMessage, ServerStats};

/// Default interval between polls of the server path.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default time a handler may run before its request fails.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// Server actor arguments.
pub struct ServerArgs<J, P> {
    pub queues: Arc<RpcQueues<J, P>>,
    pub server_path: KbPath,
    pub handlers: Arc<RpcHandlerRegistry>,
    pub poll_interval: Duration,
    pub handler_timeout: Duration,
}

impl<J, P> ServerArgs<J, P> {
    /// Create arguments with the default poll interval and handler timeout.
    pub fn new(
        queues: Arc<RpcQueues<J, P>>,
        server_path: KbPath,
        handlers: Arc<RpcHandlerRegistry>,
    ) -> Self {
        Self {
            queues,
            server_path,
            handlers,
            poll_interval: DEFAULT_POLL_INTERVAL,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the handler timeout.
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }
}

/// State for the server actor.
pub struct ServerState<J, P> {
    queues: Arc<RpcQueues<J, P>>,
    server_path: KbPath,
    handlers: Arc<RpcHandlerRegistry>,
    handler_timeout: Duration,
    stats: ServerStats,
    /// Set while a `Poll` sits in the mailbox, so ticks never pile up
    /// behind a slow handler.
    poll_pending: Arc<AtomicBool>,
}

impl<J, P> ServerState<J, P>
where
    J: RecordStore<JobRecord>,
    P: RecordStore<ReplySlot>,
{
    /// Run the handler for `job`. Failures become an error payload.
    async fn dispatch(&mut self, job: &JobRecord) -> serde_json::Value {
        let Some(handler) = self.handlers.get(&job.action) else {
            self.stats.failed += 1;
            tracing::warn!("No handler for action {} on {}", job.action, job.path);
            return json!({ "error": format!("No handler for action: {}", job.action) });
        };

        match tokio::time::timeout(self.handler_timeout, handler.handle(job)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(error)) => {
                self.stats.failed += 1;
                tracing::warn!("Handler {} failed for job {}: {}", job.action, job.id, error);
                json!({ "error": error })
            }
            Err(_) => {
                self.stats.failed += 1;
                tracing::warn!("Handler {} timed out for job {}", job.action, job.id);
                json!({ "error": "Handler timed out" })
            }
        }
    }

    /// Queue a poll unless one is already waiting.
    fn request_poll(&self, myself: &ActorRef<ServerMessage>) -> Result<(), ActorProcessingErr> {
        if !self.poll_pending.swap(true, Ordering::AcqRel) {
            myself.send_message(ServerMessage::Poll)?;
        }
        Ok(())
    }

    /// Claim the next job and serve it to completion. Returns whether a job
    /// was served.
    async fn poll(&mut self) -> bool {
        match self.queues.claim_job(&self.server_path).await {
            Ok(Some(job)) => {
                self.serve(job).await;
                true
            }
            Ok(None) => false,
            Err(e) if e.is_retryable() => {
                tracing::debug!("Claim on {} backed off: {}", self.server_path, e);
                false
            }
            Err(e) => {
                tracing::warn!("Claim on {} failed: {}", self.server_path, e);
                false
            }
        }
    }

    /// Serve one claimed job: dispatch, deliver the reply, then complete it.
    async fn serve(&mut self, job: JobRecord) {
        let payload = self.dispatch(&job).await;

        if let Some(route) = &job.reply_route {
            let reply = ReplyWrite {
                request_id: job.request_id.clone(),
                server_path: job.path.clone(),
                action: job.action.clone(),
                transaction_tag: job.transaction_tag.clone(),
                payload,
            };
            if let Err(e) = self.queues.push_reply(route, reply).await {
                self.stats.replies_dropped += 1;
                tracing::warn!("Dropped reply for job {} to {}: {}", job.id, route, e);
            }
        }

        match self.queues.complete_job(&job.path, job.id).await {
            Ok(_) => self.stats.served += 1,
            Err(e) => tracing::warn!("Failed to complete job {}: {}", job.id, e),
        }
    }
}

/// Actor that claims jobs from one server path and serves them.
///
/// Jobs are served one at a time: a job is claimed only once the previous
/// one is completed, so an actor never holds more than one job in
/// Processing and stopping it strands nothing. Run several actors on the
/// same path to serve in parallel; the claim protocol keeps them from
/// serving the same job twice.
pub struct RpcServerActor<J, P> {
    _stores: PhantomData<fn() -> (J, P)>,
}

impl<J, P> RpcServerActor<J, P> {
    pub fn new() -> Self {
        Self {
            _stores: PhantomData,
        }
    }
}

impl<J, P> Default for RpcServerActor<J, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<J, P> Actor for RpcServerActor<J, P>
where
    J: RecordStore<JobRecord>,
    P: RecordStore<ReplySlot>,
{
    type Msg = ServerMessage;
    type State = ServerState<J, P>;
    type Arguments = ServerArgs<J, P>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting RPC server on {} serving {:?}",
            args.server_path,
            args.handlers.actions()
        );

        // Start the poll loop
        let poll_pending = Arc::new(AtomicBool::new(false));
        let pending = poll_pending.clone();
        let myself_clone = myself.clone();
        let interval = args.poll_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if pending.swap(true, Ordering::AcqRel) {
                    continue;
                }
                if myself_clone.send_message(ServerMessage::Poll).is_err() {
                    break;
                }
            }
        });

        Ok(ServerState {
            queues: args.queues,
            server_path: args.server_path,
            handlers: args.handlers,
            handler_timeout: args.handler_timeout,
            stats: ServerStats::default(),
            poll_pending,
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(
            "RPC server on {} stopped after serving {} jobs",
            state.server_path,
            state.stats.served
        );
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ServerMessage::Poll => {
                state.poll_pending.store(false, Ordering::Release);
                if state.stats.paused {
                    return Ok(());
                }

                // Keep draining while work is queued
                if state.poll().await {
                    state.request_poll(&myself)?;
                }
            }

            ServerMessage::Pause => {
                tracing::info!("Pausing RPC server on {}", state.server_path);
                state.stats.paused = true;
            }

            ServerMessage::Resume => {
                tracing::info!("Resuming RPC server on {}", state.server_path);
                state.stats.paused = false;
            }

            ServerMessage::GetStats { reply } => {
                let _ = reply.send(state.stats.clone());
            }

            ServerMessage::Shutdown => {
                tracing::info!("Shutting down RPC server on {}", state.server_path);
                myself.stop(None);
            }
        }

        Ok(())
    }
}

/// Start a server actor for `args.server_path`.
pub async fn start_rpc_server<J, P>(
    args: ServerArgs<J, P>,
) -> ActorResult<(ActorRef<ServerMessage>, tokio::task::JoinHandle<()>)>
where
    J: RecordStore<JobRecord>,
    P: RecordStore<ReplySlot>,
{
    let name = format!("rpc-server-{}", args.server_path);
    let (actor, handle) = Actor::spawn(Some(name), RpcServerActor::<J, P>::new(), args).await?;
    Ok((actor, handle))
}

/// Fetch the serving counters of a running server.
pub async fn server_stats(actor: &ActorRef<ServerMessage>) -> ActorResult<ServerStats> {
    let timeout = Duration::from_secs(5);
    let result = ractor::rpc::call(
        actor,
        |reply| ServerMessage::GetStats { reply },
        Some(timeout),
    )
    .await
    .map_err(|e| ActorError::Actor(e.to_string()))?;

    match result {
        ractor::rpc::CallResult::Success(stats) => Ok(stats),
        ractor::rpc::CallResult::Timeout => Err(ActorError::Timeout),
        ractor::rpc::CallResult::SenderError => {
            Err(ActorError::Actor("Server dropped the stats request".into()))
        }
    }
}
