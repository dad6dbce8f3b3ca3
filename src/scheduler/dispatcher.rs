//! Command scheduler - ordered, one-at-a-time dispatch of queued commands

use super::events::ExchangeEvent;
use super::queue::{Callback, CommandQueue, CommandRequest, Completion, SchedulerState};
use crate::client::{ExchangeOutcome, ProtocolClient};
use crate::config::ControllerConfig;
use crate::transport::TransportConnector;
use northstar_shared::{Command, CommandError, Param, UnknownCommandPolicy};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Errors returned to producers. Exchange failures are never reported here;
/// they arrive as events and callbacks.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Scheduler has been stopped")]
    Stopped,

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Scheduler tuning
#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    /// Events buffered per subscriber before it starts lagging
    pub event_capacity: usize,
    /// Handling of by-name commands with an unrecognised action
    pub unknown_commands: UnknownCommandPolicy,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            unknown_commands: UnknownCommandPolicy::Reject,
        }
    }
}

impl From<&ControllerConfig> for SchedulerOptions {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            event_capacity: config.event_capacity.max(1),
            unknown_commands: config.unknown_commands,
        }
    }
}

struct Shared {
    queue: CommandQueue,
    wake: Notify,
    events: broadcast::Sender<ExchangeEvent>,
    worker: Mutex<Option<JoinHandle<()>>>,
    options: SchedulerOptions,
}

/// Held by every handle clone. Dropping the last one closes the queue, so
/// the worker drains what is left and exits even without `shutdown`.
struct Owner {
    shared: Arc<Shared>,
}

impl Drop for Owner {
    fn drop(&mut self) {
        self.shared.queue.close();
        self.shared.wake.notify_one();
    }
}

/// Handle to a running scheduler. Cheap to clone; every clone feeds the same
/// queue and worker.
#[derive(Clone)]
pub struct CommandScheduler {
    owner: Arc<Owner>,
}

impl CommandScheduler {
    /// Start a scheduler talking TCP to the configured agent daemon.
    /// Must be called from within a tokio runtime.
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self::start(ProtocolClient::from_config(config), config.into())
    }

    /// Spawn the worker task and return a handle to it.
    /// Must be called from within a tokio runtime.
    pub fn start<C>(client: ProtocolClient<C>, options: SchedulerOptions) -> Self
    where
        C: TransportConnector + 'static,
    {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let shared = Arc::new(Shared {
            queue: CommandQueue::new(),
            wake: Notify::new(),
            events,
            worker: Mutex::new(None),
            options,
        });

        let endpoint = client.endpoint();
        let handle = tokio::spawn(run_worker(shared.clone(), Arc::new(client)));
        *shared.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        info!("Command scheduler started for {}", endpoint);
        Self {
            owner: Arc::new(Owner { shared }),
        }
    }

    fn shared(&self) -> &Shared {
        &self.owner.shared
    }

    fn push(&self, command: Command, completion: Completion) -> Result<u64, SchedulerError> {
        let action = command.action().to_string();
        let seq = self
            .shared()
            .queue
            .push(command, completion)
            .map_err(|_| SchedulerError::Stopped)?;
        debug!("Queued {} as request {}", action, seq);
        self.shared().wake.notify_one();
        Ok(seq)
    }

    /// Append a command to the tail of the queue.
    /// Returns its submission sequence number.
    pub fn enqueue(&self, command: Command) -> Result<u64, SchedulerError> {
        self.push(command, Completion::None)
    }

    /// Append a command; `callback` runs once with the outcome, after the
    /// exchange event has been broadcast.
    pub fn enqueue_with_callback<F>(&self, command: Command, callback: F) -> Result<u64, SchedulerError>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.push(command, Completion::Callback(Box::new(callback)))
    }

    /// Build a command from its name and positional parameters, then
    /// enqueue it. Invalid parameters are rejected before anything is
    /// queued.
    pub fn enqueue_by_name(
        &self,
        name: &str,
        params: &[Param],
        callback: Option<Callback>,
    ) -> Result<u64, SchedulerError> {
        let command = Command::from_positional(name, params, self.shared().options.unknown_commands)?;
        let completion = match callback {
            Some(callback) => Completion::Callback(callback),
            None => Completion::None,
        };
        self.push(command, completion)
    }

    /// Enqueue a command and receive its full outcome when it completes
    pub fn submit(&self, command: Command) -> Result<oneshot::Receiver<ExchangeOutcome>, SchedulerError> {
        let (tx, rx) = oneshot::channel();
        self.push(command, Completion::Outcome(tx))?;
        Ok(rx)
    }

    /// Receive an event for every exchange completed from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ExchangeEvent> {
        self.shared().events.subscribe()
    }

    /// Requests waiting behind the in-flight one
    pub fn pending(&self) -> usize {
        self.shared().queue.pending()
    }

    /// Sequence number of the request currently being exchanged
    pub fn in_flight(&self) -> Option<u64> {
        self.shared().queue.in_flight()
    }

    pub fn state(&self) -> SchedulerState {
        self.shared().queue.state()
    }

    /// Fail every request that has not started yet. Each one still gets its
    /// event and callback, from the worker and after the in-flight request.
    /// Returns how many were cancelled.
    pub fn clear_pending(&self) -> usize {
        let count = self.shared().queue.drain_pending();
        if count > 0 {
            info!("Cancelled {} queued commands", count);
            self.shared().wake.notify_one();
        }
        count
    }

    /// Stop accepting commands. Already queued commands are still sent.
    pub fn shutdown(&self) {
        if self.shared().queue.is_accepting() {
            info!("Command scheduler stopping");
        }
        self.shared().queue.close();
        self.shared().wake.notify_one();
    }

    /// Wait for the worker to drain the queue and exit after `shutdown`
    pub async fn join(&self) {
        let handle = self
            .shared()
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Scheduler worker ended abnormally: {}", e);
            }
        }
    }
}

/// Broadcast the event for a finished request, then complete it
fn finish_request(
    events: &broadcast::Sender<ExchangeEvent>,
    request: CommandRequest,
    outcome: ExchangeOutcome,
) {
    let seq = request.seq;
    let action = request.command.action().to_string();

    let event = if outcome.success {
        info!("Command '{}' (#{}) succeeded", action, seq);
        ExchangeEvent::Succeeded {
            seq,
            action,
            response: outcome.message.clone(),
        }
    } else {
        warn!("Command '{}' (#{}) failed: {}", action, seq, outcome.message);
        ExchangeEvent::Failed {
            seq,
            action,
            error: outcome.message.clone(),
        }
    };

    // No subscribers is not an error
    let _ = events.send(event);
    request.complete(outcome);
}

/// Single consumer: takes the head of the queue only when the slot is free,
/// runs its exchange to completion, then moves on.
async fn run_worker<C>(shared: Arc<Shared>, client: Arc<ProtocolClient<C>>)
where
    C: TransportConnector + 'static,
{
    loop {
        for request in shared.queue.take_cancelled() {
            let outcome = ExchangeOutcome::failed("Cancelled before dispatch");
            finish_request(&shared.events, request, outcome);
        }

        let Some(request) = shared.queue.take_next() else {
            if shared.queue.is_finished() {
                break;
            }
            shared.wake.notified().await;
            continue;
        };

        shared.queue.set_state(SchedulerState::InFlight);
        debug!("Dispatching request {}: {}", request.seq, request.command);

        // Run the exchange on its own task so that even a panic inside the
        // transport turns into a reported failure.
        let exchange = {
            let client = client.clone();
            let command = request.command.clone();
            tokio::spawn(async move { client.exchange(&command).await })
        };
        let outcome = match exchange.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Exchange task for request {} aborted: {}", request.seq, e);
                ExchangeOutcome::failed(format!("Exchange aborted: {}", e))
            }
        };

        shared.queue.set_state(SchedulerState::Completing);
        let seq = request.seq;
        finish_request(&shared.events, request, outcome);
        shared.queue.finish(seq);
    }

    shared.queue.set_state(SchedulerState::Stopped);
    info!("Command scheduler stopped");
}
