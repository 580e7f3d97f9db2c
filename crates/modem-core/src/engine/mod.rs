//! The engine task
//!
//! One [`Engine`] owns a [`Channel`] and everything that interprets it: the
//! dispatcher, the unsolicited router, the connection state and the live
//! mediators. It runs as a single task, so handlers never race each other
//! and mediators settle in the order their replies arrive. Callers talk to
//! it through [`ModemHandle`]s over a bounded request queue.
//!
//! Each turn of the loop handles one input (a line, a request or an expired
//! deadline), writes whatever the dispatcher has ready, then publishes the
//! state changes of that turn.

mod handle;

pub use handle::{ModemHandle, PendingOperation};

use self::handle::{Completion, EngineRequest};
use crate::command::{Command, CommandSpec, Outcome, ReplyGroup};
use crate::config::{ModemConfig, TimeoutTable};
use crate::dispatcher::{DispatchEvent, Dispatcher, LineRules};
use crate::error::{ModemError, ModemResult};
use crate::events::ModemEvent;
use crate::mediator::{Mediator, MediatorContext, MediatorState, Step};
use crate::operation::{Operation, OperationId, OperationOutput};
use crate::profile::ModemProfile;
use crate::provider::ProviderTable;
use crate::state::{ConnectionSnapshot, ConnectionState};
use crate::unsolicited::UnsolicitedRouter;
use gsmd_modem_transport::{Channel, Line, TransportError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Who waits for a command's reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOwner {
    Mediator(OperationId),
    /// Init commands and clean-up; the reply is only logged
    Detached,
}

struct ActiveMediator {
    mediator: Box<dyn Mediator>,
    state: MediatorState,
    /// `None` for follow-ups the engine started itself
    completion: Option<Completion>,
}

/// Why the loop ended
enum Exit {
    Transport(TransportError),
    Shutdown(oneshot::Sender<()>),
    HandlesDropped,
}

pub struct Engine {
    channel: Channel,
    dispatcher: Dispatcher<CommandOwner>,
    rules: Arc<LineRules>,
    router: UnsolicitedRouter,
    state: ConnectionState,
    profile: Arc<dyn ModemProfile>,
    providers: Arc<ProviderTable>,
    config: Arc<ModemConfig>,
    builtin_timeouts: TimeoutTable,
    mediators: HashMap<OperationId, ActiveMediator>,
    /// Results delivered once the turn's state changes are published
    settled: Vec<(OperationId, Completion, ModemResult<OperationOutput>)>,
    next_id: Arc<AtomicU64>,
    requests: mpsc::Receiver<EngineRequest>,
    events: broadcast::Sender<ModemEvent>,
    snapshot: watch::Sender<ConnectionSnapshot>,
}

impl Engine {
    /// Engine for the profile named in `config`
    pub fn new(channel: Channel, config: ModemConfig) -> (Self, ModemHandle) {
        let profile = config.profile.build();
        Self::with_profile(channel, config, profile)
    }

    /// Engine for a custom profile
    pub fn with_profile(
        channel: Channel,
        config: ModemConfig,
        profile: Arc<dyn ModemProfile>,
    ) -> (Self, ModemHandle) {
        let rules = Arc::new(LineRules {
            terminals: config.terminals.clone().unwrap_or_else(|| profile.terminals()),
            notifications: profile.notifications(),
            abort_sequence: profile.abort_sequence(),
        });
        let providers = Arc::new(ProviderTable::builtin().with_overrides(config.providers.iter().cloned()));
        let state = ConnectionState::new(config.max_calls.unwrap_or_else(|| profile.max_calls()));

        let (request_tx, request_rx) = mpsc::channel(config.request_queue.max(1));
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());
        let next_id = Arc::new(AtomicU64::new(1));

        let handle = ModemHandle::new(request_tx, event_tx.clone(), snapshot_rx, next_id.clone());
        let engine = Self {
            channel,
            dispatcher: Dispatcher::new(rules.clone()),
            router: UnsolicitedRouter::new(rules.notifications.clone()),
            rules,
            state,
            builtin_timeouts: profile.timeouts(),
            profile,
            providers,
            config: Arc::new(config),
            mediators: HashMap::new(),
            settled: Vec::new(),
            next_id,
            requests: request_rx,
            events: event_tx,
            snapshot: snapshot_tx,
        };
        (engine, handle)
    }

    /// Start an engine on the current runtime
    pub fn spawn(channel: Channel, config: ModemConfig) -> (ModemHandle, JoinHandle<()>) {
        let (engine, handle) = Self::new(channel, config);
        (handle, tokio::spawn(engine.run()))
    }

    /// Run until shutdown, until every handle is dropped, or until the
    /// channel fails
    pub async fn run(mut self) {
        info!(
            "Modem engine starting on {} with profile {}",
            self.channel.name(),
            self.profile.name()
        );

        let exit = match self.channel.set_power(true).await {
            Ok(()) => {
                self.send_init();
                self.event_loop().await
            }
            Err(e) => Exit::Transport(e),
        };

        let done = match exit {
            Exit::Transport(e) => {
                error!("Channel {} failed: {}", self.channel.name(), e);
                None
            }
            Exit::Shutdown(done) => {
                info!("Shutdown requested");
                Some(done)
            }
            Exit::HandlesDropped => {
                info!("All handles dropped");
                None
            }
        };
        self.close().await;
        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    async fn event_loop(&mut self) -> Exit {
        loop {
            if let Err(e) = self.flush().await {
                return Exit::Transport(e);
            }
            self.publish();

            let deadline = self.dispatcher.next_deadline();
            tokio::select! {
                line = self.channel.next_line() => match line {
                    Ok(line) => self.on_line(line),
                    Err(e) => return Exit::Transport(e),
                },
                request = self.requests.recv() => match request {
                    Some(EngineRequest::Shutdown { done }) => return Exit::Shutdown(done),
                    Some(request) => self.on_request(request),
                    None => return Exit::HandlesDropped,
                },
                _ = wait_until(deadline) => self.on_deadline(),
            }
        }
    }

    fn send_init(&mut self) {
        let mut commands = self.profile.init_commands();
        commands.extend(self.config.extra_init.iter().map(CommandSpec::new));
        debug!("Queueing {} init commands", commands.len());
        for spec in commands {
            if let Err(e) = self.enqueue(spec, CommandOwner::Detached) {
                warn!("Could not queue init command: {}", e);
            }
        }
    }

    /// Write everything the dispatcher has ready
    async fn flush(&mut self) -> Result<(), TransportError> {
        while let Some(transmit) = self.dispatcher.poll_transmit(Instant::now()) {
            if transmit.expect_prompt {
                self.channel.expect_prompt(true);
            }
            self.channel.send(&transmit.bytes).await?;
        }
        Ok(())
    }

    /// Hand this turn's state changes to subscribers, then results to callers
    fn publish(&mut self) {
        let events = self.state.take_events();
        if !events.is_empty() {
            for event in events {
                trace!("Event {:?}", event);
                // Nobody subscribed is fine
                let _ = self.events.send(event);
            }
            self.snapshot.send_replace(self.state.snapshot());
        }

        for (id, completion, result) in self.settled.drain(..) {
            if completion.send(result).is_err() {
                debug!("Caller of {} went away", id);
            }
        }
    }

    fn on_line(&mut self, line: Line) {
        if let Line::Text(text) = &line {
            trace!("<- {}", text);
        }
        if let Some(event) = self.dispatcher.on_line(line) {
            self.on_dispatch(event);
        }
    }

    fn on_deadline(&mut self) {
        if let Some(event) = self.dispatcher.on_deadline(Instant::now()) {
            self.on_dispatch(event);
        }
    }

    fn on_dispatch(&mut self, event: DispatchEvent<CommandOwner>) {
        match event {
            DispatchEvent::Completed {
                token,
                outcome,
                reply,
            } => {
                self.channel.expect_prompt(false);
                self.on_completed(token, outcome, reply);
            }
            DispatchEvent::Unsolicited(lines) => {
                let follow_ups = self.router.route(&lines, &mut self.state);
                for operation in follow_ups {
                    self.start_internal(operation);
                }
            }
        }
    }

    fn on_request(&mut self, request: EngineRequest) {
        match request {
            EngineRequest::Invoke {
                id,
                operation,
                completion,
            } => {
                debug!("{} {} requested", operation.kind(), id);
                self.start(id, operation, Some(completion));
            }
            EngineRequest::Cancel { id } => self.cancel(id),
            // Handled by the loop
            EngineRequest::Shutdown { done } => {
                let _ = done.send(());
            }
        }
    }

    fn allocate_id(&self) -> OperationId {
        OperationId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn start_internal(&mut self, operation: Operation) {
        let id = self.allocate_id();
        debug!("Starting follow-up {} {}", operation.kind(), id);
        self.start(id, operation, None);
    }

    fn start(&mut self, id: OperationId, operation: Operation, completion: Option<Completion>) {
        let mut mediator = self.profile.build(operation);
        let mut ctx = MediatorContext::new(&mut self.state, &self.providers, &self.rules.terminals);
        let step = match mediator.trigger(&mut ctx) {
            Ok(spec) => Step::Send(spec),
            Err(e) => {
                debug!("{} {} refused: {}", mediator.kind(), id, e);
                Step::Fail(e)
            }
        };
        let (follow_ups, detached) = ctx.into_parts();

        let active = ActiveMediator {
            mediator,
            state: MediatorState::Created,
            completion,
        };
        self.advance(id, active, step);
        self.run_side_effects(follow_ups, detached);
    }

    fn on_completed(&mut self, owner: CommandOwner, outcome: Outcome, reply: ReplyGroup) {
        let id = match owner {
            CommandOwner::Mediator(id) => id,
            CommandOwner::Detached => {
                match outcome {
                    Outcome::Success => trace!("AT{} done", reply.command()),
                    Outcome::Failure => warn!("AT{} failed: {:?}", reply.command(), reply.terminator()),
                }
                return;
            }
        };
        let Some(mut active) = self.mediators.remove(&id) else {
            debug!("Discarding reply to AT{} for settled {}", reply.command(), id);
            return;
        };

        let mut ctx = MediatorContext::new(&mut self.state, &self.providers, &self.rules.terminals);
        let step = match outcome {
            Outcome::Success => active.mediator.on_success(&reply, &mut ctx),
            Outcome::Failure => active.mediator.on_failure(&reply, &mut ctx),
        };
        let (follow_ups, detached) = ctx.into_parts();

        self.advance(id, active, step);
        self.run_side_effects(follow_ups, detached);
    }

    fn cancel(&mut self, id: OperationId) {
        let Some(mut active) = self.mediators.remove(&id) else {
            debug!("Cancel of {} ignored, already settled", id);
            return;
        };
        info!("{} {} cancelled", active.mediator.kind(), id);

        let mut ctx = MediatorContext::new(&mut self.state, &self.providers, &self.rules.terminals);
        active.mediator.on_cancel(&mut ctx);
        let (follow_ups, detached) = ctx.into_parts();

        active.state = MediatorState::Failed;
        self.settle(id, active, Err(ModemError::Cancelled));
        self.run_side_effects(follow_ups, detached);
    }

    fn advance(&mut self, id: OperationId, mut active: ActiveMediator, step: Step) {
        active.state = active.state.after(&step);
        match step {
            Step::Send(spec) => {
                trace!("{} {} now {:?}", active.mediator.kind(), id, active.state);
                match self.enqueue(spec, CommandOwner::Mediator(id)) {
                    Ok(()) => {
                        self.mediators.insert(id, active);
                    }
                    Err(e) => {
                        active.state = MediatorState::Failed;
                        self.settle(id, active, Err(e));
                    }
                }
            }
            Step::Succeed(output) => self.settle(id, active, Ok(output)),
            Step::Fail(e) => self.settle(id, active, Err(e)),
        }
    }

    fn settle(&mut self, id: OperationId, mut active: ActiveMediator, result: ModemResult<OperationOutput>) {
        let kind = active.mediator.kind();
        debug_assert!(active.state.is_settled());
        match &result {
            Ok(_) => debug!("{} {} succeeded", kind, id),
            Err(e) => info!("{} {} failed: {}", kind, id, e),
        }
        if let Some(completion) = active.completion.take() {
            self.settled.push((id, completion, result));
        }
    }

    fn run_side_effects(&mut self, follow_ups: Vec<Operation>, detached: Vec<CommandSpec>) {
        for spec in detached {
            if let Err(e) = self.enqueue(spec, CommandOwner::Detached) {
                debug!("Dropping detached command: {}", e);
            }
        }
        for operation in follow_ups {
            self.start_internal(operation);
        }
    }

    fn enqueue(&mut self, spec: CommandSpec, owner: CommandOwner) -> ModemResult<()> {
        let timeout = self.config.resolve_timeout(&spec, &self.builtin_timeouts);
        self.dispatcher
            .enqueue(Command::new(spec, timeout, owner))
            .map_err(|_| ModemError::disconnected())
    }

    /// Fail everything outstanding, reject waiting requests, power off
    async fn close(&mut self) {
        for event in self.dispatcher.close() {
            self.on_dispatch(event);
        }

        // Anything a failure handler left behind
        let mut leftover: Vec<OperationId> = self.mediators.keys().copied().collect();
        leftover.sort();
        for id in leftover {
            if let Some(mut active) = self.mediators.remove(&id) {
                active.state = MediatorState::Failed;
                self.settle(id, active, Err(ModemError::disconnected()));
            }
        }

        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            match request {
                EngineRequest::Invoke { completion, .. } => {
                    let _ = completion.send(Err(ModemError::disconnected()));
                }
                EngineRequest::Cancel { .. } => {}
                EngineRequest::Shutdown { done } => {
                    let _ = done.send(());
                }
            }
        }

        self.publish();
        let _ = self.events.send(ModemEvent::Closed);

        if let Err(e) = self.channel.set_power(false).await {
            warn!("Could not power down {}: {}", self.channel.name(), e);
        }
        info!("Modem engine on {} stopped", self.channel.name());
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
