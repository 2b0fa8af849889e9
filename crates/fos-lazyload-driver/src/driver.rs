//! Event loop
//!
//! All coordinator transitions run on one task, so callbacks are applied one
//! at a time in arrival order. Timers, fetches and probes are spawned on a
//! local executor and report back through a channel. Dropping a task cancels
//! it, so abandoned fetches and polyfill loads stop as soon as the
//! coordinator gives up on them.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use fos_lazyload::{
    AttemptToken, CapabilityCache, Effect, FeatureName, FetchFailure, LifecycleCoordinator,
    LoadError, LoadOptions, NetworkMonitor, NetworkReading, ResourceDescriptor, SessionId,
    StateSnapshot, TimerToken,
};
use smol::channel::{self, Receiver, Sender};
use smol::{LocalExecutor, Task, Timer, future};

use crate::DriverError;
use crate::host::Host;

/// Request from the widget layer
#[derive(Debug, Clone)]
pub enum Command {
    /// Mount, or change the descriptor
    Activate(ResourceDescriptor),
    /// Network status probe reported
    Network(NetworkReading),
    /// Unmount
    Teardown,
    /// Stop the loop
    Shutdown,
}

/// Published to the rendering layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderSignal {
    State(StateSnapshot),
    Loaded(SessionId),
    Failed(SessionId, LoadError),
}

/// Result of a spawned task
#[derive(Debug)]
enum Settled {
    Eligible(SessionId),
    Timer(TimerToken),
    Fetch(AttemptToken, Result<(), FetchFailure>),
    Polyfill(SessionId, Result<(), String>),
    Capability(FeatureName, Result<bool, LoadError>),
}

impl Settled {
    fn key(&self) -> TaskKey {
        match self {
            Self::Eligible(id) => TaskKey::Visibility(*id),
            Self::Timer(token) => TaskKey::Timer(*token),
            Self::Fetch(attempt, _) => TaskKey::Fetch(*attempt),
            Self::Polyfill(id, _) => TaskKey::Polyfill(*id),
            Self::Capability(feature, _) => TaskKey::Probe(*feature),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TaskKey {
    Visibility(SessionId),
    Timer(TimerToken),
    Fetch(AttemptToken),
    Polyfill(SessionId),
    Probe(FeatureName),
}

enum Event {
    Command(Option<Command>),
    Settled(Option<Settled>),
}

/// Sends commands to a running [`Driver`]
#[derive(Debug, Clone)]
pub struct DriverHandle {
    commands: Sender<Command>,
}

impl DriverHandle {
    pub fn activate(&self, descriptor: ResourceDescriptor) -> Result<(), DriverError> {
        self.send(Command::Activate(descriptor))
    }

    pub fn network(&self, reading: NetworkReading) -> Result<(), DriverError> {
        self.send(Command::Network(reading))
    }

    pub fn teardown(&self) -> Result<(), DriverError> {
        self.send(Command::Teardown)
    }

    pub fn shutdown(&self) -> Result<(), DriverError> {
        self.send(Command::Shutdown)
    }

    pub fn send(&self, command: Command) -> Result<(), DriverError> {
        self.commands.try_send(command).map_err(|_| DriverError::Stopped)
    }
}

/// Single-threaded driver for one widget
pub struct Driver<H: Host + 'static> {
    host: Rc<H>,
    coordinator: LifecycleCoordinator,
    monitor: NetworkMonitor,
    probe_timeout: Duration,
    commands: Receiver<Command>,
    renders: Sender<RenderSignal>,
}

impl<H: Host + 'static> Driver<H> {
    pub fn new(
        host: Rc<H>,
        options: LoadOptions,
        capabilities: Arc<CapabilityCache>,
    ) -> Result<(Self, DriverHandle, Receiver<RenderSignal>), DriverError> {
        let monitor = match host.network_reading() {
            Some(reading) => NetworkMonitor::from_reading(&reading),
            None => NetworkMonitor::default(),
        };
        let probe_timeout = options.probe_timeout();
        let coordinator =
            LifecycleCoordinator::new(options, capabilities)?.with_network(monitor.current().clone());

        let (command_tx, command_rx) = channel::unbounded();
        let (render_tx, render_rx) = channel::unbounded();

        let driver = Self {
            host,
            coordinator,
            monitor,
            probe_timeout,
            commands: command_rx,
            renders: render_tx,
        };
        Ok((driver, DriverHandle { commands: command_tx }, render_rx))
    }

    /// Run until [`Command::Shutdown`] or until every handle is dropped
    pub async fn run(self) -> Result<(), DriverError> {
        let executor = LocalExecutor::new();
        executor.run(self.event_loop(&executor)).await
    }

    async fn event_loop(mut self, executor: &LocalExecutor<'_>) -> Result<(), DriverError> {
        let (settled_tx, settled_rx) = channel::unbounded();
        let mut tasks: HashMap<TaskKey, Task<()>> = HashMap::new();

        tracing::info!("lazyload driver started ({:?})", self.coordinator.network().class);

        loop {
            let event = future::or(
                async { Event::Command(self.commands.recv().await.ok()) },
                async { Event::Settled(settled_rx.recv().await.ok()) },
            )
            .await;

            let effects = match event {
                Event::Command(None) | Event::Command(Some(Command::Shutdown)) => break,
                Event::Command(Some(Command::Activate(descriptor))) => self.coordinator.activate(descriptor),
                Event::Command(Some(Command::Network(reading))) => match self.monitor.update(&reading) {
                    Some(condition) => self.coordinator.on_network_change(condition),
                    None => Vec::new(),
                },
                Event::Command(Some(Command::Teardown)) => self.coordinator.teardown(),
                Event::Settled(Some(settled)) => {
                    tasks.remove(&settled.key());
                    self.dispatch(settled)
                }
                Event::Settled(None) => Vec::new(),
            };

            self.execute(effects, executor, &settled_tx, &mut tasks)?;
        }

        // Teardown effects only release tasks, which dropping the map does anyway
        let _ = self.coordinator.teardown();
        tracing::info!("lazyload driver stopped ({} tasks cancelled)", tasks.len());
        Ok(())
    }

    fn dispatch(&mut self, settled: Settled) -> Vec<Effect> {
        match settled {
            Settled::Eligible(id) => self.coordinator.on_eligible(id),
            Settled::Timer(token) => self.coordinator.on_timer(token),
            Settled::Fetch(attempt, outcome) => self.coordinator.on_fetch_outcome(attempt, outcome),
            Settled::Polyfill(id, result) => self.coordinator.on_polyfill_result(id, result),
            Settled::Capability(feature, outcome) => self.coordinator.on_capability(feature, outcome),
        }
    }

    fn execute(
        &self,
        effects: Vec<Effect>,
        executor: &LocalExecutor<'_>,
        settled: &Sender<Settled>,
        tasks: &mut HashMap<TaskKey, Task<()>>,
    ) -> Result<(), DriverError> {
        for effect in effects {
            match effect {
                Effect::ProbeFormat { feature } => {
                    let key = TaskKey::Probe(feature);
                    if tasks.contains_key(&key) {
                        continue;
                    }
                    let host = Rc::clone(&self.host);
                    let tx = settled.clone();
                    let timeout = self.probe_timeout;
                    tracing::debug!("probing {} support", feature);
                    let task = executor.spawn(async move {
                        let outcome = future::or(
                            async {
                                host.probe_format(feature)
                                    .await
                                    .map_err(|reason| LoadError::CapabilityDetectionFailure { feature, reason })
                            },
                            async {
                                Timer::after(timeout).await;
                                Err(LoadError::CapabilityDetectionFailure {
                                    feature,
                                    reason: format!("no answer within {}ms", timeout.as_millis()),
                                })
                            },
                        )
                        .await;
                        let _ = tx.send(Settled::Capability(feature, outcome)).await;
                    });
                    tasks.insert(key, task);
                }
                Effect::ObserveVisibility { session, margin_px } => {
                    let host = Rc::clone(&self.host);
                    let tx = settled.clone();
                    let task = executor.spawn(async move {
                        host.wait_until_visible(margin_px).await;
                        let _ = tx.send(Settled::Eligible(session)).await;
                    });
                    tasks.insert(TaskKey::Visibility(session), task);
                }
                Effect::ReleaseVisibility { session } => {
                    tasks.remove(&TaskKey::Visibility(session));
                }
                Effect::StartTimer { token, delay } => {
                    let tx = settled.clone();
                    let task = executor.spawn(async move {
                        Timer::after(delay).await;
                        let _ = tx.send(Settled::Timer(token)).await;
                    });
                    tasks.insert(TaskKey::Timer(token), task);
                }
                Effect::CancelTimer { token } => {
                    tasks.remove(&TaskKey::Timer(token));
                }
                Effect::Fetch { attempt, url } => {
                    let host = Rc::clone(&self.host);
                    let tx = settled.clone();
                    tracing::debug!("session {}: attempt {} -> {}", attempt.session, attempt.seq, url);
                    let task = executor.spawn(async move {
                        let outcome = host.fetch(&url).await;
                        let _ = tx.send(Settled::Fetch(attempt, outcome)).await;
                    });
                    tasks.insert(TaskKey::Fetch(attempt), task);
                }
                Effect::AbandonFetch { attempt } => {
                    tasks.remove(&TaskKey::Fetch(attempt));
                }
                Effect::LoadPolyfill { session, kind } => {
                    let host = Rc::clone(&self.host);
                    let tx = settled.clone();
                    let task = executor.spawn(async move {
                        let result = host.load_polyfill(kind).await;
                        let _ = tx.send(Settled::Polyfill(session, result)).await;
                    });
                    tasks.insert(TaskKey::Polyfill(session), task);
                }
                Effect::AbandonPolyfill { session } => {
                    tasks.remove(&TaskKey::Polyfill(session));
                }
                Effect::Publish(snapshot) => self.render(RenderSignal::State(snapshot))?,
                Effect::NotifyLoad { session } => self.render(RenderSignal::Loaded(session))?,
                Effect::NotifyError { session, reason } => {
                    self.render(RenderSignal::Failed(session, reason))?
                }
            }
        }
        Ok(())
    }

    fn render(&self, signal: RenderSignal) -> Result<(), DriverError> {
        self.renders.try_send(signal).map_err(|_| DriverError::RenderClosed)
    }
}
