//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Per-plant sequential worker and its client handle."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use parking_lot::Mutex;
use plantsim_common::time::event_now;
use plantsim_common::{EngineConfig, PlantConfig, PlantId, PlantType};
use plantsim_events::{EventStream, Signal};
use plantsim_metrics::PlantMetrics;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::PlantError;
use crate::machine::{transition, PlantCommand, PlantInput, PlantState};
use crate::telemetry::TelemetrySignals;
use crate::ticker::{next_tick, RampTicker};

const DEFAULT_MAILBOX_CAPACITY: usize = 64;

/// Knobs shared by every worker a caller spawns.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub mailbox_capacity: usize,
    pub metrics: Option<PlantMetrics>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            metrics: None,
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            mailbox_capacity: config.mailbox_capacity,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: PlantMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

#[derive(Debug)]
enum Envelope {
    Command(PlantCommand),
    GetState(oneshot::Sender<PlantState>),
    GetTelemetry(oneshot::Sender<TelemetrySignals>),
}

/// Sequential worker owning the snapshot of one plant.
///
/// Inputs are applied one at a time in arrival order. The ramp timer exists only
/// while the plant is ramping.
#[derive(Debug)]
pub struct PlantEngine {
    state: PlantState,
    stream: EventStream,
    metrics: Option<PlantMetrics>,
    ticker: Option<RampTicker>,
}

impl PlantEngine {
    /// Validate `config`, publish its `Genesis` signal, and start the worker task.
    ///
    /// Must be called from within a tokio runtime. Nothing is published when the
    /// config is rejected.
    pub fn spawn(
        config: PlantConfig,
        stream: EventStream,
        options: EngineOptions,
    ) -> Result<PlantHandle, PlantError> {
        Self::admit(&config)?;

        let config = Arc::new(config);
        let (state, genesis) = PlantState::genesis(config.clone(), event_now());
        let mut engine = PlantEngine {
            state,
            stream,
            metrics: options.metrics,
            ticker: None,
        };
        info!(
            plant_id = config.id,
            plant = %config.name,
            min_power = config.min_power,
            max_power = config.max_power,
            "plant worker starting"
        );
        engine.observe();
        engine.publish(genesis);

        let (mailbox_tx, mailbox_rx) = mpsc::channel(options.mailbox_capacity.max(1));
        let (kill_tx, kill_rx) = watch::channel(false);
        let task = tokio::spawn(engine.run(mailbox_rx, kill_rx));
        Ok(PlantHandle {
            config,
            mailbox: mailbox_tx,
            kill_tx: Arc::new(kill_tx),
            task: Arc::new(Mutex::new(Some(task))),
        })
    }

    /// Reject definitions no worker can run.
    pub(crate) fn admit(config: &PlantConfig) -> Result<(), PlantError> {
        config.validate()?;
        if config.plant_type != PlantType::RampUpType {
            return Err(PlantError::UnsupportedPlantType {
                plant: config.id,
                plant_type: config.plant_type,
            });
        }
        Ok(())
    }

    async fn run(mut self, mut mailbox: mpsc::Receiver<Envelope>, mut kill_rx: watch::Receiver<bool>) {
        let plant_id = self.state.plant_id();
        loop {
            tokio::select! {
                biased;
                changed = kill_rx.changed() => {
                    match changed {
                        Ok(()) => {
                            if *kill_rx.borrow() {
                                debug!(plant_id, "plant worker shutdown requested");
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                envelope = mailbox.recv() => {
                    match envelope {
                        Some(envelope) => self.handle(envelope),
                        None => {
                            debug!(plant_id, "plant mailbox closed");
                            break;
                        }
                    }
                }
                _ = next_tick(&mut self.ticker) => self.apply(PlantInput::Tick),
            }
        }
        mailbox.close();
        debug!(plant_id, state = %self.state.run_state(), "plant worker exited");
    }

    fn handle(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Command(command) => self.apply(PlantInput::Command(command)),
            Envelope::GetState(reply) => {
                let _ = reply.send(self.state.clone());
            }
            Envelope::GetTelemetry(reply) => {
                let _ = reply.send(self.state.signals());
            }
        }
    }

    fn apply(&mut self, input: PlantInput) {
        let plant_id = self.state.plant_id();
        let outcome = transition(&self.state, input, event_now());
        if outcome.is_ignored() {
            debug!(plant_id, ?input, state = %self.state.run_state(), "input ignored");
            return;
        }

        if let Some(next) = outcome.state {
            if next.old_state() == next.new_state() && next.run_state().is_ramping() {
                debug!(
                    plant_id,
                    state = %next.run_state(),
                    active_power = next.active_power(),
                    set_point = next.set_point(),
                    "ramp step"
                );
            } else {
                info!(
                    plant_id,
                    from = %next.old_state(),
                    to = %next.new_state(),
                    active_power = next.active_power(),
                    set_point = next.set_point(),
                    "plant state changed"
                );
            }
            self.state = next;
            self.sync_ticker();
            self.observe();
        }

        for signal in outcome.signals {
            if let Signal::DispatchAlert { message, .. } = &signal {
                warn!(plant_id, %message, "dispatch rejected");
            }
            self.publish(signal);
        }
    }

    fn sync_ticker(&mut self) {
        if !self.state.run_state().is_ramping() {
            self.ticker = None;
        } else if self.ticker.is_none() {
            self.ticker = Some(RampTicker::start(self.state.config().ramp_tick_interval));
        }
    }

    fn observe(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.observe_power(
                self.state.plant_id(),
                self.state.active_power(),
                self.state.set_point(),
            );
        }
    }

    fn publish(&self, signal: Signal) {
        if let Some(metrics) = &self.metrics {
            metrics.record_signal(signal.plant_id(), signal.kind());
        }
        self.stream.publish(signal);
    }
}

/// Cloneable client of a running [`PlantEngine`].
#[derive(Debug, Clone)]
pub struct PlantHandle {
    config: Arc<PlantConfig>,
    mailbox: mpsc::Sender<Envelope>,
    kill_tx: Arc<watch::Sender<bool>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PlantHandle {
    pub fn plant_id(&self) -> PlantId {
        self.config.id
    }

    pub fn config(&self) -> &Arc<PlantConfig> {
        &self.config
    }

    /// Whether the worker still accepts input.
    pub fn is_running(&self) -> bool {
        !self.mailbox.is_closed()
    }

    /// Queue a command behind everything already in the mailbox.
    pub async fn send(&self, command: PlantCommand) -> Result<(), PlantError> {
        self.enqueue(Envelope::Command(command)).await
    }

    pub async fn dispatch(&self, target_power: f64) -> Result<(), PlantError> {
        self.send(PlantCommand::Dispatch { target_power }).await
    }

    pub async fn out_of_service(&self) -> Result<(), PlantError> {
        self.send(PlantCommand::OutOfService).await
    }

    pub async fn return_to_service(&self) -> Result<(), PlantError> {
        self.send(PlantCommand::ReturnToService).await
    }

    pub async fn return_to_normal(&self) -> Result<(), PlantError> {
        self.send(PlantCommand::ReturnToNormal).await
    }

    /// Snapshot as of every command queued before this call.
    pub async fn state(&self) -> Result<PlantState, PlantError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.enqueue(Envelope::GetState(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| PlantError::EngineStopped(self.plant_id()))
    }

    /// Telemetry map as of every command queued before this call.
    pub async fn telemetry(&self) -> Result<TelemetrySignals, PlantError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.enqueue(Envelope::GetTelemetry(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| PlantError::EngineStopped(self.plant_id()))
    }

    /// Stop the worker and wait for it to exit. Safe to call more than once.
    ///
    /// A command already dequeued finishes; queued commands are discarded and the
    /// ramp timer is dropped with the worker.
    pub async fn shutdown(&self) {
        let _ = self.kill_tx.send(true);
        let handle = self.task.lock().take();
        if let Some(task) = handle {
            if let Err(err) = task.await {
                warn!(plant_id = self.plant_id(), error = %err, "plant worker join error");
            }
        }
    }

    async fn enqueue(&self, envelope: Envelope) -> Result<(), PlantError> {
        self.mailbox
            .send(envelope)
            .await
            .map_err(|_| PlantError::EngineStopped(self.plant_id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plantsim_events::RunState;
    use plantsim_metrics::new_registry;
    use std::time::Duration;

    fn config(id: PlantId) -> PlantConfig {
        PlantConfig::ramp_up(id, format!("plant-{id}"), 400.0, 800.0, 100.0, Duration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn genesis_is_published_before_spawn_returns() {
        let stream = EventStream::new();
        let mut events = stream.subscribe();
        let handle = PlantEngine::spawn(config(1), stream, EngineOptions::default()).unwrap();

        let genesis = events.try_recv().expect("genesis already published");
        assert_eq!(genesis.kind(), "genesis");
        assert_eq!(genesis.plant_id(), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_config_is_rejected_without_genesis() {
        let stream = EventStream::new();
        let mut events = stream.subscribe();
        let mut bad = config(2);
        bad.min_power = 900.0;
        assert!(matches!(
            PlantEngine::spawn(bad, stream.clone(), EngineOptions::default()),
            Err(PlantError::InvalidConfig(_))
        ));

        let mut on_off = config(3);
        on_off.plant_type = PlantType::OnOffType;
        assert_eq!(
            PlantEngine::spawn(on_off, stream, EngineOptions::default()).unwrap_err(),
            PlantError::UnsupportedPlantType {
                plant: 3,
                plant_type: PlantType::OnOffType
            }
        );
        assert!(events.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn queries_observe_earlier_commands() {
        let handle = PlantEngine::spawn(config(4), EventStream::new(), EngineOptions::default()).unwrap();
        handle.dispatch(700.0).await.unwrap();
        let state = handle.state().await.unwrap();
        assert_eq!(state.run_state(), RunState::RampingUp);
        assert_eq!(state.set_point(), 700.0);
        assert_eq!(state.active_power(), 400.0);

        let telemetry = handle.telemetry().await.unwrap();
        assert_eq!(telemetry["setPoint"], "700.0");
        assert_eq!(telemetry["isDispatched"], "true");
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_worker_reports_engine_stopped() {
        let handle = PlantEngine::spawn(config(5), EventStream::new(), EngineOptions::default()).unwrap();
        handle.shutdown().await;
        handle.shutdown().await;
        assert!(!handle.is_running());
        assert_eq!(handle.dispatch(500.0).await, Err(PlantError::EngineStopped(5)));
        assert_eq!(handle.state().await.unwrap_err(), PlantError::EngineStopped(5));
    }

    #[tokio::test(start_paused = true)]
    async fn metrics_follow_the_ramp() {
        let metrics = PlantMetrics::new(new_registry()).unwrap();
        let options = EngineOptions::default().with_metrics(metrics.clone());
        let stream = EventStream::new();
        let mut events = stream.subscribe();
        let handle = PlantEngine::spawn(config(6), stream, options).unwrap();

        handle.dispatch(600.0).await.unwrap();
        events
            .wait_for(Signal::reached_active, Duration::from_secs(10))
            .await
            .unwrap();

        let families = metrics.registry().gather();
        let signals: u64 = families
            .iter()
            .find(|family| family.get_name() == "plantsim_signals_total")
            .map(|family| {
                family
                    .get_metric()
                    .iter()
                    .map(|metric| metric.get_counter().get_value() as u64)
                    .sum()
            })
            .unwrap_or_default();
        // genesis, dispatch acceptance, one intermediate step, settle
        assert_eq!(signals, 4);
        handle.shutdown().await;
    }
}
