//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Ramp-up plant state snapshot and transition rules."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Immutable ramp-up plant snapshot and its transition function.
//!
//! A [`PlantState`] is never mutated. [`transition`] computes the successor of a
//! snapshot for one input and reports the signals the change produces. Inputs that
//! do not apply to the current state yield an empty [`Outcome`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use plantsim_common::time::format_timestamp;
use plantsim_common::{PlantConfig, PlantId};
use plantsim_events::{RunState, Signal};
use serde::{Deserialize, Serialize};

use crate::telemetry::{
    format_flag, format_power, TelemetrySignals, ACTIVE_POWER, IS_AVAILABLE, IS_DISPATCHED,
    POWER_PLANT_ID, SET_POINT, TIMESTAMP,
};

const SETTLE_EPSILON: f64 = 1e-9;

/// Operator command addressed to a single plant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum PlantCommand {
    Dispatch { target_power: f64 },
    OutOfService,
    ReturnToService,
    ReturnToNormal,
}

/// Anything the transition function can be fed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlantInput {
    Command(PlantCommand),
    /// Internal ramp step scheduled by the plant worker.
    Tick,
}

impl From<PlantCommand> for PlantInput {
    fn from(command: PlantCommand) -> Self {
        PlantInput::Command(command)
    }
}

/// Result of applying one input to a snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Outcome {
    /// Successor snapshot, `None` when the current one stays in effect.
    pub state: Option<PlantState>,
    /// Signals to publish, in order.
    pub signals: Vec<Signal>,
}

impl Outcome {
    fn ignored() -> Self {
        Self::default()
    }

    fn alert(message: String, config: Arc<PlantConfig>, now: DateTime<Utc>) -> Self {
        Self {
            state: None,
            signals: vec![Signal::DispatchAlert {
                message,
                timestamp: now,
                config,
            }],
        }
    }

    fn moved(next: PlantState) -> Self {
        let signal = Signal::Transition {
            old_state: next.old_state,
            new_state: next.new_state,
            timestamp: next.timestamp,
            config: next.config.clone(),
        };
        Self {
            state: Some(next),
            signals: vec![signal],
        }
    }

    /// Whether the input changed nothing and produced no signal.
    pub fn is_ignored(&self) -> bool {
        self.state.is_none() && self.signals.is_empty()
    }
}

/// Point-in-time snapshot of a simulated ramp-up plant.
#[derive(Debug, Clone, PartialEq)]
pub struct PlantState {
    config: Arc<PlantConfig>,
    run_state: RunState,
    old_state: RunState,
    new_state: RunState,
    set_point: f64,
    active_power: f64,
    dispatched: bool,
    available: bool,
    timestamp: DateTime<Utc>,
}

impl PlantState {
    /// Baseline snapshot of a freshly started plant, and its `Genesis` signal.
    pub fn genesis(config: Arc<PlantConfig>, now: DateTime<Utc>) -> (Self, Signal) {
        let state = Self {
            run_state: RunState::Active,
            old_state: RunState::Active,
            new_state: RunState::Active,
            set_point: config.min_power,
            active_power: config.min_power,
            dispatched: false,
            available: true,
            timestamp: now,
            config,
        };
        let signal = Signal::Genesis {
            new_state: state.run_state,
            timestamp: now,
            config: state.config.clone(),
        };
        (state, signal)
    }

    pub fn config(&self) -> &Arc<PlantConfig> {
        &self.config
    }

    pub fn plant_id(&self) -> PlantId {
        self.config.id
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn old_state(&self) -> RunState {
        self.old_state
    }

    pub fn new_state(&self) -> RunState {
        self.new_state
    }

    pub fn set_point(&self) -> f64 {
        self.set_point
    }

    pub fn active_power(&self) -> f64 {
        self.active_power
    }

    pub fn is_dispatched(&self) -> bool {
        self.dispatched
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Telemetry wire view of this snapshot.
    pub fn signals(&self) -> TelemetrySignals {
        let mut signals = TelemetrySignals::new();
        signals.insert(POWER_PLANT_ID.to_owned(), self.config.id.to_string());
        signals.insert(ACTIVE_POWER.to_owned(), format_power(self.active_power));
        signals.insert(IS_AVAILABLE.to_owned(), format_flag(self.available));
        signals.insert(IS_DISPATCHED.to_owned(), format_flag(self.dispatched));
        signals.insert(SET_POINT.to_owned(), format_power(self.set_point));
        signals.insert(TIMESTAMP.to_owned(), format_timestamp(&self.timestamp));
        signals
    }

    /// Successor snapshot entering `run_state`, recording where it came from.
    fn enter(&self, run_state: RunState, now: DateTime<Utc>) -> Self {
        Self {
            run_state,
            old_state: self.run_state,
            new_state: run_state,
            timestamp: now,
            available: run_state != RunState::OutOfService,
            ..self.clone()
        }
    }
}

/// Compute the successor of `current` for `input` at time `now`.
pub fn transition(current: &PlantState, input: PlantInput, now: DateTime<Utc>) -> Outcome {
    match input {
        PlantInput::Command(PlantCommand::OutOfService) => out_of_service(current, now),
        PlantInput::Command(PlantCommand::ReturnToService) => return_to_service(current, now),
        PlantInput::Command(PlantCommand::Dispatch { target_power }) => {
            dispatch(current, target_power, now)
        }
        PlantInput::Command(PlantCommand::ReturnToNormal) => return_to_normal(current, now),
        PlantInput::Tick => tick(current, now),
    }
}

fn out_of_service(current: &PlantState, now: DateTime<Utc>) -> Outcome {
    if current.run_state == RunState::OutOfService {
        return Outcome::ignored();
    }
    // Output freezes where it is; the set-point is kept only for bookkeeping.
    let next = PlantState {
        dispatched: false,
        ..current.enter(RunState::OutOfService, now)
    };
    Outcome::moved(next)
}

fn return_to_service(current: &PlantState, now: DateTime<Utc>) -> Outcome {
    if current.run_state != RunState::OutOfService {
        return Outcome::ignored();
    }
    let baseline = current.config.min_power;
    let next = PlantState {
        set_point: baseline,
        active_power: baseline,
        dispatched: false,
        ..current.enter(RunState::Active, now)
    };
    Outcome::moved(next)
}

fn dispatch(current: &PlantState, target_power: f64, now: DateTime<Utc>) -> Outcome {
    if current.run_state != RunState::Active {
        return Outcome::ignored();
    }
    let config = &current.config;
    if target_power.is_nan() {
        return Outcome::alert(
            format!("plant {}: dispatch target is not a number", config.id),
            config.clone(),
            now,
        );
    }
    if target_power < config.min_power {
        return Outcome::alert(
            format!(
                "plant {}: dispatch target {} is below the minimum power {}",
                config.id, target_power, config.min_power
            ),
            config.clone(),
            now,
        );
    }
    let set_point = target_power.min(config.max_power);
    let dispatched = set_point > config.min_power;
    let run_state = if set_point > current.active_power {
        RunState::RampingUp
    } else if set_point < current.active_power {
        RunState::RampingDown
    } else {
        // Zero-length ramp: already at the target, settle immediately.
        RunState::Active
    };
    let next = PlantState {
        set_point,
        dispatched,
        ..current.enter(run_state, now)
    };
    Outcome::moved(next)
}

fn return_to_normal(current: &PlantState, now: DateTime<Utc>) -> Outcome {
    if current.run_state != RunState::Active || !current.dispatched {
        return Outcome::ignored();
    }
    let next = PlantState {
        set_point: current.config.min_power,
        ..current.enter(RunState::RampingDown, now)
    };
    Outcome::moved(next)
}

fn tick(current: &PlantState, now: DateTime<Utc>) -> Outcome {
    let rate = current.config.ramp_power_rate;
    let stepped = match current.run_state {
        RunState::RampingUp => current.active_power + rate,
        RunState::RampingDown => current.active_power - rate,
        RunState::Active | RunState::OutOfService => return Outcome::ignored(),
    };
    // Accumulated steps drift from exact multiples of the rate, so a step that
    // lands within a relative epsilon of the set-point settles.
    let remaining = (current.set_point - current.active_power).abs();
    let reached = remaining <= rate * (1.0 + SETTLE_EPSILON);
    let next = if reached {
        PlantState {
            active_power: current.set_point,
            dispatched: current.set_point != current.config.min_power,
            ..current.enter(RunState::Active, now)
        }
    } else {
        PlantState {
            active_power: stepped,
            ..current.enter(current.run_state, now)
        }
    };
    Outcome::moved(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use proptest::prelude::*;
    use std::time::Duration;

    fn config() -> Arc<PlantConfig> {
        Arc::new(PlantConfig::ramp_up(
            42,
            "plant-42",
            400.0,
            800.0,
            100.0,
            Duration::from_secs(2),
        ))
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    fn genesis() -> PlantState {
        PlantState::genesis(config(), t0()).0
    }

    fn apply(state: &PlantState, input: impl Into<PlantInput>) -> PlantState {
        transition(state, input.into(), state.timestamp() + ChronoDuration::seconds(1))
            .state
            .expect("input should change state")
    }

    fn tick_until_settled(mut state: PlantState) -> (PlantState, usize) {
        let mut ticks = 0;
        while state.run_state().is_ramping() {
            state = apply(&state, PlantInput::Tick);
            ticks += 1;
            assert!(ticks < 10_000, "ramp never settled");
        }
        (state, ticks)
    }

    fn dispatch_cmd(target_power: f64) -> PlantCommand {
        PlantCommand::Dispatch { target_power }
    }

    #[test]
    fn genesis_seeds_baseline() {
        let (state, signal) = PlantState::genesis(config(), t0());
        assert_eq!(state.run_state(), RunState::Active);
        assert_eq!(state.active_power(), 400.0);
        assert_eq!(state.set_point(), 400.0);
        assert!(!state.is_dispatched());
        assert!(state.is_available());
        assert!(matches!(
            signal,
            Signal::Genesis {
                new_state: RunState::Active,
                ..
            }
        ));
    }

    #[test]
    fn dispatch_ramps_up_in_rate_sized_steps() {
        let state = apply(&genesis(), dispatch_cmd(800.0));
        assert_eq!(state.run_state(), RunState::RampingUp);
        assert_eq!(state.set_point(), 800.0);
        assert!(state.is_dispatched());

        let first = apply(&state, PlantInput::Tick);
        assert_eq!(first.active_power(), 500.0);
        assert_eq!(first.old_state(), RunState::RampingUp);
        assert_eq!(first.new_state(), RunState::RampingUp);

        let (settled, ticks) = tick_until_settled(state);
        assert_eq!(ticks, 4);
        assert_eq!(settled.active_power(), 800.0);
        assert_eq!(settled.run_state(), RunState::Active);
        assert_eq!(settled.old_state(), RunState::RampingUp);
        assert!(settled.is_dispatched());
    }

    #[test]
    fn final_tick_clamps_to_set_point() {
        let state = apply(&genesis(), dispatch_cmd(650.0));
        let (settled, ticks) = tick_until_settled(state);
        assert_eq!(ticks, 3);
        assert_eq!(settled.active_power(), 650.0);
    }

    #[test]
    fn fractional_rates_settle_on_the_last_step() {
        for (target, expected) in [(0.8, 8), (1.0, 10), (0.3, 3)] {
            let cfg = Arc::new(PlantConfig::ramp_up(9, "fine", 0.0, 1.0, 0.1, Duration::from_millis(100)));
            let start = PlantState::genesis(cfg, t0()).0;
            let (settled, ticks) = tick_until_settled(apply(&start, dispatch_cmd(target)));
            assert_eq!(ticks, expected, "ramp to {target}");
            assert_eq!(settled.active_power(), target);
        }

        let cfg = Arc::new(PlantConfig::ramp_up(9, "fine", 0.0, 1.0, 0.1, Duration::from_millis(100)));
        let at_max = tick_until_settled(apply(&PlantState::genesis(cfg, t0()).0, dispatch_cmd(1.0))).0;
        let (lowered, ticks) = tick_until_settled(apply(&at_max, dispatch_cmd(0.2)));
        assert_eq!(ticks, 8);
        assert_eq!(lowered.active_power(), 0.2);
    }

    #[test]
    fn dispatch_above_maximum_is_clamped() {
        let state = apply(&genesis(), dispatch_cmd(10_000.0));
        assert_eq!(state.set_point(), 800.0);
        assert_eq!(state.run_state(), RunState::RampingUp);
    }

    #[test]
    fn dispatch_below_minimum_raises_alert_without_state_change() {
        let outcome = transition(&genesis(), dispatch_cmd(100.0).into(), t0());
        assert!(outcome.state.is_none());
        assert_eq!(outcome.signals.len(), 1);
        match &outcome.signals[0] {
            Signal::DispatchAlert { message, config, .. } => {
                assert!(message.contains("below the minimum"));
                assert_eq!(config.id, 42);
            }
            other => panic!("expected dispatch alert, got {other:?}"),
        }
    }

    #[test]
    fn nan_dispatch_raises_alert() {
        let outcome = transition(&genesis(), dispatch_cmd(f64::NAN).into(), t0());
        assert!(outcome.state.is_none());
        assert!(matches!(outcome.signals[..], [Signal::DispatchAlert { .. }]));
    }

    #[test]
    fn dispatch_while_ramping_is_ignored() {
        let ramping = apply(&genesis(), dispatch_cmd(800.0));
        for input in [dispatch_cmd(10_000.0), dispatch_cmd(500.0), dispatch_cmd(1.0)] {
            assert!(transition(&ramping, input.into(), t0()).is_ignored());
        }
    }

    #[test]
    fn dispatch_at_current_output_settles_immediately() {
        let outcome = transition(&genesis(), dispatch_cmd(400.0).into(), t0());
        let state = outcome.state.expect("zero-length ramp still transitions");
        assert_eq!(state.run_state(), RunState::Active);
        assert_eq!(state.old_state(), RunState::Active);
        assert!(!state.is_dispatched());
        assert!(outcome.signals[0].reached_active());

        let at_max = tick_until_settled(apply(&genesis(), dispatch_cmd(800.0))).0;
        let again = apply(&at_max, dispatch_cmd(800.0));
        assert_eq!(again.run_state(), RunState::Active);
        assert!(again.is_dispatched());
    }

    #[test]
    fn dispatch_down_from_a_higher_output() {
        let at_max = tick_until_settled(apply(&genesis(), dispatch_cmd(800.0))).0;
        let lowering = apply(&at_max, dispatch_cmd(550.0));
        assert_eq!(lowering.run_state(), RunState::RampingDown);
        let (settled, ticks) = tick_until_settled(lowering);
        assert_eq!(ticks, 3);
        assert_eq!(settled.active_power(), 550.0);
        assert!(settled.is_dispatched());
    }

    #[test]
    fn out_of_service_freezes_output_mid_ramp() {
        let ramping = apply(&genesis(), dispatch_cmd(800.0));
        let ramping = apply(&ramping, PlantInput::Tick);
        let out = apply(&ramping, PlantCommand::OutOfService);
        assert_eq!(out.run_state(), RunState::OutOfService);
        assert_eq!(out.old_state(), RunState::RampingUp);
        assert_eq!(out.active_power(), 500.0);
        assert_eq!(out.set_point(), 800.0);
        assert!(!out.is_available());
        assert!(!out.is_dispatched());

        assert!(transition(&out, PlantInput::Tick, t0()).is_ignored());
        assert!(transition(&out, dispatch_cmd(700.0).into(), t0()).is_ignored());
        assert!(transition(&out, PlantCommand::ReturnToNormal.into(), t0()).is_ignored());
        assert!(transition(&out, PlantCommand::OutOfService.into(), t0()).is_ignored());
    }

    #[test]
    fn return_to_service_restores_baseline() {
        let out = apply(&genesis(), PlantCommand::OutOfService);
        let back = apply(&out, PlantCommand::ReturnToService);
        assert_eq!(back.run_state(), RunState::Active);
        assert_eq!(back.old_state(), RunState::OutOfService);
        assert_eq!(back.active_power(), 400.0);
        assert_eq!(back.set_point(), 400.0);
        assert!(back.is_available());
        assert!(!back.is_dispatched());

        assert!(transition(&back, PlantCommand::ReturnToService.into(), t0()).is_ignored());
    }

    #[test]
    fn dispatch_while_ramping_down_is_ignored() {
        let at_max = tick_until_settled(apply(&genesis(), dispatch_cmd(800.0))).0;
        let lowering = apply(&at_max, PlantCommand::ReturnToNormal);
        let lowering = apply(&lowering, PlantInput::Tick);
        assert_eq!(lowering.run_state(), RunState::RampingDown);
        for input in [dispatch_cmd(800.0), dispatch_cmd(600.0), dispatch_cmd(100.0)] {
            assert!(transition(&lowering, input.into(), t0()).is_ignored());
        }
        assert!(transition(&lowering, PlantCommand::ReturnToNormal.into(), t0()).is_ignored());
        assert!(transition(&lowering, PlantCommand::ReturnToService.into(), t0()).is_ignored());
    }

    #[test]
    fn out_of_service_freezes_output_while_ramping_down() {
        let at_max = tick_until_settled(apply(&genesis(), dispatch_cmd(800.0))).0;
        let lowering = apply(&at_max, PlantCommand::ReturnToNormal);
        let lowering = apply(&lowering, PlantInput::Tick);
        assert_eq!(lowering.active_power(), 700.0);

        let out = apply(&lowering, PlantCommand::OutOfService);
        assert_eq!(out.run_state(), RunState::OutOfService);
        assert_eq!(out.old_state(), RunState::RampingDown);
        assert_eq!(out.active_power(), 700.0);
        assert_eq!(out.set_point(), 400.0);
        assert!(!out.is_available());
        assert!(!out.is_dispatched());
        assert!(transition(&out, PlantInput::Tick, t0()).is_ignored());

        let back = apply(&out, PlantCommand::ReturnToService);
        assert_eq!(back.active_power(), 400.0);
        assert_eq!(back.set_point(), 400.0);
    }

    #[test]
    fn return_to_normal_requires_settled_dispatch() {
        assert!(transition(&genesis(), PlantCommand::ReturnToNormal.into(), t0()).is_ignored());
        let ramping = apply(&genesis(), dispatch_cmd(800.0));
        assert!(transition(&ramping, PlantCommand::ReturnToNormal.into(), t0()).is_ignored());
    }

    #[test]
    fn return_to_normal_round_trips_to_baseline() {
        let baseline = genesis();
        let at_max = tick_until_settled(apply(&baseline, dispatch_cmd(800.0))).0;
        let lowering = apply(&at_max, PlantCommand::ReturnToNormal);
        assert_eq!(lowering.run_state(), RunState::RampingDown);
        assert_eq!(lowering.set_point(), 400.0);

        let (settled, ticks) = tick_until_settled(lowering);
        assert_eq!(ticks, 4);
        assert_eq!(settled.old_state(), RunState::RampingDown);
        assert_eq!(settled.new_state(), RunState::Active);
        assert_eq!(settled.active_power(), 400.0);
        assert_eq!(settled.set_point(), 400.0);
        assert!(!settled.is_dispatched());

        let mut expected = baseline.signals();
        let mut actual = settled.signals();
        expected.remove(crate::telemetry::TIMESTAMP);
        actual.remove(crate::telemetry::TIMESTAMP);
        assert_eq!(actual, expected);
        assert_eq!(settled.run_state(), baseline.run_state());
        assert_eq!(settled.is_available(), baseline.is_available());
    }

    #[test]
    fn every_state_change_emits_a_transition() {
        let ramping = transition(&genesis(), dispatch_cmd(600.0).into(), t0());
        let state = ramping.state.unwrap();
        let step = transition(&state, PlantInput::Tick, t0());
        match &step.signals[..] {
            [Signal::Transition {
                old_state: RunState::RampingUp,
                new_state: RunState::RampingUp,
                ..
            }] => {}
            other => panic!("unexpected signals {other:?}"),
        }
    }

    #[test]
    fn telemetry_signals_use_wire_encoding() {
        let state = apply(&genesis(), dispatch_cmd(800.0));
        let signals = state.signals();
        assert_eq!(signals.len(), crate::telemetry::SIGNAL_KEYS.len());
        assert_eq!(signals[POWER_PLANT_ID], "42");
        assert_eq!(signals[ACTIVE_POWER], "400.0");
        assert_eq!(signals[SET_POINT], "800.0");
        assert_eq!(signals[IS_DISPATCHED], "true");
        assert_eq!(signals[IS_AVAILABLE], "true");
        assert_eq!(signals[TIMESTAMP], "2024-06-01T08:00:01.000Z");
    }

    #[test]
    fn commands_deserialize_from_tagged_json() {
        let command: PlantCommand =
            serde_json::from_str(r#"{"command":"dispatch","target_power":650.0}"#).unwrap();
        assert_eq!(command, dispatch_cmd(650.0));
        let command: PlantCommand =
            serde_json::from_str(r#"{"command":"return_to_normal"}"#).unwrap();
        assert_eq!(command, PlantCommand::ReturnToNormal);
    }

    proptest! {
        #[test]
        fn ramps_converge_exactly_without_overshoot(
            min in 0.0_f64..500.0,
            span in 1.0_f64..1_000.0,
            rate in 0.5_f64..250.0,
            fraction in 0.0_f64..=1.0,
        ) {
            let max = min + span;
            let cfg = Arc::new(PlantConfig::ramp_up(1, "prop", min, max, rate, Duration::from_millis(10)));
            let start = PlantState::genesis(cfg, t0()).0;
            let target = min + span * fraction;

            let dispatched = transition(&start, dispatch_cmd(target).into(), t0());
            let mut state = dispatched.state.expect("targets within range are accepted");
            let expected_ticks = ((target - min).abs() / rate).ceil() as usize;
            let mut ticks = 0;
            while state.run_state().is_ramping() {
                state = transition(&state, PlantInput::Tick, t0()).state.unwrap();
                ticks += 1;
                prop_assert!(state.active_power() <= max);
                prop_assert!(state.active_power() >= min);
                prop_assert!(state.active_power() <= target);
            }
            prop_assert!(ticks <= expected_ticks);
            prop_assert_eq!(state.active_power(), target);
            prop_assert_eq!(state.run_state(), RunState::Active);
            prop_assert_eq!(state.is_dispatched(), target != min);
        }
    }
}
