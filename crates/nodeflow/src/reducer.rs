// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Reducer core: pure FSM reduction emitting an ordered intent list.
//!
//! Reducers never perform side effects and never call projectors. They
//! return a new state plus intents describing what should happen; the
//! intent list is ordered FSM intents first, then projection intents in
//! caller-supplied order. Given the same input and projection intents,
//! two runs produce structurally equal output (auto-generated intent ids
//! excluded).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::monadic::LogLevel;

/// Discriminant of a reducer intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    LogEvent,
    EmitEvent,
    ProjectionIntent,
}

/// A declared side-effect target: a projector, an event type, and the
/// envelope to project. Executed elsewhere, never by the reducer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionIntent {
    pub projector_key: String,
    pub event_type: String,
    pub envelope: Value,
    pub correlation_id: Uuid,
}

impl ProjectionIntent {
    pub fn new(
        projector_key: impl Into<String>,
        event_type: impl Into<String>,
        envelope: Value,
        correlation_id: Uuid,
    ) -> Self {
        Self {
            projector_key: projector_key.into(),
            event_type: event_type.into(),
            envelope,
            correlation_id,
        }
    }
}

/// Discriminated payload of a reducer intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntentPayload {
    LogEvent {
        level: LogLevel,
        message: String,
    },
    EmitEvent {
        event_type: String,
        payload: Value,
    },
    ProjectionIntent(ProjectionIntent),
}

/// One intent emitted by a reducer. Frozen once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReducerIntent {
    intent_id: Uuid,
    kind: IntentKind,
    target: String,
    /// 1 (lowest) to 10 (highest).
    priority: u8,
    lease_id: Option<Uuid>,
    epoch: Option<u64>,
    payload: IntentPayload,
}

impl ReducerIntent {
    fn new(kind: IntentKind, target: String, priority: u8, payload: IntentPayload) -> Result<Self> {
        if !(1..=10).contains(&priority) {
            return Err(Error::Validation(format!(
                "intent priority must be in 1..=10, got {priority}"
            )));
        }
        Ok(Self {
            intent_id: Uuid::new_v4(),
            kind,
            target,
            priority,
            lease_id: None,
            epoch: None,
            payload,
        })
    }

    /// A log-event intent.
    pub fn log_event(
        target: impl Into<String>,
        priority: u8,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Result<Self> {
        Self::new(
            IntentKind::LogEvent,
            target.into(),
            priority,
            IntentPayload::LogEvent {
                level,
                message: message.into(),
            },
        )
    }

    /// An emit-event intent.
    pub fn emit_event(
        target: impl Into<String>,
        priority: u8,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Result<Self> {
        Self::new(
            IntentKind::EmitEvent,
            target.into(),
            priority,
            IntentPayload::EmitEvent {
                event_type: event_type.into(),
                payload,
            },
        )
    }

    /// Wrap a projection intent. The intent target is the projector key.
    #[must_use]
    pub fn projection(projection: ProjectionIntent) -> Self {
        Self {
            intent_id: Uuid::new_v4(),
            kind: IntentKind::ProjectionIntent,
            target: projection.projector_key.clone(),
            priority: 5,
            lease_id: None,
            epoch: None,
            payload: IntentPayload::ProjectionIntent(projection),
        }
    }

    #[must_use]
    pub fn with_lease(mut self, lease_id: Uuid) -> Self {
        self.lease_id = Some(lease_id);
        self
    }

    #[must_use]
    pub fn with_epoch(mut self, epoch: u64) -> Self {
        self.epoch = Some(epoch);
        self
    }

    #[must_use]
    pub fn intent_id(&self) -> Uuid {
        self.intent_id
    }

    #[must_use]
    pub fn kind(&self) -> IntentKind {
        self.kind
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[must_use]
    pub fn priority(&self) -> u8 {
        self.priority
    }

    #[must_use]
    pub fn lease_id(&self) -> Option<Uuid> {
        self.lease_id
    }

    #[must_use]
    pub fn epoch(&self) -> Option<u64> {
        self.epoch
    }

    #[must_use]
    pub fn payload(&self) -> &IntentPayload {
        &self.payload
    }

    /// Structural equality, ignoring the auto-generated intent id.
    #[must_use]
    pub fn structurally_equal(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.target == other.target
            && self.priority == other.priority
            && self.lease_id == other.lease_id
            && self.epoch == other.epoch
            && self.payload == other.payload
    }
}

/// FSM transition taken during a reduction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsmTransition {
    pub from_state: String,
    pub to_state: String,
    pub event: String,
}

/// What a pure reduction returns.
#[derive(Debug, Clone)]
pub struct ReducerOutcome<S> {
    pub state: S,
    pub transition: Option<FsmTransition>,
    pub intents: Vec<ReducerIntent>,
    pub result: Map<String, Value>,
    pub items_processed: u64,
}

/// A deterministic state reducer.
///
/// `reduce` must be pure: no I/O, no projector calls, no clock reads. All
/// declared effects go through the returned intents.
pub trait Reducer: Send + Sync {
    type State: Clone + PartialEq + std::fmt::Debug + Send + Sync;
    type Input: Send + Sync;

    fn reduce(&self, state: &Self::State, input: &Self::Input) -> ReducerOutcome<Self::State>;
}

/// Full output of [`process`].
#[derive(Debug, Clone)]
pub struct ReducerOutput<S> {
    pub result: Map<String, Value>,
    pub items_processed: u64,
    pub state: S,
    pub transition: Option<FsmTransition>,
    /// FSM intents in emission order, then projection intents in
    /// caller-supplied order.
    pub intents: Vec<ReducerIntent>,
    pub metadata: Map<String, Value>,
}

/// Run a reduction and assemble the ordered intent list.
pub fn process<R: Reducer>(
    reducer: &R,
    state: &R::State,
    input: &R::Input,
    projection_intents: &[ProjectionIntent],
) -> ReducerOutput<R::State> {
    let outcome = reducer.reduce(state, input);

    let fsm_intent_count = outcome.intents.len();
    let mut intents = outcome.intents;
    intents.extend(
        projection_intents
            .iter()
            .cloned()
            .map(ReducerIntent::projection),
    );

    let mut metadata = Map::new();
    metadata.insert("fsm_intent_count".to_string(), Value::from(fsm_intent_count));
    metadata.insert(
        "projection_intent_count".to_string(),
        Value::from(projection_intents.len()),
    );
    metadata.insert("intent_count".to_string(), Value::from(intents.len()));

    ReducerOutput {
        result: outcome.result,
        items_processed: outcome.items_processed,
        state: outcome.state,
        transition: outcome.transition,
        intents,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Counts items and transitions idle -> aggregating on first input.
    struct AggregatingReducer;

    #[derive(Debug, Clone, PartialEq)]
    struct AggState {
        phase: String,
        total: u64,
    }

    impl Reducer for AggregatingReducer {
        type State = AggState;
        type Input = Vec<u64>;

        fn reduce(&self, state: &AggState, input: &Vec<u64>) -> ReducerOutcome<AggState> {
            let total = state.total + input.iter().sum::<u64>();
            let next = AggState {
                phase: "aggregating".to_string(),
                total,
            };
            let transition = (state.phase != next.phase).then(|| FsmTransition {
                from_state: state.phase.clone(),
                to_state: next.phase.clone(),
                event: "items_received".to_string(),
            });

            let mut result = Map::new();
            result.insert("total".to_string(), Value::from(total));

            let intents = vec![ReducerIntent::emit_event(
                "aggregate_stream",
                7,
                "aggregate.updated",
                json!({ "total": total }),
            )
            .unwrap()];

            ReducerOutcome {
                state: next,
                transition,
                intents,
                result,
                items_processed: input.len() as u64,
            }
        }
    }

    fn idle_state() -> AggState {
        AggState {
            phase: "idle".to_string(),
            total: 0,
        }
    }

    fn projections() -> Vec<ProjectionIntent> {
        vec![
            ProjectionIntent::new(
                "dashboard_view",
                "aggregate.updated",
                json!({"total": 6}),
                Uuid::from_u128(1),
            ),
            ProjectionIntent::new(
                "audit_log",
                "aggregate.updated",
                json!({"total": 6}),
                Uuid::from_u128(2),
            ),
        ]
    }

    #[test]
    fn test_priority_validation() {
        assert!(ReducerIntent::emit_event("t", 0, "e", Value::Null).is_err());
        assert!(ReducerIntent::emit_event("t", 11, "e", Value::Null).is_err());
        assert!(ReducerIntent::emit_event("t", 1, "e", Value::Null).is_ok());
        assert!(ReducerIntent::log_event("t", 10, LogLevel::Info, "m").is_ok());
    }

    #[test]
    fn test_projection_wrapper_preserves_fields() {
        let projection = ProjectionIntent::new(
            "user_view",
            "user.created",
            json!({"id": 7}),
            Uuid::from_u128(42),
        );
        let intent = ReducerIntent::projection(projection.clone());

        assert_eq!(intent.kind(), IntentKind::ProjectionIntent);
        assert_eq!(intent.target(), "user_view");
        match intent.payload() {
            IntentPayload::ProjectionIntent(wrapped) => {
                assert_eq!(wrapped, &projection);
                assert_eq!(wrapped.correlation_id, Uuid::from_u128(42));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_fsm_intents_before_projection_intents() {
        let output = process(&AggregatingReducer, &idle_state(), &vec![1, 2, 3], &projections());

        assert_eq!(output.intents.len(), 3);
        assert_eq!(output.intents[0].kind(), IntentKind::EmitEvent);
        assert_eq!(output.intents[1].kind(), IntentKind::ProjectionIntent);
        assert_eq!(output.intents[1].target(), "dashboard_view");
        assert_eq!(output.intents[2].target(), "audit_log");
    }

    #[test]
    fn test_process_result_and_counts() {
        let output = process(&AggregatingReducer, &idle_state(), &vec![1, 2, 3], &projections());

        assert_eq!(output.result["total"], Value::from(6));
        assert_eq!(output.items_processed, 3);
        assert_eq!(output.metadata["fsm_intent_count"], Value::from(1));
        assert_eq!(output.metadata["projection_intent_count"], Value::from(2));
        assert_eq!(output.metadata["intent_count"], Value::from(3));
    }

    #[test]
    fn test_transition_recorded() {
        let output = process(&AggregatingReducer, &idle_state(), &vec![1], &[]);
        let transition = output.transition.unwrap();
        assert_eq!(transition.from_state, "idle");
        assert_eq!(transition.to_state, "aggregating");

        // Already aggregating: no transition.
        let again = process(&AggregatingReducer, &output.state, &vec![1], &[]);
        assert!(again.transition.is_none());
    }

    #[test]
    fn test_determinism_across_runs() {
        let input = vec![4, 5];
        let first = process(&AggregatingReducer, &idle_state(), &input, &projections());
        let second = process(&AggregatingReducer, &idle_state(), &input, &projections());

        assert_eq!(first.state, second.state);
        assert_eq!(first.transition, second.transition);
        assert_eq!(first.result, second.result);
        assert_eq!(first.intents.len(), second.intents.len());
        for (a, b) in first.intents.iter().zip(second.intents.iter()) {
            assert!(a.structurally_equal(b));
            // Auto ids differ; structure does not.
            assert_ne!(a.intent_id(), b.intent_id());
        }
    }

    #[test]
    fn test_lease_and_epoch() {
        let lease = Uuid::new_v4();
        let intent = ReducerIntent::emit_event("t", 5, "e", Value::Null)
            .unwrap()
            .with_lease(lease)
            .with_epoch(3);
        assert_eq!(intent.lease_id(), Some(lease));
        assert_eq!(intent.epoch(), Some(3));
    }
}
