/*!
 * Scripted scenarios against the in-process simulated service
 *
 * A scenario wires a real controller and repository to the mock binder and
 * service from `imsbind_connect::mock`, then plays the configured steps one by
 * one, waiting for the controller to go idle after each.
 */

use crate::config::{ImsBindConfig, Step};
use crate::error::{ImsBindError, Result};
use imsbind_connect::mock::{ControllerEvent, MockImsService, MockServiceBinder, RecordingCallbacks};
use imsbind_connect::{ComponentName, ConnectionState, ImsServiceController, ServiceConnection};
use imsbind_core_repository::{
    FeatureEvent, FeatureKey, FeatureObserver, FeatureRecord, FeatureRepository, FeatureStatus, FeatureType,
    ImsCapabilities, InlineExecutor, RemovalReason, SubscriptionId,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Observer that keeps every repository notification for one key
struct KeyObserver {
    key: FeatureKey,
    log: Arc<TransitionLog>,
}

impl KeyObserver {
    fn push(&self, event: FeatureEvent) {
        debug!(key = %self.key, ?event, "Repository notification");
        self.log.entries.lock().push((self.key, event));
    }
}

impl FeatureObserver for KeyObserver {
    fn feature_created(&self, record: &FeatureRecord) {
        self.push(FeatureEvent::Created(record.clone()));
    }

    fn feature_removed(&self, reason: RemovalReason) {
        self.push(FeatureEvent::Removed(reason));
    }

    fn status_changed(&self, status: FeatureStatus, subscription: SubscriptionId) {
        self.push(FeatureEvent::StatusChanged { status, subscription });
    }

    fn capabilities_updated(&self, capabilities: ImsCapabilities) {
        self.push(FeatureEvent::CapabilitiesUpdated(capabilities));
    }
}

/// Repository notifications seen during a scenario, in delivery order
#[derive(Default)]
pub struct TransitionLog {
    entries: Mutex<Vec<(FeatureKey, FeatureEvent)>>,
}

impl TransitionLog {
    pub fn entries(&self) -> Vec<(FeatureKey, FeatureEvent)> {
        self.entries.lock().clone()
    }
}

/// What one step did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub number: usize,
    pub action: &'static str,
    pub state_after: ConnectionState,
    pub note: String,
}

/// Everything `imsbind run` reports
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub component: ComponentName,
    pub final_state: ConnectionState,
    pub steps: Vec<StepRecord>,
    pub records: Vec<FeatureRecord>,
    pub events: Vec<ControllerEvent>,
    pub transitions: Vec<(FeatureKey, FeatureEvent)>,
    pub connect_attempts: usize,
    pub remote_calls: usize,
}

impl ScenarioReport {
    pub fn created_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, ControllerEvent::FeatureCreated { .. }))
            .count()
    }

    pub fn removed_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, ControllerEvent::FeatureRemoved { .. }))
            .count()
    }

    pub fn permanent_errors(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, ControllerEvent::BindPermanentError(_)))
            .count()
    }
}

/// JSON form of a report, printed by `imsbind run --json`
#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
    pub component: String,
    pub final_state: ConnectionState,
    pub steps: &'a [StepRecord],
    pub records: &'a [FeatureRecord],
    pub features_created: usize,
    pub features_removed: usize,
    pub permanent_errors: usize,
    pub connect_attempts: usize,
}

impl<'a> From<&'a ScenarioReport> for JsonReport<'a> {
    fn from(report: &'a ScenarioReport) -> Self {
        Self {
            component: report.component.flatten(),
            final_state: report.final_state,
            steps: &report.steps,
            records: &report.records,
            features_created: report.created_count(),
            features_removed: report.removed_count(),
            permanent_errors: report.permanent_errors(),
            connect_attempts: report.connect_attempts,
        }
    }
}

/// A controller wired to the simulated binder and service
///
/// Must be created inside a tokio runtime; the controller task is spawned
/// right away.
pub struct Scenario {
    steps: Vec<Step>,
    binder: Arc<MockServiceBinder>,
    service: Arc<MockImsService>,
    repository: Arc<FeatureRepository>,
    callbacks: Arc<RecordingCallbacks>,
    transitions: Arc<TransitionLog>,
    controller: ImsServiceController,
}

impl Scenario {
    pub fn new(config: &ImsBindConfig) -> Self {
        let service = Arc::new(MockImsService::new().with_capabilities(config.simulation.advertised()));
        for feature in &config.simulation.refuse_features {
            service.fail_creation(*feature, true);
        }
        for feature in &config.simulation.null_features {
            service.return_no_feature(*feature, true);
        }

        let binder = Arc::new(MockServiceBinder::new());
        if config.simulation.auto_connect {
            binder.auto_connect(Some(service.clone()));
        }

        let repository = Arc::new(FeatureRepository::new());
        let callbacks = Arc::new(RecordingCallbacks::new());
        let transitions = Arc::new(TransitionLog::default());

        for key in observed_keys(&config.steps) {
            repository.register_for_connection_updates(
                key.slot,
                key.feature,
                Arc::new(KeyObserver {
                    key,
                    log: Arc::clone(&transitions),
                }),
                Arc::new(InlineExecutor),
            );
        }

        let controller = ImsServiceController::spawn(
            config.service.component(),
            config.rebind.policy(),
            binder.clone(),
            repository.clone(),
            callbacks.clone(),
        );

        Self {
            steps: config.steps.clone(),
            binder,
            service,
            repository,
            callbacks,
            transitions,
            controller,
        }
    }

    pub fn controller(&self) -> &ImsServiceController {
        &self.controller
    }

    pub fn repository(&self) -> &Arc<FeatureRepository> {
        &self.repository
    }

    pub fn service(&self) -> &Arc<MockImsService> {
        &self.service
    }

    /// Play every step, stopping at the first one that cannot be carried out
    pub async fn run(&self) -> Result<ScenarioReport> {
        let mut steps = Vec::with_capacity(self.steps.len());

        for (index, step) in self.steps.iter().enumerate() {
            let number = index + 1;
            info!(step = number, action = step.action(), "Running scenario step");

            let note = self.run_step(number, step).await?;
            self.controller.wait_idle().await?;

            steps.push(StepRecord {
                number,
                action: step.action(),
                state_after: self.controller.state(),
                note,
            });
        }

        Ok(self.report(steps))
    }

    async fn run_step(&self, number: usize, step: &Step) -> Result<String> {
        match step {
            Step::Bind(set) => {
                let desired = set.to_configuration();
                let features = desired.len();
                if self.controller.bind(desired).await? {
                    Ok(format!("bind accepted with {} feature(s)", features))
                } else {
                    warn!(step = number, "Bind was not accepted");
                    Ok("bind not accepted".to_string())
                }
            }
            Step::Change(set) => {
                let desired = set.to_configuration();
                let note = format!("desired set now has {} feature(s)", desired.len());
                self.controller.change_feature_set(desired).await?;
                Ok(note)
            }
            Step::Connect => {
                let connection = self.current_connection(number, step)?;
                connection.on_service_connected(self.service.clone());
                Ok(format!("connected on attempt {}", connection.id()))
            }
            Step::Disconnect => {
                self.current_connection(number, step)?.on_service_disconnected();
                Ok(String::new())
            }
            Step::Crash => {
                self.current_connection(number, step)?.on_binding_died();
                Ok(String::new())
            }
            Step::NullBinding => {
                self.current_connection(number, step)?.on_null_binding();
                Ok(String::new())
            }
            Step::FeatureStatus { slot, feature, status } => {
                if self.service.report_status(*slot, *feature, *status) {
                    Ok(format!("{} on slot {} reported {}", feature, slot, status))
                } else {
                    Err(ImsBindError::Scenario {
                        step: number,
                        action: step.action(),
                        reason: format!("no live {} feature on slot {}", feature, slot),
                    })
                }
            }
            Step::Unbind => {
                self.controller.unbind().await?;
                Ok(String::new())
            }
            Step::Wait { millis } => {
                tokio::time::sleep(Duration::from_millis(*millis)).await;
                Ok(format!("waited {} ms", millis))
            }
        }
    }

    fn current_connection(&self, number: usize, step: &Step) -> Result<ServiceConnection> {
        self.binder.last_connection().ok_or_else(|| ImsBindError::Scenario {
            step: number,
            action: step.action(),
            reason: "no connection has been requested yet".to_string(),
        })
    }

    fn report(&self, steps: Vec<StepRecord>) -> ScenarioReport {
        ScenarioReport {
            component: self.controller.component().clone(),
            final_state: self.controller.state(),
            steps,
            records: self.repository.records(),
            events: self.callbacks.events(),
            transitions: self.transitions.entries(),
            connect_attempts: self.binder.connect_count(),
            remote_calls: self.service.calls().len(),
        }
    }
}

/// Keys that can ever hold a record in this scenario
fn observed_keys(steps: &[Step]) -> BTreeSet<FeatureKey> {
    steps
        .iter()
        .filter_map(|step| match step {
            Step::Bind(set) | Step::Change(set) => Some(set),
            _ => None,
        })
        .flat_map(|set| set.features.iter())
        .map(|entry| match entry.feature {
            FeatureType::EmergencyMmtel => FeatureKey::new(entry.slot, FeatureType::Mmtel),
            feature => FeatureKey::new(entry.slot, feature),
        })
        .collect()
}
