/*!
 * Configuration types for imsbind
 */

use crate::error::{ImsBindError, Result};
use imsbind_connect::ComponentName;
use imsbind_core_repository::{
    FeatureConfiguration, FeatureKey, FeatureStatus, FeatureType, ImsCapabilities, SlotId, SubscriptionId,
};
use imsbind_core_resilience::RebindPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration: the service to bind, how to rebind, and a scripted scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ImsBindConfig {
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub rebind: RebindConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Steps executed in order by `imsbind run`
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Remote component the controller binds to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub package: String,
    pub class: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            package: "com.example.ims".to_string(),
            class: "ImsService".to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn component(&self) -> ComponentName {
        ComponentName::new(&self.package, &self.class)
    }
}

/// Automatic rebind spacing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebindConfig {
    /// Delay before the first automatic rebind, in milliseconds
    #[serde(default = "default_start_delay_ms")]
    pub start_delay_ms: u64,

    /// Upper bound for the rebind delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RebindConfig {
    fn default() -> Self {
        Self {
            start_delay_ms: default_start_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RebindConfig {
    pub fn policy(&self) -> RebindPolicy {
        RebindPolicy::new(
            Duration::from_millis(self.start_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Shorthand for level = debug
    #[serde(default)]
    pub verbose: bool,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Behavior of the in-process simulated binder and service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Capabilities the simulated service advertises
    #[serde(default)]
    pub capabilities: Vec<CapabilityName>,

    /// Feature types whose creation the service rejects
    #[serde(default)]
    pub refuse_features: Vec<FeatureType>,

    /// Feature types whose creation returns no feature object
    #[serde(default)]
    pub null_features: Vec<FeatureType>,

    /// Answer every accepted connect right away; when off, use `connect` steps
    #[serde(default = "default_true")]
    pub auto_connect: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            capabilities: Vec::new(),
            refuse_features: Vec::new(),
            null_features: Vec::new(),
            auto_connect: true,
        }
    }
}

impl SimulationConfig {
    pub fn advertised(&self) -> ImsCapabilities {
        self.capabilities
            .iter()
            .fold(ImsCapabilities::empty(), |caps, name| caps | name.flag())
    }
}

/// Capability names accepted in configuration files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityName {
    EmergencyOverMmtel,
    SipDelegateCreation,
}

impl CapabilityName {
    pub fn flag(&self) -> ImsCapabilities {
        match self {
            CapabilityName::EmergencyOverMmtel => ImsCapabilities::EMERGENCY_OVER_MMTEL,
            CapabilityName::SipDelegateCreation => ImsCapabilities::SIP_DELEGATE_CREATION,
        }
    }
}

/// One scripted scenario step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Bind with an initial feature set
    Bind(FeatureSet),

    /// Replace the desired feature set
    Change(FeatureSet),

    /// Deliver "connected" on the current connection
    Connect,

    /// Service disconnected, connection kept
    Disconnect,

    /// Binding died
    Crash,

    /// Service returned a null binding
    NullBinding,

    /// Service reports a feature status
    FeatureStatus {
        slot: SlotId,
        feature: FeatureType,
        status: FeatureStatus,
    },

    Unbind,

    /// Let time pass, e.g. for a scheduled rebind
    Wait { millis: u64 },
}

impl Step {
    pub fn action(&self) -> &'static str {
        match self {
            Step::Bind(_) => "bind",
            Step::Change(_) => "change",
            Step::Connect => "connect",
            Step::Disconnect => "disconnect",
            Step::Crash => "crash",
            Step::NullBinding => "null_binding",
            Step::FeatureStatus { .. } => "feature_status",
            Step::Unbind => "unbind",
            Step::Wait { .. } => "wait",
        }
    }
}

/// Desired features plus the slot subscriptions they run under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FeatureSet {
    #[serde(default)]
    pub features: Vec<FeatureEntry>,

    #[serde(default)]
    pub subscriptions: Vec<SlotSubscription>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureEntry {
    pub slot: SlotId,
    pub feature: FeatureType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSubscription {
    pub slot: SlotId,
    pub subscription: i32,
}

impl FeatureSet {
    pub fn to_configuration(&self) -> FeatureConfiguration {
        FeatureConfiguration::from_parts(
            self.features.iter().map(|e| FeatureKey::new(e.slot, e.feature)),
            self.subscriptions
                .iter()
                .map(|s| (s.slot, SubscriptionId::new(s.subscription))),
        )
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let mut seen = BTreeSet::new();
        for entry in &self.subscriptions {
            if !seen.insert(entry.slot) {
                return Err(format!("slot {} has more than one subscription", entry.slot));
            }
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_start_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

impl ImsBindConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ImsBindError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Check everything that can be checked before running
    pub fn validate(&self) -> Result<()> {
        if self.service.package.trim().is_empty() || self.service.class.trim().is_empty() {
            return Err(ImsBindError::Config(
                "service package and class must not be empty".to_string(),
            ));
        }

        self.rebind.policy().validate()?;

        if self.steps.is_empty() {
            return Err(ImsBindError::Config("scenario has no steps".to_string()));
        }

        for (index, step) in self.steps.iter().enumerate() {
            let number = index + 1;
            let problem = match step {
                Step::Bind(set) | Step::Change(set) => set.validate().err(),
                Step::FeatureStatus { feature, .. } if !feature.is_instantiable() => {
                    Some(format!("{} has no status of its own", feature))
                }
                Step::Wait { millis: 0 } => Some("wait needs a positive duration".to_string()),
                _ => None,
            };

            if let Some(reason) = problem {
                return Err(ImsBindError::Config(format!(
                    "step {} ({}): {}",
                    number,
                    step.action(),
                    reason
                )));
            }
        }

        Ok(())
    }

    /// A small but complete scenario, printed by `imsbind sample-config`
    pub fn sample() -> Self {
        let slot0 = FeatureSet {
            features: vec![
                FeatureEntry {
                    slot: 0,
                    feature: FeatureType::EmergencyMmtel,
                },
                FeatureEntry {
                    slot: 0,
                    feature: FeatureType::Mmtel,
                },
                FeatureEntry {
                    slot: 0,
                    feature: FeatureType::Rcs,
                },
            ],
            subscriptions: vec![SlotSubscription {
                slot: 0,
                subscription: 1,
            }],
        };

        let mut dual_sim = slot0.clone();
        dual_sim.features.push(FeatureEntry {
            slot: 1,
            feature: FeatureType::Mmtel,
        });
        dual_sim.subscriptions.push(SlotSubscription {
            slot: 1,
            subscription: 2,
        });

        Self {
            rebind: RebindConfig {
                start_delay_ms: 200,
                max_delay_ms: 5_000,
            },
            simulation: SimulationConfig {
                capabilities: vec![CapabilityName::SipDelegateCreation],
                ..Default::default()
            },
            steps: vec![
                Step::Bind(slot0),
                Step::FeatureStatus {
                    slot: 0,
                    feature: FeatureType::Mmtel,
                    status: FeatureStatus::Ready,
                },
                Step::Change(dual_sim),
                Step::Crash,
                Step::Wait { millis: 500 },
            ],
            ..Default::default()
        }
    }
}
