mod concurrent_streams;
mod device_velocity;
mod geo_restriction;
mod impossible_travel;
mod new_device;
mod new_location;
mod simultaneous_locations;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::context::EvaluationContext;
use crate::error::{MonitorError, Result};
use vigil_model::{Rule, RuleType, Severity, Signal};

/// What an evaluator hands back when a rule fires.
#[derive(Debug, Clone)]
pub struct ViolationDraft {
    pub severity: Severity,
    pub message: String,
    pub details: Map<String, Value>,
    pub signals: Vec<Signal>,
}

impl ViolationDraft {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            details: Map::new(),
            signals: Vec::new(),
        }
    }

    pub fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn signal(mut self, signal: Signal) -> Self {
        self.signals.push(signal);
        self
    }
}

fn parse_config<T: DeserializeOwned>(rule: &Rule) -> Result<T> {
    serde_json::from_value(rule.config.clone()).map_err(|e| {
        MonitorError::validation(format!(
            "rule {} has invalid config: {e}",
            rule.id
        ))
    })
}

/// Evaluate one rule against one context. Errors are the caller's cue to
/// skip the rule, never the whole tick.
pub fn evaluate(
    rule: &Rule,
    ctx: &EvaluationContext,
) -> Result<Option<ViolationDraft>> {
    match rule.rule_type {
        RuleType::ImpossibleTravel => {
            impossible_travel::evaluate(&parse_config(rule)?, ctx)
        }
        RuleType::ConcurrentStreams => {
            concurrent_streams::evaluate(&parse_config(rule)?, ctx)
        }
        RuleType::SimultaneousLocations => {
            simultaneous_locations::evaluate(&parse_config(rule)?, ctx)
        }
        RuleType::DeviceVelocity => {
            device_velocity::evaluate(&parse_config(rule)?, ctx)
        }
        RuleType::GeoRestriction => {
            geo_restriction::evaluate(&parse_config(rule)?, ctx)
        }
        RuleType::NewDevice => new_device::evaluate(&parse_config(rule)?, ctx),
        RuleType::NewLocation => {
            new_location::evaluate(&parse_config(rule)?, ctx)
        }
    }
}
