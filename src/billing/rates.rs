use std::collections::HashMap;

use crate::config;

/// key: billing-rates -> ratio lookups
///
/// A missing entry reports `0.0`; settlement treats zero as neutral.
pub trait RateProvider: Send + Sync {
    fn model_ratio(&self, model_name: &str) -> f64;

    fn completion_ratio(&self, model_name: &str) -> f64;

    fn group_ratio(&self, group: &str) -> f64;
}

#[derive(Debug, Clone, Default)]
pub struct ConfiguredRates {
    model: HashMap<String, f64>,
    completion: HashMap<String, f64>,
    group: HashMap<String, f64>,
}

impl ConfiguredRates {
    pub fn new(
        model: HashMap<String, f64>,
        completion: HashMap<String, f64>,
        group: HashMap<String, f64>,
    ) -> Self {
        Self {
            model,
            completion,
            group,
        }
    }

    pub fn from_config() -> Self {
        Self::new(
            config::MODEL_RATIOS.clone(),
            config::COMPLETION_RATIOS.clone(),
            config::GROUP_RATIOS.clone(),
        )
    }
}

impl RateProvider for ConfiguredRates {
    fn model_ratio(&self, model_name: &str) -> f64 {
        self.model.get(model_name).copied().unwrap_or(0.0)
    }

    fn completion_ratio(&self, model_name: &str) -> f64 {
        self.completion.get(model_name).copied().unwrap_or(0.0)
    }

    fn group_ratio(&self, group: &str) -> f64 {
        self.group.get(group).copied().unwrap_or(0.0)
    }
}
