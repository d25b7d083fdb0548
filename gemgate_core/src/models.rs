use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::Config;

/// The three logical operations collaborators can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    QuickQuery,
    AnalyzeCode,
    CodebaseAnalysis,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::QuickQuery => "quick_query",
            TaskType::AnalyzeCode => "analyze_code",
            TaskType::CodebaseAnalysis => "codebase_analysis",
        }
    }

    fn default_tier(self) -> ModelTier {
        match self {
            TaskType::QuickQuery => ModelTier::Flash,
            TaskType::AnalyzeCode => ModelTier::Pro,
            TaskType::CodebaseAnalysis => ModelTier::Pro,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Flash,
    Pro,
}

impl ModelTier {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelTier::Flash => "flash",
            ModelTier::Pro => "pro",
        }
    }
}

impl FromStr for ModelTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flash" => Ok(ModelTier::Flash),
            "pro" => Ok(ModelTier::Pro),
            other => Err(format!("unknown model tier: {}", other)),
        }
    }
}

/// A model identifier that has been resolved through the allow-list table.
/// Never constructed from unvalidated input: the only producer is
/// `ModelSelector::select`, and the names it draws from were charset-checked
/// at config load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelChoice {
    pub model_name: String,
    pub tier: ModelTier,
}

/// Maps a task type to a model through a fixed tier table. Environment- or
/// user-supplied strings only ever select a tier; they are never used as the
/// model identifier itself.
#[derive(Debug, Clone)]
pub struct ModelSelector {
    flash_model: String,
    pro_model: String,
    force_tier: Option<ModelTier>,
}

impl ModelSelector {
    pub fn new(config: &Config) -> Self {
        Self {
            flash_model: config.flash_model.clone(),
            pro_model: config.pro_model.clone(),
            force_tier: config.force_tier,
        }
    }

    pub fn select(&self, task_type: TaskType) -> ModelChoice {
        let tier = self.force_tier.unwrap_or_else(|| task_type.default_tier());
        ModelChoice {
            model_name: self.name_for(tier).to_string(),
            tier,
        }
    }

    fn name_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Flash => &self.flash_model,
            ModelTier::Pro => &self.pro_model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector(force: Option<ModelTier>) -> ModelSelector {
        ModelSelector {
            flash_model: "gemini-2.5-flash".to_string(),
            pro_model: "gemini-2.5-pro".to_string(),
            force_tier: force,
        }
    }

    #[test]
    fn task_table_maps_to_expected_tiers() {
        let sel = selector(None);
        assert_eq!(sel.select(TaskType::QuickQuery).tier, ModelTier::Flash);
        assert_eq!(sel.select(TaskType::AnalyzeCode).tier, ModelTier::Pro);
        assert_eq!(sel.select(TaskType::CodebaseAnalysis).tier, ModelTier::Pro);
    }

    #[test]
    fn selection_stays_inside_allow_list_under_every_override() {
        let tasks = [
            TaskType::QuickQuery,
            TaskType::AnalyzeCode,
            TaskType::CodebaseAnalysis,
        ];
        for force in [None, Some(ModelTier::Flash), Some(ModelTier::Pro)] {
            let sel = selector(force);
            for task in tasks {
                let choice = sel.select(task);
                assert!(
                    choice.model_name == "gemini-2.5-flash"
                        || choice.model_name == "gemini-2.5-pro"
                );
            }
        }
    }

    #[test]
    fn forced_tier_overrides_the_per_task_default() {
        let sel = selector(Some(ModelTier::Flash));
        let choice = sel.select(TaskType::CodebaseAnalysis);
        assert_eq!(choice.tier, ModelTier::Flash);
        assert_eq!(choice.model_name, "gemini-2.5-flash");
    }
}
