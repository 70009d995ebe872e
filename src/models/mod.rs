use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One structured nutrition estimate for a single meal photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NutritionAnalysis {
    pub total_calories: f64,
    pub items: Vec<FoodItem>,  // display order = API order
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub macro_estimate: Option<MacroEstimate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodItem {
    pub name: String,
    pub calories: f64,
    pub confidence: f64,  // 0-1
}

/// Free-form magnitudes as returned by the model (e.g. "20g").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroEstimate {
    pub protein: String,
    pub carbs: String,
    pub fat: String,
}

impl NutritionAnalysis {
    /// Rejects values the output schema cannot express (negative calories,
    /// confidence outside [0, 1]).
    pub fn validate(&self) -> Result<(), String> {
        if !self.total_calories.is_finite() || self.total_calories < 0.0 {
            return Err(format!("totalCalories out of range: {}", self.total_calories));
        }

        for item in &self.items {
            if !item.calories.is_finite() || item.calories < 0.0 {
                return Err(format!("calories out of range for '{}': {}", item.name, item.calories));
            }
            if !(0.0..=1.0).contains(&item.confidence) {
                return Err(format!("confidence out of range for '{}': {}", item.name, item.confidence));
            }
        }

        Ok(())
    }

    /// Share of each item in the breakdown, in item order. Shares are taken
    /// against the sum of item calories so the chart always closes at 100%.
    pub fn breakdown(&self) -> Vec<(&FoodItem, f64)> {
        let sum: f64 = self.items.iter().map(|i| i.calories).sum();

        self.items
            .iter()
            .map(|item| {
                let share = if sum > 0.0 { item.calories / sum } else { 0.0 };
                (item, share)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChatRole::User => "user",
            ChatRole::Model => "model",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A meal photo ready to cross the API boundary: base64 data without any
/// `data:` URL prefix, plus its mime type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime_type: String,
    pub data: String,
}
