//! Model and provider capability descriptors

use serde::{Deserialize, Serialize};

/// Per-feature capability bits a provider can advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFeature {
    /// Server-Sent-Event streaming
    Streaming,
    /// Tool / function calling
    Tools,
    /// Constrained JSON output
    JsonMode,
    /// Image inputs
    Vision,
    /// Dedicated system-message slot
    SystemMessage,
    /// Legacy function-call API
    FunctionCall,
}

/// Model descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model id as exposed on the wire
    pub id: String,
    /// Owning provider name
    pub provider: String,
    /// Context window length in tokens
    pub context_window: u32,
    /// Capability bits
    #[serde(default)]
    pub capabilities: Vec<ProviderFeature>,
    /// Optional pricing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricing: Option<CostModel>,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>, provider: impl Into<String>, context_window: u32) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            context_window,
            capabilities: vec![ProviderFeature::Streaming, ProviderFeature::SystemMessage],
            pricing: None,
        }
    }

    pub fn supports(&self, feature: ProviderFeature) -> bool {
        self.capabilities.contains(&feature)
    }
}

/// Cost model per 1k tokens
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CostModel {
    /// Input cost per 1k tokens
    pub input_per_1k: f64,
    /// Output cost per 1k tokens
    pub output_per_1k: f64,
    /// ISO currency code
    pub currency: Currency,
}

/// Supported pricing currencies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Usd,
    Eur,
}

impl CostModel {
    pub fn usd(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
            currency: Currency::Usd,
        }
    }

    /// Cost of a request given its token usage.
    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_per_1k
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_model_scales_per_1k() {
        let pricing = CostModel::usd(0.01, 0.02);
        let cost = pricing.cost(1000, 500);
        assert!((cost - 0.02).abs() < 1e-12);
    }

    #[test]
    fn model_info_capability_lookup() {
        let model = ModelInfo::new("gpt-4o", "openai", 128_000);
        assert!(model.supports(ProviderFeature::Streaming));
        assert!(!model.supports(ProviderFeature::Vision));
    }
}
