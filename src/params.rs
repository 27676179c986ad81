use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use thiserror::Error;

pub const MAX_TOKENS_RANGE: RangeInclusive<u32> = 1..=2048;
pub const TEMPERATURE_RANGE: RangeInclusive<f32> = 0.1..=4.0;
pub const TOP_P_RANGE: RangeInclusive<f32> = 0.1..=1.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamsError {
    #[error("max_tokens must be between 1 and 2048, got {0}")]
    MaxTokens(u32),
    #[error("temperature must be between 0.1 and 4.0, got {0}")]
    Temperature(f32),
    #[error("top_p must be between 0.1 and 1.0, got {0}")]
    TopP(f32),
}

/// Sampling parameters forwarded to the completion endpoint
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
            top_p: 0.95,
        }
    }
}

impl GenerationParams {
    /// Construct and validate in one step
    pub fn new(max_tokens: u32, temperature: f32, top_p: f32) -> Result<Self, ParamsError> {
        let params = Self {
            max_tokens,
            temperature,
            top_p,
        };
        params.validate()?;
        Ok(params)
    }

    /// Range checks only; fields are independent.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if !MAX_TOKENS_RANGE.contains(&self.max_tokens) {
            return Err(ParamsError::MaxTokens(self.max_tokens));
        }
        // NaN fails `contains`, so it is rejected here as well
        if !TEMPERATURE_RANGE.contains(&self.temperature) {
            return Err(ParamsError::Temperature(self.temperature));
        }
        if !TOP_P_RANGE.contains(&self.top_p) {
            return Err(ParamsError::TopP(self.top_p));
        }
        Ok(())
    }
}
