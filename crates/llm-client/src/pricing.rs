use research_core::LlmUsage;

use crate::chat::TokenCounts;

/// USD per 1M tokens.
#[derive(Debug, Clone, Copy)]
pub struct ModelPrice {
    pub input_per_1m: f64,
    pub output_per_1m: f64,
}

/// Longest-prefix-wins price table. Unknown models fall back to a
/// conservative mid-tier rate so cost tracking never reads zero.
const PRICE_TABLE: &[(&str, ModelPrice)] = &[
    (
        "gpt-4o-mini",
        ModelPrice {
            input_per_1m: 0.15,
            output_per_1m: 0.60,
        },
    ),
    (
        "gpt-4o",
        ModelPrice {
            input_per_1m: 2.50,
            output_per_1m: 10.00,
        },
    ),
    (
        "gpt-4.1-mini",
        ModelPrice {
            input_per_1m: 0.40,
            output_per_1m: 1.60,
        },
    ),
    (
        "gpt-4.1",
        ModelPrice {
            input_per_1m: 2.00,
            output_per_1m: 8.00,
        },
    ),
    (
        "gpt-4-turbo",
        ModelPrice {
            input_per_1m: 10.00,
            output_per_1m: 30.00,
        },
    ),
    (
        "o3-mini",
        ModelPrice {
            input_per_1m: 1.10,
            output_per_1m: 4.40,
        },
    ),
];

const DEFAULT_PRICE: ModelPrice = ModelPrice {
    input_per_1m: 2.50,
    output_per_1m: 10.00,
};

pub fn price_for(model: &str) -> ModelPrice {
    PRICE_TABLE
        .iter()
        .filter(|(prefix, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, price)| *price)
        .unwrap_or(DEFAULT_PRICE)
}

pub fn usage_from(model: &str, tokens: &TokenCounts) -> LlmUsage {
    let price = price_for(model);
    let input_cost = tokens.prompt_tokens as f64 * price.input_per_1m / 1_000_000.0;
    let output_cost = tokens.completion_tokens as f64 * price.output_per_1m / 1_000_000.0;
    LlmUsage {
        prompt_tokens: tokens.prompt_tokens,
        completion_tokens: tokens.completion_tokens,
        total_tokens: tokens.total_tokens,
        input_cost,
        output_cost,
        total_cost: input_cost + output_cost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_match_prefers_longest() {
        // "gpt-4o-mini-2024" must match the mini rate, not the gpt-4o rate.
        let mini = price_for("gpt-4o-mini-2024-07-18");
        assert!((mini.input_per_1m - 0.15).abs() < f64::EPSILON);
        let full = price_for("gpt-4o-2024-08-06");
        assert!((full.input_per_1m - 2.50).abs() < f64::EPSILON);
    }

    #[test]
    fn usage_costs_are_token_proportional() {
        let usage = usage_from(
            "gpt-4o",
            &TokenCounts {
                prompt_tokens: 1_000_000,
                completion_tokens: 100_000,
                total_tokens: 1_100_000,
            },
        );
        assert!((usage.input_cost - 2.50).abs() < 1e-9);
        assert!((usage.output_cost - 1.00).abs() < 1e-9);
        assert!((usage.total_cost - 3.50).abs() < 1e-9);
    }
}
