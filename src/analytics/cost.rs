//! Cloud API cost estimation

/// Pricing per 1M tokens: `(model prefix, input, output)`.
///
/// Matched by longest prefix so dated releases inherit their family's price.
const PRICING: &[(&str, f64, f64)] = &[
    // OpenAI
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4-turbo", 10.00, 30.00),
    ("gpt-4", 30.00, 60.00),
    ("gpt-3.5-turbo", 0.50, 1.50),
    ("o1-mini", 3.00, 12.00),
    ("o1", 15.00, 60.00),
    // Anthropic
    ("claude-opus", 15.00, 75.00),
    ("claude-sonnet", 3.00, 15.00),
    ("claude-haiku", 0.80, 4.00),
    // xAI
    ("grok-3-mini", 0.30, 0.50),
    ("grok-3", 3.00, 15.00),
    // Google
    ("gemini-2.0-flash", 0.10, 0.40),
    ("gemini-1.5-pro", 1.25, 5.00),
];

/// Default pricing for unknown models
const DEFAULT_PRICING: (f64, f64) = (0.15, 0.60);

/// Calculates API cost from token usage
#[derive(Debug, Clone, Default)]
pub struct CostCalculator {
    custom: Vec<(String, f64, f64)>,
}

impl CostCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(dead_code)] // Pricing overrides land via configuration later
    pub fn add_custom_pricing(&mut self, model: &str, input_per_1m: f64, output_per_1m: f64) {
        self.custom.push((model.to_string(), input_per_1m, output_per_1m));
    }

    /// `(input, output)` price per 1M tokens for a model
    pub fn get_pricing(&self, model_name: &str) -> (f64, f64) {
        if let Some((_, input, output)) = self.custom.iter().find(|(m, _, _)| m == model_name) {
            return (*input, *output);
        }

        let mut best: Option<(&str, f64, f64)> = None;
        for &(prefix, input, output) in PRICING {
            if model_name.starts_with(prefix) {
                match best {
                    Some((existing, _, _)) if existing.len() >= prefix.len() => {}
                    _ => best = Some((prefix, input, output)),
                }
            }
        }

        best.map_or(DEFAULT_PRICING, |(_, input, output)| (input, output))
    }

    /// Cost in USD for a single call
    pub fn calculate_cost(&self, model_name: &str, prompt_tokens: i64, completion_tokens: i64) -> f64 {
        let (input_price, output_price) = self.get_pricing(model_name);
        #[allow(clippy::cast_precision_loss)]
        {
            prompt_tokens as f64 / 1_000_000.0 * input_price
                + completion_tokens as f64 / 1_000_000.0 * output_price
        }
    }

    #[allow(dead_code)] // Display helper
    pub fn format_cost(cost: f64) -> String {
        if cost < 0.01 {
            format!("${cost:.4}")
        } else if cost < 1.00 {
            format!("${cost:.3}")
        } else {
            format!("${cost:.2}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_model_pricing() {
        let calc = CostCalculator::new();
        assert_eq!(calc.get_pricing("gpt-4o-mini"), (0.15, 0.60));
        assert_eq!(calc.get_pricing("claude-sonnet-4-5-20250929"), (3.00, 15.00));
    }

    #[test]
    fn test_longest_prefix_wins() {
        let calc = CostCalculator::new();
        // "gpt-4o-mini-2024-07-18" must not match the bare "gpt-4o" family
        assert_eq!(calc.get_pricing("gpt-4o-mini-2024-07-18"), (0.15, 0.60));
        assert_eq!(calc.get_pricing("gpt-4o-2024-11-20"), (2.50, 10.00));
        assert_eq!(calc.get_pricing("o1-mini-2024-09-12"), (3.00, 12.00));
    }

    #[test]
    fn test_unknown_model_defaults() {
        let calc = CostCalculator::new();
        assert_eq!(calc.get_pricing("mystery-model"), DEFAULT_PRICING);
    }

    #[test]
    fn test_cost_math() {
        let calc = CostCalculator::new();
        // 1M input + 1M output on gpt-4o-mini
        let cost = calc.calculate_cost("gpt-4o-mini", 1_000_000, 1_000_000);
        assert!((cost - 0.75).abs() < 1e-9);

        let zero = calc.calculate_cost("gpt-4o-mini", 0, 0);
        assert!(zero.abs() < f64::EPSILON);
    }

    #[test]
    fn test_custom_pricing_overrides() {
        let mut calc = CostCalculator::new();
        calc.add_custom_pricing("gpt-4o-mini", 1.0, 2.0);
        assert_eq!(calc.get_pricing("gpt-4o-mini"), (1.0, 2.0));
    }

    #[test]
    fn test_format_cost() {
        assert_eq!(CostCalculator::format_cost(0.0012), "$0.0012");
        assert_eq!(CostCalculator::format_cost(0.25), "$0.250");
        assert_eq!(CostCalculator::format_cost(1.5), "$1.50");
    }
}
