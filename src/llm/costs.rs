//! Per-model token pricing.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// USD (input, output) price per token for known models.
pub fn model_cost(model: &str) -> Option<(Decimal, Decimal)> {
    // Prices are per 1M tokens upstream; stored here per token.
    let per_million = match model {
        m if m.starts_with("gpt-4o-mini") => (dec!(0.15), dec!(0.60)),
        m if m.starts_with("gpt-4o") => (dec!(2.50), dec!(10.00)),
        m if m.starts_with("gpt-4-turbo") => (dec!(10.00), dec!(30.00)),
        m if m.starts_with("gpt-4") => (dec!(30.00), dec!(60.00)),
        m if m.starts_with("gpt-3.5-turbo-16k") => (dec!(3.00), dec!(4.00)),
        m if m.starts_with("gpt-3.5-turbo") => (dec!(0.50), dec!(1.50)),
        _ => return None,
    };
    let million = dec!(1_000_000);
    Some((per_million.0 / million, per_million.1 / million))
}

/// Fallback pricing for unknown models, so cost logs never read as free.
pub fn default_cost() -> (Decimal, Decimal) {
    (dec!(0.000010), dec!(0.000030))
}

/// Estimated USD cost of one call.
pub fn estimate_cost(pricing: (Decimal, Decimal), input_tokens: u32, output_tokens: u32) -> Decimal {
    pricing.0 * Decimal::from(input_tokens) + pricing.1 * Decimal::from(output_tokens)
}
