//! Price precision rules and slippage adjustment.
//!
//! The exchange accepts integer prices unconditionally; non-integer prices
//! are limited to 5 significant figures and at most 6 decimal places. All
//! derived prices must round identically across runs, so everything here
//! works on decimal strings rather than floats.

use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

use crate::error::{PerpdeskError, Result};

/// Max decimal places for perp prices (assuming szDecimals = 0).
pub const MAX_DECIMALS_PERP: u32 = 6;

/// Max significant figures for non-integer prices.
pub const MAX_SIGNIFICANT_FIGURES: u32 = 5;

fn count_significant_figures(price: &Decimal) -> u32 {
    if price.is_zero() {
        return 1;
    }
    let digits: String = price
        .normalize()
        .to_string()
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    digits.trim_start_matches('0').len() as u32
}

fn integer_digits(price: &Decimal) -> u32 {
    let int_part = price.trunc();
    if int_part.is_zero() {
        0
    } else {
        int_part.to_string().trim_start_matches('-').len() as u32
    }
}

/// Valid decimal places for a price, given its own precision.
///
/// Integer prices allow 0; non-integer prices keep their natural decimals
/// capped by both [`MAX_DECIMALS_PERP`] and the significant-figure budget
/// left over after the integer digits.
pub fn valid_price_decimals(market_price: &str) -> u32 {
    let Ok(price) = Decimal::from_str(market_price) else {
        return 2; // Default fallback
    };
    if price <= Decimal::ZERO {
        return 2;
    }
    if price.fract().is_zero() {
        return 0;
    }

    let text = price.normalize().to_string();
    let Some(decimal_index) = text.find('.') else {
        return 0;
    };
    let actual_decimals = (text.len() - decimal_index - 1) as u32;

    let mut max_allowed = actual_decimals.min(MAX_DECIMALS_PERP);

    if count_significant_figures(&price) > MAX_SIGNIFICANT_FIGURES {
        let int_digits = integer_digits(&price);
        if int_digits >= MAX_SIGNIFICANT_FIGURES {
            max_allowed = 0;
        } else {
            max_allowed = max_allowed.min(MAX_SIGNIFICANT_FIGURES - int_digits);
        }
    }

    max_allowed
}

/// Format a price under the significant-figure and decimal-place rules.
///
/// Truncates (never rounds) excess significant digits, then applies the
/// szDecimals-driven decimal cap, then strips trailing zeros.
pub fn format_price_to_significant_digits(price: &Decimal, sz_decimals: Option<u32>) -> String {
    if price.is_zero() {
        return "0".to_string();
    }
    if price.fract().is_zero() {
        return price.trunc().to_string();
    }

    let text = price.normalize().to_string();
    let (int_part, dec_part) = match text.split_once('.') {
        Some((i, d)) => (i.to_string(), d.to_string()),
        None => (text.clone(), String::new()),
    };

    let int_digits = if int_part == "0" || int_part == "-0" {
        0
    } else {
        int_part.trim_start_matches('-').len() as u32
    };

    let mut result = text;

    if !dec_part.is_empty() {
        if int_digits >= MAX_SIGNIFICANT_FIGURES {
            result = int_part.clone();
        } else {
            let allowed = (MAX_SIGNIFICANT_FIGURES - int_digits) as usize;
            if int_digits == 0 {
                // Leading zeros in the fraction are not significant.
                let leading_zeros = dec_part.chars().take_while(|c| *c == '0').count();
                let significant = &dec_part[leading_zeros..];
                if significant.len() > allowed {
                    result = format!(
                        "{int_part}.{}{}",
                        "0".repeat(leading_zeros),
                        &significant[..allowed]
                    );
                }
            } else if dec_part.len() > allowed {
                result = format!("{int_part}.{}", &dec_part[..allowed]);
            }
        }
    }

    let max_allowed_decimals = match sz_decimals {
        Some(sz) => MAX_DECIMALS_PERP.saturating_sub(sz) as usize,
        None => MAX_DECIMALS_PERP as usize,
    };
    if let Some(dot) = result.find('.') {
        let current = result.len() - dot - 1;
        if current > max_allowed_decimals {
            if max_allowed_decimals == 0 {
                result.truncate(dot);
            } else {
                result.truncate(dot + 1 + max_allowed_decimals);
            }
        }
    }

    if result.contains('.') {
        result = result.trim_end_matches('0').trim_end_matches('.').to_string();
    }

    result
}

/// Slippage-adjusted execution price: `reference × (1 ± slippage)`, rounded
/// to the reference price's own valid decimals.
pub fn slippage_price(reference_price: &str, is_buy: bool, slippage: Decimal) -> Result<String> {
    let price = Decimal::from_str(reference_price).map_err(|e| {
        PerpdeskError::InvalidOrder(format!("Invalid reference price {reference_price}: {e}"))
    })?;

    let valid_decimals = valid_price_decimals(reference_price);
    let multiplier = if is_buy {
        Decimal::ONE + slippage
    } else {
        Decimal::ONE - slippage
    };
    let adjusted = (price * multiplier)
        .round_dp_with_strategy(valid_decimals, RoundingStrategy::MidpointAwayFromZero);

    Ok(format_price_to_significant_digits(
        &adjusted,
        Some(MAX_DECIMALS_PERP - valid_decimals),
    ))
}
