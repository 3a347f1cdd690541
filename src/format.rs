use alloy::primitives::utils::format_units;
use alloy::primitives::U256;
use rust_decimal::Decimal;

const ETHER_DECIMALS: u32 = 18;

/// Render a wei amount as decimal ether without trailing zeros
/// (`10000000000000000` -> `"0.01"`).
pub fn format_ether(wei: U256) -> String {
    match to_ether_decimal(wei) {
        Some(value) => value.normalize().to_string(),
        // Too wide for a Decimal mantissa.
        None => format_units(wei, "ether").unwrap_or_else(|_| wei.to_string()),
    }
}

fn to_ether_decimal(wei: U256) -> Option<Decimal> {
    let raw = i128::try_from(wei).ok()?;
    Decimal::try_from_i128_with_scale(raw, ETHER_DECIMALS).ok()
}
