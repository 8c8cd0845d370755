// Conversions between the ledger's smallest unit (wei) and the display unit (ether).
use crate::ValidationError;
use rust_decimal::Decimal;

pub const WEI_DECIMALS: u32 = 18;

pub const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;

/// Largest wei amount a `Decimal` holds without rounding (96-bit mantissa).
pub const MAX_EXACT_WEI: u128 = (1u128 << 96) - 1;

pub fn wei_to_ether(wei: u128) -> Result<Decimal, ValidationError> {
    if wei > MAX_EXACT_WEI {
        return Err(ValidationError::AmountOutOfRange(wei));
    }
    let mantissa =
        i128::try_from(wei).map_err(|_| ValidationError::AmountOutOfRange(wei))?;
    Decimal::try_from_i128_with_scale(mantissa, WEI_DECIMALS)
        .map(|value| value.normalize())
        .map_err(|_| ValidationError::AmountOutOfRange(wei))
}

pub fn ether_to_wei(ether: u64) -> u128 {
    u128::from(ether) * WEI_PER_ETHER
}
