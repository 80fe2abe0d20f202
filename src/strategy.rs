// =============================================================================
// Strategy: maps a candle series to a binary direction
// =============================================================================
//
// The close of the latest candle is compared with the EMA of all closes; a flat or
// too-short series yields no decision.
// =============================================================================

use crate::market_data::Candle;
use crate::types::Direction;

/// Minimum number of candles required before a decision is made.
const MIN_CANDLES: usize = 10;

/// Smoothing period for the trend EMA.
const EMA_PERIOD: usize = 20;

/// Exponential moving average of `values`, seeded with the first value.
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    let first = *values.first()?;
    let k = 2.0 / (period as f64 + 1.0);
    Some(values[1..].iter().fold(first, |acc, v| v * k + acc * (1.0 - k)))
}

/// `Long` when the last close is above the EMA, `Short` when below.
pub fn decide(candles: &[Candle]) -> Option<Direction> {
    if candles.len() < MIN_CANDLES {
        return None;
    }
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let last = *closes.last()?;
    let trend = ema(&closes, EMA_PERIOD)?;

    if last > trend {
        Some(Direction::Long)
    } else if last < trend {
        Some(Direction::Short)
    } else {
        None
    }
}
