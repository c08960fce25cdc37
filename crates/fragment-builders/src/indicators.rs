//! Indicator math over EOD bars. Pure functions; builders pick the tail
//! values they need.

use research_core::Bar;

/// Simple moving average; one value per complete window.
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return Vec::new();
    }
    data.windows(period)
        .map(|w| w.iter().sum::<f64>() / period as f64)
        .collect()
}

/// Exponential moving average seeded with the SMA of the first window.
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return Vec::new();
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(data.len() - period + 1);
    let seed = data[..period].iter().sum::<f64>() / period as f64;
    out.push(seed);
    for value in &data[period..] {
        let prev = out[out.len() - 1];
        out.push(alpha * value + (1.0 - alpha) * prev);
    }
    out
}

/// Wilder-smoothed RSI; one value per bar after the warm-up window.
pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() <= period {
        return Vec::new();
    }
    let mut gains = 0.0;
    let mut losses = 0.0;
    for w in closes[..=period].windows(2) {
        let delta = w[1] - w[0];
        if delta >= 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }
    let mut avg_gain = gains / period as f64;
    let mut avg_loss = losses / period as f64;

    let mut out = Vec::with_capacity(closes.len() - period);
    out.push(rsi_value(avg_gain, avg_loss));
    for w in closes[period..].windows(2) {
        let delta = w[1] - w[0];
        let (gain, loss) = if delta >= 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out.push(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss <= f64::EPSILON {
        return 100.0;
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}

/// Average true range over the trailing `period` bars.
pub fn atr(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }
    let tail = &bars[bars.len() - period - 1..];
    let mut sum = 0.0;
    for w in tail.windows(2) {
        let prev_close = w[0].close;
        let bar = &w[1];
        let tr = (bar.high - bar.low)
            .max((bar.high - prev_close).abs())
            .max((bar.low - prev_close).abs());
        sum += tr;
    }
    Some(sum / period as f64)
}

/// Return over the trailing `days` bars, as a fraction.
pub fn trailing_return(closes: &[f64], days: usize) -> Option<f64> {
    if closes.len() <= days {
        return None;
    }
    let past = closes[closes.len() - 1 - days];
    let last = *closes.last()?;
    if past <= 0.0 {
        return None;
    }
    Some(last / past - 1.0)
}

/// Last value of the SMA over the trailing `period` bars.
pub fn last_sma(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    Some(closes[closes.len() - period..].iter().sum::<f64>() / period as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(i: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i as i64)
    }

    fn bars_from(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                date: day(i as u32),
                open: c - 0.5,
                high: c + 1.0,
                low: c - 1.0,
                close: c,
                volume: 1_000_000.0,
            })
            .collect()
    }

    #[test]
    fn sma_basic() {
        let result = sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(result.len(), 3);
        assert!((result[0] - 2.0).abs() < 0.001);
        assert!((result[2] - 4.0).abs() < 0.001);
    }

    #[test]
    fn sma_insufficient_data() {
        assert!(sma(&[1.0, 2.0], 5).is_empty());
    }

    #[test]
    fn rsi_stays_in_range() {
        let prices = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            45.61, 46.28, 46.28, 46.00, 46.03, 46.41, 46.22, 45.64,
        ];
        let result = rsi(&prices, 14);
        assert!(!result.is_empty());
        for value in &result {
            assert!((0.0..=100.0).contains(value));
        }
    }

    #[test]
    fn rsi_all_gains_saturates() {
        let prices: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        let result = rsi(&prices, 14);
        assert!((result.last().unwrap() - 100.0).abs() < 0.001);
    }

    #[test]
    fn atr_positive_for_real_ranges() {
        let bars = bars_from(&[10.0, 11.0, 12.0, 11.5, 12.5, 13.0, 12.0, 13.5, 14.0, 13.0,
                               14.5, 15.0, 14.0, 15.5, 16.0, 15.0]);
        let value = atr(&bars, 14).unwrap();
        assert!(value > 0.0);
        assert!(atr(&bars[..5], 14).is_none());
    }

    #[test]
    fn trailing_return_window() {
        let closes = vec![100.0, 105.0, 110.0, 120.0];
        let r = trailing_return(&closes, 3).unwrap();
        assert!((r - 0.2).abs() < 1e-9);
        assert!(trailing_return(&closes, 4).is_none());
    }

    #[test]
    fn ema_tracks_uptrend() {
        let data: Vec<f64> = (1..=10).map(|i| i as f64).collect();
        let result = ema(&data, 3);
        for w in result.windows(2) {
            assert!(w[1] > w[0]);
        }
    }
}
