//! Pure indicator math over close-price series.
//!
//! Both functions return full series so callers can take whichever window
//! they need; the trading engine only ever consumes the last value. Inputs
//! shorter than the period yield an empty series.

/// Arithmetic simple moving average. Output length is
/// `closes.len() - period + 1`.
pub fn sma(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(closes.len() - period + 1);
    let mut sum: f64 = closes[..period].iter().sum();
    out.push(sum / period as f64);
    for i in period..closes.len() {
        sum += closes[i] - closes[i - period];
        out.push(sum / period as f64);
    }
    out
}

/// Relative Strength Index with Wilder smoothing. Needs `period + 1` closes
/// for the first value; output length is `closes.len() - period`.
pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for window in closes[..=period].windows(2) {
        let change = window[1] - window[0];
        if change > 0.0 {
            gains += change;
        } else {
            losses -= change;
        }
    }
    let mut avg_gain = gains / period as f64;
    let mut avg_loss = losses / period as f64;

    let mut out = Vec::with_capacity(closes.len() - period);
    out.push(rsi_value(avg_gain, avg_loss));

    let smoothing = period as f64 - 1.0;
    for window in closes[period..].windows(2) {
        let change = window[1] - window[0];
        let (gain, loss) = if change > 0.0 { (change, 0.0) } else { (0.0, -change) };
        avg_gain = (avg_gain * smoothing + gain) / period as f64;
        avg_loss = (avg_loss * smoothing + loss) / period as f64;
        out.push(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}
