/// Exponential moving average over a close series.
///
/// Seeded with the simple average of the first `period` values, then
/// `EMA_t = price_t * k + EMA_{t-1} * (1 - k)` with `k = 2 / (period + 1)`.
#[derive(Debug, Clone)]
pub struct EmaIndicator {
    pub period: usize,
}

impl EmaIndicator {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "EMA period must be >= 1");
        Self { period }
    }

    /// EMA aligned with `closes`: `None` during warm-up (the first
    /// `period - 1` entries), `Some` afterwards.
    pub fn series(&self, closes: &[f64]) -> Vec<Option<f64>> {
        let mut out = vec![None; closes.len()];
        if closes.len() < self.period {
            return out;
        }

        let k = 2.0 / (self.period as f64 + 1.0);
        let mut ema = closes[..self.period].iter().sum::<f64>() / self.period as f64;
        out[self.period - 1] = Some(ema);

        for (i, &price) in closes.iter().enumerate().skip(self.period) {
            ema = price * k + ema * (1.0 - k);
            out[i] = Some(ema);
        }
        out
    }

    /// Latest EMA value, or `None` with fewer than `period` closes.
    pub fn compute(&self, closes: &[f64]) -> Option<f64> {
        self.series(closes).last().copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_seeded_with_simple_average() {
        let ema = EmaIndicator::new(3);
        let series = ema.series(&[1.0, 2.0, 3.0]);
        assert_eq!(series, vec![None, None, Some(2.0)]);
    }

    #[test]
    fn ema_follows_recurrence() {
        let ema = EmaIndicator::new(3);
        // seed = 2.0, k = 0.5 → 4*0.5 + 2*0.5 = 3.0 → 6*0.5 + 3*0.5 = 4.5
        let series = ema.series(&[1.0, 2.0, 3.0, 4.0, 6.0]);
        assert_eq!(series[3], Some(3.0));
        assert_eq!(series[4], Some(4.5));
    }

    #[test]
    fn ema_none_when_shorter_than_period() {
        let ema = EmaIndicator::new(5);
        assert!(ema.compute(&[1.0, 2.0]).is_none());
        assert!(ema.series(&[1.0, 2.0]).iter().all(Option::is_none));
    }

    #[test]
    fn ema_of_constant_series_is_constant() {
        let ema = EmaIndicator::new(4);
        let value = ema.compute(&[50.0; 20]).unwrap();
        assert!((value - 50.0).abs() < 1e-9);
    }
}
