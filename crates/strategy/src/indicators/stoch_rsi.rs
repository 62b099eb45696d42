/// Stochastic oscillator applied to an RSI series.
///
/// Raw value = `100 * (rsi - min) / (max - min)` over `stoch_period` RSI
/// values; a flat window uses a denominator of 1. `%K` is the SMA of the raw
/// value over `k_smooth`, `%D` the SMA of `%K` over `d_smooth`.
#[derive(Debug, Clone)]
pub struct StochRsi {
    pub stoch_period: usize,
    pub k_smooth: usize,
    pub d_smooth: usize,
}

/// `%K` and `%D` lines aligned with the input series.
#[derive(Debug, Clone, PartialEq)]
pub struct StochLines {
    pub k: Vec<Option<f64>>,
    pub d: Vec<Option<f64>>,
}

impl StochRsi {
    pub fn new(stoch_period: usize, k_smooth: usize, d_smooth: usize) -> Self {
        assert!(
            stoch_period >= 1 && k_smooth >= 1 && d_smooth >= 1,
            "StochRSI windows must be >= 1"
        );
        Self {
            stoch_period,
            k_smooth,
            d_smooth,
        }
    }

    pub fn lines(&self, rsi: &[Option<f64>]) -> StochLines {
        let raw = rolling(rsi, self.stoch_period, |window| {
            let current = *window.last()?;
            let (min, max) = window
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                });
            let denominator = if max - min == 0.0 { 1.0 } else { max - min };
            Some(100.0 * (current - min) / denominator)
        });
        let k = rolling(&raw, self.k_smooth, mean);
        let d = rolling(&k, self.d_smooth, mean);
        StochLines { k, d }
    }
}

fn mean(window: &[f64]) -> Option<f64> {
    Some(window.iter().sum::<f64>() / window.len() as f64)
}

/// Apply `f` to every full trailing window of defined values.
fn rolling<F>(series: &[Option<f64>], len: usize, f: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> Option<f64>,
{
    let mut out = vec![None; series.len()];
    for end in len..=series.len() {
        let window: Option<Vec<f64>> = series[end - len..end].iter().copied().collect();
        if let Some(window) = window {
            out[end - 1] = f(&window);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defined(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().copied().map(Some).collect()
    }

    #[test]
    fn raw_stochastic_spans_zero_to_hundred() {
        let stoch = StochRsi::new(3, 1, 1);
        let lines = stoch.lines(&defined(&[10.0, 30.0, 20.0, 40.0, 5.0]));
        assert!(lines.k[1].is_none());
        assert_eq!(lines.k[2], Some(50.0));
        assert_eq!(lines.k[3], Some(100.0));
        assert_eq!(lines.k[4], Some(0.0));
    }

    #[test]
    fn warmup_propagates_through_smoothing() {
        let stoch = StochRsi::new(2, 2, 2);
        let mut rsi = vec![None, None];
        rsi.extend(defined(&[40.0, 60.0, 50.0, 70.0]));
        let lines = stoch.lines(&rsi);
        // raw from index 3, %K from 4, %D from 5
        assert!(lines.k[3].is_none());
        assert!(lines.k[4].is_some());
        assert!(lines.d[4].is_none());
        assert!(lines.d[5].is_some());
    }

    #[test]
    fn flat_window_reads_zero() {
        let stoch = StochRsi::new(3, 1, 1);
        let lines = stoch.lines(&defined(&[55.0, 55.0, 55.0]));
        assert_eq!(lines.k[2], Some(0.0));
    }
}
