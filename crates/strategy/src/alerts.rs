use common::IndicatorSnapshot;

use crate::config::AlertBands;

/// Informational StochRSI events. Logged, never traded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StochAlert {
    CrossUpOversold,
    CrossUpMid,
    CrossDownOverbought,
    CrossDownMid,
    BelowUpperBand,
    AboveLowerBand,
}

impl std::fmt::Display for StochAlert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StochAlert::CrossUpOversold => write!(f, "crossup_os"),
            StochAlert::CrossUpMid => write!(f, "crossup_mid"),
            StochAlert::CrossDownOverbought => write!(f, "crossdown_ob"),
            StochAlert::CrossDownMid => write!(f, "crossdown_mid"),
            StochAlert::BelowUpperBand => write!(f, "below_upper_band"),
            StochAlert::AboveLowerBand => write!(f, "above_lower_band"),
        }
    }
}

/// At most one alert per candle; the more extreme band wins.
pub fn check_stoch_alert(
    prev: &IndicatorSnapshot,
    curr: &IndicatorSnapshot,
    bands: &AlertBands,
) -> Option<StochAlert> {
    let (k, d) = (curr.stoch_rsi, curr.stoch_rsi_d);
    let crossed_up = k > d && prev.stoch_rsi <= prev.stoch_rsi_d;
    let crossed_down = k < d && prev.stoch_rsi >= prev.stoch_rsi_d;

    if crossed_up && (k < bands.lower || d < bands.lower) {
        return Some(StochAlert::CrossUpOversold);
    }
    if crossed_up && (k < bands.middle || d < bands.middle) {
        return Some(StochAlert::CrossUpMid);
    }
    if crossed_down && (k > bands.upper || d > bands.upper) {
        return Some(StochAlert::CrossDownOverbought);
    }
    if crossed_down && (k > bands.middle || d > bands.middle) {
        return Some(StochAlert::CrossDownMid);
    }
    if prev.stoch_rsi >= bands.upper && k < bands.upper {
        return Some(StochAlert::BelowUpperBand);
    }
    if prev.stoch_rsi <= bands.lower && k > bands.lower {
        return Some(StochAlert::AboveLowerBand);
    }
    None
}
