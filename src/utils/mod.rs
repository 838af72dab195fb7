/// Round to `decimals` places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// `numerator / denominator`, or 0 when the denominator is not positive.
pub fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

pub fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

pub fn log_odds(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

/// Convert decimal odds to the raw implied probability (vig included).
pub fn odds_to_probability(odds: f64) -> Option<f64> {
    if odds <= 1.0 || !odds.is_finite() {
        return None;
    }
    Some(1.0 / odds)
}

/// Convert an American moneyline (e.g. -150, +130) to decimal odds.
pub fn american_to_decimal(moneyline: i32) -> Option<f64> {
    match moneyline {
        ml if ml >= 100 => Some(1.0 + ml as f64 / 100.0),
        ml if ml <= -100 => Some(1.0 + 100.0 / (ml as f64).abs()),
        _ => None,
    }
}

/// Implied home win probability with the bookmaker margin removed.
pub fn devigged_home_probability(home_odds: f64, away_odds: f64) -> Option<f64> {
    let home = odds_to_probability(home_odds)?;
    let away = odds_to_probability(away_odds)?;
    let total = home + away;
    if total <= 0.0 {
        return None;
    }
    Some(home / total)
}

/// Parse a period clock such as "12:34", "0:05.3" or "45" into seconds.
pub fn parse_clock_seconds(clock: &str) -> Option<f64> {
    let clock = clock.trim();
    if clock.is_empty() {
        return None;
    }
    let seconds = match clock.split_once(':') {
        Some((minutes, seconds)) => {
            let minutes: f64 = minutes.trim().parse().ok()?;
            let seconds: f64 = seconds.trim().parse().ok()?;
            minutes * 60.0 + seconds
        }
        None => clock.parse().ok()?,
    };
    if seconds.is_finite() && seconds >= 0.0 {
        Some(seconds)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1509.349, 1), 1509.3);
        assert_eq!(round_to(1509.35, 0), 1509.0);
        assert_eq!(round_to(-2.25, 2), -2.25);
    }

    #[test]
    fn test_safe_div_guards_zero() {
        assert_eq!(safe_div(10.0, 0.0), 0.0);
        assert_eq!(safe_div(10.0, 4.0), 2.5);
    }

    #[test]
    fn test_odds_to_probability() {
        assert!((odds_to_probability(2.0).unwrap() - 0.5).abs() < 0.001);
        assert!((odds_to_probability(4.0).unwrap() - 0.25).abs() < 0.001);
        assert!(odds_to_probability(1.0).is_none());
    }

    #[test]
    fn test_american_to_decimal() {
        assert_eq!(american_to_decimal(150), Some(2.5));
        assert_eq!(american_to_decimal(-200), Some(1.5));
        assert_eq!(american_to_decimal(50), None);
    }

    #[test]
    fn test_american_to_decimal_extreme_favorite() {
        let decimal = american_to_decimal(i32::MIN).unwrap();
        assert!(decimal > 1.0 && decimal < 1.0 + 1e-6);
    }

    #[test]
    fn test_devig_removes_margin() {
        let p = devigged_home_probability(1.91, 1.91).unwrap();
        assert!((p - 0.5).abs() < 1e-12);
        let fav = devigged_home_probability(1.5, 2.7).unwrap();
        assert!(fav > 0.6 && fav < 0.7);
    }

    #[test]
    fn test_parse_clock_seconds() {
        assert_eq!(parse_clock_seconds("12:34"), Some(754.0));
        assert_eq!(parse_clock_seconds("0:00"), Some(0.0));
        assert_eq!(parse_clock_seconds("45.5"), Some(45.5));
        assert_eq!(parse_clock_seconds("nonsense"), None);
        assert_eq!(parse_clock_seconds(""), None);
    }

    #[test]
    fn test_log_odds_inverts_logistic() {
        for x in [-3.0, -0.5, 0.0, 1.25, 4.0] {
            assert!((log_odds(logistic(x)) - x).abs() < 1e-9);
        }
    }
}
