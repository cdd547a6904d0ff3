//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Playback speed policy."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

/// Multiplier applied when the requested factor has no effect.
pub const NORMAL_SPEED: f64 = 1.0;

/// Map a user supplied speed factor to the inter-entry delay multiplier.
///
/// * `f >= 1` speeds playback up: `1 / f`.
/// * `f <= -1` slows playback down: `|f|`.
/// * anything in between, or a non-finite value, plays at normal speed.
///
/// The result is rounded to four decimal places.
pub fn calculate_delay_factor(factor: f64) -> f64 {
    if !factor.is_finite() {
        return NORMAL_SPEED;
    }
    let multiplier = if factor >= 1.0 {
        1.0 / factor
    } else if factor <= -1.0 {
        factor.abs()
    } else {
        NORMAL_SPEED
    };
    (multiplier * 10_000.0).round() / 10_000.0
}

/// Scale `base` by `multiplier`, falling back to `ceiling` when the product does not fit in a `Duration`.
pub fn scale_interval(base: Duration, multiplier: f64, ceiling: Duration) -> Duration {
    Duration::try_from_secs_f64(base.as_secs_f64() * multiplier).unwrap_or(ceiling)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_factor_table() {
        let table = [
            (0.5, 1.0),
            (-0.5, 1.0),
            (0.0, 1.0),
            (1.0, 1.0),
            (-1.0, 1.0),
            (1.5, 0.6667),
            (-1.5, 1.5),
            (3.0, 0.3333),
            (5.0, 0.2),
            (-5.0, 5.0),
            (25.0, 0.04),
            (-50.0, 50.0),
        ];
        for (factor, expected) in table {
            assert_eq!(calculate_delay_factor(factor), expected, "factor {factor}");
        }
    }

    #[test]
    fn non_finite_factors_play_at_normal_speed() {
        assert_eq!(calculate_delay_factor(f64::NAN), NORMAL_SPEED);
        assert_eq!(calculate_delay_factor(f64::INFINITY), NORMAL_SPEED);
        assert_eq!(calculate_delay_factor(f64::NEG_INFINITY), NORMAL_SPEED);
    }

    #[test]
    fn scaling_saturates_instead_of_panicking() {
        let ceiling = Duration::from_secs(60);
        assert_eq!(
            scale_interval(Duration::from_millis(200), 0.5, ceiling),
            Duration::from_millis(100)
        );
        assert_eq!(scale_interval(Duration::MAX, 1e300, ceiling), ceiling);
    }
}
