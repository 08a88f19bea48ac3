use serde::Serialize;

/// Relative standing of one value within its column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HeatLevel {
    Best,
    Good,
    Average,
    Below,
    Worst,
    Missing,
}

impl HeatLevel {
    pub fn label(&self) -> &'static str {
        match self {
            HeatLevel::Best => "Best",
            HeatLevel::Good => "Good",
            HeatLevel::Average => "Average",
            HeatLevel::Below => "Below",
            HeatLevel::Worst => "Worst",
            HeatLevel::Missing => "No Data",
        }
    }
}

/// Percentile (0..=100) of `value` among `sorted`. Ties take the midpoint of
/// their positions.
fn percentile(value: f64, sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n < 2 {
        return 50.0;
    }
    let below = sorted.partition_point(|v| *v < value);
    let at_or_below = sorted.partition_point(|v| *v <= value);
    let first = below as f64;
    let last = at_or_below.max(below + 1) as f64 - 1.0;
    let position = ((first + last) / 2.0).clamp(0.0, (n - 1) as f64);
    position / (n - 1) as f64 * 100.0
}

/// Finite values of a column, ascending.
fn sorted_finite(column: &[Option<f64>]) -> Vec<f64> {
    let mut valid: Vec<f64> = column.iter().flatten().copied().filter(|v| v.is_finite()).collect();
    valid.sort_by(f64::total_cmp);
    valid
}

fn band(value: Option<f64>, sorted: &[f64], lower_is_better: bool) -> HeatLevel {
    let value = match value {
        Some(v) if v.is_finite() => v,
        _ => return HeatLevel::Missing,
    };
    if sorted.is_empty() {
        return HeatLevel::Missing;
    }
    if sorted.first() == sorted.last() {
        return HeatLevel::Average;
    }

    let p = percentile(value, sorted);
    let band = if p >= 80.0 {
        5
    } else if p >= 60.0 {
        4
    } else if p >= 40.0 {
        3
    } else if p >= 20.0 {
        2
    } else {
        1
    };
    let band = if lower_is_better { 6 - band } else { band };
    match band {
        5 => HeatLevel::Best,
        4 => HeatLevel::Good,
        3 => HeatLevel::Average,
        2 => HeatLevel::Below,
        _ => HeatLevel::Worst,
    }
}

/// Band `value` against the other values in its column.
///
/// Bands are 80/60/40/20 percentile cut-offs. For lower-is-better metrics
/// the scale is flipped so the cheapest value is `Best`. A column where
/// every value is equal is `Average` throughout.
pub fn heat_level(value: Option<f64>, column: &[Option<f64>], lower_is_better: bool) -> HeatLevel {
    band(value, &sorted_finite(column), lower_is_better)
}

/// Heat levels for a whole column, in input order. The column is sorted once.
pub fn heat_column(column: &[Option<f64>], lower_is_better: bool) -> Vec<HeatLevel> {
    let sorted = sorted_finite(column);
    column
        .iter()
        .map(|v| band(*v, &sorted, lower_is_better))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_matches_single_value_banding() {
        let col = vec![
            Some(3.0),
            None,
            Some(1.0),
            Some(3.0),
            Some(f64::NAN),
            Some(7.5),
            Some(-2.0),
            Some(3.0),
        ];
        for lower_is_better in [false, true] {
            let levels = heat_column(&col, lower_is_better);
            let single: Vec<HeatLevel> = col
                .iter()
                .map(|v| heat_level(*v, &col, lower_is_better))
                .collect();
            assert_eq!(levels, single);
        }
        let levels = heat_column(&col, false);
        assert_eq!(levels[1], HeatLevel::Missing);
        assert_eq!(levels[4], HeatLevel::Missing);
        assert_eq!(levels[5], HeatLevel::Best);
        assert_eq!(levels[6], HeatLevel::Worst);
    }

    #[test]
    fn test_five_distinct_values() {
        let col: Vec<Option<f64>> = [1.0, 2.0, 3.0, 4.0, 5.0].into_iter().map(Some).collect();
        let levels = heat_column(&col, false);
        // percentiles 0, 25, 50, 75, 100
        assert_eq!(
            levels,
            vec![
                HeatLevel::Worst,
                HeatLevel::Below,
                HeatLevel::Average,
                HeatLevel::Good,
                HeatLevel::Best
            ]
        );
    }

    #[test]
    fn test_lower_is_better_inverts() {
        let col = vec![Some(10.0), Some(50.0)];
        assert_eq!(heat_level(Some(10.0), &col, true), HeatLevel::Best);
        assert_eq!(heat_level(Some(50.0), &col, true), HeatLevel::Worst);
        assert_eq!(heat_level(Some(50.0), &col, false), HeatLevel::Best);
    }

    #[test]
    fn test_ties_use_midpoint() {
        // sorted [1, 2, 2, 9]: the 2s sit at positions 1 and 2 -> 1.5/3 = 50%
        let col = vec![Some(2.0), Some(1.0), Some(9.0), Some(2.0)];
        assert_eq!(heat_level(Some(2.0), &col, false), HeatLevel::Average);
    }

    #[test]
    fn test_missing_and_uniform() {
        let col = vec![None, Some(3.0), Some(3.0)];
        assert_eq!(heat_level(None, &col, false), HeatLevel::Missing);
        assert_eq!(heat_level(Some(3.0), &col, false), HeatLevel::Average);
        assert_eq!(heat_level(Some(3.0), &[None, None], false), HeatLevel::Missing);
        assert_eq!(heat_level(Some(f64::NAN), &col, false), HeatLevel::Missing);
    }
}
