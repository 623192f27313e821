use super::hough::LineObservation;

/// Estimated page tilt in degrees.
///
/// Positive values mean the content leans clockwise on screen (image y axis
/// pointing down); the rotation stage turns the page counter-clockwise by the
/// same amount.
pub type TiltEstimate = f64;

/// Fold a line's normal angle (degrees) into a deviation from horizontal.
///
/// Returns `None` for lines that stay outside (-45°, 45°) after folding:
/// normals within 45° of the half turn and the exact diagonals.
pub fn fold_angle(degrees: f64) -> Option<f64> {
    let mut angle = degrees;
    if angle > 180.0 {
        angle -= 180.0;
    }
    if angle > 45.0 && angle < 135.0 {
        angle -= 90.0;
    }
    (angle > -45.0 && angle < 45.0).then_some(angle)
}

/// Median of the folded angles of all observations, or exactly 0.0 when no
/// observation survives folding.
pub fn estimate(lines: &[LineObservation]) -> TiltEstimate {
    let angles: Vec<f64> = lines
        .iter()
        .filter_map(|line| fold_angle(line.angle_degrees()))
        .collect();
    median(angles).unwrap_or(0.0)
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(degrees: f64) -> LineObservation {
        LineObservation {
            radius: 0.0,
            angle: degrees.to_radians(),
            votes: 1,
        }
    }

    #[test]
    fn test_near_vertical_normals_fold_to_horizontal_deviation() {
        assert_eq!(fold_angle(90.0), Some(0.0));
        assert_eq!(fold_angle(95.0), Some(5.0));
        assert_eq!(fold_angle(84.0), Some(-6.0));
    }

    #[test]
    fn test_small_normals_are_kept() {
        assert_eq!(fold_angle(0.0), Some(0.0));
        assert_eq!(fold_angle(3.0), Some(3.0));
    }

    #[test]
    fn test_boundaries_are_excluded() {
        assert_eq!(fold_angle(45.0), None);
        assert_eq!(fold_angle(135.0), None);
        assert_eq!(fold_angle(170.0), None);
    }

    #[test]
    fn test_over_half_turn_is_wrapped() {
        assert_eq!(fold_angle(183.0), Some(3.0));
    }

    #[test]
    fn test_estimate_is_median() {
        let lines = vec![line(94.0), line(95.0), line(96.0), line(170.0)];
        assert!((estimate(&lines) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_even_count_averages_middle_pair() {
        let lines = vec![line(92.0), line(94.0)];
        assert!((estimate(&lines) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_usable_lines_is_exact_zero() {
        assert_eq!(estimate(&[]), 0.0);
        assert_eq!(estimate(&[line(150.0), line(160.0)]), 0.0);
    }
}
