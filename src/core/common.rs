// numerical helpers shared across the engine submodules

/// Linear interpolation through (x0, y0) and (x1, y1), extrapolating outside the interval.
/// A degenerate interval returns y0.
pub(crate) fn linear_interp(x: f64, x0: f64, x1: f64, y0: f64, y1: f64) -> f64 {
    if x1 == x0 {
        return y0;
    }
    y0 + (x - x0) * (y1 - y0) / (x1 - x0)
}

/// Logistic function mirrored about `offset`, falling from 1 to 0 as x increases
pub(crate) fn expit(x: f64, offset: f64) -> f64 {
    1. / (1. + (x - offset).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::*;

    #[rstest]
    #[case(50., 5.)]
    #[case(35., 3.5)]
    #[case(0., 0.)]
    fn should_interpolate_linearly(#[case] x: f64, #[case] expected: f64) {
        assert_relative_eq!(linear_interp(x, 10., 20., 1., 2.), expected, max_relative = 1e-12);
    }

    #[rstest]
    fn should_not_divide_by_zero_on_degenerate_interval() {
        assert_eq!(linear_interp(3., 1., 1., 7., 9.), 7.);
    }

    #[rstest]
    fn should_evaluate_expit() {
        assert_relative_eq!(expit(0., 0.), 0.5);
        assert!(expit(10., 0.) < 1e-4);
        assert!(expit(-10., 0.) > 1. - 1e-4);
    }
}
