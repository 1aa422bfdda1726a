use roots::{find_root_brent, SimpleConvergency};
use std::cell::RefCell;

/// Root of `func` on the bracket [a, b] by Brent's method.
///
/// `func` must change sign over the bracket. If evaluating `func` fails, the search is
/// abandoned and the first error raised is returned.
pub(crate) fn brent_root<E>(
    func: impl Fn(f64) -> Result<f64, E>,
    a: f64,
    b: f64,
    eps: f64,
    max_iter: usize,
) -> Result<f64, E>
where
    E: From<anyhow::Error>,
{
    let failure: RefCell<Option<E>> = RefCell::new(None);
    let mut convergency = SimpleConvergency { eps, max_iter };

    let result = find_root_brent::<f64, _>(
        a,
        b,
        |x| match func(x) {
            Ok(value) => value,
            Err(e) => {
                failure.borrow_mut().get_or_insert(e);
                f64::NAN
            }
        },
        &mut convergency,
    );

    if let Some(e) = failure.into_inner() {
        return Err(e);
    }
    result.map_err(|e| anyhow::anyhow!("root search on [{a}, {b}] failed: {e}").into())
}
