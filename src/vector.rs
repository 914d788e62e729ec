//! Numeric-array support for vectorized stages.
//!
//! Vectorized execution collects the whole upstream into an `Array1` and
//! maps the stage function over it, still one call per element. Whole-array
//! kernels go through `ArrayMap` (`Pipeline::map_array`). It is only
//! available with the `vectorized` feature, and only for primitive numeric
//! element types; everything else fails with
//! [`FlowError::VectorizationUnsupported`].

use std::any::{TypeId, type_name};

use crate::error::{BoxError, FlowError};

#[cfg(feature = "vectorized")]
use ndarray::Array1;

/// Whether `T` is a primitive integer or float.
pub fn is_numeric<T: 'static>() -> bool {
    let id = TypeId::of::<T>();
    [
        TypeId::of::<f32>(),
        TypeId::of::<f64>(),
        TypeId::of::<i8>(),
        TypeId::of::<i16>(),
        TypeId::of::<i32>(),
        TypeId::of::<i64>(),
        TypeId::of::<i128>(),
        TypeId::of::<isize>(),
        TypeId::of::<u8>(),
        TypeId::of::<u16>(),
        TypeId::of::<u32>(),
        TypeId::of::<u64>(),
        TypeId::of::<u128>(),
        TypeId::of::<usize>(),
    ]
    .contains(&id)
}

pub(crate) fn ensure_numeric<T: 'static>() -> Result<(), FlowError> {
    if is_numeric::<T>() {
        Ok(())
    } else {
        Err(FlowError::VectorizationUnsupported(format!(
            "element type {} is not a primitive numeric type",
            type_name::<T>()
        )))
    }
}

#[cfg(feature = "vectorized")]
pub(crate) fn apply<T, R, F>(elements: Vec<T>, f: &F) -> Result<Vec<Option<R>>, FlowError>
where
    T: Clone + 'static,
    F: Fn(T) -> Result<Option<R>, BoxError>,
{
    ensure_numeric::<T>()?;
    let array = Array1::from(elements);
    array
        .mapv(f)
        .into_raw_vec()
        .into_iter()
        .map(|result| result.map_err(FlowError::UserFunction))
        .collect()
}

#[cfg(not(feature = "vectorized"))]
pub(crate) fn apply<T, R, F>(_elements: Vec<T>, _f: &F) -> Result<Vec<Option<R>>, FlowError>
where
    T: Clone + 'static,
    F: Fn(T) -> Result<Option<R>, BoxError>,
{
    ensure_numeric::<T>()?;
    Err(FlowError::VectorizationUnsupported(
        "built without numeric array support (enable the `vectorized` feature)".to_string(),
    ))
}

/// Applies a whole-array kernel to the entire upstream on first pull.
#[cfg(feature = "vectorized")]
pub struct ArrayMap<I, K, U> {
    upstream: I,
    kernel: Option<K>,
    output: std::vec::IntoIter<U>,
}

#[cfg(feature = "vectorized")]
impl<I, K, U> ArrayMap<I, K, U> {
    pub(crate) fn new(upstream: I, kernel: K) -> Self {
        Self {
            upstream,
            kernel: Some(kernel),
            output: Vec::new().into_iter(),
        }
    }
}

#[cfg(feature = "vectorized")]
impl<I, T, K, U> ArrayMap<I, K, U>
where
    I: Iterator<Item = Result<T, FlowError>>,
    T: 'static,
    K: FnOnce(Array1<T>) -> Array1<U>,
    U: Clone,
{
    fn run(&mut self, kernel: K) -> Result<(), FlowError> {
        ensure_numeric::<T>()?;
        let elements = self.upstream.by_ref().collect::<Result<Vec<T>, FlowError>>()?;
        let len = elements.len();
        let out = kernel(Array1::from(elements));
        if out.len() != len {
            return Err(FlowError::user(format!(
                "array kernel changed length from {len} to {}",
                out.len()
            )));
        }
        self.output = out.iter().cloned().collect::<Vec<U>>().into_iter();
        Ok(())
    }
}

#[cfg(feature = "vectorized")]
impl<I, T, K, U> Iterator for ArrayMap<I, K, U>
where
    I: Iterator<Item = Result<T, FlowError>>,
    T: 'static,
    K: FnOnce(Array1<T>) -> Array1<U>,
    U: Clone,
{
    type Item = Result<U, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(kernel) = self.kernel.take()
            && let Err(e) = self.run(kernel)
        {
            return Some(Err(e));
        }
        self.output.next().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_types() {
        assert!(is_numeric::<f64>());
        assert!(is_numeric::<u8>());
        assert!(is_numeric::<isize>());
        assert!(!is_numeric::<String>());
        assert!(!is_numeric::<(i32, i32)>());
        assert!(!is_numeric::<bool>());
    }

    #[test]
    fn test_ensure_numeric_names_the_type() {
        let err = ensure_numeric::<&'static str>().unwrap_err();
        assert!(err.to_string().contains("&str"), "{err}");
    }

    #[cfg(feature = "vectorized")]
    #[test]
    fn test_apply_keeps_order_and_filters() {
        let f = |x: i32| -> Result<Option<i32>, BoxError> {
            Ok(if x % 2 == 0 { Some(x * 10) } else { None })
        };
        let out = apply(vec![1, 2, 3, 4], &f).unwrap();
        assert_eq!(out, vec![None, Some(20), None, Some(40)]);
    }

    #[cfg(feature = "vectorized")]
    #[test]
    fn test_apply_surfaces_user_error() {
        let f = |x: i64| -> Result<Option<i64>, BoxError> {
            if x < 0 { Err("negative".into()) } else { Ok(Some(x)) }
        };
        let err = apply(vec![1, -1, 2], &f).unwrap_err();
        assert_eq!(err.to_string(), "user function failed: negative");
    }

    #[cfg(feature = "vectorized")]
    #[test]
    fn test_array_map_applies_kernel_once() {
        use crate::stage::Source;

        let stage = ArrayMap::new(Source::new(vec![1.0f64, 2.0, 3.0].into_iter()), |a: Array1<f64>| {
            a * 2.0
        });
        let out: Vec<f64> = stage.map(|r| r.unwrap()).collect();
        assert_eq!(out, vec![2.0, 4.0, 6.0]);
    }

    #[cfg(feature = "vectorized")]
    #[test]
    fn test_array_map_rejects_length_change() {
        use crate::stage::Source;

        let mut stage = ArrayMap::new(Source::new(vec![1i32, 2, 3].into_iter()), |a: Array1<i32>| {
            a.slice(ndarray::s![..1]).to_owned()
        });
        assert!(matches!(stage.next(), Some(Err(FlowError::UserFunction(_)))));
        assert!(stage.next().is_none());
    }

    #[cfg(not(feature = "vectorized"))]
    #[test]
    fn test_apply_without_feature_is_unsupported() {
        let f = |x: i32| -> Result<Option<i32>, BoxError> { Ok(Some(x)) };
        assert!(matches!(
            apply(vec![1], &f),
            Err(FlowError::VectorizationUnsupported(_))
        ));
    }
}
