//! The lazy, chainable [`Pipeline`].
//!
//! A pipeline owns exactly one producer. Every transformation consumes the
//! pipeline and returns a new one wrapping a new stage around the old
//! producer; nothing is pulled until a terminal operation or iteration asks
//! for elements.

use std::convert::identity;
use std::fmt;
use std::hash::Hash;
use std::io::{self, Write};

use crate::error::{BoxError, FlowError};
use crate::executor::Dispatch;
use crate::mode::ExecMode;
use crate::stage::{
    Chain, Counted, Distinct, DropWhile, Fallible, Filter, FlatMap, Map, Skip, Source, StageKind,
    Take, TakeWhile, Tap, TryFilter, TryMap, TryTap, Window, ZipWith,
};

#[cfg(feature = "vectorized")]
use crate::vector::ArrayMap;
#[cfg(feature = "vectorized")]
use ndarray::Array1;

/// A producer with its concrete type erased.
pub type Boxed<'a, T> = Box<dyn Iterator<Item = Result<T, FlowError>> + 'a>;

/// A lazy pipeline over a producer of `Result<T, FlowError>`.
pub struct Pipeline<I> {
    producer: I,
}

impl<S: Iterator> Pipeline<Source<S>> {
    /// Create a pipeline over plain values.
    pub fn new(source: impl IntoIterator<IntoIter = S>) -> Self {
        Pipeline {
            producer: Source::new(source.into_iter()),
        }
    }
}

impl<S: Iterator> Pipeline<Fallible<S>> {
    /// Create a pipeline over a source whose items may already be errors.
    ///
    /// Source errors surface as [`FlowError::UserFunction`] when pulled.
    pub fn from_results(source: impl IntoIterator<IntoIter = S>) -> Self {
        Pipeline {
            producer: Fallible::new(source.into_iter()),
        }
    }
}

/// Convert a count argument, rejecting negatives at the call site.
fn count_arg<N>(kind: StageKind, n: N) -> Result<usize, FlowError>
where
    N: TryInto<usize> + fmt::Display + Copy,
{
    n.try_into().map_err(|_| {
        FlowError::invalid(kind.name(), format!("count must be non-negative, got {n}"))
    })
}

impl<I, T> Pipeline<I>
where
    I: Iterator<Item = Result<T, FlowError>>,
{
    /// Wrap an existing producer.
    pub fn from_producer(producer: I) -> Self {
        Pipeline { producer }
    }

    /// Erase the producer type, for chains assembled at runtime.
    pub fn boxed<'a>(self) -> Pipeline<Boxed<'a, T>>
    where
        I: 'a,
    {
        Pipeline {
            producer: Box::new(self.producer),
        }
    }

    pub fn filter<F>(self, predicate: F) -> Pipeline<Filter<I, F>>
    where
        F: FnMut(&T) -> bool,
    {
        Pipeline {
            producer: Filter::new(self.producer, predicate),
        }
    }

    pub fn try_filter<F, E>(self, predicate: F) -> Pipeline<TryFilter<I, F>>
    where
        F: FnMut(&T) -> Result<bool, E>,
        E: Into<BoxError>,
    {
        Pipeline {
            producer: TryFilter::new(self.producer, predicate),
        }
    }

    /// Filter with the given execution mode.
    pub fn filter_in<F>(
        self,
        mode: ExecMode,
        predicate: F,
    ) -> Pipeline<Dispatch<I, impl Fn(T) -> Result<Option<T>, BoxError> + Sync, T>>
    where
        T: Clone + Send + 'static,
        F: Fn(&T) -> bool + Sync,
    {
        let f = move |x: T| -> Result<Option<T>, BoxError> {
            Ok(if predicate(&x) { Some(x) } else { None })
        };
        Pipeline {
            producer: Dispatch::new(self.producer, f, mode, StageKind::Filter),
        }
    }

    pub fn try_filter_in<F, E>(
        self,
        mode: ExecMode,
        predicate: F,
    ) -> Pipeline<Dispatch<I, impl Fn(T) -> Result<Option<T>, BoxError> + Sync, T>>
    where
        T: Clone + Send + 'static,
        F: Fn(&T) -> Result<bool, E> + Sync,
        E: Into<BoxError>,
    {
        let f = move |x: T| -> Result<Option<T>, BoxError> {
            match predicate(&x) {
                Ok(true) => Ok(Some(x)),
                Ok(false) => Ok(None),
                Err(e) => Err(e.into()),
            }
        };
        Pipeline {
            producer: Dispatch::new(self.producer, f, mode, StageKind::Filter),
        }
    }

    pub fn map<U, F>(self, f: F) -> Pipeline<Map<I, F>>
    where
        F: FnMut(T) -> U,
    {
        Pipeline {
            producer: Map::new(self.producer, f),
        }
    }

    pub fn try_map<U, E, F>(self, f: F) -> Pipeline<TryMap<I, F>>
    where
        F: FnMut(T) -> Result<U, E>,
        E: Into<BoxError>,
    {
        Pipeline {
            producer: TryMap::new(self.producer, f),
        }
    }

    /// Map with the given execution mode. Output order matches input order
    /// in every mode.
    pub fn map_in<U, F>(
        self,
        mode: ExecMode,
        f: F,
    ) -> Pipeline<Dispatch<I, impl Fn(T) -> Result<Option<U>, BoxError> + Sync, U>>
    where
        T: Clone + Send + 'static,
        U: Send,
        F: Fn(T) -> U + Sync,
    {
        let f = move |x: T| -> Result<Option<U>, BoxError> { Ok(Some(f(x))) };
        Pipeline {
            producer: Dispatch::new(self.producer, f, mode, StageKind::Map),
        }
    }

    pub fn try_map_in<U, E, F>(
        self,
        mode: ExecMode,
        f: F,
    ) -> Pipeline<Dispatch<I, impl Fn(T) -> Result<Option<U>, BoxError> + Sync, U>>
    where
        T: Clone + Send + 'static,
        U: Send,
        F: Fn(T) -> Result<U, E> + Sync,
        E: Into<BoxError>,
    {
        let f = move |x: T| -> Result<Option<U>, BoxError> { f(x).map(Some).map_err(Into::into) };
        Pipeline {
            producer: Dispatch::new(self.producer, f, mode, StageKind::Map),
        }
    }

    /// Apply a whole-array kernel to the entire (finite) upstream.
    ///
    /// The upstream is drained on first pull. Requires primitive numeric
    /// elements; the kernel must preserve the array length.
    #[cfg(feature = "vectorized")]
    pub fn map_array<U, K>(self, kernel: K) -> Pipeline<ArrayMap<I, K, U>>
    where
        T: 'static,
        K: FnOnce(Array1<T>) -> Array1<U>,
        U: Clone,
    {
        Pipeline {
            producer: ArrayMap::new(self.producer, kernel),
        }
    }

    /// Yield at most `n` elements. Negative `n` is rejected immediately.
    pub fn take<N>(self, n: N) -> Result<Pipeline<Take<I>>, FlowError>
    where
        N: TryInto<usize> + fmt::Display + Copy,
    {
        let n = count_arg(StageKind::Take, n)?;
        Ok(Pipeline {
            producer: Take::new(self.producer, n),
        })
    }

    /// Discard the first `n` elements. Negative `n` is rejected immediately.
    pub fn skip<N>(self, n: N) -> Result<Pipeline<Skip<I>>, FlowError>
    where
        N: TryInto<usize> + fmt::Display + Copy,
    {
        let n = count_arg(StageKind::Skip, n)?;
        Ok(Pipeline {
            producer: Skip::new(self.producer, n),
        })
    }

    pub fn take_while<F>(self, predicate: F) -> Pipeline<TakeWhile<I, F>>
    where
        F: FnMut(&T) -> bool,
    {
        Pipeline {
            producer: TakeWhile::new(self.producer, predicate),
        }
    }

    pub fn drop_while<F>(self, predicate: F) -> Pipeline<DropWhile<I, F>>
    where
        F: FnMut(&T) -> bool,
    {
        Pipeline {
            producer: DropWhile::new(self.producer, predicate),
        }
    }

    /// Yield the items of each element in turn.
    pub fn flatten(self) -> Pipeline<FlatMap<I, fn(T) -> T, T>>
    where
        T: IntoIterator,
    {
        self.flat_map(identity as fn(T) -> T)
    }

    pub fn flat_map<J, F>(self, f: F) -> Pipeline<FlatMap<I, F, J>>
    where
        F: FnMut(T) -> J,
        J: IntoIterator,
    {
        Pipeline {
            producer: FlatMap::new(self.producer, f),
        }
    }

    /// Drop repeats, keeping first-seen order.
    pub fn distinct(self) -> Pipeline<Distinct<I, T>>
    where
        T: Eq + Hash + Clone,
    {
        Pipeline {
            producer: Distinct::new(self.producer),
        }
    }

    /// Overlapping windows of `n` consecutive elements. `n` must be at least 1.
    pub fn window<N>(self, n: N) -> Result<Pipeline<Window<I, T>>, FlowError>
    where
        N: TryInto<usize> + fmt::Display + Copy,
        T: Clone,
    {
        let size = count_arg(StageKind::Window, n)?;
        if size == 0 {
            return Err(FlowError::invalid(
                StageKind::Window.name(),
                "window size must be at least 1",
            ));
        }
        Ok(Pipeline {
            producer: Window::new(self.producer, size),
        })
    }

    /// Pair each element with its index, starting at 0.
    pub fn counted(self) -> Pipeline<Counted<I>> {
        Pipeline {
            producer: Counted::new(self.producer),
        }
    }

    pub fn zip_with<J>(self, other: J) -> Pipeline<ZipWith<I, J::IntoIter>>
    where
        J: IntoIterator,
    {
        Pipeline {
            producer: ZipWith::new(self.producer, other.into_iter()),
        }
    }

    /// Yield this pipeline's elements, then those of `other`.
    pub fn chain<J>(self, other: J) -> Pipeline<Chain<I, Source<J::IntoIter>>>
    where
        J: IntoIterator<Item = T>,
    {
        Pipeline {
            producer: Chain::new(self.producer, Source::new(other.into_iter())),
        }
    }

    /// Yield this pipeline's elements, then each sequence of `others` in order.
    #[allow(clippy::type_complexity)]
    pub fn chain_all<O>(
        self,
        others: O,
    ) -> Pipeline<Chain<I, Source<std::iter::Flatten<O::IntoIter>>>>
    where
        O: IntoIterator,
        O::Item: IntoIterator<Item = T>,
    {
        self.chain(others.into_iter().flatten())
    }

    /// Yield this pipeline's elements, then those of another pipeline.
    pub fn concat<J>(self, other: Pipeline<J>) -> Pipeline<Chain<I, J>>
    where
        J: Iterator<Item = Result<T, FlowError>>,
    {
        Pipeline {
            producer: Chain::new(self.producer, other.producer),
        }
    }

    pub fn tap<F>(self, f: F) -> Pipeline<Tap<I, F>>
    where
        F: FnMut(&T),
    {
        Pipeline {
            producer: Tap::new(self.producer, f),
        }
    }

    pub fn try_tap<F, E>(self, f: F) -> Pipeline<TryTap<I, F>>
    where
        F: FnMut(&T) -> Result<(), E>,
        E: Into<BoxError>,
    {
        Pipeline {
            producer: TryTap::new(self.producer, f),
        }
    }

    // --- Terminal operations ---

    /// Evaluate the whole chain into a `Vec`. The first error fails the
    /// call; no partial result is returned.
    pub fn to_list(self) -> Result<Vec<T>, FlowError> {
        self.producer.collect()
    }

    /// Alias of [`Pipeline::to_list`].
    pub fn list(self) -> Result<Vec<T>, FlowError> {
        self.to_list()
    }

    pub fn fold<B, F>(self, init: B, mut f: F) -> Result<B, FlowError>
    where
        F: FnMut(B, T) -> B,
    {
        let mut producer = self.producer;
        producer.try_fold(init, |acc, item| item.map(|x| f(acc, x)))
    }

    pub fn try_fold<B, E, F>(self, init: B, mut f: F) -> Result<B, FlowError>
    where
        F: FnMut(B, T) -> Result<B, E>,
        E: Into<BoxError>,
    {
        let mut producer = self.producer;
        producer.try_fold(init, |acc, item| f(acc, item?).map_err(FlowError::user))
    }

    /// Fold using the first element as the initial value; `None` when empty.
    pub fn reduce<F>(self, f: F) -> Result<Option<T>, FlowError>
    where
        F: FnMut(T, T) -> T,
    {
        let mut producer = self.producer;
        let first = match producer.next() {
            None => return Ok(None),
            Some(item) => item?,
        };
        Pipeline { producer }.fold(first, f).map(Some)
    }

    pub fn for_each<F>(self, mut f: F) -> Result<(), FlowError>
    where
        F: FnMut(T),
    {
        for item in self.producer {
            f(item?);
        }
        Ok(())
    }

    pub fn try_for_each<F, E>(self, mut f: F) -> Result<(), FlowError>
    where
        F: FnMut(T) -> Result<(), E>,
        E: Into<BoxError>,
    {
        for item in self.producer {
            f(item?).map_err(FlowError::user)?;
        }
        Ok(())
    }

    /// Run `f` on every element with the given execution mode.
    pub fn for_each_in<F>(self, mode: ExecMode, f: F) -> Result<(), FlowError>
    where
        T: Clone + Send + 'static,
        F: Fn(T) + Sync,
    {
        let action = move |x: T| {
            f(x);
            Ok::<Option<()>, BoxError>(None)
        };
        for item in Dispatch::new(self.producer, action, mode, StageKind::ForEach) {
            item?;
        }
        Ok(())
    }

    pub fn count(self) -> Result<usize, FlowError> {
        let mut producer = self.producer;
        producer.try_fold(0, |n, item| item.map(|_| n + 1))
    }

    /// Write each element on its own line; returns the number written.
    pub fn write_lines<W: Write>(self, mut out: W) -> Result<usize, FlowError>
    where
        T: fmt::Display,
    {
        let mut written = 0;
        for item in self.producer {
            writeln!(out, "{}", item?)?;
            written += 1;
        }
        out.flush()?;
        Ok(written)
    }

    /// Print each element to stdout.
    pub fn print(self) -> Result<usize, FlowError>
    where
        T: fmt::Display,
    {
        self.write_lines(io::stdout().lock())
    }
}

/// Pull-based iteration, fused after the first error.
pub struct Iter<I> {
    producer: I,
    failed: bool,
}

impl<I, T> Iterator for Iter<I>
where
    I: Iterator<Item = Result<T, FlowError>>,
{
    type Item = Result<T, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.producer.next()?;
        self.failed = item.is_err();
        Some(item)
    }
}

impl<I, T> IntoIterator for Pipeline<I>
where
    I: Iterator<Item = Result<T, FlowError>>,
{
    type Item = Result<T, FlowError>;
    type IntoIter = Iter<I>;

    fn into_iter(self) -> Self::IntoIter {
        Iter {
            producer: self.producer,
            failed: false,
        }
    }
}
