//! Stage adapters.
//!
//! Each stage wraps the producer of the previous one and pulls from it only
//! when it is itself pulled. Items are `Result<T, FlowError>` so a failure
//! raised by user code travels downstream as the element it replaced.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;

use crate::error::{BoxError, FlowError};

/// The kind of stage, used to tag argument errors and executor events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Filter,
    Map,
    Take,
    Skip,
    Window,
    ForEach,
}

impl StageKind {
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Filter => "filter",
            StageKind::Map => "map",
            StageKind::Take => "take",
            StageKind::Skip => "skip",
            StageKind::Window => "window",
            StageKind::ForEach => "for_each",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Head of a pipeline built from plain values.
pub struct Source<S> {
    inner: S,
}

impl<S> Source<S> {
    pub(crate) fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: Iterator> Iterator for Source<S> {
    type Item = Result<S::Item, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(Ok)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Head of a pipeline built from a source that can itself fail.
pub struct Fallible<S> {
    inner: S,
}

impl<S> Fallible<S> {
    pub(crate) fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S, T, E> Iterator for Fallible<S>
where
    S: Iterator<Item = Result<T, E>>,
    E: Into<BoxError>,
{
    type Item = Result<T, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|r| r.map_err(FlowError::user))
    }
}

/// Keeps elements matching a predicate.
pub struct Filter<I, F> {
    upstream: I,
    predicate: F,
}

impl<I, F> Filter<I, F> {
    pub(crate) fn new(upstream: I, predicate: F) -> Self {
        Self {
            upstream,
            predicate,
        }
    }
}

impl<I, T, F> Iterator for Filter<I, F>
where
    I: Iterator<Item = Result<T, FlowError>>,
    F: FnMut(&T) -> bool,
{
    type Item = Result<T, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.upstream.next()? {
                Ok(x) => {
                    if (self.predicate)(&x) {
                        return Some(Ok(x));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Keeps elements matching a fallible predicate.
pub struct TryFilter<I, F> {
    upstream: I,
    predicate: F,
}

impl<I, F> TryFilter<I, F> {
    pub(crate) fn new(upstream: I, predicate: F) -> Self {
        Self {
            upstream,
            predicate,
        }
    }
}

impl<I, T, F, E> Iterator for TryFilter<I, F>
where
    I: Iterator<Item = Result<T, FlowError>>,
    F: FnMut(&T) -> Result<bool, E>,
    E: Into<BoxError>,
{
    type Item = Result<T, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.upstream.next()? {
                Ok(x) => match (self.predicate)(&x) {
                    Ok(true) => return Some(Ok(x)),
                    Ok(false) => {}
                    Err(e) => return Some(Err(FlowError::user(e))),
                },
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Transforms every element.
pub struct Map<I, F> {
    upstream: I,
    f: F,
}

impl<I, F> Map<I, F> {
    pub(crate) fn new(upstream: I, f: F) -> Self {
        Self { upstream, f }
    }
}

impl<I, T, U, F> Iterator for Map<I, F>
where
    I: Iterator<Item = Result<T, FlowError>>,
    F: FnMut(T) -> U,
{
    type Item = Result<U, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.upstream.next()?;
        Some(item.map(&mut self.f))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.upstream.size_hint()
    }
}

/// Transforms every element with a fallible function.
pub struct TryMap<I, F> {
    upstream: I,
    f: F,
}

impl<I, F> TryMap<I, F> {
    pub(crate) fn new(upstream: I, f: F) -> Self {
        Self { upstream, f }
    }
}

impl<I, T, U, E, F> Iterator for TryMap<I, F>
where
    I: Iterator<Item = Result<T, FlowError>>,
    F: FnMut(T) -> Result<U, E>,
    E: Into<BoxError>,
{
    type Item = Result<U, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = match self.upstream.next()? {
            Ok(x) => (self.f)(x).map_err(FlowError::user),
            Err(e) => Err(e),
        };
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.upstream.size_hint()
    }
}

/// Yields at most `remaining` elements, then stops pulling.
pub struct Take<I> {
    upstream: I,
    remaining: usize,
}

impl<I> Take<I> {
    pub(crate) fn new(upstream: I, remaining: usize) -> Self {
        Self {
            upstream,
            remaining,
        }
    }
}

impl<I, T> Iterator for Take<I>
where
    I: Iterator<Item = Result<T, FlowError>>,
{
    type Item = Result<T, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let item = self.upstream.next()?;
        if item.is_ok() {
            self.remaining -= 1;
        }
        Some(item)
    }
}

/// Discards the first `pending` elements.
pub struct Skip<I> {
    upstream: I,
    pending: usize,
}

impl<I> Skip<I> {
    pub(crate) fn new(upstream: I, pending: usize) -> Self {
        Self { upstream, pending }
    }
}

impl<I, T> Iterator for Skip<I>
where
    I: Iterator<Item = Result<T, FlowError>>,
{
    type Item = Result<T, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pending > 0 {
            match self.upstream.next()? {
                Ok(_) => self.pending -= 1,
                Err(e) => return Some(Err(e)),
            }
        }
        self.upstream.next()
    }
}

/// Expands each element into a nested sequence and yields its items.
pub struct FlatMap<I, F, J: IntoIterator> {
    upstream: I,
    f: F,
    current: Option<J::IntoIter>,
}

impl<I, F, J: IntoIterator> FlatMap<I, F, J> {
    pub(crate) fn new(upstream: I, f: F) -> Self {
        Self {
            upstream,
            f,
            current: None,
        }
    }
}

impl<I, T, F, J> Iterator for FlatMap<I, F, J>
where
    I: Iterator<Item = Result<T, FlowError>>,
    F: FnMut(T) -> J,
    J: IntoIterator,
{
    type Item = Result<J::Item, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(inner) = &mut self.current {
                if let Some(x) = inner.next() {
                    return Some(Ok(x));
                }
                self.current = None;
            }
            match self.upstream.next()? {
                Ok(x) => self.current = Some((self.f)(x).into_iter()),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Yields each element the first time it is seen.
pub struct Distinct<I, T> {
    upstream: I,
    seen: HashSet<T>,
}

impl<I, T> Distinct<I, T> {
    pub(crate) fn new(upstream: I) -> Self {
        Self {
            upstream,
            seen: HashSet::new(),
        }
    }
}

impl<I, T> Iterator for Distinct<I, T>
where
    I: Iterator<Item = Result<T, FlowError>>,
    T: Eq + Hash + Clone,
{
    type Item = Result<T, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.upstream.next()? {
                Ok(x) => {
                    if self.seen.insert(x.clone()) {
                        return Some(Ok(x));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Overlapping windows of `size` consecutive elements.
pub struct Window<I, T> {
    upstream: I,
    size: usize,
    buffer: VecDeque<T>,
}

impl<I, T> Window<I, T> {
    pub(crate) fn new(upstream: I, size: usize) -> Self {
        Self {
            upstream,
            size,
            buffer: VecDeque::with_capacity(size),
        }
    }
}

impl<I, T> Iterator for Window<I, T>
where
    I: Iterator<Item = Result<T, FlowError>>,
    T: Clone,
{
    type Item = Result<Vec<T>, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.upstream.next()? {
                Ok(x) => {
                    if self.buffer.len() == self.size {
                        self.buffer.pop_front();
                    }
                    self.buffer.push_back(x);
                    if self.buffer.len() == self.size {
                        return Some(Ok(self.buffer.iter().cloned().collect()));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Pairs each element with its zero-based position.
pub struct Counted<I> {
    upstream: I,
    index: usize,
}

impl<I> Counted<I> {
    pub(crate) fn new(upstream: I) -> Self {
        Self { upstream, index: 0 }
    }
}

impl<I, T> Iterator for Counted<I>
where
    I: Iterator<Item = Result<T, FlowError>>,
{
    type Item = Result<(usize, T), FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.upstream.next()?;
        Some(item.map(|x| {
            let index = self.index;
            self.index += 1;
            (index, x)
        }))
    }
}

/// Pairs elements with those of another sequence, stopping at the shorter.
pub struct ZipWith<I, J> {
    upstream: I,
    other: J,
}

impl<I, J> ZipWith<I, J> {
    pub(crate) fn new(upstream: I, other: J) -> Self {
        Self { upstream, other }
    }
}

impl<I, T, J> Iterator for ZipWith<I, J>
where
    I: Iterator<Item = Result<T, FlowError>>,
    J: Iterator,
{
    type Item = Result<(T, J::Item), FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.upstream.next()? {
            Ok(x) => {
                let y = self.other.next()?;
                Some(Ok((x, y)))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// Yields everything from `first`, then everything from `second`.
pub struct Chain<I, J> {
    first: I,
    first_done: bool,
    second: J,
}

impl<I, J> Chain<I, J> {
    pub(crate) fn new(first: I, second: J) -> Self {
        Self {
            first,
            first_done: false,
            second,
        }
    }
}

impl<I, J, T> Iterator for Chain<I, J>
where
    I: Iterator<Item = Result<T, FlowError>>,
    J: Iterator<Item = Result<T, FlowError>>,
{
    type Item = Result<T, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.first_done {
            match self.first.next() {
                Some(item) => return Some(item),
                None => self.first_done = true,
            }
        }
        self.second.next()
    }
}

/// Runs a side effect on each element and passes it on unchanged.
pub struct Tap<I, F> {
    upstream: I,
    f: F,
}

impl<I, F> Tap<I, F> {
    pub(crate) fn new(upstream: I, f: F) -> Self {
        Self { upstream, f }
    }
}

impl<I, T, F> Iterator for Tap<I, F>
where
    I: Iterator<Item = Result<T, FlowError>>,
    F: FnMut(&T),
{
    type Item = Result<T, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.upstream.next()?;
        if let Ok(x) = &item {
            (self.f)(x);
        }
        Some(item)
    }
}

/// Like [`Tap`], with a side effect that can fail.
pub struct TryTap<I, F> {
    upstream: I,
    f: F,
}

impl<I, F> TryTap<I, F> {
    pub(crate) fn new(upstream: I, f: F) -> Self {
        Self { upstream, f }
    }
}

impl<I, T, F, E> Iterator for TryTap<I, F>
where
    I: Iterator<Item = Result<T, FlowError>>,
    F: FnMut(&T) -> Result<(), E>,
    E: Into<BoxError>,
{
    type Item = Result<T, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.upstream.next()?;
        Some(match item {
            Ok(x) => (self.f)(&x).map(|()| x).map_err(FlowError::user),
            Err(e) => Err(e),
        })
    }
}

/// Yields while the predicate holds; the first failing element is dropped
/// and nothing more is pulled.
pub struct TakeWhile<I, F> {
    upstream: I,
    predicate: F,
    done: bool,
}

impl<I, F> TakeWhile<I, F> {
    pub(crate) fn new(upstream: I, predicate: F) -> Self {
        Self {
            upstream,
            predicate,
            done: false,
        }
    }
}

impl<I, T, F> Iterator for TakeWhile<I, F>
where
    I: Iterator<Item = Result<T, FlowError>>,
    F: FnMut(&T) -> bool,
{
    type Item = Result<T, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.upstream.next()? {
            Ok(x) if (self.predicate)(&x) => Some(Ok(x)),
            Ok(_) => {
                self.done = true;
                None
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// Drops the leading run where the predicate holds, then yields the rest.
pub struct DropWhile<I, F> {
    upstream: I,
    predicate: F,
    dropping: bool,
}

impl<I, F> DropWhile<I, F> {
    pub(crate) fn new(upstream: I, predicate: F) -> Self {
        Self {
            upstream,
            predicate,
            dropping: true,
        }
    }
}

impl<I, T, F> Iterator for DropWhile<I, F>
where
    I: Iterator<Item = Result<T, FlowError>>,
    F: FnMut(&T) -> bool,
{
    type Item = Result<T, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.dropping {
            match self.upstream.next()? {
                Ok(x) => {
                    if !(self.predicate)(&x) {
                        self.dropping = false;
                        return Some(Ok(x));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
        self.upstream.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn source<T>(items: Vec<T>) -> Source<std::vec::IntoIter<T>> {
        Source::new(items.into_iter())
    }

    fn values<T>(iter: impl Iterator<Item = Result<T, FlowError>>) -> Vec<T> {
        iter.map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_filter_keeps_matches() {
        let stage = Filter::new(source(vec![1, 2, 3, 4]), |x: &i32| x % 2 == 0);
        assert_eq!(values(stage), vec![2, 4]);
    }

    #[test]
    fn test_try_filter_reports_failure() {
        let mut stage = TryFilter::new(source(vec![1, 2, 3]), |x: &i32| {
            if *x == 2 { Err("two") } else { Ok(true) }
        });
        assert_eq!(stage.next().unwrap().unwrap(), 1);
        assert!(matches!(stage.next(), Some(Err(FlowError::UserFunction(_)))));
    }

    #[test]
    fn test_take_does_not_pull_after_limit() {
        let pulled = Cell::new(0);
        let upstream = Source::new((0..).inspect(|_| pulled.set(pulled.get() + 1)));
        let stage = Take::new(upstream, 3);
        assert_eq!(values(stage), vec![0, 1, 2]);
        assert_eq!(pulled.get(), 3);
    }

    #[test]
    fn test_skip_past_end_is_empty() {
        let stage = Skip::new(source(vec![1, 2]), 5);
        assert!(values(stage).is_empty());
    }

    #[test]
    fn test_flat_map_preserves_nested_order() {
        let stage = FlatMap::new(source(vec![1, 2, 3]), |x: i32| vec![x; x as usize]);
        assert_eq!(values(stage), vec![1, 2, 2, 3, 3, 3]);
    }

    #[test]
    fn test_flat_map_skips_empty_inner() {
        let stage = FlatMap::new(source(vec![vec![], vec![1], vec![], vec![2, 3]]), |v: Vec<i32>| v);
        assert_eq!(values(stage), vec![1, 2, 3]);
    }

    #[test]
    fn test_distinct_keeps_first_seen_order() {
        let stage = Distinct::new(source(vec!["b", "a", "b", "c", "a"]));
        assert_eq!(values(stage), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_window_slides_by_one() {
        let stage = Window::new(source(vec![1, 2, 3, 4]), 2);
        assert_eq!(values(stage), vec![vec![1, 2], vec![2, 3], vec![3, 4]]);
    }

    #[test]
    fn test_counted_indexes_from_zero() {
        let stage = Counted::new(source(vec!['x', 'y']));
        assert_eq!(values(stage), vec![(0, 'x'), (1, 'y')]);
    }

    #[test]
    fn test_zip_with_stops_at_shorter() {
        let stage = ZipWith::new(source(vec![1, 2, 3]), "ab".chars());
        assert_eq!(values(stage), vec![(1, 'a'), (2, 'b')]);
    }

    #[test]
    fn test_chain_appends_second() {
        let stage = Chain::new(source(vec![1]), source(vec![2, 3]));
        assert_eq!(values(stage), vec![1, 2, 3]);
    }

    #[test]
    fn test_tap_sees_every_element() {
        let seen = Cell::new(0);
        let stage = Tap::new(source(vec![5, 6, 7]), |x: &i32| seen.set(seen.get() + x));
        assert_eq!(values(stage), vec![5, 6, 7]);
        assert_eq!(seen.get(), 18);
    }

    #[test]
    fn test_take_while_stops_pulling() {
        let pulled = Cell::new(0);
        let upstream = Source::new((0..).inspect(|_| pulled.set(pulled.get() + 1)));
        let stage = TakeWhile::new(upstream, |x: &i32| *x < 3);
        assert_eq!(values(stage), vec![0, 1, 2]);
        assert_eq!(pulled.get(), 4);
    }

    #[test]
    fn test_drop_while_keeps_first_failing() {
        let stage = DropWhile::new(source(vec![1, 2, 5, 1, 7]), |x: &i32| *x < 3);
        assert_eq!(values(stage), vec![5, 1, 7]);
    }

    #[test]
    fn test_upstream_error_passes_through() {
        let upstream = Fallible::new(vec![Ok(1), Err("bad"), Ok(3)].into_iter());
        let mut stage = Map::new(upstream, |x: i32| x * 2);
        assert_eq!(stage.next().unwrap().unwrap(), 2);
        let err = stage.next().unwrap().unwrap_err();
        assert_eq!(err.to_string(), "user function failed: bad");
        assert_eq!(stage.next().unwrap().unwrap(), 6);
    }

    #[test]
    fn test_stage_kind_names() {
        assert_eq!(StageKind::ForEach.to_string(), "for_each");
        assert_eq!(StageKind::Window.name(), "window");
    }
}
