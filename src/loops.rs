//! Loop wrappers.
//!
//! Thin entry points over [`Pipeline`]: a bounded numeric range, while and
//! do-while loops over an explicit state value, and [`repeat_until`].
//! State is owned by the loop and handed to the condition and action by
//! reference instead of being captured in shared mutable cells.

use std::convert::Infallible;
use std::fmt;
use std::io::Write;
use std::iter::FusedIterator;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::error::{BoxError, FlowError};
use crate::pipeline::Pipeline;
use crate::stage::{Filter, Map, Source};

/// A bounded integer range with a step, end exclusive.
///
/// A negative step counts down. Unlike a consumed pipeline, a `Loop` can
/// be iterated any number of times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loop {
    start: i64,
    end: i64,
    step: i64,
}

impl Loop {
    /// A loop from `start` towards `end` by `step`. A zero step is rejected.
    pub fn new(start: i64, end: i64, step: i64) -> Result<Self, FlowError> {
        if step == 0 {
            return Err(FlowError::invalid("loop", "step must not be zero"));
        }
        Ok(Self { start, end, step })
    }

    /// A loop from `start` to `end` with step 1.
    pub fn range(start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            step: 1,
        }
    }

    pub fn iter(&self) -> LoopIter {
        LoopIter {
            next: Some(self.start),
            end: self.end,
            step: self.step,
        }
    }

    pub fn len(&self) -> usize {
        let span = if self.step > 0 {
            i128::from(self.end) - i128::from(self.start)
        } else {
            i128::from(self.start) - i128::from(self.end)
        };
        if span <= 0 {
            return 0;
        }
        let step = i128::from(self.step).abs();
        usize::try_from((span + step - 1) / step).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pipeline(&self) -> Pipeline<Source<LoopIter>> {
        Pipeline::new(self.iter())
    }

    pub fn map<U, F>(&self, f: F) -> Pipeline<Map<Source<LoopIter>, F>>
    where
        F: FnMut(i64) -> U,
    {
        self.pipeline().map(f)
    }

    pub fn filter<F>(&self, predicate: F) -> Pipeline<Filter<Source<LoopIter>, F>>
    where
        F: FnMut(&i64) -> bool,
    {
        self.pipeline().filter(predicate)
    }

    pub fn for_each<F>(&self, f: F)
    where
        F: FnMut(i64),
    {
        self.iter().for_each(f);
    }

    pub fn write_lines<W: Write>(&self, out: W) -> Result<usize, FlowError> {
        self.pipeline().write_lines(out)
    }

    pub fn print(&self) -> Result<usize, FlowError> {
        self.pipeline().print()
    }
}

impl IntoIterator for &Loop {
    type Item = i64;
    type IntoIter = LoopIter;

    fn into_iter(self) -> LoopIter {
        self.iter()
    }
}

/// Iterator over the values of a [`Loop`].
#[derive(Debug, Clone)]
pub struct LoopIter {
    next: Option<i64>,
    end: i64,
    step: i64,
}

impl Iterator for LoopIter {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        let current = self.next?;
        let in_range = if self.step > 0 {
            current < self.end
        } else {
            current > self.end
        };
        if !in_range {
            self.next = None;
            return None;
        }
        self.next = current.checked_add(self.step);
        Some(current)
    }
}

impl FusedIterator for LoopIter {}

/// How a while or do-while loop finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome<S> {
    /// The loop state after the last iteration.
    pub state: S,
    /// Number of times the action ran.
    pub iterations: usize,
    /// `false` when the iteration limit stopped the loop before the
    /// condition did.
    pub completed: bool,
}

/// Runs an action while a condition on the loop state holds.
pub struct WhileLoop<S, C> {
    state: S,
    condition: C,
    max_iterations: Option<usize>,
}

impl<S, C> WhileLoop<S, C>
where
    C: FnMut(&S) -> bool,
{
    pub fn new(state: S, condition: C) -> Self {
        Self {
            state,
            condition,
            max_iterations: None,
        }
    }

    /// Stop after `n` iterations even if the condition still holds.
    pub fn max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = Some(n);
        self
    }

    pub fn for_each<A>(self, mut action: A) -> LoopOutcome<S>
    where
        A: FnMut(&mut S),
    {
        let Ok(outcome) = run_loop(
            self.state,
            self.condition,
            |state: &mut S| {
                action(state);
                Ok::<(), Infallible>(())
            },
            self.max_iterations,
            false,
        );
        outcome
    }

    pub fn try_for_each<A, E>(self, action: A) -> Result<LoopOutcome<S>, FlowError>
    where
        A: FnMut(&mut S) -> Result<(), E>,
        E: Into<BoxError>,
    {
        run_loop(
            self.state,
            self.condition,
            action,
            self.max_iterations,
            false,
        )
        .map_err(FlowError::user)
    }

    /// A pipeline yielding a snapshot of the state for each iteration; the
    /// state is advanced after each snapshot is taken.
    pub fn into_pipeline<A>(self, advance: A) -> Pipeline<Source<States<S, C, A>>>
    where
        S: Clone,
        A: FnMut(&mut S),
    {
        Pipeline::new(States {
            state: self.state,
            condition: self.condition,
            advance,
            remaining: self.max_iterations,
            check_first: true,
            done: false,
        })
    }
}

/// Runs an action once, then again while a condition on the state holds.
pub struct DoWhileLoop<S, C> {
    state: S,
    condition: C,
    max_iterations: Option<usize>,
}

impl<S, C> DoWhileLoop<S, C>
where
    C: FnMut(&S) -> bool,
{
    pub fn new(state: S, condition: C) -> Self {
        Self {
            state,
            condition,
            max_iterations: None,
        }
    }

    pub fn max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = Some(n);
        self
    }

    pub fn for_each<A>(self, mut action: A) -> LoopOutcome<S>
    where
        A: FnMut(&mut S),
    {
        let Ok(outcome) = run_loop(
            self.state,
            self.condition,
            |state: &mut S| {
                action(state);
                Ok::<(), Infallible>(())
            },
            self.max_iterations,
            true,
        );
        outcome
    }

    pub fn try_for_each<A, E>(self, action: A) -> Result<LoopOutcome<S>, FlowError>
    where
        A: FnMut(&mut S) -> Result<(), E>,
        E: Into<BoxError>,
    {
        run_loop(
            self.state,
            self.condition,
            action,
            self.max_iterations,
            true,
        )
        .map_err(FlowError::user)
    }

    /// Like [`WhileLoop::into_pipeline`], but the first snapshot is taken
    /// before the condition is checked.
    pub fn into_pipeline<A>(self, advance: A) -> Pipeline<Source<States<S, C, A>>>
    where
        S: Clone,
        A: FnMut(&mut S),
    {
        Pipeline::new(States {
            state: self.state,
            condition: self.condition,
            advance,
            remaining: self.max_iterations,
            check_first: false,
            done: false,
        })
    }
}

fn run_loop<S, C, A, E>(
    mut state: S,
    mut condition: C,
    mut action: A,
    max_iterations: Option<usize>,
    body_first: bool,
) -> Result<LoopOutcome<S>, E>
where
    C: FnMut(&S) -> bool,
    A: FnMut(&mut S) -> Result<(), E>,
{
    let mut iterations = 0;
    loop {
        let must_run = body_first && iterations == 0;
        if !must_run && !condition(&state) {
            return Ok(LoopOutcome {
                state,
                iterations,
                completed: true,
            });
        }
        if max_iterations.is_some_and(|max| iterations >= max) {
            debug!(iterations, "loop stopped at iteration limit");
            return Ok(LoopOutcome {
                state,
                iterations,
                completed: false,
            });
        }
        action(&mut state)?;
        iterations += 1;
    }
}

/// State snapshots of a while or do-while loop.
pub struct States<S, C, A> {
    state: S,
    condition: C,
    advance: A,
    remaining: Option<usize>,
    check_first: bool,
    done: bool,
}

impl<S, C, A> Iterator for States<S, C, A>
where
    S: Clone,
    C: FnMut(&S) -> bool,
    A: FnMut(&mut S),
{
    type Item = S;

    fn next(&mut self) -> Option<S> {
        if self.done {
            return None;
        }
        let check = std::mem::replace(&mut self.check_first, true);
        if (check && !(self.condition)(&self.state)) || self.remaining == Some(0) {
            self.done = true;
            return None;
        }
        if let Some(remaining) = &mut self.remaining {
            *remaining -= 1;
        }
        let snapshot = self.state.clone();
        (self.advance)(&mut self.state);
        Some(snapshot)
    }
}

/// Settings for [`repeat_until`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepeatConfig {
    /// Pause between consecutive actions.
    pub delay: Option<Duration>,
    /// Give up after this many actions.
    pub max_iterations: Option<usize>,
}

impl RepeatConfig {
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = Some(n);
        self
    }
}

/// Result of [`repeat_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatOutcome {
    pub iterations: usize,
    /// Whether the condition was met before the iteration limit.
    pub satisfied: bool,
}

impl fmt::Display for RepeatOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.satisfied {
            write!(f, "satisfied after {} iterations", self.iterations)
        } else {
            write!(f, "gave up after {} iterations", self.iterations)
        }
    }
}

/// Run `action` on `state` until `condition` holds.
///
/// The condition is checked before every action, so an already satisfied
/// condition runs nothing. `config.delay` blocks the calling thread between
/// consecutive actions. Action errors stop the loop and are returned as
/// [`FlowError::UserFunction`].
pub fn repeat_until<S, C, A, E>(
    state: &mut S,
    config: &RepeatConfig,
    mut condition: C,
    mut action: A,
) -> Result<RepeatOutcome, FlowError>
where
    C: FnMut(&S) -> bool,
    A: FnMut(&mut S) -> Result<(), E>,
    E: Into<BoxError>,
{
    let mut iterations = 0;
    loop {
        if condition(state) {
            return Ok(RepeatOutcome {
                iterations,
                satisfied: true,
            });
        }
        if config.max_iterations.is_some_and(|max| iterations >= max) {
            debug!(iterations, "repeat_until gave up at iteration limit");
            return Ok(RepeatOutcome {
                iterations,
                satisfied: false,
            });
        }
        if iterations > 0
            && let Some(delay) = config.delay
        {
            thread::sleep(delay);
        }
        action(state).map_err(FlowError::user)?;
        iterations += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_loop_map_write_lines() {
        let mut out = Vec::new();
        Loop::range(1, 3).map(|x| x * 2).write_lines(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "2\n4\n");
    }

    #[test]
    fn test_loop_map_print() {
        assert_eq!(Loop::range(1, 3).map(|x| x * 2).print().unwrap(), 2);
        assert_eq!(Loop::range(0, 3).print().unwrap(), 3);
    }

    #[test]
    fn test_loop_steps() {
        let up: Vec<i64> = Loop::new(0, 10, 3).unwrap().iter().collect();
        assert_eq!(up, vec![0, 3, 6, 9]);
        let down: Vec<i64> = Loop::new(5, 0, -2).unwrap().iter().collect();
        assert_eq!(down, vec![5, 3, 1]);
        assert!(Loop::range(3, 3).iter().next().is_none());
        assert!(Loop::new(0, 10, -1).unwrap().is_empty());
    }

    #[test]
    fn test_loop_len_matches_iteration() {
        for (start, end, step) in [(0, 10, 3), (5, 0, -2), (0, 0, 1), (-4, 4, 4), (10, 0, 1)] {
            let lp = Loop::new(start, end, step).unwrap();
            assert_eq!(lp.len(), lp.iter().count(), "{start}..{end} by {step}");
        }
    }

    #[test]
    fn test_loop_zero_step_rejected() {
        assert!(matches!(
            Loop::new(0, 5, 0),
            Err(FlowError::InvalidArgument { op: "loop", .. })
        ));
    }

    #[test]
    fn test_loop_stops_at_overflow() {
        let values: Vec<i64> = Loop::new(i64::MAX - 1, i64::MAX, 5).unwrap().iter().collect();
        assert_eq!(values, vec![i64::MAX - 1]);
    }

    #[test]
    fn test_loop_is_restartable() {
        let lp = Loop::range(0, 4);
        let evens = lp.filter(|x| x % 2 == 0).to_list().unwrap();
        assert_eq!(evens, vec![0, 2]);
        let mut sum = 0;
        lp.for_each(|x| sum += x);
        assert_eq!(sum, 6);
        assert_eq!((&lp).into_iter().count(), 4);
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        value: u32,
        log: Vec<u32>,
    }

    fn counter() -> Counter {
        Counter {
            value: 0,
            log: Vec::new(),
        }
    }

    #[test]
    fn test_while_loop_runs_until_condition_fails() {
        let outcome = WhileLoop::new(counter(), |c: &Counter| c.value < 3).for_each(|c| {
            c.log.push(c.value);
            c.value += 1;
        });
        assert!(outcome.completed);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.state.log, vec![0, 1, 2]);
    }

    #[test]
    fn test_while_loop_may_not_run() {
        let outcome = WhileLoop::new(10u32, |v: &u32| *v < 3).for_each(|v| *v += 1);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.state, 10);
    }

    #[test]
    fn test_do_while_runs_at_least_once() {
        let outcome = DoWhileLoop::new(10u32, |v: &u32| *v < 3).for_each(|v| *v += 1);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.state, 11);
        assert!(outcome.completed);
    }

    #[test]
    fn test_iteration_limit() {
        let outcome = WhileLoop::new(0u64, |_: &u64| true)
            .max_iterations(5)
            .for_each(|v| *v += 2);
        assert!(!outcome.completed);
        assert_eq!(outcome.iterations, 5);
        assert_eq!(outcome.state, 10);
    }

    #[test]
    fn test_try_for_each_propagates_error() {
        let err = WhileLoop::new(0u32, |v: &u32| *v < 10)
            .try_for_each(|v| {
                *v += 1;
                if *v == 4 { Err("four") } else { Ok(()) }
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "user function failed: four");
    }

    #[test]
    fn test_while_into_pipeline() {
        let squares = WhileLoop::new(1u32, |v: &u32| *v <= 4)
            .into_pipeline(|v| *v += 1)
            .map(|v| v * v)
            .to_list()
            .unwrap();
        assert_eq!(squares, vec![1, 4, 9, 16]);
    }

    #[test]
    fn test_do_while_into_pipeline() {
        let states = DoWhileLoop::new(9u32, |v: &u32| *v < 3)
            .into_pipeline(|v| *v += 1)
            .to_list()
            .unwrap();
        assert_eq!(states, vec![9]);

        let capped = DoWhileLoop::new(0u32, |_: &u32| true)
            .max_iterations(3)
            .into_pipeline(|v| *v += 5)
            .to_list()
            .unwrap();
        assert_eq!(capped, vec![0, 5, 10]);
    }

    #[test]
    fn test_repeat_until_satisfied() {
        let mut attempts = 0u32;
        let outcome = repeat_until(
            &mut attempts,
            &RepeatConfig::default(),
            |a| *a >= 3,
            |a| {
                *a += 1;
                Ok::<(), BoxError>(())
            },
        )
        .unwrap();
        assert_eq!(outcome, RepeatOutcome { iterations: 3, satisfied: true });
        assert_eq!(attempts, 3);
        assert_eq!(outcome.to_string(), "satisfied after 3 iterations");
    }

    #[test]
    fn test_repeat_until_gives_up() {
        let mut value = 0u32;
        let config = RepeatConfig::default().with_max_iterations(4);
        let outcome = repeat_until(&mut value, &config, |_| false, |v| {
            *v += 1;
            Ok::<(), BoxError>(())
        })
        .unwrap();
        assert!(!outcome.satisfied);
        assert_eq!(outcome.iterations, 4);
        assert_eq!(value, 4);
    }

    #[test]
    fn test_repeat_until_delays_between_actions() {
        let mut value = 0u32;
        let config = RepeatConfig::default()
            .with_delay(Duration::from_millis(20))
            .with_max_iterations(3);
        let started = Instant::now();
        repeat_until(&mut value, &config, |_| false, |v| {
            *v += 1;
            Ok::<(), BoxError>(())
        })
        .unwrap();
        // Three actions, two pauses.
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_repeat_until_action_error() {
        let mut value = 0u32;
        let err = repeat_until(&mut value, &RepeatConfig::default(), |_| false, |_| Err("nope"))
            .unwrap_err();
        assert!(matches!(err, FlowError::UserFunction(_)));
    }
}
