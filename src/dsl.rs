//! Flow language: a line-oriented description of a numeric pipeline.
//!
//! Flow format:
//! ```text
//! # keep odd values after the first two, scaled
//! SKIP 2
//! | FILTER ODD
//! | MAP MUL 10 PARALLEL 4
//! | TAKE 3
//! ```
//!
//! - One stage per line; a leading `|` is optional and `|` also separates
//!   several stages on one line
//! - Lines starting with `#` are comments
//! - Input is one integer per line; blank lines are ignored
//!
//! Supported stages:
//! - `SKIP n` - Discard the first n values
//! - `TAKE n` - Keep the first n values
//! - `FILTER <pred> [mode]` - Keep values matching a predicate
//! - `MAP <op> [mode]` - Transform every value
//! - `TAKEWHILE <pred>` - Keep values until the predicate first fails
//! - `DROPWHILE <pred>` - Drop values while the predicate holds
//! - `DISTINCT` - Drop repeated values
//! - `WINDOW n` - Sum of every run of n consecutive values
//! - `DUPLICATE n` - Repeat each value n times
//! - `CHAIN a,b,...` - Append literal values (commas or spaces between them)
//! - `TAP` - Log each value passing through
//! - `SUM` - Replace the stream with its total
//!
//! Predicates: `EVEN`, `ODD`, `GT n`, `GE n`, `LT n`, `LE n`, `EQ n`, `NE n`.
//! Ops: `ADD n`, `SUB n`, `MUL n`, `DIV n`, `NEG`, `ABS`, `SQUARE`;
//! overflow and division by zero fail the flow.
//! Modes: `SEQUENTIAL`, `PARALLEL [workers]`, `VECTORIZED`.

use std::fmt;

use thiserror::Error;
use tracing::{debug, info};

use crate::error::FlowError;
use crate::mode::ExecMode;
use crate::pipeline::{Boxed, Pipeline};

/// A numeric flow with its stages erased, as assembled from a program.
pub type NumberFlow = Pipeline<Boxed<'static, i64>>;

/// Errors from parsing or running a flow program.
#[derive(Debug, Error)]
pub enum DslError {
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("input line {line}: invalid number {text:?}")]
    Input { line: usize, text: String },

    #[error("flow has no stages")]
    Empty,

    #[error(transparent)]
    Flow(#[from] FlowError),
}

/// Failure of a checked arithmetic stage.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    Even,
    Odd,
    Gt(i64),
    Ge(i64),
    Lt(i64),
    Le(i64),
    Eq(i64),
    Ne(i64),
}

impl Predicate {
    pub fn test(self, x: i64) -> bool {
        match self {
            Predicate::Even => x % 2 == 0,
            Predicate::Odd => x % 2 != 0,
            Predicate::Gt(n) => x > n,
            Predicate::Ge(n) => x >= n,
            Predicate::Lt(n) => x < n,
            Predicate::Le(n) => x <= n,
            Predicate::Eq(n) => x == n,
            Predicate::Ne(n) => x != n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add(i64),
    Sub(i64),
    Mul(i64),
    Div(i64),
    Neg,
    Abs,
    Square,
}

impl Op {
    pub fn apply(self, x: i64) -> Result<i64, ArithmeticError> {
        let result = match self {
            Op::Add(n) => x.checked_add(n),
            Op::Sub(n) => x.checked_sub(n),
            Op::Mul(n) => x.checked_mul(n),
            Op::Div(0) => return Err(ArithmeticError::DivisionByZero),
            Op::Div(n) => x.checked_div(n),
            Op::Neg => x.checked_neg(),
            Op::Abs => x.checked_abs(),
            Op::Square => x.checked_mul(x),
        };
        result.ok_or(ArithmeticError::Overflow)
    }
}

/// A parsed flow stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Skip { n: i64 },
    Take { n: i64 },
    Filter { predicate: Predicate, mode: Option<ExecMode> },
    Map { op: Op, mode: Option<ExecMode> },
    TakeWhile { predicate: Predicate },
    DropWhile { predicate: Predicate },
    Distinct,
    Window { n: i64 },
    Duplicate { n: usize },
    Chain { values: Vec<i64> },
    Tap,
    Sum,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Skip { .. } => "SKIP",
            Command::Take { .. } => "TAKE",
            Command::Filter { .. } => "FILTER",
            Command::Map { .. } => "MAP",
            Command::TakeWhile { .. } => "TAKEWHILE",
            Command::DropWhile { .. } => "DROPWHILE",
            Command::Distinct => "DISTINCT",
            Command::Window { .. } => "WINDOW",
            Command::Duplicate { .. } => "DUPLICATE",
            Command::Chain { .. } => "CHAIN",
            Command::Tap => "TAP",
            Command::Sum => "SUM",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Output of a flow run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowReport {
    pub output: Vec<i64>,
    pub input_count: usize,
    pub output_count: usize,
}

impl FlowReport {
    /// Output values, one per line.
    pub fn render(&self) -> String {
        self.output
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Parse a flow program into stages.
pub fn parse_commands(text: &str) -> Result<Vec<Command>, DslError> {
    let mut commands = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        for part in line.split('|') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let cmd = parse_command(part).map_err(|message| DslError::Parse {
                line: idx + 1,
                message,
            })?;
            commands.push(cmd);
        }
    }
    Ok(commands)
}

fn parse_command(text: &str) -> Result<Command, String> {
    let mut tokens = text.split_whitespace();
    let keyword = tokens.next().unwrap_or_default().to_ascii_uppercase();
    let rest: Vec<&str> = tokens.collect();

    let cmd = match keyword.as_str() {
        "SKIP" => Command::Skip {
            n: parse_single_int(&keyword, &rest)?,
        },
        "TAKE" => Command::Take {
            n: parse_single_int(&keyword, &rest)?,
        },
        "WINDOW" => Command::Window {
            n: parse_single_int(&keyword, &rest)?,
        },
        "DUPLICATE" => {
            let n = parse_single_int(&keyword, &rest)?;
            let n = usize::try_from(n)
                .map_err(|_| format!("DUPLICATE count must be non-negative, got {n}"))?;
            Command::Duplicate { n }
        }
        "FILTER" => {
            let (predicate, rest) = parse_predicate(&rest)?;
            Command::Filter {
                predicate,
                mode: parse_mode(rest)?,
            }
        }
        "MAP" => {
            let (op, rest) = parse_op(&rest)?;
            Command::Map {
                op,
                mode: parse_mode(rest)?,
            }
        }
        "TAKEWHILE" => Command::TakeWhile {
            predicate: parse_bare_predicate(&keyword, &rest)?,
        },
        "DROPWHILE" => Command::DropWhile {
            predicate: parse_bare_predicate(&keyword, &rest)?,
        },
        "CHAIN" => {
            // Values are separated by commas, whitespace, or both.
            let values = rest
                .iter()
                .flat_map(|token| token.split(','))
                .filter(|s| !s.is_empty())
                .map(parse_int)
                .collect::<Result<Vec<_>, _>>()?;
            if values.is_empty() {
                return Err("CHAIN requires at least one value".to_string());
            }
            Command::Chain { values }
        }
        "DISTINCT" => no_args(Command::Distinct, &rest)?,
        "TAP" => no_args(Command::Tap, &rest)?,
        "SUM" => no_args(Command::Sum, &rest)?,
        other => return Err(format!("Unknown stage: {other}")),
    };
    Ok(cmd)
}

fn no_args(cmd: Command, rest: &[&str]) -> Result<Command, String> {
    if rest.is_empty() {
        Ok(cmd)
    } else {
        Err(format!("{} takes no arguments", cmd.name()))
    }
}

fn parse_int(token: &str) -> Result<i64, String> {
    token
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number: {token}"))
}

fn parse_single_int(keyword: &str, rest: &[&str]) -> Result<i64, String> {
    match rest {
        [n] => parse_int(n),
        _ => Err(format!("{keyword} requires exactly one number")),
    }
}

fn parse_predicate<'a, 'b>(rest: &'b [&'a str]) -> Result<(Predicate, &'b [&'a str]), String> {
    let Some((name, tail)) = rest.split_first() else {
        return Err("Missing predicate".to_string());
    };
    let name = name.to_ascii_uppercase();
    let with_arg = |make: fn(i64) -> Predicate| -> Result<(Predicate, &'b [&'a str]), String> {
        let (arg, tail) = tail
            .split_first()
            .ok_or_else(|| format!("Predicate {name} requires a number"))?;
        Ok((make(parse_int(arg)?), tail))
    };
    match name.as_str() {
        "EVEN" => Ok((Predicate::Even, tail)),
        "ODD" => Ok((Predicate::Odd, tail)),
        "GT" => with_arg(Predicate::Gt),
        "GE" => with_arg(Predicate::Ge),
        "LT" => with_arg(Predicate::Lt),
        "LE" => with_arg(Predicate::Le),
        "EQ" => with_arg(Predicate::Eq),
        "NE" => with_arg(Predicate::Ne),
        _ => Err(format!("Unknown predicate: {name}")),
    }
}

fn parse_bare_predicate(keyword: &str, rest: &[&str]) -> Result<Predicate, String> {
    let (predicate, tail) = parse_predicate(rest)?;
    if !tail.is_empty() {
        return Err(format!("{keyword} does not take an execution mode"));
    }
    Ok(predicate)
}

fn parse_op<'a, 'b>(rest: &'b [&'a str]) -> Result<(Op, &'b [&'a str]), String> {
    let Some((name, tail)) = rest.split_first() else {
        return Err("Missing operation".to_string());
    };
    let name = name.to_ascii_uppercase();
    let with_arg = |make: fn(i64) -> Op| -> Result<(Op, &'b [&'a str]), String> {
        let (arg, tail) = tail
            .split_first()
            .ok_or_else(|| format!("Operation {name} requires a number"))?;
        Ok((make(parse_int(arg)?), tail))
    };
    match name.as_str() {
        "ADD" => with_arg(Op::Add),
        "SUB" => with_arg(Op::Sub),
        "MUL" => with_arg(Op::Mul),
        "DIV" => with_arg(Op::Div),
        "NEG" => Ok((Op::Neg, tail)),
        "ABS" => Ok((Op::Abs, tail)),
        "SQUARE" => Ok((Op::Square, tail)),
        _ => Err(format!("Unknown operation: {name}")),
    }
}

fn parse_mode(rest: &[&str]) -> Result<Option<ExecMode>, String> {
    let Some((name, tail)) = rest.split_first() else {
        return Ok(None);
    };
    let mode = match (name.to_ascii_uppercase().as_str(), tail) {
        ("SEQUENTIAL", []) => ExecMode::Sequential,
        ("VECTORIZED", []) => ExecMode::Vectorized,
        ("PARALLEL", []) => ExecMode::parallel_default(),
        ("PARALLEL", [workers]) => {
            let n: usize = workers
                .parse()
                .map_err(|_| format!("Invalid worker count: {workers}"))?;
            ExecMode::parallel(n).map_err(|e| e.to_string())?
        }
        _ => return Err(format!("Unexpected arguments: {}", rest.join(" "))),
    };
    Ok(Some(mode))
}

/// Parse input text: one integer per line, blank lines skipped.
pub fn parse_input(text: &str) -> Result<Vec<i64>, DslError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            line.trim().parse().map_err(|_| DslError::Input {
                line: idx + 1,
                text: line.to_string(),
            })
        })
        .collect()
}

/// Assemble the pipeline for `commands` over `input`.
///
/// Stages stay lazy, except `SUM`: it runs everything upstream of it while
/// the flow is built, so upstream failures surface from this call.
/// `mode_override` replaces the mode of every `FILTER` and `MAP` stage.
pub fn build_flow(
    input: Vec<i64>,
    commands: &[Command],
    mode_override: Option<ExecMode>,
) -> Result<NumberFlow, DslError> {
    let mut flow = Pipeline::new(input).boxed();
    for (i, cmd) in commands.iter().enumerate() {
        debug!(index = i, stage = cmd.name(), "adding stage");
        flow = apply_command(flow, cmd, mode_override)?;
    }
    Ok(flow)
}

fn apply_command(
    flow: NumberFlow,
    cmd: &Command,
    mode_override: Option<ExecMode>,
) -> Result<NumberFlow, DslError> {
    let resolve = |mode: Option<ExecMode>| mode_override.or(mode).unwrap_or_default();

    let next = match cmd {
        Command::Skip { n } => flow.skip(*n)?.boxed(),
        Command::Take { n } => flow.take(*n)?.boxed(),
        Command::Filter { predicate, mode } => {
            let predicate = *predicate;
            flow.filter_in(resolve(*mode), move |x| predicate.test(*x))
                .boxed()
        }
        Command::Map { op, mode } => {
            let op = *op;
            flow.try_map_in(resolve(*mode), move |x| op.apply(x)).boxed()
        }
        Command::TakeWhile { predicate } => {
            let predicate = *predicate;
            flow.take_while(move |x| predicate.test(*x)).boxed()
        }
        Command::DropWhile { predicate } => {
            let predicate = *predicate;
            flow.drop_while(move |x| predicate.test(*x)).boxed()
        }
        Command::Distinct => flow.distinct().boxed(),
        Command::Window { n } => flow.window(*n)?.try_map(window_sum).boxed(),
        Command::Duplicate { n } => {
            let n = *n;
            flow.flat_map(move |x| std::iter::repeat_n(x, n)).boxed()
        }
        Command::Chain { values } => flow.chain(values.clone()).boxed(),
        Command::Tap => flow.tap(|x| info!(value = *x, "tap")).boxed(),
        Command::Sum => {
            // SUM needs the whole stream, so it evaluates everything upstream.
            let total = flow.try_fold(0i64, |acc, x| {
                acc.checked_add(x).ok_or(ArithmeticError::Overflow)
            })?;
            Pipeline::new(vec![total]).boxed()
        }
    };
    Ok(next)
}

fn window_sum(window: Vec<i64>) -> Result<i64, ArithmeticError> {
    window
        .into_iter()
        .try_fold(0i64, |acc, x| acc.checked_add(x))
        .ok_or(ArithmeticError::Overflow)
}

/// Run a flow program over input text.
pub fn execute_flow(input_text: &str, flow_text: &str) -> Result<FlowReport, DslError> {
    execute_flow_with(input_text, flow_text, None)
}

/// Run a flow program, forcing every `FILTER` and `MAP` stage into
/// `mode_override` when given.
pub fn execute_flow_with(
    input_text: &str,
    flow_text: &str,
    mode_override: Option<ExecMode>,
) -> Result<FlowReport, DslError> {
    let commands = parse_commands(flow_text)?;
    if commands.is_empty() {
        return Err(DslError::Empty);
    }

    let input = parse_input(input_text)?;
    let input_count = input.len();

    let output = build_flow(input, &commands, mode_override)?.to_list()?;
    let output_count = output.len();

    Ok(FlowReport {
        output,
        input_count,
        output_count,
    })
}
