//! The template function library
//!
//! Every function is registered as a global function; the single-argument
//! text helpers are also registered as filters so both `{{ upper(NAME) }}`
//! and `{{ NAME | upper }}` work.
//!
//! Time and identifier functions read from the [`FunctionContext`] so tests
//! can pin the clock and seed the entropy source.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Datelike, Duration, NaiveDate, SecondsFormat, TimeDelta, Utc};
use inflector::Inflector;
use minijinja::value::{Rest, Value, ValueKind};
use minijinja::{Environment, Error, ErrorKind};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::clock::{self, SharedClock};

/// The seven workflow stages, in order
pub const STAGES: [(&str, &str); 7] = [
    ("01-align", "Align"),
    ("02-discover", "Discover"),
    ("03-prioritize", "Prioritize"),
    ("04-design", "Design"),
    ("05-build", "Build"),
    ("06-ship", "Ship"),
    ("07-learn", "Learn"),
];

const HEX: &[u8; 16] = b"0123456789ABCDEF";
const MAX_RANDOM_ID: usize = 64;

/// Function family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionCategory {
    /// String manipulation
    Text,
    /// Dates and times
    Time,
    /// Identifier generation
    Identifiers,
    /// Workflow stages
    Workflow,
    /// File paths
    Paths,
    /// Numbers
    Arithmetic,
    /// Defaults and branching
    Conditionals,
}

/// Description of one library function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FunctionInfo {
    /// Name used in templates
    pub name: &'static str,
    /// Family
    pub category: FunctionCategory,
    /// Call shape
    pub signature: &'static str,
    /// What it returns
    pub description: &'static str,
    /// Result depends on the clock or entropy
    pub deterministic: bool,
}

const fn info(
    name: &'static str,
    category: FunctionCategory,
    signature: &'static str,
    description: &'static str,
) -> FunctionInfo {
    FunctionInfo {
        name,
        category,
        signature,
        description,
        deterministic: true,
    }
}

const fn volatile(mut f: FunctionInfo) -> FunctionInfo {
    f.deterministic = false;
    f
}

use FunctionCategory::{Arithmetic, Conditionals, Identifiers, Paths, Text, Time, Workflow};

/// Every function the engine exposes
pub const FUNCTIONS: &[FunctionInfo] = &[
    info("upper", Text, "upper(s)", "s in upper case"),
    info("lower", Text, "lower(s)", "s in lower case"),
    info("titleCase", Text, "titleCase(s)", "s as Title Case words"),
    info("camelCase", Text, "camelCase(s)", "s as camelCase"),
    info("pascalCase", Text, "pascalCase(s)", "s as PascalCase"),
    info("snakeCase", Text, "snakeCase(s)", "s as snake_case"),
    info("kebabCase", Text, "kebabCase(s)", "s as kebab-case"),
    info("slugify", Text, "slugify(s)", "lower-case ASCII slug joined by dashes"),
    info("trim", Text, "trim(s)", "s without surrounding whitespace"),
    info("indent", Text, "indent(s, n)", "every non-empty line prefixed by n spaces"),
    info("dedent", Text, "dedent(s)", "s with the common leading whitespace removed"),
    info("wrap", Text, "wrap(s, n)", "s word-wrapped at n columns"),
    info("truncate", Text, "truncate(s, n)", "the first n characters of s"),
    info("pad", Text, "pad(s, n, padChar)", "s right-padded to n characters"),
    info("replace", Text, "replace(s, old, new)", "s with every old replaced by new"),
    info("contains", Text, "contains(s, sub)", "whether s contains sub"),
    info("hasPrefix", Text, "hasPrefix(s, prefix)", "whether s starts with prefix"),
    info("hasSuffix", Text, "hasSuffix(s, suffix)", "whether s ends with suffix"),
    info("split", Text, "split(s, sep)", "the pieces of s between separators"),
    info("join", Text, "join(list, sep)", "list items joined by sep"),
    volatile(info("now", Time, "now()", "current time, RFC 3339")),
    volatile(info("today", Time, "today()", "current date, YYYY-MM-DD")),
    volatile(info("tomorrow", Time, "tomorrow()", "tomorrow's date, YYYY-MM-DD")),
    info("formatDate", Time, "formatDate(date, layout)", "date formatted with a strftime layout"),
    info("addDays", Time, "addDays(date, n)", "date shifted by n days"),
    info("workingDays", Time, "workingDays(start, end)", "weekdays from start to end inclusive"),
    volatile(info("taskID", Identifiers, "taskID(prefix)", "<prefix>-YYYYMMDD-<4 hex>")),
    volatile(info("taskIDShort", Identifiers, "taskIDShort(prefix)", "<prefix>-<4 hex>")),
    volatile(info("randomID", Identifiers, "randomID(n)", "n upper-case hex characters")),
    info("stageNumber", Workflow, "stageNumber(id)", "1 to 7, or 0 for an unknown stage"),
    info("stageName", Workflow, "stageName(id)", "stage title, or id when unknown"),
    info("nextStage", Workflow, "nextStage(id)", "following stage id, clamped at the last"),
    info("prevStage", Workflow, "prevStage(id)", "preceding stage id, clamped at the first"),
    info("isStageCompleted", Workflow, "isStageCompleted(id, completed)", "whether id is in completed"),
    info("workspacePath", Paths, "workspacePath(parts...)", "parts joined under the workspace root"),
    info("joinPath", Paths, "joinPath(parts...)", "parts joined into one path"),
    info("fileName", Paths, "fileName(path)", "final path component"),
    info("fileExt", Paths, "fileExt(path)", "extension including the dot"),
    info("dirName", Paths, "dirName(path)", "path without its final component"),
    info("relativePath", Paths, "relativePath(base, target)", "target relative to base"),
    info("add", Arithmetic, "add(a, b)", "a + b"),
    info("sub", Arithmetic, "sub(a, b)", "a - b"),
    info("mul", Arithmetic, "mul(a, b)", "a * b"),
    info("div", Arithmetic, "div(a, b)", "a / b, 0 when b is 0"),
    info("mod", Arithmetic, "mod(a, b)", "a % b, 0 when b is 0"),
    info("toInt", Arithmetic, "toInt(v)", "v as an integer, 0 when not numeric"),
    info("toString", Arithmetic, "toString(v)", "v as text"),
    info("default", Conditionals, "default(value, fallback)", "fallback when value is empty"),
    info("coalesce", Conditionals, "coalesce(values...)", "first non-empty value"),
    info("ternary", Conditionals, "ternary(cond, a, b)", "a when cond is true, else b"),
];

/// Whether `name` is a library function or a built-in global
#[must_use]
pub fn is_function(name: &str) -> bool {
    FUNCTIONS.iter().any(|f| f.name == name)
        || matches!(name, "range" | "dict" | "debug" | "namespace" | "loop")
}

/// Clock, entropy and workspace root the functions read from
#[derive(Clone)]
pub struct FunctionContext {
    clock: SharedClock,
    rng: Arc<Mutex<StdRng>>,
    workspace_root: PathBuf,
}

impl std::fmt::Debug for FunctionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionContext")
            .field("clock", &self.clock)
            .field("workspace_root", &self.workspace_root)
            .finish_non_exhaustive()
    }
}

impl Default for FunctionContext {
    fn default() -> Self {
        Self::new(clock::system(), PathBuf::from("."))
    }
}

impl FunctionContext {
    /// Context seeded from OS entropy
    #[must_use]
    pub fn new(clock: SharedClock, workspace_root: PathBuf) -> Self {
        Self {
            clock,
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
            workspace_root,
        }
    }

    /// Replace the entropy source with a seeded one
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Arc::new(Mutex::new(StdRng::seed_from_u64(seed)));
        self
    }

    fn hex(&self, len: usize) -> String {
        let mut rng = self.rng.lock();
        (0..len)
            .map(|_| char::from(HEX[rng.gen_range(0..HEX.len())]))
            .collect()
    }

    fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }
}

/// Register the whole library on `env`
pub fn register(env: &mut Environment<'static>, ctx: &FunctionContext) {
    register_text(env);
    register_time(env, ctx);
    register_identifiers(env, ctx);
    register_workflow(env);
    register_paths(env, ctx);
    register_arithmetic(env);
    register_conditionals(env);
}

macro_rules! function_and_filter {
    ($env:expr, $($name:literal => $func:expr),+ $(,)?) => {
        $(
            $env.add_function($name, $func);
            $env.add_filter($name, $func);
        )+
    };
}

fn register_text(env: &mut Environment<'static>) {
    function_and_filter!(env,
        "upper" => |v: Value| text(&v).to_uppercase(),
        "lower" => |v: Value| text(&v).to_lowercase(),
        "titleCase" => |v: Value| text(&v).to_title_case(),
        "camelCase" => |v: Value| text(&v).to_camel_case(),
        "pascalCase" => |v: Value| text(&v).to_pascal_case(),
        "snakeCase" => |v: Value| text(&v).to_snake_case(),
        "kebabCase" => |v: Value| text(&v).to_kebab_case(),
        "slugify" => |v: Value| slugify(&text(&v)),
        "trim" => |v: Value| text(&v).trim().to_string(),
        "indent" => |v: Value, n: usize| indent(&text(&v), n),
        "dedent" => |v: Value| dedent(&text(&v)),
        "wrap" => |v: Value, n: usize| wrap(&text(&v), n),
        "truncate" => |v: Value, n: usize| text(&v).chars().take(n).collect::<String>(),
        "pad" => |v: Value, n: usize, fill: Option<String>| pad(&text(&v), n, fill.as_deref()),
        "replace" => |v: Value, from: String, to: String| text(&v).replace(&from, &to),
        "contains" => |v: Value, needle: String| text(&v).contains(&needle),
        "hasPrefix" => |v: Value, prefix: String| text(&v).starts_with(&prefix),
        "hasSuffix" => |v: Value, suffix: String| text(&v).ends_with(&suffix),
        "split" => |v: Value, sep: String| split(&text(&v), &sep),
        "join" => |v: Value, sep: Option<String>| join(&v, sep.as_deref().unwrap_or("")),
    );
}

fn register_time(env: &mut Environment<'static>, ctx: &FunctionContext) {
    let c = ctx.clone();
    env.add_function("now", move || {
        c.clock.now().to_rfc3339_opts(SecondsFormat::Secs, true)
    });
    let c = ctx.clone();
    env.add_function("today", move || c.today().format("%Y-%m-%d").to_string());
    let c = ctx.clone();
    env.add_function("tomorrow", move || {
        (c.today() + Duration::days(1)).format("%Y-%m-%d").to_string()
    });
    env.add_function("formatDate", |v: Value, layout: Option<String>| {
        format_date(&v, layout.as_deref().unwrap_or("%Y-%m-%d"))
    });
    env.add_function("addDays", |v: Value, days: i64| -> Result<String, Error> {
        let date = parse_date(&v)?.date_naive();
        TimeDelta::try_days(days)
            .and_then(|delta| date.checked_add_signed(delta))
            .map(|shifted| shifted.format("%Y-%m-%d").to_string())
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidOperation,
                    format!("addDays: {date} shifted by {days} days is out of range"),
                )
            })
    });
    env.add_function("workingDays", |start: Value, end: Value| -> Result<i64, Error> {
        Ok(working_days(
            parse_date(&start)?.date_naive(),
            parse_date(&end)?.date_naive(),
        ))
    });
}

fn register_identifiers(env: &mut Environment<'static>, ctx: &FunctionContext) {
    let c = ctx.clone();
    env.add_function("taskID", move |prefix: Value| {
        format!("{}-{}-{}", text(&prefix), c.today().format("%Y%m%d"), c.hex(4))
    });
    let c = ctx.clone();
    env.add_function("taskIDShort", move |prefix: Value| {
        format!("{}-{}", text(&prefix), c.hex(4))
    });
    let c = ctx.clone();
    env.add_function("randomID", move |len: Option<usize>| -> Result<String, Error> {
        let len = len.unwrap_or(8);
        if len > MAX_RANDOM_ID {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("randomID: length {len} exceeds {MAX_RANDOM_ID}"),
            ));
        }
        Ok(c.hex(len))
    });
}

fn register_workflow(env: &mut Environment<'static>) {
    env.add_function("stageNumber", |id: Value| {
        stage_index(&text(&id)).map_or(0, |i| i + 1)
    });
    env.add_function("stageName", |id: Value| {
        let id = text(&id);
        stage_index(&id).map_or(id, |i| STAGES[i].1.to_string())
    });
    env.add_function("nextStage", |id: Value| {
        let id = text(&id);
        stage_index(&id).map_or(id, |i| STAGES[(i + 1).min(STAGES.len() - 1)].0.to_string())
    });
    env.add_function("prevStage", |id: Value| {
        let id = text(&id);
        stage_index(&id).map_or(id, |i| STAGES[i.saturating_sub(1)].0.to_string())
    });
    env.add_function("isStageCompleted", |id: Value, completed: Value| {
        is_stage_completed(&text(&id), &completed)
    });
}

fn register_paths(env: &mut Environment<'static>, ctx: &FunctionContext) {
    let root = ctx.workspace_root.clone();
    env.add_function("workspacePath", move |parts: Rest<Value>| {
        join_parts(root.clone(), &parts)
    });
    env.add_function("joinPath", |parts: Rest<Value>| join_parts(PathBuf::new(), &parts));
    env.add_function("fileName", |p: Value| {
        Path::new(&text(&p))
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    env.add_function("fileExt", |p: Value| {
        Path::new(&text(&p))
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default()
    });
    env.add_function("dirName", |p: Value| {
        let p = text(&p);
        match Path::new(&p).parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.display().to_string(),
            _ => ".".to_string(),
        }
    });
    env.add_function("relativePath", |base: Value, target: Value| {
        let target = text(&target);
        pathdiff::diff_paths(&target, text(&base))
            .map_or(target, |p| p.display().to_string())
    });
}

fn register_arithmetic(env: &mut Environment<'static>) {
    env.add_function("add", |a: Value, b: Value| float(&a) + float(&b));
    env.add_function("sub", |a: Value, b: Value| float(&a) - float(&b));
    env.add_function("mul", |a: Value, b: Value| float(&a) * float(&b));
    env.add_function("div", |a: Value, b: Value| {
        let divisor = float(&b);
        if divisor == 0.0 {
            0.0
        } else {
            float(&a) / divisor
        }
    });
    env.add_function("mod", |a: Value, b: Value| modulo(&a, &b));
    env.add_function("toInt", |v: Value| to_int(&v));
    env.add_function("toString", |v: Value| text(&v));
}

fn register_conditionals(env: &mut Environment<'static>) {
    function_and_filter!(env,
        "default" => |v: Value, fallback: Value| if is_empty(&v) { fallback } else { v },
    );
    env.add_function("coalesce", |values: Rest<Value>| {
        values
            .iter()
            .find(|v| !is_empty(v))
            .cloned()
            .unwrap_or_else(|| Value::from(""))
    });
    env.add_function("ternary", |cond: Value, a: Value, b: Value| {
        if cond.is_true() {
            a
        } else {
            b
        }
    });
}

fn text(v: &Value) -> String {
    if v.is_undefined() || v.is_none() {
        String::new()
    } else if let Some(s) = v.as_str() {
        s.to_string()
    } else {
        v.to_string()
    }
}

fn is_empty(v: &Value) -> bool {
    if v.is_undefined() || v.is_none() {
        return true;
    }
    match v.kind() {
        ValueKind::String | ValueKind::Seq | ValueKind::Map => v.len() == Some(0),
        _ => false,
    }
}

fn slugify(s: &str) -> String {
    let mut slug = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

fn indent(s: &str, n: usize) -> String {
    let pad = " ".repeat(n);
    s.split('\n')
        .map(|line| {
            if line.trim().is_empty() {
                line.to_string()
            } else {
                format!("{pad}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn dedent(s: &str) -> String {
    let common = s
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);
    s.split('\n')
        .map(|line| line.get(common..).unwrap_or_else(|| line.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn wrap(s: &str, width: usize) -> String {
    if width == 0 {
        return s.to_string();
    }
    s.split('\n')
        .map(|paragraph| {
            let mut lines: Vec<String> = Vec::new();
            let mut current = String::new();
            for word in paragraph.split_whitespace() {
                if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > width {
                    lines.push(std::mem::take(&mut current));
                }
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(word);
            }
            lines.push(current);
            lines.join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn pad(s: &str, width: usize, fill: Option<&str>) -> String {
    let fill = fill.and_then(|f| f.chars().next()).unwrap_or(' ');
    let len = s.chars().count();
    let mut out = s.to_string();
    out.extend(std::iter::repeat(fill).take(width.saturating_sub(len)));
    out
}

fn split(s: &str, sep: &str) -> Vec<String> {
    if sep.is_empty() {
        return s.chars().map(String::from).collect();
    }
    s.split(sep).map(ToString::to_string).collect()
}

fn join(v: &Value, sep: &str) -> String {
    if v.kind() == ValueKind::String {
        return text(v);
    }
    v.try_iter().map_or_else(
        |_| text(v),
        |items| items.map(|item| text(&item)).collect::<Vec<_>>().join(sep),
    )
}

fn parse_date(v: &Value) -> Result<DateTime<Utc>, Error> {
    let raw = text(v);
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("'{raw}' is not a date (expected RFC 3339 or YYYY-MM-DD)"),
            )
        })
}

fn format_date(v: &Value, layout: &str) -> Result<String, Error> {
    if StrftimeItems::new(layout).any(|item| matches!(item, Item::Error)) {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("invalid date layout '{layout}'"),
        ));
    }
    let date = parse_date(v)?;
    Ok(date.format_with_items(StrftimeItems::new(layout)).to_string())
}

fn working_days(start: NaiveDate, end: NaiveDate) -> i64 {
    if end < start {
        return 0;
    }
    let span = end.signed_duration_since(start).num_days() + 1;
    let first = i64::from(start.weekday().num_days_from_monday());
    let tail = (0..span % 7).filter(|i| (first + i) % 7 < 5).count();
    (span / 7) * 5 + i64::try_from(tail).unwrap_or(0)
}

/// Position of a stage given its id (`04-design`), name (`design`) or number (`4`)
#[must_use]
pub fn stage_index(id: &str) -> Option<usize> {
    let id = id.trim().to_ascii_lowercase();
    STAGES.iter().position(|(stage, name)| {
        *stage == id
            || name.eq_ignore_ascii_case(&id)
            || stage.split('-').next().and_then(|n| n.parse::<usize>().ok())
                == id.parse::<usize>().ok().filter(|n| *n > 0)
    })
}

fn is_stage_completed(id: &str, completed: &Value) -> bool {
    let wanted = stage_index(id);
    let hit = |candidate: &str| match wanted {
        Some(index) => stage_index(candidate) == Some(index),
        None => candidate.trim() == id,
    };
    if completed.kind() == ValueKind::String {
        return text(completed).split(',').any(hit);
    }
    completed
        .try_iter()
        .is_ok_and(|mut items| items.any(|item| hit(&text(&item))))
}

fn join_parts(mut base: PathBuf, parts: &[Value]) -> String {
    for part in parts {
        base.push(text(part));
    }
    base.display().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Number {
    Int(i64),
    Float(f64),
}

fn number(v: &Value) -> Option<Number> {
    if let Some(s) = v.as_str() {
        let s = s.trim();
        return s
            .parse::<i64>()
            .map(Number::Int)
            .ok()
            .or_else(|| s.parse::<f64>().ok().map(Number::Float));
    }
    if v.kind() != ValueKind::Number {
        return None;
    }
    match serde_json::to_value(v).ok()? {
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Number::Int)
            .or_else(|| n.as_f64().map(Number::Float)),
        _ => None,
    }
}

#[allow(clippy::cast_precision_loss)]
fn float(v: &Value) -> f64 {
    match number(v) {
        Some(Number::Int(i)) => i as f64,
        Some(Number::Float(f)) => f,
        None => 0.0,
    }
}

fn modulo(a: &Value, b: &Value) -> Value {
    match (number(a), number(b)) {
        (Some(Number::Int(_)), Some(Number::Int(0))) => Value::from(0),
        (Some(Number::Int(x)), Some(Number::Int(y))) => Value::from(x.wrapping_rem(y)),
        _ => {
            let divisor = float(b);
            if divisor == 0.0 {
                Value::from(0.0)
            } else {
                Value::from(float(a) % divisor)
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_int(v: &Value) -> i64 {
    match number(v) {
        Some(Number::Int(i)) => i,
        Some(Number::Float(f)) if f.is_finite() => f.trunc() as i64,
        _ => 0,
    }
}
