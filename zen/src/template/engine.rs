//! Compiling, caching and rendering templates

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use minijinja::syntax::SyntaxConfig;
use minijinja::{AutoEscape, Environment, UndefinedBehavior};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

use super::functions::{self, FunctionContext, FunctionInfo, FUNCTIONS};
use super::{TemplateSource, Variables};
use crate::assets::manifest::{AssetMetadata, VariableType};
use crate::clock::SharedClock;
use crate::config::TemplateSettings;
use crate::error::{Result, ZenError};

/// A compiled template ready to render
///
/// Bindings are immutable and shared; rendering never takes the engine's
/// cache lock.
pub struct TemplateBinding {
    name: String,
    source: String,
    variables: BTreeSet<String>,
    metadata: Option<AssetMetadata>,
    delimiters: (String, String),
    env: Environment<'static>,
}

impl std::fmt::Debug for TemplateBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateBinding")
            .field("name", &self.name)
            .field("variables", &self.variables)
            .field("delimiters", &self.delimiters)
            .finish_non_exhaustive()
    }
}

impl TemplateBinding {
    /// Template name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Template source text
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Top-level variable names the template reads, sorted
    #[must_use]
    pub const fn variables(&self) -> &BTreeSet<String> {
        &self.variables
    }

    /// Asset metadata the template came with
    #[must_use]
    pub const fn metadata(&self) -> Option<&AssetMetadata> {
        self.metadata.as_ref()
    }

    /// Variable delimiters the template was compiled with
    #[must_use]
    pub fn delimiters(&self) -> (&str, &str) {
        (&self.delimiters.0, &self.delimiters.1)
    }
}

/// A declared variable whose supplied value has the wrong type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeMismatch {
    /// Variable name
    pub name: String,
    /// Declared type
    pub expected: VariableType,
    /// JSON type of the supplied value
    pub actual: &'static str,
}

/// Outcome of checking variables against a template's declared schema
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VariableReport {
    /// Required variables that were not supplied, sorted
    pub missing: Vec<String>,
    /// Supplied variables of the wrong type, sorted by name
    pub mismatched: Vec<TypeMismatch>,
}

impl VariableReport {
    /// Whether every declared variable is satisfied
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.missing.is_empty() && self.mismatched.is_empty()
    }

    /// Turn a failed report into an error
    ///
    /// # Errors
    ///
    /// `VariableMissing` when anything is missing, otherwise `InvalidArgument`
    /// describing the first type mismatch.
    pub fn into_result(self) -> Result<()> {
        if !self.missing.is_empty() {
            return Err(ZenError::VariableMissing {
                names: self.missing,
            });
        }
        match self.mismatched.first() {
            Some(m) => Err(ZenError::InvalidArgument(format!(
                "variable {} should be {:?}, got {}",
                m.name, m.expected, m.actual
            ))),
            None => Ok(()),
        }
    }
}

#[derive(Debug)]
struct CachedBinding {
    binding: Arc<TemplateBinding>,
    compiled_at: DateTime<Utc>,
    last_used: u64,
}

#[derive(Debug, Default)]
struct CompiledCache {
    entries: HashMap<String, CachedBinding>,
    tick: u64,
    generation: u64,
}

impl CompiledCache {
    /// Drop everything compiled before the source moved to `generation`
    fn observe(&mut self, generation: u64) {
        if generation != self.generation {
            if !self.entries.is_empty() {
                debug!(dropped = self.entries.len(), "template source changed; dropping compiled templates");
            }
            self.entries.clear();
            self.generation = generation;
        }
    }

    fn get(&mut self, name: &str, now: DateTime<Utc>, ttl: chrono::Duration) -> Option<Arc<TemplateBinding>> {
        let expired = self
            .entries
            .get(name)
            .is_some_and(|e| now - e.compiled_at >= ttl);
        if expired {
            self.entries.remove(name);
            return None;
        }
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(name).map(|e| {
            e.last_used = tick;
            Arc::clone(&e.binding)
        })
    }

    fn insert(&mut self, binding: Arc<TemplateBinding>, now: DateTime<Utc>, capacity: usize) {
        if capacity == 0 {
            return;
        }
        while self.entries.len() >= capacity && !self.entries.contains_key(binding.name()) {
            let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            trace!(template = %oldest, "evicting compiled template");
            self.entries.remove(&oldest);
        }
        self.tick += 1;
        self.entries.insert(
            binding.name().to_string(),
            CachedBinding {
                binding,
                compiled_at: now,
                last_used: self.tick,
            },
        );
    }
}

/// Template engine
///
/// Templates are fetched through a [`TemplateSource`], compiled with
/// minijinja using the configured variable delimiters, and kept in a
/// TTL + LRU cache of compiled bindings.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use zen::config::TemplateSettings;
/// use zen::template::{TemplateEngine, Variables};
/// use zen::testing::StaticTemplates;
///
/// # async fn example() -> zen::Result<()> {
/// let source = StaticTemplates::new().with("greeting", "Hello {{ NAME }}");
/// let engine = TemplateEngine::new(TemplateSettings::default(), Arc::new(source));
///
/// let binding = engine.load_template("greeting").await?;
/// let mut vars = Variables::new();
/// vars.insert("NAME".into(), "zen".into());
/// assert_eq!(engine.render_template(&binding, &vars)?, "Hello zen");
/// # Ok(())
/// # }
/// ```
pub struct TemplateEngine {
    settings: TemplateSettings,
    source: Arc<dyn TemplateSource>,
    base: Environment<'static>,
    clock: SharedClock,
    compiled: Mutex<CompiledCache>,
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine")
            .field("settings", &self.settings)
            .field("cached", &self.cache_len())
            .finish_non_exhaustive()
    }
}

impl TemplateEngine {
    /// Engine using the system clock and OS entropy
    #[must_use]
    pub fn new(settings: TemplateSettings, source: Arc<dyn TemplateSource>) -> Self {
        let ctx = FunctionContext::new(crate::clock::system(), settings.workspace_root.clone());
        Self::with_context(settings, source, ctx, crate::clock::system())
    }

    /// Engine whose functions and cache read from the given context and clock
    #[must_use]
    pub fn with_context(
        settings: TemplateSettings,
        source: Arc<dyn TemplateSource>,
        functions: FunctionContext,
        clock: SharedClock,
    ) -> Self {
        let mut base = Environment::new();
        base.set_auto_escape_callback(|_| AutoEscape::None);
        base.set_keep_trailing_newline(true);
        base.set_undefined_behavior(UndefinedBehavior::Lenient);
        functions::register(&mut base, &functions);

        Self {
            settings,
            source,
            base,
            clock,
            compiled: Mutex::new(CompiledCache::default()),
        }
    }

    /// Engine settings
    #[must_use]
    pub const fn settings(&self) -> &TemplateSettings {
        &self.settings
    }

    /// Fetch and compile `name`, reusing a cached binding when possible
    ///
    /// # Errors
    ///
    /// Whatever the source reports for the fetch, or `CompileError`.
    pub async fn load_template(&self, name: &str) -> Result<Arc<TemplateBinding>> {
        let generation = self.source.generation();
        if self.settings.cache_enabled {
            let hit = {
                let mut compiled = self.compiled.lock();
                compiled.observe(generation);
                compiled.get(name, self.clock.now(), self.cache_ttl())
            };
            if let Some(binding) = hit {
                debug!(template = name, "compiled template cache hit");
                return Ok(binding);
            }
        }

        let asset = self.source.fetch_template(name).await?;
        let binding = Arc::new(self.compile(&asset.name, asset.source, asset.metadata)?);

        if self.settings.cache_enabled && self.source.generation() == generation {
            let mut compiled = self.compiled.lock();
            if compiled.generation == generation {
                compiled.insert(Arc::clone(&binding), self.clock.now(), self.settings.cache_size);
            }
        }
        debug!(template = name, variables = binding.variables.len(), "compiled template");
        Ok(binding)
    }

    /// Compile `source` without touching the cache
    ///
    /// # Errors
    ///
    /// `CompileError` with the offending line when the source does not parse.
    pub fn compile(
        &self,
        name: &str,
        source: String,
        metadata: Option<AssetMetadata>,
    ) -> Result<TemplateBinding> {
        let compile_error = |e: minijinja::Error| ZenError::CompileError {
            name: name.to_string(),
            line: e.line(),
            message: e.detail().map_or_else(|| e.to_string(), ToString::to_string),
        };

        let mut env = self.base.clone();
        env.set_syntax(self.syntax().map_err(compile_error)?);
        env.add_template_owned(name.to_string(), source.clone())
            .map_err(compile_error)?;

        let variables = env
            .get_template(name)
            .map_err(compile_error)?
            .undeclared_variables(false)
            .into_iter()
            .filter(|v| !functions::is_function(v))
            .collect();

        Ok(TemplateBinding {
            name: name.to_string(),
            source,
            variables,
            metadata,
            delimiters: (
                self.settings.left_delim.clone(),
                self.settings.right_delim.clone(),
            ),
            env,
        })
    }

    /// Render `binding` over `variables`
    ///
    /// # Errors
    ///
    /// `VariableMissing` in strict mode when a referenced variable is absent,
    /// `RenderError` when evaluation fails.
    pub fn render_template(&self, binding: &TemplateBinding, variables: &Variables) -> Result<String> {
        if self.settings.strict_mode {
            let missing: Vec<String> = binding
                .variables
                .iter()
                .filter(|name| !variables.contains_key(*name))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(ZenError::VariableMissing { names: missing });
            }
        }

        let render_error = |e: minijinja::Error| ZenError::RenderError {
            name: binding.name.clone(),
            line: e.line(),
            message: e.detail().map_or_else(|| e.to_string(), ToString::to_string),
        };
        binding
            .env
            .get_template(&binding.name)
            .and_then(|t| t.render(variables))
            .map_err(render_error)
    }

    /// Check `variables` against the schema declared in the binding's metadata
    ///
    /// Templates without a declared schema always pass.
    #[must_use]
    pub fn validate_variables(&self, binding: &TemplateBinding, variables: &Variables) -> VariableReport {
        let Some(metadata) = &binding.metadata else {
            return VariableReport::default();
        };

        let mut report = VariableReport::default();
        for spec in &metadata.variables {
            match variables.get(&spec.name) {
                None | Some(serde_json::Value::Null) => {
                    if spec.required && spec.default.is_none() {
                        report.missing.push(spec.name.clone());
                    }
                }
                Some(value) if !matches_type(value, spec.var_type) => {
                    report.mismatched.push(TypeMismatch {
                        name: spec.name.clone(),
                        expected: spec.var_type,
                        actual: json_type(value),
                    });
                }
                Some(_) => {}
            }
        }
        report.missing.sort();
        report.mismatched.sort_by(|a, b| a.name.cmp(&b.name));
        report
    }

    /// The function library available to templates
    #[must_use]
    pub const fn get_functions(&self) -> &'static [FunctionInfo] {
        FUNCTIONS
    }

    /// Number of compiled templates currently cached
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.compiled.lock().entries.len()
    }

    /// Drop every compiled template
    pub fn clear_cache(&self) {
        self.compiled.lock().entries.clear();
    }

    fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.settings.cache_ttl()).unwrap_or(chrono::Duration::MAX)
    }

    fn syntax(&self) -> std::result::Result<SyntaxConfig, minijinja::Error> {
        SyntaxConfig::builder()
            .variable_delimiters(
                self.settings.left_delim.clone(),
                self.settings.right_delim.clone(),
            )
            .build()
    }
}

/// Default values declared by `metadata`, as a variable map
#[must_use]
pub fn declared_defaults(metadata: &AssetMetadata) -> Variables {
    metadata
        .variables
        .iter()
        .filter_map(|spec| spec.default.clone().map(|d| (spec.name.clone(), d)))
        .collect::<BTreeMap<_, _>>()
}

fn matches_type(value: &serde_json::Value, expected: VariableType) -> bool {
    use serde_json::Value as J;
    match expected {
        VariableType::String => value.is_string(),
        VariableType::Number => value.is_number(),
        VariableType::Integer => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        VariableType::Boolean => value.is_boolean(),
        VariableType::Array => value.is_array(),
        VariableType::Object => value.is_object(),
        VariableType::Date => match value {
            J::String(s) => {
                DateTime::parse_from_rfc3339(s).is_ok()
                    || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
            }
            _ => false,
        },
    }
}

const fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::manifest::{AssetType, VariableSpec};
    use crate::clock::{Clock, ManualClock};
    use crate::error::ErrorKind;
    use crate::testing::StaticTemplates;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn engine_with(settings: TemplateSettings, source: StaticTemplates) -> (TemplateEngine, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        let ctx = FunctionContext::new(clock.shared(), PathBuf::from("/work")).with_seed(1);
        let engine = TemplateEngine::with_context(settings, Arc::new(source), ctx, clock.shared());
        (engine, clock)
    }

    fn vars(pairs: &[(&str, serde_json::Value)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn strict() -> TemplateSettings {
        TemplateSettings {
            strict_mode: true,
            ..TemplateSettings::default()
        }
    }

    #[tokio::test]
    async fn test_strict_mode_reports_missing_variables() {
        let source = StaticTemplates::new().with("t", "{{ TITLE }} by {{ OWNER }}");
        let (engine, _) = engine_with(strict(), source);
        let binding = engine.load_template("t").await.unwrap();

        let err = engine
            .render_template(&binding, &vars(&[("TITLE", "x".into())]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VariableMissing);
        assert!(err.to_string().contains("OWNER"));
    }

    #[tokio::test]
    async fn test_lenient_mode_substitutes_empty_string() {
        let source = StaticTemplates::new().with("t", "[{{ TITLE }}]({{ OWNER }})");
        let (engine, _) = engine_with(TemplateSettings::default(), source);
        let binding = engine.load_template("t").await.unwrap();

        let out = engine
            .render_template(&binding, &vars(&[("TITLE", "x".into())]))
            .unwrap();
        assert_eq!(out, "[x]()");
    }

    #[tokio::test]
    async fn test_function_names_are_not_variables() {
        let source = StaticTemplates::new().with("t", "{{ upper(TITLE) }} {{ today() }}");
        let (engine, _) = engine_with(strict(), source);
        let binding = engine.load_template("t").await.unwrap();
        assert_eq!(
            binding.variables().iter().cloned().collect::<Vec<_>>(),
            vec!["TITLE".to_string()]
        );
        let out = engine
            .render_template(&binding, &vars(&[("TITLE", "spec".into())]))
            .unwrap();
        assert_eq!(out, "SPEC 2024-06-01");
    }

    #[tokio::test]
    async fn test_custom_delimiters() {
        let settings = TemplateSettings {
            left_delim: "[[".into(),
            right_delim: "]]".into(),
            ..TemplateSettings::default()
        };
        let source = StaticTemplates::new().with("t", "{{ literal }} [[ NAME ]]");
        let (engine, _) = engine_with(settings, source);
        let binding = engine.load_template("t").await.unwrap();
        assert_eq!(binding.delimiters(), ("[[", "]]"));
        let out = engine
            .render_template(&binding, &vars(&[("NAME", "zen".into())]))
            .unwrap();
        assert_eq!(out, "{{ literal }} zen");
    }

    #[tokio::test]
    async fn test_compile_error_carries_line() {
        let source = StaticTemplates::new().with("broken", "line one\n{% if %}\n");
        let (engine, _) = engine_with(TemplateSettings::default(), source);
        let err = engine.load_template("broken").await.unwrap_err();
        match err {
            ZenError::CompileError { name, line, .. } => {
                assert_eq!(name, "broken");
                assert_eq!(line, Some(2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_render_error_is_distinct_from_compile_error() {
        let source = StaticTemplates::new().with("t", "{{ formatDate('not a date') }}");
        let (engine, _) = engine_with(TemplateSettings::default(), source);
        let binding = engine.load_template("t").await.unwrap();
        let err = engine.render_template(&binding, &Variables::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RenderError);
    }

    #[tokio::test]
    async fn test_compiled_cache_ttl_and_lru() {
        let settings = TemplateSettings {
            cache_size: 2,
            cache_ttl: 60,
            ..TemplateSettings::default()
        };
        let source = StaticTemplates::new()
            .with("a", "A")
            .with("b", "B")
            .with("c", "C");
        let fetches = source.fetch_counter();
        let (engine, clock) = engine_with(settings, source);

        engine.load_template("a").await.unwrap();
        engine.load_template("b").await.unwrap();
        engine.load_template("a").await.unwrap();
        assert_eq!(fetches(), 2);

        // "b" is least recently used
        engine.load_template("c").await.unwrap();
        assert_eq!(engine.cache_len(), 2);
        engine.load_template("a").await.unwrap();
        assert_eq!(fetches(), 3);
        engine.load_template("b").await.unwrap();
        assert_eq!(fetches(), 4);

        clock.advance(chrono::Duration::seconds(60));
        assert!(clock.now() > Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        engine.load_template("b").await.unwrap();
        assert_eq!(fetches(), 5);

        engine.clear_cache();
        assert_eq!(engine.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_validate_variables_against_schema() {
        let metadata = AssetMetadata {
            name: "t".into(),
            command: None,
            asset_type: AssetType::Template,
            category: String::new(),
            description: String::new(),
            tags: Vec::new(),
            path: "t.tmpl".into(),
            format: None,
            output_file: None,
            workflow_stages: Vec::new(),
            variables: vec![
                VariableSpec {
                    name: "TITLE".into(),
                    var_type: VariableType::String,
                    required: true,
                    default: None,
                    description: String::new(),
                },
                VariableSpec {
                    name: "POINTS".into(),
                    var_type: VariableType::Integer,
                    required: false,
                    default: None,
                    description: String::new(),
                },
                VariableSpec {
                    name: "DUE".into(),
                    var_type: VariableType::Date,
                    required: true,
                    default: Some("2024-01-01".into()),
                    description: String::new(),
                },
            ],
            checksum: None,
            updated_at: None,
        };
        let source = StaticTemplates::new().with_asset(metadata, "{{ TITLE }}");
        let (engine, _) = engine_with(TemplateSettings::default(), source);
        let binding = engine.load_template("t").await.unwrap();

        let report = engine.validate_variables(&binding, &vars(&[("POINTS", "many".into())]));
        assert_eq!(report.missing, vec!["TITLE".to_string()]);
        assert_eq!(report.mismatched.len(), 1);
        assert_eq!(report.mismatched[0].name, "POINTS");
        assert_eq!(report.clone().into_result().unwrap_err().kind(), ErrorKind::VariableMissing);

        let ok = engine.validate_variables(
            &binding,
            &vars(&[("TITLE", "x".into()), ("POINTS", 3.into()), ("DUE", "2024-02-01".into())]),
        );
        assert!(ok.is_valid());
        assert_eq!(declared_defaults(binding.metadata().unwrap()).len(), 1);
    }

    #[test]
    fn test_function_library_is_exposed() {
        let (engine, _) = engine_with(TemplateSettings::default(), StaticTemplates::new());
        let names: Vec<_> = engine.get_functions().iter().map(|f| f.name).collect();
        for expected in ["upper", "workingDays", "taskID", "stageNumber", "relativePath", "mod", "ternary"] {
            assert!(names.contains(&expected), "{expected}");
        }
    }
}
