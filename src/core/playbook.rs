//! Playbook definitions and loading.
//!
//! A playbook is an ordered list of steps. Each step invokes a registered
//! action; any argument value may itself be an invocation or a nested
//! playbook, which the executor resolves first.
//!
//! Document shapes:
//! - a mapping with an `action` key is an invocation
//! - a mapping with an `actions` key is a playbook
//! - a mapping with an `include` key loads a playbook file (relative to
//!   the including file)
//! - a string `"$name"` reads a context variable; `"$$..."` escapes a `$`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_yaml::{Mapping, Value as Yaml};
use thiserror::Error;

/// Playbook loading errors
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Failed to read playbook file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse playbook YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid playbook at {at}: {message}")]
    Invalid { at: String, message: String },

    #[error("Include cycle: {}", render_chain(.0))]
    Cycle(Vec<PathBuf>),
}

fn render_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn invalid(at: &str, message: impl Into<String>) -> DocumentError {
    DocumentError::Invalid {
        at: at.to_string(),
        message: message.into(),
    }
}

/// Whether a nested playbook shares its parent's variables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Steps read and write the parent's context
    #[default]
    Shared,

    /// Steps run in a fresh context; only `output` flows back
    Isolated,
}

/// A sequence of steps, executable as one unit
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Playbook {
    pub name: Option<String>,
    pub description: Option<String>,
    pub scope: Scope,

    /// Values written as variables when the playbook starts
    pub args: Vec<(String, ArgValue)>,

    pub steps: Vec<Step>,

    /// Variable returned as the result instead of the last step's value
    pub output: Option<String>,

    pub timeout_seconds: Option<u64>,
}

/// One entry of a playbook's step list
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Invoke(Invocation),
    Playbook(Arc<Playbook>),
}

/// A call to a registered action
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub action: String,
    pub args: Args,

    /// Variable that receives the result
    pub output: Option<String>,

    pub timeout_seconds: Option<u64>,
}

/// Arguments of an invocation, as written (`ArgValue`) or once resolved
#[derive(Debug, Clone, PartialEq)]
pub enum Args<T = ArgValue> {
    Named(Vec<(String, T)>),
    Positional(Vec<T>),
}

impl<T> Default for Args<T> {
    fn default() -> Self {
        Self::Named(Vec::new())
    }
}

/// An argument value, possibly requiring execution to resolve
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Literal(Value),
    Variable(String),
    Invoke(Box<Invocation>),
    Playbook(Arc<Playbook>),
    List(Vec<ArgValue>),
    Map(Vec<(String, ArgValue)>),
}

impl From<Value> for ArgValue {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

impl From<Invocation> for ArgValue {
    fn from(invocation: Invocation) -> Self {
        Self::Invoke(Box::new(invocation))
    }
}

impl From<Playbook> for ArgValue {
    fn from(playbook: Playbook) -> Self {
        Self::Playbook(Arc::new(playbook))
    }
}

impl Invocation {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            args: Args::default(),
            output: None,
            timeout_seconds: None,
        }
    }

    /// Add a named argument (switches positional args to named)
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        let entry = (name.into(), value.into());
        match &mut self.args {
            Args::Named(named) => named.push(entry),
            Args::Positional(_) => self.args = Args::Named(vec![entry]),
        }
        self
    }

    pub fn positional(mut self, values: Vec<ArgValue>) -> Self {
        self.args = Args::Positional(values);
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.output = Some(name.into());
        self
    }

    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }
}

impl Playbook {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Default::default()
        }
    }

    /// A playbook consisting of one invocation
    pub fn single(invocation: Invocation) -> Self {
        Self::new(vec![Step::Invoke(invocation)])
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.output = Some(name.into());
        self
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.args.push((name.into(), value.into()));
        self
    }

    /// Name used in node paths
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("playbook")
    }

    /// Load a playbook from a YAML file, resolving includes
    pub fn from_file(path: &Path) -> Result<Self, DocumentError> {
        let mut parser = Parser::default();
        parser.load_file(path, "$")
    }

    /// Parse a playbook from YAML (or JSON) text
    pub fn from_yaml(content: &str) -> Result<Self, DocumentError> {
        let doc: Yaml = serde_yaml::from_str(content)?;
        Parser::default().document(&doc, "$")
    }

    /// Build a playbook from an in-memory JSON document
    pub fn from_value(doc: &Value) -> Result<Self, DocumentError> {
        let doc = serde_yaml::to_value(doc)?;
        Parser::default().document(&doc, "$")
    }

    /// Every action name referenced anywhere in the tree
    pub fn action_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        collect_playbook(self, &mut names);
        names.sort_unstable();
        names.dedup();
        names
    }
}

fn collect_playbook<'a>(playbook: &'a Playbook, names: &mut Vec<&'a str>) {
    for (_, value) in &playbook.args {
        collect_value(value, names);
    }
    for step in &playbook.steps {
        match step {
            Step::Invoke(invocation) => collect_invocation(invocation, names),
            Step::Playbook(nested) => collect_playbook(nested, names),
        }
    }
}

fn collect_invocation<'a>(invocation: &'a Invocation, names: &mut Vec<&'a str>) {
    names.push(&invocation.action);
    match &invocation.args {
        Args::Named(named) => named.iter().for_each(|(_, v)| collect_value(v, names)),
        Args::Positional(values) => values.iter().for_each(|v| collect_value(v, names)),
    }
}

fn collect_value<'a>(value: &'a ArgValue, names: &mut Vec<&'a str>) {
    match value {
        ArgValue::Literal(_) | ArgValue::Variable(_) => {}
        ArgValue::Invoke(invocation) => collect_invocation(invocation, names),
        ArgValue::Playbook(playbook) => collect_playbook(playbook, names),
        ArgValue::List(items) => items.iter().for_each(|v| collect_value(v, names)),
        ArgValue::Map(entries) => entries.iter().for_each(|(_, v)| collect_value(v, names)),
    }
}

const PLAYBOOK_KEYS: &[&str] = &[
    "name",
    "description",
    "scope",
    "args",
    "actions",
    "output",
    "timeout_seconds",
];
const INVOCATION_KEYS: &[&str] = &["action", "args", "output", "result", "timeout_seconds"];

/// Document walker; tracks the include chain for cycle detection
#[derive(Debug, Default)]
struct Parser {
    /// Canonical paths of files currently being loaded, outermost first
    stack: Vec<PathBuf>,
}

impl Parser {
    fn base_dir(&self) -> PathBuf {
        self.stack
            .last()
            .and_then(|p| p.parent())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn load_file(&mut self, path: &Path, at: &str) -> Result<Playbook, DocumentError> {
        let canonical = path.canonicalize().map_err(|source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if self.stack.contains(&canonical) {
            let mut chain = self.stack.clone();
            chain.push(canonical);
            return Err(DocumentError::Cycle(chain));
        }

        let content = std::fs::read_to_string(&canonical).map_err(|source| DocumentError::Io {
            path: canonical.clone(),
            source,
        })?;
        let doc: Yaml = serde_yaml::from_str(&content)?;

        self.stack.push(canonical.clone());
        let parsed = self.document(&doc, at);
        self.stack.pop();

        let mut playbook = parsed?;
        if playbook.name.is_none() {
            playbook.name = canonical
                .file_stem()
                .map(|s| s.to_string_lossy().to_string());
        }
        Ok(playbook)
    }

    fn include(&mut self, target: &Yaml, at: &str) -> Result<Playbook, DocumentError> {
        let file = target
            .as_str()
            .ok_or_else(|| invalid(at, "'include' must be a file path"))?;
        let path = self.base_dir().join(file);
        self.load_file(&path, at)
    }

    /// Root document: a playbook, an include, or a single invocation
    fn document(&mut self, doc: &Yaml, at: &str) -> Result<Playbook, DocumentError> {
        let map = doc
            .as_mapping()
            .ok_or_else(|| invalid(at, "expected a mapping"))?;

        if map.contains_key("actions") {
            self.playbook(map, at)
        } else if map.contains_key("action") {
            Ok(Playbook::single(self.invocation(map, at)?))
        } else if let Some(target) = map.get("include") {
            self.include(target, at)
        } else {
            Err(invalid(at, "expected an 'actions' list or an 'action' name"))
        }
    }

    fn playbook(&mut self, map: &Mapping, at: &str) -> Result<Playbook, DocumentError> {
        check_keys(map, PLAYBOOK_KEYS, at)?;

        let steps = map
            .get("actions")
            .and_then(Yaml::as_sequence)
            .ok_or_else(|| invalid(at, "'actions' must be a list"))?
            .iter()
            .enumerate()
            .map(|(i, step)| self.step(step, &format!("{}.actions[{}]", at, i)))
            .collect::<Result<Vec<_>, _>>()?;

        let args = match map.get("args") {
            None | Some(Yaml::Null) => Vec::new(),
            Some(Yaml::Mapping(args)) => self.named_values(args, &format!("{}.args", at))?,
            Some(_) => return Err(invalid(at, "playbook 'args' must be a mapping")),
        };

        let scope = match map.get("scope") {
            None => Scope::default(),
            Some(value) => serde_yaml::from_value(value.clone())
                .map_err(|_| invalid(at, "'scope' must be 'shared' or 'isolated'"))?,
        };

        Ok(Playbook {
            name: opt_string(map, "name", at)?,
            description: opt_string(map, "description", at)?,
            scope,
            args,
            steps,
            output: opt_string(map, "output", at)?.map(strip_sigil),
            timeout_seconds: opt_u64(map, "timeout_seconds", at)?,
        })
    }

    fn step(&mut self, step: &Yaml, at: &str) -> Result<Step, DocumentError> {
        let map = step
            .as_mapping()
            .ok_or_else(|| invalid(at, "step must be a mapping"))?;

        if map.contains_key("action") {
            Ok(Step::Invoke(self.invocation(map, at)?))
        } else if map.contains_key("actions") {
            Ok(Step::Playbook(Arc::new(self.playbook(map, at)?)))
        } else if let Some(target) = map.get("include") {
            Ok(Step::Playbook(Arc::new(self.include(target, at)?)))
        } else {
            Err(invalid(at, "step needs an 'action', 'actions' or 'include' key"))
        }
    }

    fn invocation(&mut self, map: &Mapping, at: &str) -> Result<Invocation, DocumentError> {
        check_keys(map, INVOCATION_KEYS, at)?;

        let action = map
            .get("action")
            .and_then(Yaml::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| invalid(at, "'action' must be a non-empty string"))?
            .to_string();

        let args_at = format!("{}.args", at);
        let args = match map.get("args") {
            None | Some(Yaml::Null) => Args::default(),
            Some(Yaml::Mapping(named)) => Args::Named(self.named_values(named, &args_at)?),
            Some(Yaml::Sequence(items)) => Args::Positional(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| self.value(v, &format!("{}[{}]", args_at, i)))
                    .collect::<Result<_, _>>()?,
            ),
            Some(scalar) => Args::Positional(vec![self.value(scalar, &args_at)?]),
        };

        // `result` is accepted as an alias of `output`
        let output = match opt_string(map, "output", at)? {
            Some(name) => Some(name),
            None => opt_string(map, "result", at)?,
        };

        Ok(Invocation {
            action,
            args,
            output: output.map(strip_sigil),
            timeout_seconds: opt_u64(map, "timeout_seconds", at)?,
        })
    }

    fn named_values(
        &mut self,
        map: &Mapping,
        at: &str,
    ) -> Result<Vec<(String, ArgValue)>, DocumentError> {
        map.iter()
            .map(|(key, value)| {
                let key = key
                    .as_str()
                    .ok_or_else(|| invalid(at, "argument names must be strings"))?;
                let value = self.value(value, &format!("{}.{}", at, key))?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    fn value(&mut self, value: &Yaml, at: &str) -> Result<ArgValue, DocumentError> {
        match value {
            Yaml::Mapping(map) if map.contains_key("action") => {
                Ok(ArgValue::Invoke(Box::new(self.invocation(map, at)?)))
            }
            Yaml::Mapping(map) if map.contains_key("actions") => {
                Ok(ArgValue::Playbook(Arc::new(self.playbook(map, at)?)))
            }
            Yaml::Mapping(map) if map.len() == 1 && map.contains_key("include") => {
                let target = map.get("include").unwrap_or(&Yaml::Null);
                Ok(ArgValue::Playbook(Arc::new(self.include(target, at)?)))
            }
            Yaml::Mapping(map) => Ok(ArgValue::Map(self.named_values(map, at)?)),
            Yaml::Sequence(items) => Ok(ArgValue::List(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| self.value(v, &format!("{}[{}]", at, i)))
                    .collect::<Result<_, _>>()?,
            )),
            Yaml::String(s) => Ok(string_value(s)),
            Yaml::Tagged(_) => Err(invalid(at, "tagged YAML values are not supported")),
            scalar => serde_json::to_value(scalar)
                .map(ArgValue::Literal)
                .map_err(|e| invalid(at, e.to_string())),
        }
    }
}

/// `"$name"` is a variable reference, `"$$rest"` the literal `"$rest"`
fn string_value(s: &str) -> ArgValue {
    if let Some(rest) = s.strip_prefix("$$") {
        return ArgValue::Literal(Value::String(format!("${}", rest)));
    }
    match s.strip_prefix('$') {
        Some(name) if is_variable_name(name) => ArgValue::Variable(name.to_string()),
        _ => ArgValue::Literal(Value::String(s.to_string())),
    }
}

fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn strip_sigil(name: String) -> String {
    match name.strip_prefix('$') {
        Some(stripped) => stripped.to_string(),
        None => name,
    }
}

fn check_keys(map: &Mapping, allowed: &[&str], at: &str) -> Result<(), DocumentError> {
    for key in map.keys() {
        match key.as_str() {
            Some(k) if allowed.contains(&k) => {}
            Some(k) => return Err(invalid(at, format!("unknown key '{}'", k))),
            None => return Err(invalid(at, "keys must be strings")),
        }
    }
    Ok(())
}

fn opt_string(map: &Mapping, key: &str, at: &str) -> Result<Option<String>, DocumentError> {
    match map.get(key) {
        None | Some(Yaml::Null) => Ok(None),
        Some(Yaml::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(invalid(at, format!("'{}' must be a string", key))),
    }
}

fn opt_u64(map: &Mapping, key: &str, at: &str) -> Result<Option<u64>, DocumentError> {
    match map.get(key) {
        None | Some(Yaml::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| invalid(at, format!("'{}' must be a non-negative integer", key))),
    }
}
