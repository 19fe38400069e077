//! Design-variable references: `$--name` strings in props resolved against
//! a theme-aware variable table.
//!
//! Resolution order for one reference: the value set for the active theme,
//! then the variable's theme-agnostic default, then the caller's fallback.

use crate::model::Props;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use winnow::combinator::{eof, preceded, terminated};
use winnow::prelude::*;
use winnow::token::take_while;

// ─── Variable table ──────────────────────────────────────────────────────

/// One value of a variable, scoped to a theme (`None` = default).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableValue {
    pub theme_id: Option<String>,
    pub value: Value,
}

/// A named, theme-aware symbolic value. Holds at most one value per theme
/// and at most one default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignVariable {
    pub name: String,
    values: Vec<VariableValue>,
}

impl DesignVariable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }

    /// Builder form of [`DesignVariable::set_value`].
    pub fn with_value(mut self, theme_id: Option<&str>, value: impl Into<Value>) -> Self {
        self.set_value(theme_id, value);
        self
    }

    /// Set the value for a theme, replacing any existing one.
    pub fn set_value(&mut self, theme_id: Option<&str>, value: impl Into<Value>) {
        let value = value.into();
        match self
            .values
            .iter_mut()
            .find(|v| v.theme_id.as_deref() == theme_id)
        {
            Some(existing) => existing.value = value,
            None => self.values.push(VariableValue {
                theme_id: theme_id.map(str::to_string),
                value,
            }),
        }
    }

    pub fn remove_value(&mut self, theme_id: Option<&str>) -> Option<Value> {
        let pos = self
            .values
            .iter()
            .position(|v| v.theme_id.as_deref() == theme_id)?;
        Some(self.values.remove(pos).value)
    }

    pub fn value_for(&self, theme_id: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|v| v.theme_id.as_deref() == Some(theme_id))
            .map(|v| &v.value)
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.values
            .iter()
            .find(|v| v.theme_id.is_none())
            .map(|v| &v.value)
    }

    pub fn values(&self) -> &[VariableValue] {
        &self.values
    }
}

/// Anything that can look a variable up by name.
pub trait VariableLookup {
    fn find_variable(&self, name: &str) -> Option<&DesignVariable>;
}

impl VariableLookup for [DesignVariable] {
    fn find_variable(&self, name: &str) -> Option<&DesignVariable> {
        self.iter().find(|v| v.name == name)
    }
}

impl VariableLookup for Vec<DesignVariable> {
    fn find_variable(&self, name: &str) -> Option<&DesignVariable> {
        self.as_slice().find_variable(name)
    }
}

/// Name-indexed variable table for O(1) lookups.
#[derive(Debug, Clone, Default)]
pub struct VariableTable {
    by_name: HashMap<String, DesignVariable>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a variable.
    pub fn insert(&mut self, variable: DesignVariable) -> Option<DesignVariable> {
        self.by_name.insert(variable.name.clone(), variable)
    }

    pub fn remove(&mut self, name: &str) -> Option<DesignVariable> {
        self.by_name.remove(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut DesignVariable> {
        self.by_name.get_mut(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl FromIterator<DesignVariable> for VariableTable {
    fn from_iter<I: IntoIterator<Item = DesignVariable>>(iter: I) -> Self {
        let mut table = Self::new();
        for variable in iter {
            table.insert(variable);
        }
        table
    }
}

impl VariableLookup for VariableTable {
    fn find_variable(&self, name: &str) -> Option<&DesignVariable> {
        self.by_name.get(name)
    }
}

// ─── Resolution ──────────────────────────────────────────────────────────

/// Which layer a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableSource {
    Theme,
    Default,
    Fallback,
}

/// Resolution inputs supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    pub active_theme_id: Option<String>,
    /// Used when the variable is missing or has no applicable value.
    pub fallback: Option<Value>,
}

impl VariableContext {
    pub fn with_theme(theme_id: impl Into<String>) -> Self {
        Self {
            active_theme_id: Some(theme_id.into()),
            fallback: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedVariable {
    pub value: Value,
    pub source: VariableSource,
    pub theme_id: Option<String>,
}

fn variable_ref<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    terminated(
        preceded(
            "$--",
            take_while(1.., |c: char| {
                c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/')
            }),
        ),
        eof,
    )
    .parse_next(input)
}

/// Extract the variable name from a `$--name` reference string.
pub fn parse_variable_ref(s: &str) -> Option<&str> {
    let mut input = s;
    variable_ref(&mut input).ok()
}

/// Resolve a single `$--name` reference.
///
/// Returns `None` only if no applicable value exists and the context has no
/// fallback.
pub fn resolve_variable_ref<L: VariableLookup + ?Sized>(
    reference: &str,
    variables: &L,
    context: &VariableContext,
) -> Option<ResolvedVariable> {
    let found = parse_variable_ref(reference).and_then(|name| variables.find_variable(name));

    if let Some(variable) = found {
        if let Some(theme) = context.active_theme_id.as_deref()
            && let Some(value) = variable.value_for(theme)
        {
            return Some(ResolvedVariable {
                value: value.clone(),
                source: VariableSource::Theme,
                theme_id: Some(theme.to_string()),
            });
        }
        if let Some(value) = variable.default_value() {
            return Some(ResolvedVariable {
                value: value.clone(),
                source: VariableSource::Default,
                theme_id: None,
            });
        }
    }

    context.fallback.as_ref().map(|value| ResolvedVariable {
        value: value.clone(),
        source: VariableSource::Fallback,
        theme_id: None,
    })
}

/// Replace every `$--name` string in `props` (and one level into `style`)
/// with its resolved value.
///
/// Returns `Cow::Borrowed(props)` when nothing was replaced, so memoized
/// consumers can skip work on identity.
pub fn resolve_element_variables<'a, L: VariableLookup + ?Sized>(
    props: &'a Props,
    variables: &L,
    context: &VariableContext,
) -> Cow<'a, Props> {
    let mut resolved: Option<Props> = None;

    for (key, value) in props {
        if key == "style"
            && let Value::Object(style) = value
        {
            if let Cow::Owned(style) = resolve_flat(style, variables, context) {
                resolved
                    .get_or_insert_with(|| props.clone())
                    .insert(key.clone(), Value::Object(style));
            }
            continue;
        }
        if let Some(replacement) = resolve_value(value, variables, context) {
            resolved
                .get_or_insert_with(|| props.clone())
                .insert(key.clone(), replacement);
        }
    }

    match resolved {
        Some(props) => Cow::Owned(props),
        None => Cow::Borrowed(props),
    }
}

fn resolve_flat<'a, L: VariableLookup + ?Sized>(
    map: &'a Props,
    variables: &L,
    context: &VariableContext,
) -> Cow<'a, Props> {
    let mut resolved: Option<Props> = None;
    for (key, value) in map {
        if let Some(replacement) = resolve_value(value, variables, context) {
            resolved
                .get_or_insert_with(|| map.clone())
                .insert(key.clone(), replacement);
        }
    }
    match resolved {
        Some(map) => Cow::Owned(map),
        None => Cow::Borrowed(map),
    }
}

fn resolve_value<L: VariableLookup + ?Sized>(
    value: &Value,
    variables: &L,
    context: &VariableContext,
) -> Option<Value> {
    let s = value.as_str()?;
    parse_variable_ref(s)?;
    resolve_variable_ref(s, variables, context).map(|r| r.value)
}

/// Every variable name referenced by `props` (top level and `style`),
/// in first-seen order without duplicates.
pub fn collect_variable_refs(props: &Props) -> Vec<&str> {
    fn visit<'p>(value: &'p Value, names: &mut Vec<&'p str>) {
        if let Some(name) = value.as_str().and_then(parse_variable_ref)
            && !names.contains(&name)
        {
            names.push(name);
        }
    }

    let mut names: Vec<&str> = Vec::new();
    for (key, value) in props {
        if key == "style"
            && let Value::Object(style) = value
        {
            for nested in style.values() {
                visit(nested, &mut names);
            }
            continue;
        }
        visit(value, &mut names);
    }
    names
}

// ─── Tests ───────────────────────────────────────────────────────────────
