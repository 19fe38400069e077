//! Persistence wire format: snake_case records exchanged with the remote
//! backend.
//!
//! In memory the component role is a sum type and the owner is an enum; on
//! the wire both flatten into nullable columns (`component_role`,
//! `master_id`, `page_id`, `layout_id`, ...). Decoding re-checks the
//! invariants the in-memory types enforce by construction.

use crate::id::{ElementId, LayoutId, PageId};
use crate::model::{Component, ComponentRole, DescendantOverrides, Element, ElementPatch, Owner, Props};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("record `{0}` sets both page_id and layout_id")]
    OwnerConflict(String),
    #[error("record `{0}` has neither page_id nor layout_id")]
    MissingOwner(String),
    #[error("instance record `{0}` has no master_id")]
    MissingMaster(String),
    #[error("record `{id}` has unknown component_role `{role}`")]
    UnknownRole { id: String, role: String },
    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Prop keys that only exist at runtime and never leave the process.
const RUNTIME_KEYS: &[&str] = &["computedStyle", "computedLayout"];

pub fn is_runtime_key(key: &str) -> bool {
    key.starts_with("__") || RUNTIME_KEYS.contains(&key)
}

/// Drop runtime-only keys (top level and inside `style`). Returns the
/// dropped key names.
pub fn strip_runtime_keys(props: &mut Props) -> Vec<String> {
    let mut dropped: Vec<String> = props.keys().filter(|k| is_runtime_key(k)).cloned().collect();
    props.retain(|k, _| !is_runtime_key(k));
    if let Some(Value::Object(style)) = props.get_mut("style") {
        let nested: Vec<String> = style.keys().filter(|k| is_runtime_key(k)).cloned().collect();
        style.retain(|k, _| !is_runtime_key(k));
        dropped.extend(nested.into_iter().map(|k| format!("style.{k}")));
    }
    dropped
}

// ─── Full records ────────────────────────────────────────────────────────

/// One element row as stored by the remote backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRecord {
    pub id: ElementId,
    pub tag: String,
    #[serde(default)]
    pub props: Props,
    #[serde(default)]
    pub parent_id: Option<ElementId>,
    #[serde(default)]
    pub page_id: Option<PageId>,
    #[serde(default)]
    pub layout_id: Option<LayoutId>,
    #[serde(default)]
    pub order_num: Option<u32>,
    #[serde(default)]
    pub component_role: Option<String>,
    #[serde(default)]
    pub master_id: Option<ElementId>,
    #[serde(default)]
    pub component_name: Option<String>,
    #[serde(default)]
    pub overrides: Option<Props>,
    #[serde(default)]
    pub descendants: Option<DescendantOverrides>,
    #[serde(default)]
    pub variable_bindings: Option<Vec<String>>,
    #[serde(default)]
    pub custom_id: Option<String>,
    #[serde(default)]
    pub data_binding: Option<Value>,
    #[serde(default)]
    pub origin_id: Option<ElementId>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// `component_role`, `master_id`, `component_name`, `overrides`,
/// `descendants`.
type ComponentColumns = (
    Option<String>,
    Option<ElementId>,
    Option<String>,
    Option<Props>,
    Option<DescendantOverrides>,
);

fn component_columns(component: Option<&Component>) -> ComponentColumns {
    match component {
        None => (None, None, None, None, None),
        Some(Component::Master { name }) => (
            Some(ComponentRole::Master.as_str().to_string()),
            None,
            name.clone(),
            None,
            None,
        ),
        Some(Component::Instance {
            master_id,
            overrides,
            descendants,
            name,
        }) => (
            Some(ComponentRole::Instance.as_str().to_string()),
            Some(*master_id),
            name.clone(),
            Some(overrides.clone()),
            Some(descendants.clone()),
        ),
    }
}

impl ElementRecord {
    pub fn from_element(el: &Element) -> Self {
        let (component_role, master_id, component_name, overrides, descendants) =
            component_columns(el.component.as_ref());

        Self {
            id: el.id,
            tag: el.tag.clone(),
            props: el.props.clone(),
            parent_id: el.parent_id,
            page_id: el.page_id(),
            layout_id: el.layout_id(),
            order_num: el.order_num,
            component_role,
            master_id,
            component_name,
            overrides,
            descendants,
            variable_bindings: (!el.variable_bindings.is_empty())
                .then(|| el.variable_bindings.to_vec()),
            custom_id: el.custom_id.clone(),
            data_binding: el.data_binding.clone(),
            origin_id: el.origin_id,
            created_at: el.created_at.clone(),
            updated_at: el.updated_at.clone(),
        }
    }

    pub fn into_element(self) -> Result<Element, WireError> {
        let owner = match (self.page_id, self.layout_id) {
            (Some(page), None) => Owner::Page(page),
            (None, Some(layout)) => Owner::Layout(layout),
            (Some(_), Some(_)) => return Err(WireError::OwnerConflict(self.id.to_string())),
            (None, None) => return Err(WireError::MissingOwner(self.id.to_string())),
        };

        let component = match self.component_role.as_deref() {
            None => None,
            Some("master") => Some(Component::Master {
                name: self.component_name,
            }),
            Some("instance") => {
                let master_id = self
                    .master_id
                    .ok_or_else(|| WireError::MissingMaster(self.id.to_string()))?;
                Some(Component::Instance {
                    master_id,
                    overrides: self.overrides.unwrap_or_default(),
                    descendants: self.descendants.unwrap_or_default(),
                    name: self.component_name,
                })
            }
            Some(other) => {
                return Err(WireError::UnknownRole {
                    id: self.id.to_string(),
                    role: other.to_string(),
                });
            }
        };

        Ok(Element {
            id: self.id,
            tag: self.tag,
            props: self.props,
            parent_id: self.parent_id,
            owner,
            order_num: self.order_num,
            component,
            variable_bindings: self
                .variable_bindings
                .map(SmallVec::from_vec)
                .unwrap_or_default(),
            custom_id: self.custom_id,
            data_binding: self.data_binding,
            origin_id: self.origin_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    /// Decode a JSON row.
    pub fn from_json(value: Value) -> Result<Self, WireError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_json(&self) -> Result<Value, WireError> {
        Ok(serde_json::to_value(self)?)
    }
}

// ─── Partial records ─────────────────────────────────────────────────────

/// A partial update row. Absent fields are omitted; cleared fields are
/// sent as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatchRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub props: Option<Props>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Option<ElementId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_num: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_role: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_id: Option<Option<ElementId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_name: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overrides: Option<Option<Props>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descendants: Option<Option<DescendantOverrides>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_bindings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_binding: Option<Option<Value>>,
}

impl PatchRecord {
    pub fn from_patch(patch: &ElementPatch) -> Self {
        let mut record = PatchRecord {
            tag: patch.tag.clone(),
            props: patch.props.clone(),
            parent_id: patch.parent_id,
            order_num: patch.order_num,
            variable_bindings: patch.variable_bindings.as_ref().map(|b| b.to_vec()),
            custom_id: patch.custom_id.clone(),
            data_binding: patch.data_binding.clone(),
            ..Default::default()
        };
        if let Some(component) = &patch.component {
            let (role, master_id, name, overrides, descendants) =
                component_columns(component.as_ref());
            record.component_role = Some(role);
            record.master_id = Some(master_id);
            record.component_name = Some(name);
            record.overrides = Some(overrides);
            record.descendants = Some(descendants);
        }
        record
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// The JSON object to merge into a stored row.
    pub fn to_json_map(&self) -> Result<serde_json::Map<String, Value>, WireError> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Ok(serde_json::Map::new()),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────
