//! Element entity model for builder documents.
//!
//! A document is a forest of `Element`s stored as a flat list with parent
//! pointers (arena + id references). Each element belongs to exactly one
//! owner scope, a page or a reusable layout. Props are an open JSON object;
//! only a handful of well-known keys (`tabId`, `title`, `label`, `children`,
//! `style`) are interpreted by the core.

use crate::id::{ElementId, LayoutId, PageId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use smallvec::SmallVec;
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Open component configuration. May contain `$--name` variable references.
pub type Props = Map<String, Value>;

/// Per-descendant prop overrides inside one instance, keyed by element id.
pub type DescendantOverrides = BTreeMap<ElementId, Props>;

// ─── Owner scope ─────────────────────────────────────────────────────────

/// The page or layout an element belongs to. Never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Owner {
    Page(PageId),
    Layout(LayoutId),
}

impl Owner {
    pub fn page_id(&self) -> Option<PageId> {
        match self {
            Owner::Page(id) => Some(*id),
            Owner::Layout(_) => None,
        }
    }

    pub fn layout_id(&self) -> Option<LayoutId> {
        match self {
            Owner::Layout(id) => Some(*id),
            Owner::Page(_) => None,
        }
    }
}

// ─── Components (master / instance) ──────────────────────────────────────

/// Role tag as it appears at the persistence boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentRole {
    Master,
    Instance,
}

impl ComponentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentRole::Master => "master",
            ComponentRole::Instance => "instance",
        }
    }
}

/// Reusable-component membership. An instance cannot also be a master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Component {
    /// A reusable template.
    Master { name: Option<String> },
    /// A placed copy of a master. Effective props are
    /// `master.props ⊕ overrides`; `descendants` patches cloned children.
    Instance {
        master_id: ElementId,
        overrides: Props,
        descendants: DescendantOverrides,
        name: Option<String>,
    },
}

impl Component {
    pub fn role(&self) -> ComponentRole {
        match self {
            Component::Master { .. } => ComponentRole::Master,
            Component::Instance { .. } => ComponentRole::Instance,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Component::Master { name } | Component::Instance { name, .. } => name.as_deref(),
        }
    }

    /// A fresh instance of `master_id` with no overrides.
    pub fn instance_of(master_id: ElementId) -> Self {
        Component::Instance {
            master_id,
            overrides: Props::new(),
            descendants: DescendantOverrides::new(),
            name: None,
        }
    }
}

// ─── Well-known tags ─────────────────────────────────────────────────────

pub mod tags {
    pub const BODY: &str = "Body";
    pub const GROUP: &str = "Group";
    pub const TABS: &str = "Tabs";
    pub const TAB: &str = "Tab";
    pub const PANEL: &str = "Panel";
    pub const TABLE: &str = "Table";
    pub const TABLE_HEADER: &str = "TableHeader";
    pub const TABLE_BODY: &str = "TableBody";
    pub const COLUMN_GROUP: &str = "ColumnGroup";
    pub const COLUMN: &str = "Column";
    pub const ROW: &str = "Row";
    pub const CELL: &str = "Cell";

    /// Parents whose children are sorted by display text on ties.
    pub const COLLECTION_PARENTS: &[&str] = &[
        "ListBox",
        "GridList",
        "Menu",
        "ComboBox",
        "Select",
        "Tree",
        "ToggleButtonGroup",
    ];

    /// Items re-indexed by their own collection logic after removal.
    pub const COLLECTION_ITEMS: &[&str] = &[
        "Tab",
        "Panel",
        "ListBoxItem",
        "GridListItem",
        "MenuItem",
        "ComboBoxItem",
        "SelectItem",
        "TreeItem",
        "ToggleButton",
    ];
}

/// The slice of component types the core has rules for. Everything else is
/// `Other` and passes through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Body,
    Tabs,
    Tab,
    Panel,
    Table,
    TableHeader,
    TableBody,
    ColumnGroup,
    Column,
    Row,
    Cell,
    Collection,
    Other,
}

impl TagKind {
    pub fn of(tag: &str) -> Self {
        match tag {
            tags::TABS => TagKind::Tabs,
            tags::TAB => TagKind::Tab,
            tags::PANEL => TagKind::Panel,
            tags::TABLE => TagKind::Table,
            tags::TABLE_HEADER => TagKind::TableHeader,
            tags::TABLE_BODY => TagKind::TableBody,
            tags::COLUMN_GROUP => TagKind::ColumnGroup,
            tags::COLUMN => TagKind::Column,
            tags::ROW => TagKind::Row,
            tags::CELL => TagKind::Cell,
            t if t.eq_ignore_ascii_case(tags::BODY) => TagKind::Body,
            t if tags::COLLECTION_PARENTS.contains(&t) => TagKind::Collection,
            _ => TagKind::Other,
        }
    }
}

/// Map legacy tag spellings onto their current names.
pub fn normalize_tag(tag: &str) -> &str {
    match tag {
        "body" | "BODY" => tags::BODY,
        "TabPanel" => tags::PANEL,
        "TableColumn" => tags::COLUMN,
        "TableRow" => tags::ROW,
        "TableCell" => tags::CELL,
        "TableHeaderRow" => tags::TABLE_HEADER,
        other => other,
    }
}

pub fn is_collection_item(tag: &str) -> bool {
    tags::COLLECTION_ITEMS.contains(&tag)
}

// ─── Prop helpers ────────────────────────────────────────────────────────

/// Read a prop as text: strings as-is, numbers and booleans formatted,
/// anything else empty.
pub fn prop_text<'a>(props: &'a Props, key: &str) -> Cow<'a, str> {
    match props.get(key) {
        Some(Value::String(s)) => Cow::Borrowed(s.as_str()),
        Some(Value::Number(n)) => Cow::Owned(n.to_string()),
        Some(Value::Bool(b)) => Cow::Owned(b.to_string()),
        _ => Cow::Borrowed(""),
    }
}

/// Display text used for ordering tie-breaks: `children`, then `title`,
/// then `label`; the first non-empty wins.
pub fn display_text(props: &Props) -> Cow<'_, str> {
    for key in ["children", "title", "label"] {
        let text = prop_text(props, key);
        if !text.is_empty() {
            return text;
        }
    }
    Cow::Borrowed("")
}

/// The `style` sub-map, if present and an object.
pub fn style_of(props: &Props) -> Option<&Props> {
    props.get("style").and_then(Value::as_object)
}

// ─── Element ─────────────────────────────────────────────────────────────

/// A node in the document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    pub tag: String,
    #[serde(default)]
    pub props: Props,
    pub parent_id: Option<ElementId>,
    pub owner: Owner,
    /// Sibling rank within `(parent_id, owner)`. `None` until placed.
    pub order_num: Option<u32>,
    pub component: Option<Component>,
    /// Variable names this element's props reference.
    #[serde(default)]
    pub variable_bindings: SmallVec<[String; 2]>,
    pub custom_id: Option<String>,
    pub data_binding: Option<Value>,
    /// For clones made by instance creation: the master-subtree element
    /// this one was copied from.
    pub origin_id: Option<ElementId>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl Element {
    pub fn new(id: ElementId, tag: impl Into<String>, owner: Owner) -> Self {
        Self {
            id,
            tag: tag.into(),
            props: Props::new(),
            parent_id: None,
            owner,
            order_num: None,
            component: None,
            variable_bindings: SmallVec::new(),
            custom_id: None,
            data_binding: None,
            origin_id: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_parent(mut self, parent: ElementId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    pub fn with_order(mut self, order_num: u32) -> Self {
        self.order_num = Some(order_num);
        self
    }

    pub fn with_prop(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.props.insert(key.to_string(), value.into());
        self
    }

    pub fn with_props(mut self, props: Props) -> Self {
        self.props = props;
        self
    }

    pub fn with_component(mut self, component: Component) -> Self {
        self.component = Some(component);
        self
    }

    pub fn kind(&self) -> TagKind {
        TagKind::of(&self.tag)
    }

    pub fn is_body(&self) -> bool {
        self.kind() == TagKind::Body
    }

    pub fn is_master(&self) -> bool {
        matches!(self.component, Some(Component::Master { .. }))
    }

    pub fn is_instance(&self) -> bool {
        matches!(self.component, Some(Component::Instance { .. }))
    }

    pub fn master_id(&self) -> Option<ElementId> {
        match &self.component {
            Some(Component::Instance { master_id, .. }) => Some(*master_id),
            _ => None,
        }
    }

    pub fn role(&self) -> Option<ComponentRole> {
        self.component.as_ref().map(Component::role)
    }

    /// Order used for sorting; missing counts as 0.
    pub fn order_key(&self) -> u32 {
        self.order_num.unwrap_or(0)
    }

    pub fn page_id(&self) -> Option<PageId> {
        self.owner.page_id()
    }

    pub fn layout_id(&self) -> Option<LayoutId> {
        self.owner.layout_id()
    }

    /// Whether `other` shares this element's parent and owner scope.
    pub fn is_sibling_of(&self, other: &Element) -> bool {
        self.parent_id == other.parent_id && self.owner == other.owner
    }

    pub fn prop_text(&self, key: &str) -> Cow<'_, str> {
        prop_text(&self.props, key)
    }

    /// `tabId` prop, if set and non-empty.
    pub fn tab_id(&self) -> Option<Cow<'_, str>> {
        let id = self.prop_text("tabId");
        (!id.is_empty()).then_some(id)
    }

    /// Rewrite every occurrence of `old` in this element: its own id, the
    /// parent pointer, `origin_id`, and an instance's master reference and
    /// descendant override key.
    pub fn rename_references(&mut self, old: ElementId, new: ElementId) {
        if self.id == old {
            self.id = new;
        }
        if self.parent_id == Some(old) {
            self.parent_id = Some(new);
        }
        if self.origin_id == Some(old) {
            self.origin_id = Some(new);
        }
        if let Some(Component::Instance {
            master_id,
            descendants,
            ..
        }) = &mut self.component
        {
            if *master_id == old {
                *master_id = new;
            }
            if let Some(patch) = descendants.remove(&old) {
                descendants.insert(new, patch);
            }
        }
    }

    /// Apply a partial update. Returns whether anything changed.
    pub fn apply_patch(&mut self, patch: &ElementPatch) -> bool {
        let before = self.clone();
        if let Some(tag) = &patch.tag {
            self.tag.clone_from(tag);
        }
        if let Some(props) = &patch.props {
            self.props.clone_from(props);
        }
        if let Some(parent_id) = patch.parent_id {
            self.parent_id = parent_id;
        }
        if let Some(order_num) = patch.order_num {
            self.order_num = Some(order_num);
        }
        if let Some(component) = &patch.component {
            self.component.clone_from(component);
        }
        if let Some(bindings) = &patch.variable_bindings {
            self.variable_bindings.clone_from(bindings);
        }
        if let Some(custom_id) = &patch.custom_id {
            self.custom_id.clone_from(custom_id);
        }
        if let Some(data_binding) = &patch.data_binding {
            self.data_binding.clone_from(data_binding);
        }
        *self != before
    }
}

/// A partial element update. `None` leaves the field untouched; nested
/// `Option`s allow clearing nullable fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementPatch {
    pub tag: Option<String>,
    pub props: Option<Props>,
    pub parent_id: Option<Option<ElementId>>,
    pub order_num: Option<u32>,
    pub component: Option<Option<Component>>,
    pub variable_bindings: Option<SmallVec<[String; 2]>>,
    pub custom_id: Option<Option<String>>,
    pub data_binding: Option<Option<Value>>,
}

impl ElementPatch {
    pub fn props(props: Props) -> Self {
        Self {
            props: Some(props),
            ..Default::default()
        }
    }

    pub fn order(order_num: u32) -> Self {
        Self {
            order_num: Some(order_num),
            ..Default::default()
        }
    }

    pub fn parent(parent_id: Option<ElementId>) -> Self {
        Self {
            parent_id: Some(parent_id),
            ..Default::default()
        }
    }

    /// Every mutable field of `element`, for full-record re-sends.
    pub fn full(element: &Element) -> Self {
        Self {
            tag: Some(element.tag.clone()),
            props: Some(element.props.clone()),
            parent_id: Some(element.parent_id),
            order_num: element.order_num,
            component: Some(element.component.clone()),
            variable_bindings: Some(element.variable_bindings.clone()),
            custom_id: Some(element.custom_id.clone()),
            data_binding: Some(element.data_binding.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether the patch touches tree structure (parent or order).
    pub fn is_structural(&self) -> bool {
        self.parent_id.is_some() || self.order_num.is_some()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page() -> Owner {
        Owner::Page(PageId::intern("model_page"))
    }

    #[test]
    fn structural_equality_compares_props_deeply() {
        let id = ElementId::intern("eq_btn");
        let a = Element::new(id, "Button", page()).with_prop("style", json!({"color": "red"}));
        let b = Element::new(id, "Button", page()).with_prop("style", json!({"color": "red"}));
        assert_eq!(a, b);
        let c = b.clone().with_prop("style", json!({"color": "blue"}));
        assert_ne!(a, c);
    }

    #[test]
    fn display_text_priority() {
        let el = Element::new(ElementId::intern("dt"), "MenuItem", page())
            .with_prop("label", "Label")
            .with_prop("title", "Title");
        assert_eq!(display_text(&el.props), "Title");
        let el = el.with_prop("children", "Child");
        assert_eq!(display_text(&el.props), "Child");
    }

    #[test]
    fn prop_text_formats_numbers() {
        let el = Element::new(ElementId::intern("num"), "Tab", page()).with_prop("tabId", 7);
        assert_eq!(el.tab_id().as_deref(), Some("7"));
        let el = el.with_prop("tabId", "");
        assert_eq!(el.tab_id(), None);
    }

    #[test]
    fn tag_kind_classification() {
        assert_eq!(TagKind::of("body"), TagKind::Body);
        assert_eq!(TagKind::of("Body"), TagKind::Body);
        assert_eq!(TagKind::of("ListBox"), TagKind::Collection);
        assert_eq!(TagKind::of("Button"), TagKind::Other);
        assert_eq!(normalize_tag("TabPanel"), "Panel");
        assert_eq!(normalize_tag("Button"), "Button");
    }

    #[test]
    fn apply_patch_reports_changes() {
        let mut el = Element::new(ElementId::intern("patched"), "Box", page()).with_order(0);
        assert!(!el.apply_patch(&ElementPatch::order(0)));
        assert!(el.apply_patch(&ElementPatch::order(3)));
        assert_eq!(el.order_num, Some(3));

        let parent = ElementId::intern("patched_parent");
        assert!(el.apply_patch(&ElementPatch::parent(Some(parent))));
        assert_eq!(el.parent_id, Some(parent));
        assert!(el.apply_patch(&ElementPatch::parent(None)));
        assert_eq!(el.parent_id, None);
    }

    #[test]
    fn instance_role_accessors() {
        let master = ElementId::intern("role_master");
        let el = Element::new(ElementId::intern("role_inst"), "Card", page())
            .with_component(Component::instance_of(master));
        assert!(el.is_instance());
        assert!(!el.is_master());
        assert_eq!(el.master_id(), Some(master));
        assert_eq!(el.role().map(|r| r.as_str()), Some("instance"));
    }
}
