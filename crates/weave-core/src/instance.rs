//! Master / instance prop resolution.
//!
//! Effective instance props layer `master.props` under the instance's
//! `overrides`. The `style` object merges key by key so one style property
//! can be overridden without dropping the rest. Descendant overrides apply
//! the same merge to one cloned child inside one instance.
//!
//! A dangling master never fails resolution; the element's own props are
//! used as-is.

use crate::graph::ElementGraph;
use crate::model::{Component, DescendantOverrides, Element, Props};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};

/// Where a resolved prop came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropSource {
    Master,
    Override,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProps {
    pub props: Props,
    /// Per top-level key. Empty when no master was applied.
    pub sources: BTreeMap<String, PropSource>,
}

/// Merge `patch` over `base`. `style` objects merge one level deep; every
/// other key is replaced. `touched` sees each key the patch wrote.
fn merge_over(base: &mut Props, patch: &Props, mut touched: impl FnMut(&str)) {
    for (key, value) in patch {
        if key == "style"
            && let Value::Object(patch_style) = value
            && let Some(Value::Object(base_style)) = base.get_mut(key)
        {
            for (k, v) in patch_style {
                base_style.insert(k.clone(), v.clone());
            }
        } else {
            base.insert(key.clone(), value.clone());
        }
        touched(key);
    }
}

/// Resolve an instance's effective props against its master.
#[must_use]
pub fn resolve_instance_props(instance: &Element, master: Option<&Element>) -> ResolvedProps {
    let (Some(Component::Instance { overrides, .. }), Some(master)) = (&instance.component, master)
    else {
        return ResolvedProps {
            props: instance.props.clone(),
            sources: BTreeMap::new(),
        };
    };

    let mut props = master.props.clone();
    let mut sources: BTreeMap<String, PropSource> = props
        .keys()
        .map(|k| (k.clone(), PropSource::Master))
        .collect();
    merge_over(&mut props, overrides, |key| {
        sources.insert(key.to_string(), PropSource::Override);
    });
    ResolvedProps { props, sources }
}

/// Apply a descendant override to one cloned child. The child's own id is
/// looked up first, then the master element it was cloned from.
pub fn resolve_descendant_overrides<'a>(
    child: &'a Element,
    descendants: &DescendantOverrides,
) -> Cow<'a, Props> {
    let patch = descendants
        .get(&child.id)
        .or_else(|| child.origin_id.and_then(|origin| descendants.get(&origin)));
    match patch {
        Some(patch) if !patch.is_empty() => {
            let mut props = child.props.clone();
            merge_over(&mut props, patch, |_| {});
            Cow::Owned(props)
        }
        _ => Cow::Borrowed(&child.props),
    }
}

/// The props a renderer should see for `el`: instance resolution if `el`
/// is an instance, then the descendant overrides of the nearest enclosing
/// instance.
pub fn resolve_effective_props<'a>(graph: &ElementGraph, el: &'a Element) -> Cow<'a, Props> {
    let mut props: Cow<'a, Props> = Cow::Borrowed(&el.props);

    if let Some(master_id) = el.master_id() {
        match graph.get(master_id).filter(|m| m.is_master()) {
            Some(master) => props = Cow::Owned(resolve_instance_props(el, Some(master)).props),
            None => log::debug!("instance {} has dangling master {master_id}", el.id),
        }
    }

    let mut seen = HashSet::new();
    let mut current = el.parent_id;
    while let Some(id) = current {
        if !seen.insert(id) {
            break;
        }
        let Some(ancestor) = graph.get(id) else {
            break;
        };
        if let Some(Component::Instance { descendants, .. }) = &ancestor.component {
            let patch = descendants
                .get(&el.id)
                .or_else(|| el.origin_id.and_then(|origin| descendants.get(&origin)));
            if let Some(patch) = patch {
                merge_over(props.to_mut(), patch, |_| {});
            }
            break;
        }
        current = ancestor.parent_id;
    }

    props
}

// ─── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{ElementId, PageId};
    use crate::model::Owner;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn id(s: &str) -> ElementId {
        ElementId::intern(s)
    }

    fn owner() -> Owner {
        Owner::Page(PageId::intern("inst_page"))
    }

    fn obj(v: Value) -> Props {
        match v {
            Value::Object(map) => map,
            _ => Props::new(),
        }
    }

    fn master() -> Element {
        Element::new(id("inst_master"), "Card", owner())
            .with_component(Component::Master { name: Some("Card".into()) })
            .with_props(obj(json!({
                "title": "Hello",
                "style": {"color": "red", "padding": 4}
            })))
    }

    fn instance(overrides: Value) -> Element {
        Element::new(id("inst_copy"), "Card", owner()).with_component(Component::Instance {
            master_id: id("inst_master"),
            overrides: obj(overrides),
            descendants: DescendantOverrides::new(),
            name: None,
        })
    }

    #[test]
    fn empty_overrides_yield_master_props() {
        let m = master();
        let resolved = resolve_instance_props(&instance(json!({})), Some(&m));
        assert_eq!(resolved.props, m.props);
        assert!(resolved.sources.values().all(|s| *s == PropSource::Master));
    }

    #[test]
    fn style_merges_shallowly() {
        let m = master();
        let resolved = resolve_instance_props(
            &instance(json!({"style": {"color": "blue"}, "title": "Hi"})),
            Some(&m),
        );
        assert_eq!(
            Value::Object(resolved.props),
            json!({"title": "Hi", "style": {"color": "blue", "padding": 4}})
        );
        assert_eq!(resolved.sources["title"], PropSource::Override);
        assert_eq!(resolved.sources["style"], PropSource::Override);
    }

    #[test]
    fn dangling_master_returns_instance_props() {
        let inst = instance(json!({"title": "x"})).with_prop("own", 1);
        let resolved = resolve_instance_props(&inst, None);
        assert_eq!(resolved.props, inst.props);
        assert!(resolved.sources.is_empty());
    }

    #[test]
    fn descendant_override_by_origin() {
        let mut child = Element::new(id("inst_clone_label"), "Text", owner())
            .with_props(obj(json!({"children": "Label", "style": {"color": "red"}})));
        child.origin_id = Some(id("inst_master_label"));

        let mut descendants = DescendantOverrides::new();
        assert!(matches!(
            resolve_descendant_overrides(&child, &descendants),
            Cow::Borrowed(_)
        ));

        descendants.insert(id("inst_master_label"), obj(json!({"style": {"weight": 700}})));
        let props = resolve_descendant_overrides(&child, &descendants);
        assert_eq!(
            Value::Object(props.into_owned()),
            json!({"children": "Label", "style": {"color": "red", "weight": 700}})
        );

        // The clone's own id takes precedence.
        descendants.insert(id("inst_clone_label"), obj(json!({"children": "Own"})));
        let props = resolve_descendant_overrides(&child, &descendants);
        assert_eq!(props.get("children"), Some(&json!("Own")));
    }

    #[test]
    fn effective_props_for_nested_clone() {
        let m = master();
        let mut inst = instance(json!({"title": "Inst"}));
        if let Some(Component::Instance { descendants, .. }) = &mut inst.component {
            descendants.insert(id("inst_nested"), obj(json!({"children": "Patched"})));
        }
        let nested = Element::new(id("inst_nested"), "Text", owner())
            .with_parent(id("inst_copy"))
            .with_prop("children", "Raw");
        let graph = ElementGraph::from_elements(vec![m, inst, nested]);

        let nested = graph.get(id("inst_nested")).unwrap();
        assert_eq!(
            resolve_effective_props(&graph, nested).get("children"),
            Some(&json!("Patched"))
        );
        let inst = graph.get(id("inst_copy")).unwrap();
        assert_eq!(
            resolve_effective_props(&graph, inst).get("title"),
            Some(&json!("Inst"))
        );
    }
}
