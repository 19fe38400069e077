pub mod cascade;
pub mod diff;
pub mod graph;
pub mod id;
pub mod index;
pub mod instance;
pub mod lint;
pub mod model;
pub mod order;
pub mod variables;
pub mod wire;

pub use cascade::{RemovalSet, collect_batch_removal, collect_removal};
pub use diff::{ElementListDiff, diff_elements};
pub use graph::{ElementGraph, GraphError};
pub use id::{ElementId, LayoutId, PageId};
pub use index::{ElementIndexes, PageEntry, rebuild_indexes};
pub use instance::{
    PropSource, ResolvedProps, resolve_descendant_overrides, resolve_effective_props,
    resolve_instance_props,
};
pub use lint::{GraphDiagnostic, LintSeverity, lint_elements};
pub use model::*;
pub use order::{OrderUpdate, SortStrategy, compute_reorder_updates};
pub use variables::{
    DesignVariable, ResolvedVariable, VariableContext, VariableLookup, VariableSource,
    VariableTable, VariableValue, resolve_element_variables, resolve_variable_ref,
};
pub use wire::{ElementRecord, PatchRecord, WireError};
