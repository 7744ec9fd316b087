//! `${...}` expressions over named bindings.
//!
//! Every variable in an expression has the form `binding.path`: the part
//! before the first `.` names a binding, the rest is passed to
//! [`Component::property`](crate::component::Component::property) of its
//! instance. Resolved instances are cached per container, so each binding is
//! resolved once for all expressions that mention it.
//!
//! Evaluation itself is done by `evalexpr`.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use evalexpr::{ContextWithMutableVariables, HashMapContext, Node, Value};
use tracing::{debug, trace};

use crate::component::Properties;
use crate::context::ResolutionContext;
use crate::error::{MasnaError, Result};

/// Per-container cache of instances referenced by expressions.
#[derive(Default)]
pub struct ExpressionCache {
    roots: DashMap<String, Arc<dyn Properties>>,
}

impl ExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn contains(&self, root: &str) -> bool {
        self.roots.contains_key(root)
    }

    fn get(&self, root: &str) -> Option<Arc<dyn Properties>> {
        self.roots.get(root).map(|entry| entry.value().clone())
    }

    fn insert(&self, root: &str, properties: Arc<dyn Properties>) -> Arc<dyn Properties> {
        self.roots
            .entry(root.to_string())
            .or_insert(properties)
            .value()
            .clone()
    }
}

impl std::fmt::Debug for ExpressionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionCache")
            .field("roots", &self.roots.len())
            .finish()
    }
}

fn failure(code: &str, reason: impl Into<String>) -> MasnaError {
    MasnaError::Expression {
        expression: code.to_string(),
        reason: reason.into(),
    }
}

/// Resolves the binding named `root` for expressions, through the cache.
fn properties(ctx: &mut ResolutionContext<'_>, code: &str, root: &str) -> Result<Arc<dyn Properties>> {
    let cache = ctx.container().expressions();
    if let Some(found) = cache.get(root) {
        trace!(root, "Expression root cached");
        return Ok(found);
    }

    let binding = ctx.named_binding(root)?;
    let expose = binding.expose().ok_or_else(|| {
        failure(
            code,
            format!(
                "binding {} does not expose properties; expose it with Interface::exposes or Binding::expose_as",
                binding.label()
            ),
        )
    })?;

    let key = binding.key();
    let instance = ctx.invoke(&binding, &key)?;
    let properties = expose(&instance)
        .ok_or_else(|| failure(code, format!("binding {} has no properties", binding.label())))?;

    debug!(root, binding = %binding.label(), "Cached expression root");
    Ok(cache.insert(root, properties))
}

/// Evaluates `code` against the named bindings of the current container.
pub fn evaluate(ctx: &mut ResolutionContext<'_>, code: &str) -> Result<Value> {
    let code = code.trim();
    ctx.record(format!("evaluate ${{{code}}}"));

    let tree: Node = evalexpr::build_operator_tree(code).map_err(|e| failure(code, e.to_string()))?;
    let identifiers: BTreeSet<String> = tree
        .iter_read_variable_identifiers()
        .map(str::to_string)
        .collect();

    let mut env: HashMapContext = HashMapContext::new();
    for identifier in identifiers {
        let Some((root, path)) = identifier.split_once('.') else {
            return Err(failure(
                code,
                format!("`{identifier}` must name a property, as in `{identifier}.field`"),
            ));
        };

        let value = properties(ctx, code, root)?
            .property(path)
            .ok_or_else(|| failure(code, format!("`{root}` has no property `{path}`")))?;
        env.set_value(identifier.clone(), value)
            .map_err(|e| failure(code, e.to_string()))?;
    }

    tree.eval_with_context(&env)
        .map_err(|e| failure(code, e.to_string()))
}
