//! Hierarchical value environment for template expressions.
//!
//! Scopes live in an arena and point at their parent by index. An iteration
//! gets a child scope that shadows the parent; when the iteration ends the
//! slot is released and reused by the next sibling iteration.

use rhai::{Dynamic, Map, Scope};

/// Index of a scope record in a [`ValueEnvironment`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

#[derive(Debug, Default)]
struct ScopeRecord {
    parent: Option<ScopeId>,
    /// Bindings in insertion order.
    bindings: Vec<(String, Dynamic)>,
    live: bool,
}

/// Data context plus per-iteration loop bindings.
#[derive(Debug)]
pub struct ValueEnvironment {
    scopes: Vec<ScopeRecord>,
    free: Vec<ScopeId>,
}

impl ValueEnvironment {
    /// Create an environment holding only an empty root scope.
    pub fn new() -> Self {
        ValueEnvironment {
            scopes: vec![ScopeRecord {
                parent: None,
                bindings: Vec::new(),
                live: true,
            }],
            free: Vec::new(),
        }
    }

    /// Create an environment whose root scope holds every entry of `map`.
    pub fn from_map(map: Map) -> Self {
        let mut env = Self::new();
        for (name, value) in map {
            env.put_var(name.as_str(), value);
        }
        env
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    /// Bind `name` in the root scope.
    pub fn put_var(&mut self, name: &str, value: impl Into<Dynamic>) {
        let root = self.root();
        self.set(root, name, value.into());
    }

    /// Bind `name` in `scope` only, replacing an existing binding of the same scope.
    pub fn set(&mut self, scope: ScopeId, name: &str, value: Dynamic) {
        let value = value.flatten();
        let record = &mut self.scopes[scope.0];
        match record.bindings.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => record.bindings.push((name.to_string(), value)),
        }
    }

    /// Open a child scope of `parent`, reusing a released slot when one exists.
    pub fn child(&mut self, parent: ScopeId) -> ScopeId {
        if let Some(id) = self.free.pop() {
            let record = &mut self.scopes[id.0];
            record.parent = Some(parent);
            record.live = true;
            return id;
        }
        self.scopes.push(ScopeRecord {
            parent: Some(parent),
            bindings: Vec::new(),
            live: true,
        });
        ScopeId(self.scopes.len() - 1)
    }

    /// Destroy a child scope. The root scope cannot be released.
    pub fn release(&mut self, scope: ScopeId) {
        if scope == self.root() {
            tracing::warn!("ignoring release of the root scope");
            return;
        }
        let record = &mut self.scopes[scope.0];
        if !record.live {
            return;
        }
        record.bindings.clear();
        record.parent = None;
        record.live = false;
        self.free.push(scope);
    }

    /// Resolve `name` starting at `scope` and walking towards the root. First match wins.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<&Dynamic> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let record = &self.scopes[id.0];
            if let Some((_, value)) = record.bindings.iter().find(|(n, _)| n == name) {
                return Some(value);
            }
            current = record.parent;
        }
        None
    }

    /// Scope ids from the root down to `scope`.
    pub fn chain(&self, scope: ScopeId) -> Vec<ScopeId> {
        let mut chain = Vec::new();
        let mut current = Some(scope);
        while let Some(id) = current {
            chain.push(id);
            current = self.scopes[id.0].parent;
        }
        chain.reverse();
        chain
    }

    /// Number of scopes currently alive, root included.
    pub fn live_scopes(&self) -> usize {
        self.scopes.iter().filter(|s| s.live).count()
    }

    /// Build a Rhai scope for evaluating at `scope`.
    /// Bindings are pushed root-first so inner bindings shadow outer ones.
    ///
    /// The scope holds unshared copies: assignments made by an expression
    /// stay in that evaluation and never reach the environment.
    pub fn to_rhai_scope(&self, scope: ScopeId) -> Scope<'static> {
        let mut rhai_scope = Scope::new();
        for id in self.chain(scope) {
            for (name, value) in &self.scopes[id.0].bindings {
                rhai_scope.push_dynamic(name.as_str(), value.flatten_clone());
            }
        }
        rhai_scope
    }
}

impl Default for ValueEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(env: &ValueEnvironment, scope: ScopeId, name: &str) -> Option<i64> {
        env.lookup(scope, name).and_then(|v| v.clone().flatten().as_int().ok())
    }

    #[test]
    fn test_child_shadows_without_mutating_parent() {
        let mut env = ValueEnvironment::new();
        env.put_var("x", 1_i64);
        let root = env.root();
        let child = env.child(root);
        env.set(child, "x", Dynamic::from(2_i64));

        assert_eq!(int(&env, child, "x"), Some(2));
        assert_eq!(int(&env, root, "x"), Some(1));
    }

    #[test]
    fn test_lookup_walks_to_parent() {
        let mut env = ValueEnvironment::new();
        env.put_var("title", "Report".to_string());
        let root = env.root();
        let outer = env.child(root);
        let inner = env.child(outer);
        assert!(env.lookup(inner, "title").is_some());
        assert!(env.lookup(inner, "missing").is_none());
        assert_eq!(env.chain(inner), vec![root, outer, inner]);
    }

    #[test]
    fn test_released_slots_are_reused_by_siblings() {
        let mut env = ValueEnvironment::new();
        let root = env.root();
        let first = env.child(root);
        env.set(first, "e", Dynamic::from(1_i64));
        env.release(first);
        let second = env.child(root);

        assert_eq!(first, second);
        assert!(env.lookup(second, "e").is_none());
        assert_eq!(env.live_scopes(), 2);
    }

    #[test]
    fn test_root_cannot_be_released() {
        let mut env = ValueEnvironment::new();
        env.put_var("x", 1_i64);
        let root = env.root();
        env.release(root);
        assert_eq!(int(&env, root, "x"), Some(1));
    }

    #[test]
    fn test_rhai_scope_prefers_inner_binding() {
        let mut env = ValueEnvironment::new();
        env.put_var("x", 1_i64);
        let root = env.root();
        let child = env.child(root);
        env.set(child, "x", Dynamic::from(5_i64));

        let engine = rhai::Engine::new();
        let mut scope = env.to_rhai_scope(child);
        let x: i64 = engine.eval_expression_with_scope(&mut scope, "x").unwrap();
        assert_eq!(x, 5);
    }

    #[test]
    fn test_assignment_in_expression_does_not_reach_environment() {
        let mut env = ValueEnvironment::new();
        env.put_var("n", 10_i64);
        env.put_var("xs", rhai::Array::from([Dynamic::from(1_i64)]));
        let root = env.root();
        let child = env.child(root);

        let engine = rhai::Engine::new();
        let mut scope = env.to_rhai_scope(child);
        let n: i64 = engine.eval_with_scope(&mut scope, "n = n + 1; xs.push(2); n").unwrap();
        assert_eq!(n, 11);

        assert_eq!(int(&env, root, "n"), Some(10));
        let xs = env.lookup(root, "xs").unwrap().clone().into_array().unwrap();
        assert_eq!(xs.len(), 1);
    }
}
