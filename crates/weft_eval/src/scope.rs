//! Variable scope with snapshot/restore and cross-suspension persistence.
//!
//! A scope is an arena of frames (`parent` index + bindings). Creating a
//! child scope is O(1) (push a frame), and capturing/restoring the traversal
//! position is O(1) (save/set the current frame index). Frames are never
//! removed during a pass, which is what lets a suspended subtree find its
//! bindings again on the next pass.

use rustc_hash::FxHashMap;

use weft_ir::Value;

/// Opaque token capturing the current frame, for suspend/resume cycles.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct ScopePointer(usize);

/// Typed failure from scope operations. Callers attach spans and convert to
/// diagnostics; the scope itself has no source position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScopeError {
    /// Name already declared in the current frame.
    AlreadyDeclared(String),
    /// Name not found in any frame.
    NotDeclared(String),
    /// An intermediate path segment is absent.
    PropertyNotExists(String),
}

#[derive(Clone, Debug, Default)]
struct Frame {
    parent: Option<usize>,
    vars: FxHashMap<String, Value>,
}

/// A chain of variable frames.
#[derive(Clone, Debug)]
pub struct Scope {
    frames: Vec<Frame>,
    current: usize,
}

/// Path segment for [`Scope::assign_path`].
#[derive(Clone, Debug, PartialEq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl std::fmt::Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSegment::Key(k) => f.write_str(k),
            PathSegment::Index(i) => write!(f, "{i}"),
        }
    }
}

impl Scope {
    /// Create a scope with a single root frame.
    pub fn new() -> Self {
        Scope {
            frames: vec![Frame::default()],
            current: 0,
        }
    }

    /// Create a root scope pre-populated with parameters.
    pub fn with_parameters(parameters: impl IntoIterator<Item = (String, Value)>) -> Self {
        let mut scope = Scope::new();
        for (name, value) in parameters {
            scope.frames[0].vars.insert(name, value);
        }
        scope
    }

    /// Declare a new variable in the current frame.
    pub fn declare(&mut self, name: &str, value: Value) -> Result<(), ScopeError> {
        let frame = &mut self.frames[self.current];
        if frame.vars.contains_key(name) {
            return Err(ScopeError::AlreadyDeclared(name.to_string()));
        }
        frame.vars.insert(name.to_string(), value);
        Ok(())
    }

    /// Assign to an existing variable, wherever it was declared.
    pub fn assign(&mut self, name: &str, value: Value) -> Result<(), ScopeError> {
        match self.frame_of(name) {
            Some(index) => {
                self.frames[index].vars.insert(name.to_string(), value);
                Ok(())
            }
            None => Err(ScopeError::NotDeclared(name.to_string())),
        }
    }

    /// Upsert: assign where declared, or declare in the current frame.
    ///
    /// Template assignment (`{{ x = 1 }}`) and step `as` bindings use this.
    pub fn set(&mut self, name: &str, value: Value) {
        match self.frame_of(name) {
            Some(index) => {
                self.frames[index].vars.insert(name.to_string(), value);
            }
            None => {
                self.frames[self.current]
                    .vars
                    .insert(name.to_string(), value);
            }
        }
    }

    /// Assign through a property path (`a.b[0].c = v`).
    ///
    /// Intermediate segments must exist; the final segment may create an
    /// object key or append one past the end of an array.
    pub fn assign_path(
        &mut self,
        name: &str,
        path: &[PathSegment],
        value: Value,
    ) -> Result<(), ScopeError> {
        let Some(frame) = self.frame_of(name) else {
            return Err(ScopeError::NotDeclared(name.to_string()));
        };
        debug_assert!(!path.is_empty());

        let mut traversed = name.to_string();
        let mut target = self.frames[frame]
            .vars
            .get_mut(name)
            .ok_or_else(|| ScopeError::NotDeclared(name.to_string()))?;

        for segment in &path[..path.len() - 1] {
            traversed = format!("{traversed}.{segment}");
            target = match (target, segment) {
                (Value::Object(map), PathSegment::Key(key)) => map
                    .get_mut(key)
                    .ok_or(ScopeError::PropertyNotExists(traversed.clone()))?,
                (Value::Array(items), PathSegment::Index(index)) => items
                    .get_mut(*index)
                    .ok_or(ScopeError::PropertyNotExists(traversed.clone()))?,
                _ => return Err(ScopeError::PropertyNotExists(traversed)),
            };
        }

        let last = &path[path.len() - 1];
        match (target, last) {
            (Value::Object(map), PathSegment::Key(key)) => {
                map.insert(key.clone(), value);
                Ok(())
            }
            (Value::Array(items), PathSegment::Index(index)) => {
                if *index < items.len() {
                    items[*index] = value;
                    Ok(())
                } else if *index == items.len() {
                    items.push(value);
                    Ok(())
                } else {
                    Err(ScopeError::PropertyNotExists(format!("{traversed}.{last}")))
                }
            }
            _ => Err(ScopeError::PropertyNotExists(format!("{traversed}.{last}"))),
        }
    }

    /// Look up a variable, walking the frame chain.
    pub fn lookup(&self, name: &str) -> Result<Value, ScopeError> {
        self.get(name)
            .ok_or_else(|| ScopeError::NotDeclared(name.to_string()))
    }

    fn get(&self, name: &str) -> Option<Value> {
        self.frame_of(name)
            .and_then(|index| self.frames[index].vars.get(name).cloned())
    }

    /// Whether a name is visible from the current frame.
    pub fn exists(&self, name: &str) -> bool {
        self.frame_of(name).is_some()
    }

    fn frame_of(&self, name: &str) -> Option<usize> {
        let mut index = Some(self.current);
        while let Some(i) = index {
            if self.frames[i].vars.contains_key(name) {
                return Some(i);
            }
            index = self.frames[i].parent;
        }
        None
    }

    /// Enter a fresh child frame. New declarations stay invisible to the
    /// enclosing frame; writes to existing names still reach it.
    pub fn push_child(&mut self) {
        let frame = Frame {
            parent: Some(self.current),
            vars: FxHashMap::default(),
        };
        self.frames.push(frame);
        self.current = self.frames.len() - 1;
    }

    /// Capture the current traversal position.
    pub fn pointer(&self) -> ScopePointer {
        ScopePointer(self.current)
    }

    /// Restore a previously captured traversal position.
    pub fn restore(&mut self, pointer: ScopePointer) {
        debug_assert!(pointer.0 < self.frames.len());
        self.current = pointer.0;
    }

    /// Deep snapshot of the full frame chain, for chain turn boundaries.
    pub fn stash(&self) -> ScopeStash {
        ScopeStash {
            frames: self
                .frames
                .iter()
                .map(|f| StashFrame {
                    parent: f.parent,
                    vars: f.vars.clone(),
                })
                .collect(),
            current: self.current,
        }
    }

    /// Rebuild an equivalent scope from a stash.
    pub fn from_stash(stash: &ScopeStash) -> Self {
        Scope {
            frames: stash
                .frames
                .iter()
                .map(|f| Frame {
                    parent: f.parent,
                    vars: f.vars.clone(),
                })
                .collect(),
            current: stash.current,
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable snapshot of a frame chain.
///
/// Host callables serialize as `null`; rebuilding a scope from a serialized
/// stash (rather than the in-memory one) loses them by design.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ScopeStash {
    frames: Vec<StashFrame>,
    current: usize,
}

#[derive(Clone, Debug, serde::Serialize)]
struct StashFrame {
    parent: Option<usize>,
    vars: FxHashMap<String, Value>,
}

impl ScopeStash {
    /// Stash of a scope holding only `parameters` in the root frame.
    pub fn with_parameters(parameters: impl IntoIterator<Item = (String, Value)>) -> Self {
        Scope::with_parameters(parameters).stash()
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn declare_then_lookup() {
        let mut scope = Scope::new();
        scope.declare("x", Value::Number(1.0)).unwrap();
        assert_eq!(scope.lookup("x"), Ok(Value::Number(1.0)));
    }

    #[test]
    fn redeclare_in_same_frame_fails() {
        let mut scope = Scope::new();
        scope.declare("x", Value::Number(1.0)).unwrap();
        assert_eq!(
            scope.declare("x", Value::Number(2.0)),
            Err(ScopeError::AlreadyDeclared("x".to_string()))
        );
    }

    #[test]
    fn child_writes_reach_the_declaring_frame() {
        let mut scope = Scope::new();
        scope.declare("x", Value::Number(1.0)).unwrap();
        let outer = scope.pointer();
        scope.push_child();
        scope.assign("x", Value::Number(2.0)).unwrap();
        scope.restore(outer);
        assert_eq!(scope.lookup("x"), Ok(Value::Number(2.0)));
    }

    #[test]
    fn child_declarations_do_not_leak() {
        let mut scope = Scope::new();
        let outer = scope.pointer();
        scope.push_child();
        scope.declare("inner", Value::Bool(true)).unwrap();
        scope.restore(outer);
        assert!(!scope.exists("inner"));
    }

    #[test]
    fn shadowing_in_child_frame() {
        let mut scope = Scope::new();
        scope.declare("x", Value::Number(1.0)).unwrap();
        let outer = scope.pointer();
        scope.push_child();
        scope.declare("x", Value::Number(2.0)).unwrap();
        assert_eq!(scope.lookup("x"), Ok(Value::Number(2.0)));
        scope.restore(outer);
        assert_eq!(scope.lookup("x"), Ok(Value::Number(1.0)));
    }

    #[test]
    fn assign_to_undeclared_fails() {
        let mut scope = Scope::new();
        assert_eq!(
            scope.assign("ghost", Value::Null),
            Err(ScopeError::NotDeclared("ghost".to_string()))
        );
    }

    #[test]
    fn set_declares_in_current_frame() {
        let mut scope = Scope::new();
        let outer = scope.pointer();
        scope.push_child();
        scope.set("fresh", Value::Number(1.0));
        assert!(scope.exists("fresh"));
        scope.restore(outer);
        assert!(!scope.exists("fresh"));
    }

    #[test]
    fn assign_path_traverses_objects_and_arrays() {
        let mut scope = Scope::new();
        let inner: std::collections::BTreeMap<String, Value> =
            [("b".to_string(), Value::Array(vec![Value::Number(1.0)]))]
                .into_iter()
                .collect();
        scope.declare("a", Value::Object(inner)).unwrap();

        scope
            .assign_path(
                "a",
                &[
                    PathSegment::Key("b".to_string()),
                    PathSegment::Index(0),
                ],
                Value::Number(9.0),
            )
            .unwrap();

        let Value::Object(map) = scope.lookup("a").unwrap() else {
            panic!("expected object");
        };
        assert_eq!(map["b"], Value::Array(vec![Value::Number(9.0)]));
    }

    #[test]
    fn assign_path_missing_intermediate_fails() {
        let mut scope = Scope::new();
        scope
            .declare("a", Value::Object(Default::default()))
            .unwrap();
        let err = scope
            .assign_path(
                "a",
                &[
                    PathSegment::Key("missing".to_string()),
                    PathSegment::Key("x".to_string()),
                ],
                Value::Null,
            )
            .unwrap_err();
        assert_eq!(err, ScopeError::PropertyNotExists("a.missing".to_string()));
    }

    #[test]
    fn stash_round_trip_preserves_chain() {
        let mut scope = Scope::new();
        scope.declare("x", Value::Number(1.0)).unwrap();
        scope.push_child();
        scope.declare("y", Value::Number(2.0)).unwrap();

        let rebuilt = Scope::from_stash(&scope.stash());
        assert_eq!(rebuilt.lookup("x"), Ok(Value::Number(1.0)));
        assert_eq!(rebuilt.lookup("y"), Ok(Value::Number(2.0)));
    }
}
