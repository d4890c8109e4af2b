// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Property values, property bags, and the comparison modes used to decide
//! whether something changed.

use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::fmt;

/// A property or state value.
///
/// Scalars compare by value. Lists, maps, and callbacks are shared and have an
/// identity, which is what [`Comparison::Reference`] looks at.
#[derive(Clone)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Float. Assumed not to be NaN.
    Float(f64),
    /// String. Always compared by content.
    Str(Rc<str>),
    /// Shared list.
    List(Rc<[Value]>),
    /// Shared nested bag.
    Map(Props),
    /// Shared callback, compared by identity only.
    Callback(Callback),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::List(l) => f.debug_list().entries(l.iter()).finish(),
            Self::Map(m) => m.fmt(f),
            Self::Callback(_) => f.write_str("Callback"),
        }
    }
}

impl Value {
    /// Compare two values, looking through at most `depth` levels of shared
    /// containers. At depth zero containers compare by identity.
    pub fn equal_at(&self, other: &Self, depth: u32) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => {
                Rc::ptr_eq(a, b)
                    || (depth > 0
                        && a.len() == b.len()
                        && a.iter().zip(b.iter()).all(|(x, y)| x.equal_at(y, depth - 1)))
            }
            (Self::Map(a), Self::Map(b)) => a.equal_at(b, depth),
            (Self::Callback(a), Self::Callback(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.into())
    }
}

impl From<Rc<str>> for Value {
    fn from(v: Rc<str>) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<Self>> for Value {
    fn from(v: Vec<Self>) -> Self {
        Self::List(v.into())
    }
}

impl From<Props> for Value {
    fn from(v: Props) -> Self {
        Self::Map(v)
    }
}

impl From<Callback> for Value {
    fn from(v: Callback) -> Self {
        Self::Callback(v)
    }
}

/// A shared callback stored in a property bag.
#[derive(Clone)]
pub struct Callback(Rc<dyn Fn(&Value)>);

impl Callback {
    /// Wrap a closure.
    pub fn new(f: impl Fn(&Value) + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Invoke the callback.
    pub fn call(&self, arg: &Value) {
        (self.0)(arg);
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback")
    }
}

/// An immutable, shared property bag.
///
/// Cloning is cheap and preserves identity; [`Props::with`] and
/// [`Props::without`] return a new bag.
#[derive(Clone, Default)]
pub struct Props(Rc<BTreeMap<Rc<str>, Value>>);

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.iter()).finish()
    }
}

impl Props {
    /// An empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of `self` with `key` set to `value`.
    #[must_use]
    pub fn with(&self, key: &str, value: impl Into<Value>) -> Self {
        let mut map = (*self.0).clone();
        map.insert(key.into(), value.into());
        Self(Rc::new(map))
    }

    /// A copy of `self` without `key`.
    #[must_use]
    pub fn without(&self, key: &str) -> Self {
        let mut map = (*self.0).clone();
        map.remove(key);
        Self(Rc::new(map))
    }

    /// Look up a value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the bag has no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&Rc<str>, &Value)> {
        self.0.iter()
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Compare two bags. Depth zero is identity; each further level compares
    /// keys and then values one container level deeper.
    pub fn equal_at(&self, other: &Self, depth: u32) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if depth == 0 || self.len() != other.len() {
            return false;
        }
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|((ka, va), (kb, vb))| ka == kb && va.equal_at(vb, depth - 1))
    }

    /// Dictionary diff from `self` to `next`. Values compare by identity.
    pub fn diff(&self, next: &Self) -> PropDiff {
        let mut diff = PropDiff::default();
        if self.ptr_eq(next) {
            return diff;
        }
        for (k, v) in next.iter() {
            match self.get(k) {
                Some(old) if old.equal_at(v, 0) => {}
                _ => diff.set.push((k.clone(), v.clone())),
            }
        }
        for k in self.0.keys() {
            if next.get(k).is_none() {
                diff.removed.push(k.clone());
            }
        }
        diff
    }
}

impl<K: Into<Rc<str>>, V: Into<Value>> FromIterator<(K, V)> for Props {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(Rc::new(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }
}

/// Property changes between two bags.
#[derive(Clone, Debug, Default)]
pub struct PropDiff {
    /// Added or changed entries, in key order.
    pub set: Vec<(Rc<str>, Value)>,
    /// Removed keys, in key order.
    pub removed: Vec<Rc<str>>,
}

impl PropDiff {
    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.removed.is_empty()
    }

    /// Fold a later diff into this one.
    pub fn merge(&mut self, later: Self) {
        for (k, v) in later.set {
            self.removed.retain(|r| *r != k);
            match self.set.iter_mut().find(|(sk, _)| *sk == k) {
                Some(slot) => slot.1 = v,
                None => self.set.push((k, v)),
            }
        }
        for k in later.removed {
            self.set.retain(|(sk, _)| *sk != k);
            if !self.removed.contains(&k) {
                self.removed.push(k);
            }
        }
    }
}

/// How to decide whether an aspect (properties, state, context, forwarded
/// children) changed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Comparison {
    /// Changed unless the very same shared value.
    Reference,
    /// Compare entries by identity.
    #[default]
    Shallow,
    /// Compare entries, and one level inside shared containers.
    DoubleShallow,
    /// Full structural comparison.
    Deep,
    /// Always counts as changed.
    Always,
}

impl Comparison {
    /// Depth passed to `equal_at`, or `None` when the mode never compares equal.
    pub const fn depth(self) -> Option<u32> {
        match self {
            Self::Reference => Some(0),
            Self::Shallow => Some(1),
            Self::DoubleShallow => Some(2),
            Self::Deep => Some(u32::MAX),
            Self::Always => None,
        }
    }

    /// Compare two bags under this mode.
    pub fn props_equal(self, a: &Props, b: &Props) -> bool {
        self.depth().is_some_and(|d| a.equal_at(b, d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn comparison_modes_on_nested_lists() {
        let inner: Value = vec![Value::from(1), Value::from(2)].into();
        let a = Props::new().with("list", inner.clone()).with("n", 1);
        // Same entries, fresh bag.
        let b = Props::new().with("list", inner).with("n", 1);
        // Structurally equal list with a different identity.
        let c = Props::new()
            .with("list", vec![Value::from(1), Value::from(2)])
            .with("n", 1);

        assert!(!Comparison::Reference.props_equal(&a, &b));
        assert!(Comparison::Reference.props_equal(&a, &a.clone()));
        assert!(Comparison::Shallow.props_equal(&a, &b));
        assert!(!Comparison::Shallow.props_equal(&a, &c));
        assert!(Comparison::DoubleShallow.props_equal(&a, &c));
        assert!(Comparison::Deep.props_equal(&a, &c));
        assert!(!Comparison::Always.props_equal(&a, &a));
    }

    #[test]
    fn strings_compare_by_content() {
        assert!(Value::from("x").equal_at(&Value::from("x"), 0));
    }

    #[test]
    fn callbacks_compare_by_identity() {
        let cb = Callback::new(|_| {});
        let other = Callback::new(|_| {});
        assert!(Value::from(cb.clone()).equal_at(&Value::from(cb.clone()), u32::MAX));
        assert!(!Value::from(cb).equal_at(&Value::from(other), u32::MAX));
    }

    #[test]
    fn diff_reports_set_and_removed() {
        let old = Props::new().with("a", 1).with("b", 2).with("c", 3);
        let new = Props::new().with("a", 1).with("b", 5).with("d", 4);
        let diff = old.diff(&new);
        let set: Vec<&str> = diff.set.iter().map(|(k, _)| &**k).collect();
        let removed: Vec<&str> = diff.removed.iter().map(|k| &**k).collect();
        assert_eq!(set, ["b", "d"]);
        assert_eq!(removed, ["c"]);
        assert!(old.diff(&old.clone()).is_empty());
    }

    #[test]
    fn merged_diff_keeps_latest_intent() {
        let mut first = Props::new().with("a", 1).diff(&Props::new().with("a", 2));
        let second = Props::new().with("a", 2).diff(&Props::new());
        first.merge(second);
        assert!(first.set.is_empty());
        assert_eq!(first.removed.len(), 1);
    }
}
