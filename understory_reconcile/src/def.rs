// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Target definitions: the immutable description a render call produces.
//!
//! Definitions are built fresh on every render and never mutated. Children are
//! shared slices, so keeping a definition around (as the content closure does
//! with forwarded children) is a reference-count bump.
//!
//! ```rust
//! use understory_reconcile::Def;
//!
//! let list = Def::element("ul").children([
//!     Def::element("li").key("a").prop("label", "first"),
//!     Def::element("li").key("b").prop("label", "second"),
//! ]);
//! assert_eq!(Def::from(list).children().len(), 2);
//! ```

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::fmt;

use understory_view_tree::BackendHandle;

use crate::component::ComponentType;
use crate::engine::NestedEngine;
use crate::value::{Props, Value};

/// Shared, ordered list of child definitions.
pub type Children = Rc<[Def]>;

/// Identity key of a definition among its siblings (or its whole scope).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    /// Integer key.
    Int(i64),
    /// String key.
    Str(Rc<str>),
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Self::Str(v.into())
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Key {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<usize> for Key {
    #[allow(
        clippy::cast_possible_wrap,
        reason = "Index keys never approach i64::MAX."
    )]
    fn from(v: usize) -> Self {
        Self::Int(v as i64)
    }
}

fn no_children() -> Children {
    Rc::from(Vec::new())
}

/// A target definition.
///
/// Kind dispatch is a closed union: pairing and apply match it exhaustively.
#[derive(Clone, Debug)]
pub enum Def {
    /// A backend element with a tag, properties, and children.
    Element(ElementDef),
    /// A text node.
    Text(TextDef),
    /// An element created outside the engine and wrapped by handle.
    Foreign(ForeignDef),
    /// Children rendered into an external target.
    Portal(PortalDef),
    /// A component instance.
    Component(ComponentDef),
    /// Marker where the rendering component's forwarded children land.
    Forward(ForwardDef),
    /// Like [`Def::Forward`], but always an independent copy.
    ForwardCopy(ForwardDef),
    /// Provides a named context value to everything below it.
    Provider(ProviderDef),
    /// Groups children without a node of its own; arrays are their own key scope.
    Fragment(FragmentDef),
    /// Attachment point of another engine.
    Nested(NestedDef),
}

/// A backend element.
#[derive(Clone, Debug)]
pub struct ElementDef {
    /// Element tag.
    pub tag: Rc<str>,
    /// Identity key.
    pub key: Option<Key>,
    /// Properties.
    pub props: Props,
    /// Children.
    pub children: Children,
}

/// A text node.
#[derive(Clone, Debug)]
pub struct TextDef {
    /// Identity key.
    pub key: Option<Key>,
    /// Text content.
    pub text: Rc<str>,
}

/// A wrapped foreign element.
#[derive(Clone, Debug)]
pub struct ForeignDef {
    /// Identity key.
    pub key: Option<Key>,
    /// The wrapped element.
    pub handle: BackendHandle,
    /// Properties applied on top of the foreign element.
    pub props: Props,
}

/// A portal.
#[derive(Clone, Debug)]
pub struct PortalDef {
    /// Identity key.
    pub key: Option<Key>,
    /// Backend container receiving the children.
    pub target: BackendHandle,
    /// Children.
    pub children: Children,
}

/// A component instance.
#[derive(Clone, Debug)]
pub struct ComponentDef {
    /// Identity key.
    pub key: Option<Key>,
    /// What to instantiate.
    pub component: ComponentType,
    /// Properties.
    pub props: Props,
    /// Children handed to the instance's content closure.
    pub children: Children,
}

/// A forwarded-content marker.
#[derive(Clone, Debug, Default)]
pub struct ForwardDef {
    /// Identity key.
    pub key: Option<Key>,
}

/// A named context provider.
#[derive(Clone, Debug)]
pub struct ProviderDef {
    /// Identity key.
    pub key: Option<Key>,
    /// Context name.
    pub name: Rc<str>,
    /// Provided value.
    pub value: Value,
    /// Children.
    pub children: Children,
}

/// A fragment.
#[derive(Clone, Debug)]
pub struct FragmentDef {
    /// Identity key.
    pub key: Option<Key>,
    /// Marks a list built by iteration: an isolated key scope.
    pub array: bool,
    /// Children.
    pub children: Children,
}

/// A nested engine root.
#[derive(Clone, Debug)]
pub struct NestedDef {
    /// Identity key.
    pub key: Option<Key>,
    /// The nested engine.
    pub engine: NestedEngine,
}

impl Def {
    /// An element with no properties and no children.
    pub fn element(tag: &str) -> ElementDef {
        ElementDef {
            tag: tag.into(),
            key: None,
            props: Props::new(),
            children: no_children(),
        }
    }

    /// A text node.
    pub fn text(text: &str) -> TextDef {
        TextDef {
            key: None,
            text: text.into(),
        }
    }

    /// A wrapped foreign element.
    pub fn foreign(handle: BackendHandle) -> ForeignDef {
        ForeignDef {
            key: None,
            handle,
            props: Props::new(),
        }
    }

    /// A portal into `target`.
    pub fn portal(target: BackendHandle) -> PortalDef {
        PortalDef {
            key: None,
            target,
            children: no_children(),
        }
    }

    /// A component instance.
    pub fn component(component: &ComponentType) -> ComponentDef {
        ComponentDef {
            key: None,
            component: component.clone(),
            props: Props::new(),
            children: no_children(),
        }
    }

    /// The identity-preserving forwarded-content marker.
    pub fn forward() -> Self {
        Self::Forward(ForwardDef::default())
    }

    /// An independent copy of the forwarded content.
    pub fn forward_copy() -> Self {
        Self::ForwardCopy(ForwardDef::default())
    }

    /// A named context provider.
    pub fn provider(name: &str, value: impl Into<Value>) -> ProviderDef {
        ProviderDef {
            key: None,
            name: name.into(),
            value: value.into(),
            children: no_children(),
        }
    }

    /// A fragment.
    pub fn fragment(children: impl IntoIterator<Item = impl Into<Self>>) -> Self {
        Self::Fragment(FragmentDef {
            key: None,
            array: false,
            children: collect(children),
        })
    }

    /// A list fragment: its own key scope.
    pub fn array(children: impl IntoIterator<Item = impl Into<Self>>) -> Self {
        Self::Fragment(FragmentDef {
            key: None,
            array: true,
            children: collect(children),
        })
    }

    /// Renders nothing.
    pub fn empty() -> Self {
        Self::Fragment(FragmentDef {
            key: None,
            array: false,
            children: no_children(),
        })
    }

    /// A nested engine root.
    pub fn nested(engine: &NestedEngine) -> Self {
        Self::Nested(NestedDef {
            key: None,
            engine: engine.clone(),
        })
    }

    /// Identity key, if any.
    pub fn key(&self) -> Option<&Key> {
        match self {
            Self::Element(d) => d.key.as_ref(),
            Self::Text(d) => d.key.as_ref(),
            Self::Foreign(d) => d.key.as_ref(),
            Self::Portal(d) => d.key.as_ref(),
            Self::Component(d) => d.key.as_ref(),
            Self::Forward(d) | Self::ForwardCopy(d) => d.key.as_ref(),
            Self::Provider(d) => d.key.as_ref(),
            Self::Fragment(d) => d.key.as_ref(),
            Self::Nested(d) => d.key.as_ref(),
        }
    }

    /// Children paired in the same scope as this definition.
    ///
    /// A component's children belong to its content closure and are not
    /// listed here.
    pub fn children(&self) -> &[Self] {
        match self {
            Self::Element(d) => &d.children,
            Self::Portal(d) => &d.children,
            Self::Provider(d) => &d.children,
            Self::Fragment(d) => &d.children,
            Self::Text(_)
            | Self::Foreign(_)
            | Self::Component(_)
            | Self::Forward(_)
            | Self::ForwardCopy(_)
            | Self::Nested(_) => &[],
        }
    }

    pub(crate) fn scope_children(&self) -> Option<&Children> {
        match self {
            Self::Element(d) => Some(&d.children),
            Self::Portal(d) => Some(&d.children),
            Self::Provider(d) => Some(&d.children),
            Self::Fragment(d) => Some(&d.children),
            _ => None,
        }
    }

    pub(crate) fn props(&self) -> Option<&Props> {
        match self {
            Self::Element(d) => Some(&d.props),
            Self::Foreign(d) => Some(&d.props),
            Self::Component(d) => Some(&d.props),
            _ => None,
        }
    }

    pub(crate) fn is_array(&self) -> bool {
        matches!(self, Self::Fragment(FragmentDef { array: true, .. }))
    }

    /// Pairing tag: the kind, refined by element tag, component type, or
    /// context name.
    pub(crate) fn search_tag(&self) -> SearchTag {
        match self {
            Self::Element(d) => SearchTag::Element(d.tag.clone()),
            Self::Text(_) => SearchTag::Text,
            Self::Foreign(_) => SearchTag::Foreign,
            Self::Portal(_) => SearchTag::Portal,
            Self::Component(d) => SearchTag::Component(d.component.id()),
            Self::Forward(_) => SearchTag::Forward,
            Self::ForwardCopy(_) => SearchTag::ForwardCopy,
            Self::Provider(d) => SearchTag::Provider(d.name.clone()),
            Self::Fragment(d) if d.array => SearchTag::Array,
            Self::Fragment(_) => SearchTag::Fragment,
            Self::Nested(d) => SearchTag::Nested(d.engine.id()),
        }
    }
}

fn collect(children: impl IntoIterator<Item = impl Into<Def>>) -> Children {
    children.into_iter().map(Into::into).collect::<Vec<_>>().into()
}

/// Tag under which definitions are indexed and paired.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum SearchTag {
    Element(Rc<str>),
    Text,
    Foreign,
    Portal,
    Component(usize),
    Forward,
    ForwardCopy,
    Provider(Rc<str>),
    Fragment,
    Array,
    Nested(usize),
}

impl SearchTag {
    pub(crate) const fn is_component(&self) -> bool {
        matches!(self, Self::Component(_))
    }
}

/// Structural comparison of two child lists, used for the forwarded-children
/// aspect. Depth semantics follow [`Props::equal_at`].
pub(crate) fn children_equal(a: &Children, b: &Children, depth: u32) -> bool {
    if Rc::ptr_eq(a, b) {
        return true;
    }
    if depth == 0 || a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).all(|(x, y)| def_equal(x, y, depth - 1))
}

fn def_equal(a: &Def, b: &Def, depth: u32) -> bool {
    if a.search_tag() != b.search_tag() || a.key() != b.key() {
        return false;
    }
    let same_payload = match (a, b) {
        (Def::Text(x), Def::Text(y)) => x.text == y.text,
        (Def::Foreign(x), Def::Foreign(y)) => x.handle == y.handle,
        (Def::Portal(x), Def::Portal(y)) => x.target == y.target,
        (Def::Provider(x), Def::Provider(y)) => x.value.equal_at(&y.value, depth),
        _ => true,
    };
    let same_props = match (a.props(), b.props()) {
        (Some(x), Some(y)) => x.equal_at(y, depth),
        _ => true,
    };
    let same_children = match (a, b) {
        (Def::Component(x), Def::Component(y)) => children_equal(&x.children, &y.children, depth),
        _ => match (a.scope_children(), b.scope_children()) {
            (Some(x), Some(y)) => children_equal(x, y, depth),
            _ => true,
        },
    };
    same_payload && same_props && same_children
}

macro_rules! keyed {
    ($($ty:ident),*) => {
        $(
            impl $ty {
                /// Set the identity key.
                #[must_use]
                pub fn key(mut self, key: impl Into<Key>) -> Self {
                    self.key = Some(key.into());
                    self
                }
            }
        )*
    };
}

keyed!(ElementDef, TextDef, ForeignDef, PortalDef, ComponentDef, ProviderDef);

macro_rules! with_props {
    ($($ty:ident),*) => {
        $(
            impl $ty {
                /// Set one property.
                #[must_use]
                pub fn prop(mut self, key: &str, value: impl Into<Value>) -> Self {
                    self.props = self.props.with(key, value);
                    self
                }

                /// Replace the whole property bag.
                #[must_use]
                pub fn props(mut self, props: Props) -> Self {
                    self.props = props;
                    self
                }
            }
        )*
    };
}

with_props!(ElementDef, ForeignDef, ComponentDef);

macro_rules! with_children {
    ($($ty:ident),*) => {
        $(
            impl $ty {
                /// Set the children.
                #[must_use]
                pub fn children(mut self, children: impl IntoIterator<Item = impl Into<Def>>) -> Self {
                    self.children = collect(children);
                    self
                }

                /// Set the children to an existing shared list.
                #[must_use]
                pub fn shared_children(mut self, children: Children) -> Self {
                    self.children = children;
                    self
                }
            }
        )*
    };
}

with_children!(ElementDef, PortalDef, ComponentDef, ProviderDef);

impl ForwardDef {
    /// Set the identity key.
    #[must_use]
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }
}

impl Def {
    /// Set the identity key of any definition.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Key>) -> Self {
        let key = Some(key.into());
        match &mut self {
            Self::Element(d) => d.key = key,
            Self::Text(d) => d.key = key,
            Self::Foreign(d) => d.key = key,
            Self::Portal(d) => d.key = key,
            Self::Component(d) => d.key = key,
            Self::Forward(d) | Self::ForwardCopy(d) => d.key = key,
            Self::Provider(d) => d.key = key,
            Self::Fragment(d) => d.key = key,
            Self::Nested(d) => d.key = key,
        }
        self
    }
}

macro_rules! into_def {
    ($($ty:ident => $variant:ident),*) => {
        $(
            impl From<$ty> for Def {
                fn from(d: $ty) -> Self {
                    Self::$variant(d)
                }
            }
        )*
    };
}

into_def!(
    ElementDef => Element,
    TextDef => Text,
    ForeignDef => Foreign,
    PortalDef => Portal,
    ComponentDef => Component,
    ProviderDef => Provider,
    FragmentDef => Fragment,
    NestedDef => Nested
);

impl fmt::Display for SearchTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Element(tag) => write!(f, "<{tag}>"),
            Self::Provider(name) => write!(f, "provider({name})"),
            other => write!(f, "{other:?}"),
        }
    }
}
