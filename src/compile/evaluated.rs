//! What a schema has evaluated of its instance, for `unevaluated*`.
//!
//! Known statically where possible; a runtime variable only once a keyword
//! (pattern properties, conditional branches, calls into units that are still
//! compiling) makes the answer data-dependent.
use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::ir::{Expr, Lit, Name};

#[derive(Debug, Clone, PartialEq)]
pub enum Props {
    Static(BTreeSet<String>),
    All,
    Dynamic(Name),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Items {
    /// The first `n` items.
    Count(usize),
    All,
    Dynamic(Name),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluated {
    pub props: Props,
    pub items: Items,
}

impl Default for Evaluated {
    fn default() -> Self {
        Self { props: Props::Static(BTreeSet::new()), items: Items::Count(0) }
    }
}

impl Evaluated {
    pub fn is_static(&self) -> bool {
        !matches!(self.props, Props::Dynamic(_)) && !matches!(self.items, Items::Dynamic(_))
    }

    pub fn is_complete(&self) -> bool {
        self.props == Props::All && self.items == Items::All
    }
}

impl Props {
    pub fn is_empty(&self) -> bool {
        matches!(self, Props::Static(keys) if keys.is_empty())
    }

    pub fn expr(&self) -> Expr {
        match self {
            Props::Static(keys) => {
                let map: Map<String, Value> = keys.iter().map(|k| (k.clone(), Value::Bool(true))).collect();
                Expr::Lit(Lit::Json(Arc::new(Value::Object(map))))
            }
            Props::All => Expr::TRUE,
            Props::Dynamic(name) => Expr::from(name),
        }
    }

    /// Union of two static sets; `None` if either side is dynamic.
    pub fn union_static(&self, other: &Props) -> Option<Props> {
        match (self, other) {
            (Props::All, _) | (_, Props::All) => Some(Props::All),
            (Props::Static(a), Props::Static(b)) => Some(Props::Static(a.union(b).cloned().collect())),
            _ => None,
        }
    }
}

impl Items {
    pub fn is_empty(&self) -> bool {
        matches!(self, Items::Count(0))
    }

    pub fn expr(&self) -> Expr {
        match self {
            Items::Count(n) => Expr::num(*n as f64),
            Items::All => Expr::TRUE,
            Items::Dynamic(name) => Expr::from(name),
        }
    }

    pub fn union_static(&self, other: &Items) -> Option<Items> {
        match (self, other) {
            (Items::All, _) | (_, Items::All) => Some(Items::All),
            (Items::Count(a), Items::Count(b)) => Some(Items::Count((*a).max(*b))),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(ks: &[&str]) -> Props {
        Props::Static(ks.iter().map(|k| k.to_string()).collect())
    }

    #[test]
    fn static_unions() {
        assert_eq!(keys(&["a"]).union_static(&keys(&["b"])), Some(keys(&["a", "b"])));
        assert_eq!(keys(&["a"]).union_static(&Props::All), Some(Props::All));
        let dynamic = Props::Dynamic(Name::new("props0").unwrap());
        assert_eq!(dynamic.union_static(&Props::All), Some(Props::All));
        assert_eq!(keys(&["a"]).union_static(&dynamic), None);
        assert_eq!(Items::Count(2).union_static(&Items::Count(1)), Some(Items::Count(2)));
    }

    #[test]
    fn static_sets_render_as_objects() {
        assert_eq!(
            keys(&["id"]).expr(),
            Expr::Lit(Lit::Json(Arc::new(serde_json::json!({"id": true}))))
        );
        assert_eq!(Items::Count(3).expr(), Expr::num(3));
    }
}
