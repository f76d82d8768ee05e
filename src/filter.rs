//! Query filter construction.
//!
//! A [`QueryFilter`] is rebuilt for every tail cycle from the current resume
//! position and the run's namespace selector; nothing mutates it in place.

use crate::error::{Result, TailError};
use crate::types::{Document, Position, Value};
use std::collections::BTreeSet;
use std::fmt;

/// Which namespaces (`database.collection`) a run observes. Fixed for the run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum NamespaceFilter {
    /// Match every namespace.
    #[default]
    All,
    /// Exactly one namespace.
    Single(String),
    /// Any namespace in the set.
    Set(BTreeSet<String>),
}

impl NamespaceFilter {
    /// Build from a list of names: none means all, one means single.
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        for name in &names {
            validate_namespace(name)?;
        }

        let mut iter = names.into_iter();
        Ok(match (iter.next(), iter.next()) {
            (None, _) => NamespaceFilter::All,
            (Some(only), None) => NamespaceFilter::Single(only),
            (Some(first), Some(second)) => {
                let mut set: BTreeSet<String> = iter.collect();
                set.insert(first);
                set.insert(second);
                NamespaceFilter::Set(set)
            }
        })
    }

    pub fn is_all(&self) -> bool {
        matches!(self, NamespaceFilter::All)
    }
}

/// Check the `database.collection` shape.
pub fn validate_namespace(name: &str) -> Result<()> {
    match name.split_once('.') {
        Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(()),
        _ => Err(TailError::Config(format!(
            "namespace {name:?} is not of the form database.collection"
        ))),
    }
}

/// The namespace half of a query filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NamespacePredicate {
    Eq(String),
    In(BTreeSet<String>),
}

impl NamespacePredicate {
    fn matches(&self, ns: Option<&str>) -> bool {
        match (self, ns) {
            (NamespacePredicate::Eq(expected), Some(ns)) => expected == ns,
            (NamespacePredicate::In(set), Some(ns)) => set.contains(ns),
            (_, None) => false,
        }
    }
}

/// `ts > position AND ns matches`, either half optional.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryFilter {
    pub position: Option<Position>,
    pub namespace: Option<NamespacePredicate>,
}

impl QueryFilter {
    /// Build the filter for one cycle.
    pub fn build(position: Option<Position>, ns: &NamespaceFilter) -> Self {
        let namespace = match ns {
            NamespaceFilter::All => None,
            NamespaceFilter::Single(name) => Some(NamespacePredicate::Eq(name.clone())),
            NamespaceFilter::Set(names) => Some(NamespacePredicate::In(names.clone())),
        };
        Self { position, namespace }
    }

    /// Evaluate against a log entry.
    ///
    /// An entry whose `ts` is missing or not a timestamp cannot be compared
    /// and passes the position predicate, so that the reader sees it and can
    /// reject it.
    pub fn matches(&self, doc: &Document) -> bool {
        if let (Some(after), Some(Value::Timestamp(ts))) = (self.position, doc.get("ts")) {
            if *ts <= after {
                return false;
            }
        }
        match &self.namespace {
            Some(predicate) => predicate.matches(doc.get_str("ns")),
            None => true,
        }
    }
}

impl fmt::Display for QueryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut clauses = Vec::new();
        if let Some(p) = self.position {
            clauses.push(format!("ts: {{$gt: {p}}}"));
        }
        match &self.namespace {
            Some(NamespacePredicate::Eq(ns)) => clauses.push(format!("ns: {ns:?}")),
            Some(NamespacePredicate::In(set)) => clauses.push(format!("ns: {{$in: {set:?}}}")),
            None => {}
        }
        write!(f, "{{{}}}", clauses.join(", "))
    }
}
