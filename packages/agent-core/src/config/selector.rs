//! Node selector language (§4.1): `+` (AND), `,` (OR), `!` (NOT), `*`
//! (glob), `key=value` labels, `label:` presence tests, fnmatch fallback.

use std::collections::HashMap;

use crate::identity::NodeName;

/// A candidate node plus the labels available for selector evaluation.
#[derive(Debug, Clone)]
pub struct NodeFacts {
    pub name: NodeName,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone)]
enum Atom {
    Glob(String),
    LabelEquals(String, String),
    LabelPresent(String),
}

impl Atom {
    fn parse(token: &str) -> Self {
        if let Some((k, v)) = token.split_once('=') {
            Atom::LabelEquals(k.to_string(), v.to_string())
        } else if let Some(k) = token.strip_suffix(':') {
            Atom::LabelPresent(k.to_string())
        } else {
            Atom::Glob(token.to_string())
        }
    }

    fn matches(&self, node: &NodeFacts) -> bool {
        match self {
            Atom::Glob(pattern) => fnmatch(pattern, node.name.as_str()),
            Atom::LabelEquals(k, v) => node.labels.get(k).is_some_and(|actual| actual == v),
            Atom::LabelPresent(k) => node.labels.contains_key(k),
        }
    }
}

/// A single OR-term: a conjunction of (possibly negated) atoms.
#[derive(Debug, Clone)]
struct Conjunction(Vec<(bool, Atom)>);

impl Conjunction {
    fn parse(term: &str) -> Self {
        let parts = term.split('+').map(str::trim).filter(|s| !s.is_empty());
        let mut atoms = Vec::new();
        for part in parts {
            if let Some(rest) = part.strip_prefix('!') {
                atoms.push((true, Atom::parse(rest)));
            } else {
                atoms.push((false, Atom::parse(part)));
            }
        }
        Self(atoms)
    }

    fn matches(&self, node: &NodeFacts) -> bool {
        self.0.iter().all(|(negated, atom)| atom.matches(node) != *negated)
    }
}

/// A parsed selector expression: disjunction of conjunctions.
#[derive(Debug, Clone)]
pub struct NodeSelector(Vec<Conjunction>);

impl NodeSelector {
    #[must_use]
    pub fn parse(expr: &str) -> Self {
        let terms = expr.split(',').map(str::trim).filter(|s| !s.is_empty());
        Self(terms.map(Conjunction::parse).collect())
    }

    /// Nodes matching this selector, in the order presented.
    #[must_use]
    pub fn select<'a>(&self, nodes: &'a [NodeFacts]) -> Vec<&'a NodeFacts> {
        if self.0.is_empty() {
            return nodes.iter().collect();
        }
        nodes.iter().filter(|n| self.0.iter().any(|conj| conj.matches(n))).collect()
    }
}

/// Shell-style glob matching limited to `*` and `?`, anchored at both ends.
fn fnmatch(pattern: &str, text: &str) -> bool {
    fn inner(p: &[u8], t: &[u8]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some(b'*') => inner(&p[1..], t) || (!t.is_empty() && inner(p, &t[1..])),
            Some(b'?') => !t.is_empty() && inner(&p[1..], &t[1..]),
            Some(&c) => !t.is_empty() && t[0] == c && inner(&p[1..], &t[1..]),
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}
