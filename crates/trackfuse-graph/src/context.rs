// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Context for the evaluation of attributes and predicates.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use crate::attributes::KeyValueAttributes;

/// Attributes and provenance of one matched input node or edge, keyed by
/// its pattern-local name in a global context.
#[derive(Debug, Clone, Default)]
pub struct InputBinding {
    pub attributes: KeyValueAttributes,
    pub sources: BTreeSet<String>,
}

/// All relevant information for evaluating predicates and attribute
/// expressions.
///
/// A *local* context sees the attribute map and information sources of a
/// single node or edge. A *global* context sees every matched input of a
/// pattern by name (for qualified `node.attr` references) plus the union
/// of their information sources.
#[derive(Debug, Clone, Copy)]
pub enum EvaluationContext<'a> {
    Local {
        attributes: &'a KeyValueAttributes,
        sources: &'a BTreeSet<String>,
    },
    Global {
        inputs: &'a BTreeMap<String, InputBinding>,
        sources: &'a BTreeSet<String>,
    },
}

fn no_sources() -> &'static BTreeSet<String> {
    static EMPTY: OnceLock<BTreeSet<String>> = OnceLock::new();
    EMPTY.get_or_init(BTreeSet::new)
}

impl<'a> EvaluationContext<'a> {
    /// Local context over a node or edge with provenance.
    pub fn local(attributes: &'a KeyValueAttributes, sources: &'a BTreeSet<String>) -> Self {
        EvaluationContext::Local { attributes, sources }
    }

    /// Local context over a node or edge without provenance.
    pub fn local_attributes(attributes: &'a KeyValueAttributes) -> Self {
        EvaluationContext::Local { attributes, sources: no_sources() }
    }

    /// Global context over a full matching.
    pub fn global(inputs: &'a BTreeMap<String, InputBinding>, sources: &'a BTreeSet<String>) -> Self {
        EvaluationContext::Global { inputs, sources }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, EvaluationContext::Global { .. })
    }

    /// The attribute map of the current node/edge in a local context.
    pub fn attributes(&self) -> Option<&'a KeyValueAttributes> {
        match self {
            EvaluationContext::Local { attributes, .. } => Some(attributes),
            EvaluationContext::Global { .. } => None,
        }
    }

    /// Resolves a matched input node or edge by its pattern-local name.
    pub fn lookup(&self, name: &str) -> Option<&'a KeyValueAttributes> {
        match self {
            EvaluationContext::Global { inputs, .. } => {
                inputs.get(name).map(|binding| &binding.attributes)
            }
            EvaluationContext::Local { .. } => None,
        }
    }

    /// Information sources visible in this context: those of the single
    /// node/edge locally, the union over all matched inputs globally.
    pub fn sources(&self) -> &'a BTreeSet<String> {
        match self {
            EvaluationContext::Local { sources, .. } => sources,
            EvaluationContext::Global { sources, .. } => sources,
        }
    }
}
