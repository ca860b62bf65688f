// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
SRG manager.

Holds the world SRG, the registered patterns and queries, and the
repository of instantiated subgraphs. Drives the matcher to expand the
SRG with derived edges, answers queries with dataflow descriptions and
performs transitive deletion when registrations go away.
*/

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::context::{EvaluationContext, InputBinding};
use crate::error::{GraphError, Result};
use crate::matcher::check_pattern;
use crate::matching::EdgeMatching;
use crate::pattern::PatternRecord;
use crate::srg::{srg_edge_name, Srg, SrgEdge};
use crate::subgraph::{EdgeReference, SectionTag, Subgraph, SubgraphEdge};

/// Maximum number of passes over all patterns before the expansion loop
/// gives up on reaching a fixed point.
pub const MAX_EXPANSION_PASSES: usize = 10;

/// Direction in which a known attribute improves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeDirection {
    BiggerIsBetter,
    SmallerIsBetter,
}

/// Relationship required between the information sources of distinct
/// matched input edges (stage-1 acceptance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceRule {
    /// Every edge must contribute a source the others do not have.
    NewSource,
    /// All matched edges must have pairwise disjoint sources. Strictest;
    /// prevents self-cancelling compositions such as `inv(A) * (A * B)`.
    #[default]
    Disjoint,
    /// No requirement.
    None,
}

/// An instantiated subgraph stored in the repository, together with the
/// client that owns it.
#[derive(Debug, Clone)]
pub struct InstantiatedPattern {
    pub subgraph: Subgraph,
    pub client_id: String,
}

/// All solutions of one query for one client.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub query_name: String,
    pub client_id: String,
    pub graphs: Vec<Subgraph>,
}

/// The SRG manager: registries, expansion driver and query answering.
#[derive(Debug)]
pub struct SrgManager {
    srg: Srg,
    repository: BTreeMap<String, InstantiatedPattern>,
    patterns: Vec<PatternRecord>,
    queries: Vec<PatternRecord>,
    known_attributes: BTreeMap<String, AttributeDirection>,
    source_rule: SourceRule,
    instantiation_counter: u64,
}

impl Default for SrgManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SrgManager {
    pub fn new() -> Self {
        let mut known_attributes = BTreeMap::new();
        for name in ["latency", "gaussT", "gaussR", "staticT", "staticR", "updateTime"] {
            known_attributes.insert(name.to_string(), AttributeDirection::SmallerIsBetter);
        }
        known_attributes.insert("availability".to_string(), AttributeDirection::BiggerIsBetter);

        SrgManager {
            srg: Srg::new(),
            repository: BTreeMap::new(),
            patterns: Vec::new(),
            queries: Vec::new(),
            known_attributes,
            source_rule: SourceRule::default(),
            instantiation_counter: 2000,
        }
    }

    /// Overrides the stage-1 source rule.
    pub fn set_source_rule(&mut self, rule: SourceRule) {
        self.source_rule = rule;
    }

    pub fn srg(&self) -> &Srg {
        &self.srg
    }

    pub fn repository(&self) -> &BTreeMap<String, InstantiatedPattern> {
        &self.repository
    }

    /// Registers a pattern for the given client.
    pub fn register_pattern(&mut self, pattern: Subgraph, client_id: &str) -> Result<()> {
        info!("registering pattern {}:{}", client_id, pattern.name);
        if self
            .patterns
            .iter()
            .any(|p| p.client_id == client_id && p.name == pattern.name)
        {
            return Err(GraphError::DuplicatePattern(format!("{}:{}", client_id, pattern.name)));
        }
        self.patterns.push(PatternRecord::new(Arc::new(pattern), client_id));
        Ok(())
    }

    /// Registers a query for the given client.
    pub fn register_query(&mut self, query: Subgraph, client_id: &str) {
        info!("registering query {}:{}", client_id, query.name);
        self.queries.push(PatternRecord::new(Arc::new(query), client_id));
    }

    /// Registers a base SRG: injects the subgraph's output section into the
    /// world SRG, identifying common nodes by their qualified ids.
    pub fn register_srg(&mut self, subgraph: Subgraph, client_id: &str) -> Result<()> {
        info!("registering SRG {}:{} (id: {})", client_id, subgraph.name, subgraph.id);
        let subgraph_id = subgraph.id.clone();
        let mut stored = subgraph;

        // match base nodes against the world SRG, creating missing ones
        let mut node_map = BTreeMap::new();
        let node_names: Vec<String> =
            stored.graph.nodes().map(|(_, n)| n.name.clone()).collect();
        for node_name in &node_names {
            let node = stored.graph.get_node(node_name)?;
            if !node.data.is_output() {
                continue;
            }
            let data = node.data.clone();

            let existing = if data.qualified_name.is_empty() {
                None
            } else {
                self.srg.node_index(&data.qualified_name)
            };
            if let Some(ix) = existing {
                let refs = self.srg.merge_node_attributes(ix, &data, &subgraph_id, node_name);
                self.write_back_node_attributes(ix, &refs);
                node_map.insert(node_name.clone(), ix);
            } else {
                let ix = self.srg.add_node(&data, &subgraph_id, node_name)?;
                // anonymous nodes received a generated id; keep the stored
                // copy coherent for later deletion
                let id = self.srg.node(ix).name.clone();
                stored.graph.get_node_mut(node_name)?.data.qualified_name = id;
                node_map.insert(node_name.clone(), ix);
            }
        }

        // base edges are information-source atoms: each edge's source set
        // is the singleton of its own generated name
        let edge_names: Vec<String> =
            stored.graph.edges().map(|(_, e)| e.name.clone()).collect();
        for edge_name in &edge_names {
            let edge = stored.graph.get_edge(edge_name)?;
            if !edge.data.is_output() {
                continue;
            }
            let source_name = &stored.graph.node(edge.source).name;
            let target_name = &stored.graph.node(edge.target).name;
            let (Some(&source), Some(&target)) =
                (node_map.get(source_name), node_map.get(target_name))
            else {
                return Err(GraphError::UnknownNode(format!(
                    "{} -> {}",
                    source_name, target_name
                )));
            };
            let unique_name = srg_edge_name(&subgraph_id, edge_name);

            let mut data = SrgEdge::new(edge.data.attributes.clone(), &subgraph_id, edge_name);
            data.information_sources.insert(unique_name.clone());
            self.srg.add_edge(unique_name.clone(), source, target, data)?;
            stored
                .graph
                .get_edge_mut(edge_name)?
                .data
                .information_sources
                .insert(unique_name);
        }

        self.repository
            .insert(subgraph_id, InstantiatedPattern { subgraph: stored, client_id: client_id.into() });
        Ok(())
    }

    /// Copies refreshed SRG node attributes back into the instance
    /// subgraphs that were merged into the node.
    fn write_back_node_attributes(&mut self, index: crate::graph::NodeIndex, refs: &[(String, String)]) {
        let attributes = self.srg.node(index).data.attributes.clone();
        for (subgraph_id, node_name) in refs {
            if let Some(instance) = self.repository.get_mut(subgraph_id) {
                if let Ok(node) = instance.subgraph.graph.get_node_mut(node_name) {
                    node.data.attributes.merge(&attributes);
                }
            }
        }
    }

    /// Applies every registered pattern until no new instantiations appear
    /// or the pass bound is reached. Returns the number of instantiations.
    pub fn apply_all_patterns(&mut self) -> usize {
        debug!(
            "statistics: {} SRG registrations, {} patterns, {} queries",
            self.repository.len(),
            self.patterns.len(),
            self.queries.len()
        );

        let mut total = 0;
        for _pass in 0..MAX_EXPANSION_PASSES {
            let records = self.patterns.clone();
            let mut applied = 0;
            for record in &records {
                applied += self.apply_pattern(record);
            }
            total += applied;
            if applied == 0 {
                break;
            }
        }
        total
    }

    /// Matches one pattern and applies every acceptable instance.
    /// Returns the number of instantiations.
    pub fn apply_pattern(&mut self, record: &PatternRecord) -> usize {
        debug!("trying to apply pattern \"{}:{}\"", record.client_id, record.name);

        let matches = check_pattern(record, &self.srg);
        let mut instances = 0;
        let mut superseded: Vec<String> = Vec::new();

        for mut matching in matches {
            // stage 1 works on the un-expanded attributes
            if !self.decide_stage1(&matching) {
                trace!("not applying (un-expanded)");
                continue;
            }

            self.expand_matching_attributes(record, &mut matching);

            let mut supersedes = Vec::new();
            if !self.decide_stage2(record, &matching, &mut supersedes) {
                trace!("not applying (expanded)");
                continue;
            }

            debug!("applying pattern {} instance", record.name);
            if let Err(e) = self.apply_detected_pattern(record, &matching) {
                warn!("failed to apply pattern {}: {}", record.name, e);
                continue;
            }
            instances += 1;
            superseded.append(&mut supersedes);
        }

        // superseded producers are removed only when they have exactly one
        // output edge, so that multi-output devices survive
        for subgraph_id in superseded {
            let single_output = self
                .repository
                .get(&subgraph_id)
                .map(|instance| instance.subgraph.output_edge_count() == 1)
                .unwrap_or(false);
            if single_output {
                if let Err(e) = self.delete_srg(&subgraph_id) {
                    warn!("failed to delete superseded subgraph {}: {}", subgraph_id, e);
                }
            }
        }

        instances
    }

    /// Collects information sources and input attributes of a matching and
    /// evaluates the output attribute expressions.
    pub fn expand_matching_attributes(&self, record: &PatternRecord, matching: &mut EdgeMatching) {
        matching.information_sources.clear();
        matching.all_input_attributes.clear();
        matching.expanded_edge_attributes.clear();
        matching.expanded_node_attributes.clear();

        for (edge_ix, edge) in record.graph.input_edges() {
            let Some(srg_ix) = matching.srg_edge(edge_ix) else { continue };
            let srg_edge = &self.srg.edge(srg_ix).data;
            matching
                .information_sources
                .extend(srg_edge.information_sources.iter().cloned());
            matching.all_input_attributes.insert(
                edge.name.clone(),
                InputBinding {
                    attributes: srg_edge.attributes.clone(),
                    sources: srg_edge.information_sources.clone(),
                },
            );
        }

        for (node_ix, node) in record.graph.graph.nodes() {
            if !node.data.is_input() {
                continue;
            }
            let Some(srg_ix) = matching.srg_node(node_ix) else { continue };
            matching.all_input_attributes.insert(
                node.name.clone(),
                InputBinding {
                    attributes: self.srg.node(srg_ix).data.attributes.clone(),
                    sources: BTreeSet::new(),
                },
            );
        }

        let mut expanded_edges = BTreeMap::new();
        let mut expanded_nodes = BTreeMap::new();
        {
            let ctx = EvaluationContext::global(
                &matching.all_input_attributes,
                &matching.information_sources,
            );

            for (_, edge) in record.graph.output_edges() {
                let mut attributes = edge.data.attributes.clone();
                for (name, expression) in &edge.data.expressions {
                    match expression.evaluate(&ctx) {
                        Ok(value) => attributes.set(name.clone(), value),
                        Err(e) => debug!(
                            "expression {}.{} on {} does not apply: {}",
                            edge.name, name, record.name, e
                        ),
                    }
                }
                expanded_edges.insert(edge.name.clone(), attributes);
            }

            for (_, node) in record.graph.graph.nodes() {
                if !node.data.is_output() {
                    continue;
                }
                let mut attributes = node.data.attributes.clone();
                for (name, expression) in &node.data.expressions {
                    match expression.evaluate(&ctx) {
                        Ok(value) => attributes.set(name.clone(), value),
                        Err(e) => debug!(
                            "expression {}.{} on {} does not apply: {}",
                            node.name, name, record.name, e
                        ),
                    }
                }
                expanded_nodes.insert(node.name.clone(), attributes);
            }
        }
        matching.expanded_edge_attributes = expanded_edges;
        matching.expanded_node_attributes = expanded_nodes;
    }

    /// Stage-1 acceptance on un-expanded attributes: reject matchings whose
    /// input edges recombine the same physical information.
    fn decide_stage1(&self, matching: &EdgeMatching) -> bool {
        if matching.matched_edge_count() <= 1 {
            return true;
        }
        let source_sets: Vec<&BTreeSet<String>> = matching
            .matched_edges()
            .map(|(_, f)| &self.srg.edge(f).data.information_sources)
            .collect();

        match self.source_rule {
            SourceRule::None => true,
            SourceRule::Disjoint => {
                for (i, a) in source_sets.iter().enumerate() {
                    for b in source_sets.iter().skip(i + 1) {
                        if a.intersection(b).next().is_some() {
                            return false;
                        }
                    }
                }
                true
            }
            SourceRule::NewSource => {
                let mut contained_pairs = 0;
                for (i, a) in source_sets.iter().enumerate() {
                    for (j, b) in source_sets.iter().enumerate() {
                        if i != j && b.is_subset(a) {
                            contained_pairs += 1;
                        }
                    }
                }
                contained_pairs < source_sets.len() - 1
            }
        }
    }

    /// Stage-2 acceptance on expanded attributes: the instance must create
    /// at least one output edge that is not redundant against the SRG.
    /// Existing edges whose known attributes are all worse are collected in
    /// `supersedes`.
    fn decide_stage2(
        &self,
        record: &PatternRecord,
        matching: &EdgeMatching,
        supersedes: &mut Vec<String>,
    ) -> bool {
        let mut creates_new_edge = false;

        for (_, pattern_edge) in record.graph.output_edges() {
            let (Some(source), Some(target)) = (
                matching.srg_node(pattern_edge.source),
                matching.srg_node(pattern_edge.target),
            ) else {
                continue;
            };
            if source == target {
                continue;
            }

            let Some(expanded) = matching.expanded_edge_attributes.get(&pattern_edge.name) else {
                continue;
            };

            let mut redundant = false;
            for &out_ix in &self.srg.node(source).out_edges {
                if redundant {
                    break;
                }
                let srg_edge = self.srg.edge(out_ix);
                if srg_edge.target != target {
                    continue;
                }

                let mut fixed_attributes_equal = true;
                let mut better_known_attribute = false;
                let mut all_known_attributes_better = true;

                for (key, value) in expanded.iter() {
                    let other = srg_edge.data.attributes.try_get(key);

                    // a fixed attribute is one declared literally on the
                    // pattern edge (not produced by an expression)
                    if pattern_edge.data.attributes.has(key) {
                        if other.is_none() || other.is_some_and(|o| o != value) {
                            fixed_attributes_equal = false;
                            break;
                        }
                    }

                    let Some(&direction) = self.known_attributes.get(key) else { continue };
                    match other {
                        None => better_known_attribute = true,
                        Some(other) => {
                            let comparison = value
                                .as_number()
                                .and_then(|mine| other.as_number().map(|theirs| (mine, theirs)));
                            match comparison {
                                Ok((mine, theirs)) => {
                                    // an attribute only counts as better when it
                                    // differs by at least 10% (hysteresis)
                                    let margin = theirs.abs() * 0.1;
                                    let improved = match direction {
                                        AttributeDirection::BiggerIsBetter => mine > theirs + margin,
                                        AttributeDirection::SmallerIsBetter => mine < theirs - margin,
                                    };
                                    let worsened = match direction {
                                        AttributeDirection::BiggerIsBetter => mine < theirs - margin,
                                        AttributeDirection::SmallerIsBetter => mine > theirs + margin,
                                    };
                                    if improved {
                                        better_known_attribute = true;
                                    } else if worsened {
                                        all_known_attributes_better = false;
                                    }
                                }
                                Err(_) => {
                                    debug!("cannot compare known attribute {} numerically", key)
                                }
                            }
                        }
                    }
                }

                trace!(
                    "comparing {} to {}: fixed {}, known {}",
                    expanded,
                    srg_edge.data.attributes,
                    if fixed_attributes_equal { "equal" } else { "unequal" },
                    if better_known_attribute { "better" } else { "not better" }
                );

                // a worse edge is still acceptable when it fuses different
                // information sources
                redundant = fixed_attributes_equal
                    && !better_known_attribute
                    && matching.information_sources == srg_edge.data.information_sources;

                if fixed_attributes_equal && better_known_attribute && all_known_attributes_better {
                    // never supersede one of our own ancestors
                    let depends = record.graph.input_edges().any(|(input_ix, _)| {
                        matching
                            .srg_edge(input_ix)
                            .map(|f| {
                                self.subgraph_depends_on(
                                    &self.srg.edge(f).data.subgraph_id,
                                    &srg_edge.data.subgraph_id,
                                )
                            })
                            .unwrap_or(false)
                    });
                    if !depends {
                        supersedes.push(srg_edge.data.subgraph_id.clone());
                    }
                }
            }

            if !redundant {
                creates_new_edge = true;
            }
        }

        creates_new_edge
    }

    /// Clones the pattern into a fully qualified subgraph for a matching.
    ///
    /// Input edges lose their predicates, gain the merged SRG attributes
    /// and an [`EdgeReference`] to their producer. Output nodes and edges
    /// receive the expanded attribute maps.
    pub fn instantiate_pattern(
        &self,
        record: &PatternRecord,
        matching: &EdgeMatching,
    ) -> Result<Subgraph> {
        let pattern = &record.graph;
        let mut instance = Subgraph::new(String::new(), pattern.name.clone());
        instance.dataflow_configuration = pattern.dataflow_configuration.clone();
        instance.dataflow_attributes = pattern.dataflow_attributes.clone();
        instance.dataflow_class = pattern.dataflow_class.clone();

        for (node_ix, node) in pattern.graph.nodes() {
            let srg_ix = matching.srg_node(node_ix).ok_or_else(|| {
                GraphError::Evaluation(format!("node {} not matched", node.name))
            })?;
            let srg_node = self.srg.node(srg_ix);

            let mut data = node.data.clone();
            data.attributes.merge(&srg_node.data.attributes);
            if node.data.is_output() {
                if let Some(expanded) = matching.expanded_node_attributes.get(&node.name) {
                    data.attributes.merge(expanded);
                }
            }
            data.qualified_name = srg_node.name.clone();
            data.predicates.clear();
            instance.add_node(node.name.clone(), data)?;
        }

        for (edge_ix, edge) in pattern.graph.edges() {
            let source = pattern.graph.node(edge.source).name.clone();
            let target = pattern.graph.node(edge.target).name.clone();

            if edge.data.is_input() {
                let srg_ix = matching.srg_edge(edge_ix).ok_or_else(|| {
                    GraphError::Evaluation(format!("edge {} not matched", edge.name))
                })?;
                let srg_edge = self.srg.edge(srg_ix);

                let mut data = SubgraphEdge::new(SectionTag::Input);
                data.attributes = srg_edge.data.attributes.clone();
                data.information_sources = srg_edge.data.information_sources.clone();
                data.edge_reference =
                    EdgeReference::new(&srg_edge.data.subgraph_id, &srg_edge.data.local_name)?;
                instance.add_edge(edge.name.clone(), &source, &target, data)?;
            } else {
                let mut data = SubgraphEdge::new(SectionTag::Output);
                data.attributes = matching
                    .expanded_edge_attributes
                    .get(&edge.name)
                    .cloned()
                    .unwrap_or_else(|| edge.data.attributes.clone());
                data.information_sources = matching.information_sources.clone();
                instance.add_edge(edge.name.clone(), &source, &target, data)?;
            }
        }

        Ok(instance)
    }

    /// Instantiates an accepted matching and inserts its output edges into
    /// the world SRG.
    fn apply_detected_pattern(&mut self, record: &PatternRecord, matching: &EdgeMatching) -> Result<()> {
        let subgraph_id = format!("{}{}", record.name, self.instantiation_counter);
        self.instantiation_counter += 1;

        let mut instance = self.instantiate_pattern(record, matching)?;
        instance.id = subgraph_id.clone();

        for (edge_ix, edge) in record.graph.graph.edges() {
            if edge.data.is_input() {
                // input edges are back-referenced so that deletions can
                // find every dependent subgraph
                let srg_ix = matching.srg_edge(edge_ix).ok_or_else(|| {
                    GraphError::Evaluation(format!("input edge {} not matched", edge.name))
                })?;
                self.srg
                    .edge_mut(srg_ix)
                    .data
                    .dependent_subgraphs
                    .insert(subgraph_id.clone());
            } else if edge.data.is_output() {
                let (Some(source), Some(target)) =
                    (matching.srg_node(edge.source), matching.srg_node(edge.target))
                else {
                    return Err(GraphError::Evaluation(format!(
                        "output edge {} endpoints not matched",
                        edge.name
                    )));
                };
                let unique_name = srg_edge_name(&subgraph_id, &edge.name);

                let instance_edge = instance.graph.get_edge(&edge.name)?;
                let mut data = SrgEdge::new(
                    instance_edge.data.attributes.clone(),
                    &subgraph_id,
                    &edge.name,
                );
                data.pattern_name = record.name.clone();
                data.information_sources = matching.information_sources.clone();
                self.srg.add_edge(unique_name, source, target, data)?;
            }
        }

        self.repository.insert(
            subgraph_id,
            InstantiatedPattern { subgraph: instance, client_id: record.client_id.clone() },
        );
        Ok(())
    }

    /// Removes a query registration.
    pub fn delete_query(&mut self, query_name: &str, client_id: &str) -> Result<()> {
        info!("deleting query {}:{}", client_id, query_name);
        let before = self.queries.len();
        self.queries
            .retain(|q| !(q.client_id == client_id && q.name == query_name));
        if self.queries.len() == before {
            return Err(GraphError::UnknownSubgraph(format!("{}:{}", client_id, query_name)));
        }
        Ok(())
    }

    /// Removes a pattern registration together with every SRG edge that
    /// was derived by it (transitively).
    pub fn delete_pattern(&mut self, pattern_name: &str, client_id: &str) -> Result<()> {
        info!("deleting pattern {}:{}", client_id, pattern_name);

        // repeat until no edge produced by this pattern remains; deletion
        // invalidates iteration, so restart after each hit
        loop {
            let hit = self.srg.edges().find_map(|(_, edge)| {
                let instance = self.repository.get(&edge.data.subgraph_id)?;
                (instance.subgraph.name == pattern_name && instance.client_id == client_id)
                    .then(|| edge.data.subgraph_id.clone())
            });
            match hit {
                Some(subgraph_id) => self.delete_srg(&subgraph_id)?,
                None => break,
            }
        }

        self.patterns
            .retain(|p| !(p.client_id == client_id && p.name == pattern_name));
        Ok(())
    }

    /// Transitively deletes a subgraph: its output edges leave the SRG,
    /// every dependent subgraph follows, and nodes whose spawn set becomes
    /// empty are dropped.
    pub fn delete_srg(&mut self, primal_subgraph_id: &str) -> Result<()> {
        debug!("deleting SRG {}", primal_subgraph_id);

        let mut delete_stack = vec![primal_subgraph_id.to_string()];
        let mut deleted: BTreeSet<String> = BTreeSet::new();
        let mut removable_nodes: BTreeSet<String> = BTreeSet::new();

        while let Some(subgraph_id) = delete_stack.pop() {
            let Some(instance) = self.repository.remove(&subgraph_id) else {
                // common dependencies may already be gone by the time they
                // surface again deeper in the stack
                debug!("subgraph {} already removed", subgraph_id);
                continue;
            };

            for (_, edge) in instance.subgraph.graph.edges() {
                if edge.data.is_input() {
                    // unlink the dependency entry on the producing edge
                    let primal_name = edge.data.edge_reference.qualified_edge_name();
                    if let Some(edge_ix) = self.srg.edge_index(&primal_name) {
                        self.srg
                            .edge_mut(edge_ix)
                            .data
                            .dependent_subgraphs
                            .remove(&subgraph_id);
                    } else {
                        trace!("edge not present in global SRG: {}", primal_name);
                    }
                }
                if edge.data.is_output() {
                    let unique_name = srg_edge_name(&subgraph_id, &edge.name);
                    let srg_edge = self.srg.get_edge(&unique_name)?;
                    for dependent in &srg_edge.data.dependent_subgraphs {
                        if deleted.insert(dependent.clone()) {
                            delete_stack.push(dependent.clone());
                        }
                    }
                    trace!("removing output edge {}", unique_name);
                    self.srg.remove_edge_by_name(&unique_name)?;
                }
            }

            for (_, node) in instance.subgraph.graph.nodes() {
                if !node.data.is_output() {
                    continue;
                }
                let id = &node.data.qualified_name;
                let Some(node_ix) = self.srg.node_index(id) else {
                    // every registered node must carry a qualified name
                    return Err(GraphError::UnknownNode(id.clone()));
                };
                if self.srg.release_node(node_ix, &subgraph_id, &node.name) {
                    trace!("marking node for removal: {}", id);
                    removable_nodes.insert(id.clone());
                }
            }
        }

        for id in removable_nodes {
            debug!("removing node {}", id);
            self.srg.remove_node_by_id(&id)?;
        }
        Ok(())
    }

    /// True if `subgraph_id` is an ancestor of `of_subgraph_id` through
    /// edge references (or the same subgraph).
    pub fn subgraph_depends_on(&self, subgraph_id: &str, of_subgraph_id: &str) -> bool {
        if subgraph_id == of_subgraph_id {
            return true;
        }
        let Some(instance) = self.repository.get(subgraph_id) else {
            return false;
        };
        instance.subgraph.input_edges().any(|(_, edge)| {
            !edge.data.edge_reference.is_empty()
                && self.subgraph_depends_on(edge.data.edge_reference.subgraph_id(), of_subgraph_id)
        })
    }

    /// Answers all registered queries. Returns the responses grouped by
    /// the client that has to run each subgraph.
    pub fn process_queries(&mut self) -> BTreeMap<String, Vec<QueryResponse>> {
        let mut results: BTreeMap<String, Vec<QueryResponse>> = BTreeMap::new();
        let queries = self.queries.clone();

        for record in &queries {
            let mut matches = check_pattern(record, &self.srg);
            for matching in &mut matches {
                self.expand_matching_attributes(record, matching);
            }

            let chosen: Vec<&EdgeMatching> = if record.graph.only_best_edge_match {
                self.best_matching(record, &matches).into_iter().collect()
            } else {
                matches.iter().collect()
            };

            for matching in chosen {
                let subgraphs = match self.generate_response(record, matching) {
                    Ok(subgraphs) => subgraphs,
                    Err(e) => {
                        warn!("failed to generate response for {}: {}", record.name, e);
                        continue;
                    }
                };
                for instantiated in subgraphs {
                    let client_results = results.entry(instantiated.client_id.clone()).or_default();
                    match client_results.last_mut() {
                        Some(response) if response.query_name == record.name => {
                            response.graphs.push(instantiated.subgraph);
                        }
                        _ => client_results.push(QueryResponse {
                            query_name: record.name.clone(),
                            client_id: instantiated.client_id.clone(),
                            graphs: vec![instantiated.subgraph],
                        }),
                    }
                }
            }
        }
        results
    }

    /// Selects the matching that minimizes the query's best-match
    /// expression, defaulting to the fewest information sources.
    fn best_matching<'a>(
        &self,
        record: &PatternRecord,
        matches: &'a [EdgeMatching],
    ) -> Option<&'a EdgeMatching> {
        let mut best: Option<(&EdgeMatching, f64)> = None;
        for matching in matches {
            // fewest sources means the cheapest dataflow
            let mut cost = matching.information_sources.len() as f64;
            if let Some(expression) = &record.graph.best_match_expression {
                let ctx = EvaluationContext::global(
                    &matching.all_input_attributes,
                    &matching.information_sources,
                );
                match expression.evaluate(&ctx).and_then(|v| v.as_number()) {
                    Ok(value) => cost = value,
                    Err(e) => debug!(
                        "best match expression on {} does not apply: {}",
                        record.name, e
                    ),
                }
            }
            debug!("evaluated {}'s best match cost: {}", record.name, cost);
            if best.map(|(_, c)| cost < c).unwrap_or(true) {
                best = Some((matching, cost));
            }
        }
        best.map(|(m, _)| m)
    }

    /// Builds a query response: the instantiated query plus the transitive
    /// closure of every producing subgraph reachable via edge references.
    pub fn generate_response(
        &self,
        record: &PatternRecord,
        matching: &EdgeMatching,
    ) -> Result<Vec<InstantiatedPattern>> {
        let mut instance = self.instantiate_pattern(record, matching)?;

        // a repeatable id: hash the concatenated input edge references
        let mut reference_stack: Vec<EdgeReference> = Vec::new();
        let mut collected: BTreeSet<String> = BTreeSet::new();
        let mut id_material = String::new();
        for (_, edge) in instance.graph.edges() {
            let reference = &edge.data.edge_reference;
            if !reference.is_empty() {
                if collected.insert(reference.subgraph_id().to_string()) {
                    reference_stack.push(reference.clone());
                }
                id_material.push_str(&reference.qualified_edge_name());
                id_material.push('%');
            }
        }
        instance.id = format!("{}{:x}", record.name, fnv1a(&id_material));

        let mut collection =
            vec![InstantiatedPattern { subgraph: instance, client_id: record.client_id.clone() }];

        while let Some(reference) = reference_stack.pop() {
            let instance = self
                .repository
                .get(reference.subgraph_id())
                .ok_or_else(|| GraphError::UnknownSubgraph(reference.subgraph_id().to_string()))?;

            for (_, edge) in instance.subgraph.graph.edges() {
                let next = &edge.data.edge_reference;
                if !next.is_empty() && collected.insert(next.subgraph_id().to_string()) {
                    reference_stack.push(next.clone());
                }
            }
            collection.push(instance.clone());
        }

        Ok(collection)
    }

    /// Logs the current SRG state at debug level.
    pub fn log_current_srg(&self) {
        debug!(
            "current SRG: {} nodes, {} edges, {} instantiated subgraphs",
            self.srg.order(),
            self.srg.size(),
            self.repository.len()
        );
        for (_, node) in self.srg.nodes() {
            debug!("  {} {}", node.name, node.data.attributes);
            for &out in &node.out_edges {
                let edge = self.srg.edge(out);
                debug!(
                    "    -> {} [{}] {} <{:?}>",
                    self.srg.node(edge.target).name,
                    edge.name,
                    edge.data.attributes,
                    edge.data.information_sources
                );
            }
        }
    }
}

/// Deterministic 64-bit FNV-1a fold used for repeatable response ids.
fn fnv1a(data: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in data.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
