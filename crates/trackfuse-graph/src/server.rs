// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Query server.

Wraps the SRG manager with an announcement protocol: clients announce
base SRG registrations, patterns, queries and deletions; the server runs
the bounded expansion fixed point, answers all queries and computes the
incremental per-client delta of subgraphs to start and stop.
*/

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, trace};

use crate::attribute_value::AttributeValue;
use crate::error::{GraphError, Result};
use crate::manager::{QueryResponse, SrgManager, MAX_EXPANSION_PASSES};
use crate::subgraph::{Subgraph, SubgraphRole};

/// A client announcement, classified by the subgraph's sections.
#[derive(Debug, Clone)]
pub struct Announcement {
    pub id: String,
    pub client_id: String,
    pub role: SubgraphRole,
    pub subgraph_id: String,
    pub subgraph_name: String,
}

/// Per-client dataflow documents produced by one server round.
pub type QueryDistribution = BTreeMap<String, Vec<Subgraph>>;

/// The UTQL server: announcement repository, SRG manager and client
/// dataflow state.
#[derive(Debug)]
pub struct QueryServer {
    manager: SrgManager,
    announcements: BTreeMap<String, Announcement>,
    /// What currently runs on each client, by subgraph id.
    client_state: BTreeMap<String, BTreeSet<String>>,
}

impl Default for QueryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryServer {
    pub fn new() -> Self {
        QueryServer {
            manager: SrgManager::new(),
            announcements: BTreeMap::new(),
            client_state: BTreeMap::new(),
        }
    }

    pub fn manager(&self) -> &SrgManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut SrgManager {
        &mut self.manager
    }

    /// Processes one announcement from a client.
    ///
    /// Registrations, patterns and queries are recorded; a subgraph with
    /// neither inputs nor outputs deletes the announcement of the same id.
    pub fn process_announcement(&mut self, subgraph: Subgraph, client_id: &str) -> Result<()> {
        let role = subgraph.role();
        let announcement = Announcement {
            id: format!("{}:{}", client_id, subgraph.id),
            client_id: client_id.to_string(),
            role,
            subgraph_id: subgraph.id.clone(),
            subgraph_name: subgraph.name.clone(),
        };

        match role {
            SubgraphRole::Registration => {
                self.manager.register_srg(subgraph, client_id)?;
                self.announcements.insert(announcement.id.clone(), announcement);
            }
            SubgraphRole::Pattern => {
                self.manager.register_pattern(subgraph, client_id)?;
                self.announcements.insert(announcement.id.clone(), announcement);
            }
            SubgraphRole::Query => {
                self.manager.register_query(subgraph, client_id);
                self.announcements.insert(announcement.id.clone(), announcement);
            }
            SubgraphRole::Deletion => {
                trace!("deleting announcement {}", announcement.id);
                self.delete_announcement(&announcement.id, client_id, &subgraph.name)?;
            }
        }
        Ok(())
    }

    /// Deletes a previously announced registration, pattern or query.
    ///
    /// When no announcement with this id exists, the name is treated as a
    /// pattern name (legacy deletion form).
    pub fn delete_announcement(
        &mut self,
        announcement_id: &str,
        client_id: &str,
        subgraph_name: &str,
    ) -> Result<()> {
        info!("deleting announcement {}", announcement_id);

        let Some(announcement) = self.announcements.remove(announcement_id) else {
            return self.manager.delete_pattern(subgraph_name, client_id);
        };

        match announcement.role {
            SubgraphRole::Registration => self.manager.delete_srg(&announcement.subgraph_id),
            SubgraphRole::Pattern => {
                self.manager.delete_pattern(&announcement.subgraph_name, client_id)
            }
            SubgraphRole::Query => {
                self.manager.delete_query(&announcement.subgraph_name, client_id)
            }
            SubgraphRole::Deletion => Err(GraphError::UnknownSubgraph(announcement_id.to_string())),
        }
    }

    /// Removes a client together with all its announcements.
    pub fn deregister_client(&mut self, client_id: &str) -> Result<()> {
        let ids: Vec<(String, String)> = self
            .announcements
            .values()
            .filter(|a| a.client_id == client_id)
            .map(|a| (a.id.clone(), a.subgraph_name.clone()))
            .collect();
        for (id, name) in ids {
            self.delete_announcement(&id, client_id, &name)?;
        }
        self.client_state.remove(client_id);
        Ok(())
    }

    /// Runs the expansion fixed point and answers all queries.
    pub fn recompute_all_queries(&mut self) -> BTreeMap<String, Vec<QueryResponse>> {
        for _ in 0..MAX_EXPANSION_PASSES {
            if self.manager.apply_all_patterns() == 0 {
                break;
            }
        }
        self.manager.log_current_srg();
        self.manager.process_queries()
    }

    /// Computes the per-client dataflow documents for one server round.
    ///
    /// Subgraphs already running on a client are suppressed; subgraphs
    /// that disappeared are emitted as empty-bodied deletion markers with
    /// the old id; edge references crossing clients are replaced with
    /// `remotePatternID`/`remoteEdgeName` attributes for the network
    /// bridge.
    pub fn generate_documents(&mut self) -> QueryDistribution {
        let responses = self.recompute_all_queries();
        self.incremental_compare_dataflows(responses)
    }

    fn incremental_compare_dataflows(
        &mut self,
        responses: BTreeMap<String, Vec<QueryResponse>>,
    ) -> QueryDistribution {
        let mut distribution: QueryDistribution = BTreeMap::new();
        let mut new_state: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for (client_id, query_responses) in &responses {
            distribution.entry(client_id.clone()).or_default();
            for response in query_responses {
                for subgraph in &response.graphs {
                    let client_running = new_state.entry(client_id.clone()).or_default();
                    if client_running.contains(&subgraph.id) {
                        // already emitted or kept this round
                        continue;
                    }
                    if self
                        .client_state
                        .get(client_id)
                        .is_some_and(|running| running.contains(&subgraph.id))
                    {
                        // already running on the client; keep silently
                        client_running.insert(subgraph.id.clone());
                        continue;
                    }
                    client_running.insert(subgraph.id.clone());
                    distribution
                        .entry(client_id.clone())
                        .or_default()
                        .push(subgraph.clone());
                }
            }
        }

        // cut edge references that point to subgraphs running on other
        // clients; the network bridge reconnects them
        for (client_id, subgraphs) in distribution.iter_mut() {
            let running = new_state.entry(client_id.clone()).or_default();
            for subgraph in subgraphs.iter_mut() {
                let edge_names: Vec<String> =
                    subgraph.graph.edges().map(|(_, e)| e.name.clone()).collect();
                for edge_name in edge_names {
                    let Ok(edge) = subgraph.graph.get_edge_mut(&edge_name) else { continue };
                    if !edge.data.is_input() || edge.data.edge_reference.is_empty() {
                        continue;
                    }
                    let referenced = edge.data.edge_reference.subgraph_id().to_string();
                    if !running.contains(&referenced) {
                        trace!(
                            "removing remote edge reference {}:{} -> {}",
                            subgraph.id,
                            edge_name,
                            referenced
                        );
                        let reference = std::mem::take(&mut edge.data.edge_reference);
                        edge.data
                            .attributes
                            .set("remotePatternID", AttributeValue::text(reference.subgraph_id()));
                        edge.data
                            .attributes
                            .set("remoteEdgeName", AttributeValue::text(reference.edge_name()));
                    }
                }
            }
        }

        // everything that ran before but is gone now becomes a deletion
        // marker with the old id
        for (client_id, previously_running) in &self.client_state {
            let still_running = new_state.get(client_id);
            for subgraph_id in previously_running {
                let kept = still_running.is_some_and(|s| s.contains(subgraph_id));
                if !kept {
                    debug!("stopping {} on client {}", subgraph_id, client_id);
                    let marker = Subgraph::new(subgraph_id.clone(), subgraph_id.clone());
                    distribution.entry(client_id.clone()).or_default().push(marker);
                }
            }
        }

        self.client_state = new_state;
        distribution
    }
}
