//! Typed views of the master's collections: graphs, instances, schedules.

use dedalus_core::{GraphInstanceInfo, GraphStruct, InstanceState, ScheduledGraph};
use dedalus_store::{Collection, Store};
use tracing::info;

use crate::{Error, Result};

/// Graph, instance and schedule persistence for the master.
#[derive(Clone)]
pub struct MasterStore {
    graphs: Collection,
    instances: Collection,
    schedules: Collection,
}

impl MasterStore {
    /// Wrap the master collections of `store`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn new(store: &Store) -> Result<Self> {
        Ok(Self {
            graphs: store.collection("graphs")?,
            instances: store.collection("instances")?,
            schedules: store.collection("schedules")?,
        })
    }

    /// Persist `graph` as the next revision of `name` and return that
    /// revision (0 for a new name).
    ///
    /// Read-then-write: two concurrent creators of one name can race; the
    /// loser overwrites the winner's revision.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn add_graph_struct(&self, name: &str, mut graph: GraphStruct) -> Result<u64> {
        let revisions = self.graphs.collection(name)?;
        let last = self.last_revision(name)?;
        let revision = last.map_or(0, |(rev, _)| rev + 1);
        graph.graph_name = name.to_string();
        graph.revision = revision;
        revisions.put(&revision.to_string(), &graph)?;
        info!(graph = %name, revision, "stored graph struct");
        Ok(revision)
    }

    /// Read one revision of a graph, or its latest when `revision` is
    /// `None`.
    ///
    /// # Errors
    ///
    /// [`Error::GraphNotFound`] if the name or revision does not exist.
    pub fn read_graph_struct(&self, name: &str, revision: Option<u64>) -> Result<GraphStruct> {
        match revision {
            Some(revision) => self
                .graphs
                .collection(name)?
                .get(&revision.to_string())?
                .ok_or(Error::GraphNotFound {
                    name: name.to_string(),
                    revision: Some(revision),
                }),
            None => self
                .last_revision(name)?
                .map(|(_, graph)| graph)
                .ok_or(Error::GraphNotFound {
                    name: name.to_string(),
                    revision: None,
                }),
        }
    }

    /// List graphs as `(name, revision, struct?)` triplets, optionally
    /// restricted to one name. Structs are omitted unless `with_info`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn list_graph_structs(
        &self,
        graph_name: Option<&str>,
        with_info: bool,
    ) -> Result<Vec<(String, u64, Option<GraphStruct>)>> {
        let view = match graph_name {
            Some(name) => self.graphs.collection(name)?,
            None => self.graphs.clone(),
        };
        let mut result = Vec::new();
        if with_info {
            for entry in view.iterate::<GraphStruct>() {
                let (_, graph) = entry?;
                result.push((graph.graph_name.clone(), graph.revision, Some(graph)));
            }
        } else {
            for key in view.keys() {
                let key = key?;
                let (name, revision) = match graph_name {
                    Some(name) => (name.to_string(), key),
                    None => match key.split_once('=') {
                        Some((name, revision)) => (name.to_string(), revision.to_string()),
                        None => continue,
                    },
                };
                let revision = revision.parse().unwrap_or(0);
                result.push((name, revision, None));
            }
        }
        Ok(result)
    }

    /// Read an instance document.
    ///
    /// # Errors
    ///
    /// [`Error::InstanceNotFound`] for an unknown id.
    pub fn read_instance(&self, instance_id: &str) -> Result<GraphInstanceInfo> {
        self.instances
            .get(instance_id)?
            .ok_or_else(|| Error::InstanceNotFound {
                instance_id: instance_id.to_string(),
            })
    }

    /// Create or replace an instance document.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn write_instance(&self, instance: &GraphInstanceInfo) -> Result<()> {
        self.instances.put(&instance.instance_id, instance)?;
        Ok(())
    }

    /// Current state of an instance.
    ///
    /// # Errors
    ///
    /// [`Error::InstanceNotFound`] for an unknown id.
    pub fn read_instance_state(&self, instance_id: &str) -> Result<InstanceState> {
        Ok(self.read_instance(instance_id)?.exec_stats.state)
    }

    /// List instances; infos are omitted unless `with_info`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn list_instances(
        &self,
        with_info: bool,
    ) -> Result<Vec<(String, Option<GraphInstanceInfo>)>> {
        if with_info {
            self.instances
                .iterate::<GraphInstanceInfo>()
                .map(|entry| {
                    let (instance_id, info) = entry?;
                    Ok((instance_id, Some(info)))
                })
                .collect()
        } else {
            self.instances.keys().map(|key| Ok((key?, None))).collect()
        }
    }

    /// Create or replace the schedule of a graph; the graph must exist.
    ///
    /// # Errors
    ///
    /// [`Error::GraphNotFound`] when the graph has no revisions yet.
    pub fn write_schedule(&self, schedule: &ScheduledGraph) -> Result<()> {
        if self.last_revision(&schedule.graph_name)?.is_none() {
            return Err(Error::GraphNotFound {
                name: schedule.graph_name.clone(),
                revision: None,
            });
        }
        self.schedules.put(&schedule.graph_name, schedule)?;
        Ok(())
    }

    /// All scheduled graphs.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn list_schedules(&self) -> Result<Vec<ScheduledGraph>> {
        self.schedules
            .iterate::<ScheduledGraph>()
            .map(|entry| Ok(entry?.1))
            .collect()
    }

    fn last_revision(&self, name: &str) -> Result<Option<(u64, GraphStruct)>> {
        let revisions = self.graphs.collection(name)?;
        let mut last: Option<(u64, GraphStruct)> = None;
        for entry in revisions.iterate::<GraphStruct>() {
            let (_, graph) = entry?;
            if last.as_ref().is_none_or(|(rev, _)| graph.revision > *rev) {
                last = Some((graph.revision, graph));
            }
        }
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MasterStore {
        MasterStore::new(&Store::temporary().unwrap()).unwrap()
    }

    fn named_graph() -> GraphStruct {
        GraphStruct {
            graph_name: "ignored".to_string(),
            revision: 999,
            ..GraphStruct::default()
        }
    }

    #[test]
    fn test_revisions_are_assigned_monotonically() {
        let store = store();
        assert_eq!(store.add_graph_struct("g1", named_graph()).unwrap(), 0);
        assert_eq!(store.add_graph_struct("g1", named_graph()).unwrap(), 1);
        assert_eq!(store.add_graph_struct("g2", named_graph()).unwrap(), 0);
        assert_eq!(store.add_graph_struct("g1", named_graph()).unwrap(), 2);

        let latest = store.read_graph_struct("g1", None).unwrap();
        assert_eq!(latest.revision, 2);
        assert_eq!(latest.graph_name, "g1");

        let pinned = store.read_graph_struct("g1", Some(1)).unwrap();
        assert_eq!(pinned.revision, 1);
    }

    #[test]
    fn test_unknown_graph_and_revision() {
        let store = store();
        assert!(matches!(
            store.read_graph_struct("nope", None),
            Err(Error::GraphNotFound { .. })
        ));
        store.add_graph_struct("g1", named_graph()).unwrap();
        assert!(matches!(
            store.read_graph_struct("g1", Some(7)),
            Err(Error::GraphNotFound { revision: Some(7), .. })
        ));
    }

    #[test]
    fn test_listing_with_and_without_info() {
        let store = store();
        store.add_graph_struct("g1", named_graph()).unwrap();
        store.add_graph_struct("g1", named_graph()).unwrap();
        store.add_graph_struct("g2", named_graph()).unwrap();

        let all = store.list_graph_structs(None, false).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|(_, _, graph)| graph.is_none()));

        let only_g1 = store.list_graph_structs(Some("g1"), true).unwrap();
        assert_eq!(only_g1.len(), 2);
        assert!(only_g1.iter().all(|(name, _, graph)| {
            name == "g1" && graph.as_ref().is_some_and(|g| g.graph_name == "g1")
        }));
    }

    #[test]
    fn test_schedule_requires_existing_graph() {
        let store = store();
        let schedule = ScheduledGraph::new("g1", "* * * * *").unwrap();
        assert!(matches!(
            store.write_schedule(&schedule),
            Err(Error::GraphNotFound { .. })
        ));

        store.add_graph_struct("g1", named_graph()).unwrap();
        store.write_schedule(&schedule).unwrap();
        assert_eq!(store.list_schedules().unwrap().len(), 1);
    }

    #[test]
    fn test_instance_round_trip() {
        let store = store();
        assert!(matches!(
            store.read_instance("i1"),
            Err(Error::InstanceNotFound { .. })
        ));

        let instance = GraphInstanceInfo::launch("i1", named_graph());
        store.write_instance(&instance).unwrap();
        assert_eq!(store.read_instance("i1").unwrap(), instance);
        assert_eq!(
            store.read_instance_state("i1").unwrap(),
            InstanceState::Idle
        );
        assert_eq!(store.list_instances(false).unwrap().len(), 1);
    }
}
