use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{
    config::{ConfigurationError, ExperimentSettings},
    metadata::{ExperimentMetadata, MetadataError, MetadataService},
    node::{resolve_nodes, NodeId},
};

/// Timing of an experiment, fixed once it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentWindow {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    /// Beacon re-arm interval.
    pub packet_time: Duration,
    /// How long a failed node stays down.
    pub sleep_time: Duration,
}

impl ExperimentWindow {
    pub fn is_over(&self, now: DateTime<Utc>) -> bool {
        now >= self.stop
    }
}

/// Everything needed to drive one experiment, gathered from the metadata service.
#[derive(Debug, Clone)]
pub struct ExperimentPlan {
    pub id: u64,
    pub name: String,
    pub nodes: Vec<NodeId>,
    pub window: ExperimentWindow,
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

impl ExperimentPlan {
    /// Looks up experiment `id` and resolves its nodes on `site`.
    pub async fn load(
        service: &impl MetadataService,
        id: u64,
        site: &str,
        settings: &ExperimentSettings,
    ) -> Result<Self, PlanError> {
        let listing = service.list_experiments().await?;
        let metadata = listing.find(id)?;
        let resources = service.experiment_resources(id).await?;
        let nodes = resolve_nodes(site, &settings.archi, &resources)?;
        let unlisted = unlisted_nodes(&nodes, metadata);
        if !unlisted.is_empty() {
            tracing::warn!(
                id,
                ?unlisted,
                "Resolved nodes are missing from the experiment's resources"
            );
        }
        let window = ExperimentWindow {
            start: metadata.start_timestamp()?,
            stop: metadata.stop_timestamp()?,
            packet_time: Duration::from_secs(settings.packet_time_secs),
            sleep_time: Duration::from_secs(settings.sleep_time_secs),
        };
        tracing::info!(
            id,
            name = %metadata.name,
            state = %metadata.state,
            nodes = nodes.len(),
            stop = %window.stop,
            "Loaded experiment"
        );
        Ok(Self {
            id,
            name: metadata.name.clone(),
            nodes,
            window,
        })
    }
}

/// Nodes of `nodes` absent from the resources the listing reports. An empty resource
/// list leaves nothing to compare against.
fn unlisted_nodes(nodes: &[NodeId], metadata: &ExperimentMetadata) -> Vec<NodeId> {
    let listed = metadata.resource_nodes();
    if listed.is_empty() {
        return Vec::new();
    }
    nodes
        .iter()
        .filter(|n| !listed.contains(n))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::metadata::ExperimentList;

    struct FixedService {
        list: ExperimentList,
        resources: serde_json::Value,
    }

    impl MetadataService for FixedService {
        async fn list_experiments(&self) -> Result<ExperimentList, MetadataError> {
            Ok(self.list.clone())
        }

        async fn experiment_resources(&self, _id: u64) -> Result<serde_json::Value, MetadataError> {
            Ok(self.resources.clone())
        }

        async fn wait_until_running(&self, _id: u64) -> Result<(), MetadataError> {
            Ok(())
        }
    }

    fn service(resources: serde_json::Value) -> FixedService {
        FixedService {
            list: ExperimentList {
                items: vec![ExperimentMetadata {
                    id: 214061,
                    name: "resilience".into(),
                    date: 1_589_371_980,
                    duration: 320,
                    resources: vec![],
                    state: "Running".into(),
                    owner: None,
                    nb_resources: None,
                }],
            },
            resources,
        }
    }

    #[tokio::test]
    async fn builds_plan_from_metadata() -> testresult::TestResult {
        let svc = service(serde_json::json!({"items": [{"grenoble": {"m3": "1-5"}}]}));
        let plan =
            ExperimentPlan::load(&svc, 214061, "grenoble", &ExperimentSettings::default()).await?;
        assert_eq!(plan.nodes.len(), 5);
        assert_eq!(plan.window.stop, Utc.timestamp_opt(1_589_372_300, 0).unwrap());
        assert_eq!(plan.window.sleep_time, Duration::from_secs(15));
        assert!(!plan.window.is_over(Utc.timestamp_opt(1_589_372_299, 0).unwrap()));
        assert!(plan.window.is_over(plan.window.stop));
        Ok(())
    }

    #[tokio::test]
    async fn no_nodes_is_a_configuration_error() {
        let svc = service(serde_json::json!({"items": []}));
        let err = ExperimentPlan::load(&svc, 214061, "grenoble", &ExperimentSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PlanError::Configuration(ConfigurationError::NoNodes)
        ));
    }

    #[test]
    fn nodes_outside_listed_resources_are_found() {
        let mut metadata = service(serde_json::Value::Null).list.items.remove(0);
        let nodes: Vec<NodeId> = vec!["m3-4".into(), "m3-5".into(), "m3-11".into()];
        assert!(unlisted_nodes(&nodes, &metadata).is_empty());

        metadata.resources = vec![
            "m3-4.grenoble.iot-lab.info".into(),
            "m3-11.grenoble.iot-lab.info".into(),
        ];
        assert_eq!(unlisted_nodes(&nodes, &metadata), vec![NodeId::from("m3-5")]);
    }
}
