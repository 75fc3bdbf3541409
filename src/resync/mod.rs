//! Resync planning shared by hub and agent clients.
//!
//! A resync request carries the requester's view (resource versions for spec,
//! status hashes for status). The responder compares it with what it holds and
//! answers with individual `resync_response` events: full resources where the
//! requester is behind, payload-less tombstones where the requester holds
//! something the responder no longer has.

mod gate;

pub use gate::*;


use std::collections::HashSet;

use chrono::Utc;
use tracing::trace;

use crate::CloudEventsDataType;
use crate::CloudEventsType;
use crate::Envelope;
use crate::EventAction;
use crate::EventBuilder;
use crate::EventSubResource;
use crate::Resource;
use crate::ResourceAction;
use crate::ResourceStatusHashList;
use crate::ResourceVersionList;
use crate::Result;
use crate::StatusHashFn;

/// One step of a spec resync response.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecResyncDecision<R> {
    /// Send the full resource; `action` is `Added` when the agent lacks it
    /// and `Modified` when the agent holds an older version.
    Publish { action: ResourceAction, resource: R },
    /// The agent holds a resource the hub no longer has.
    Tombstone {
        resource_id: String,
        resource_version: i64,
    },
}

/// One step of a status resync response.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusResyncDecision<R> {
    Publish(R),
    /// The hub knows a status for a resource the agent no longer has.
    Tombstone { resource_id: String },
}

/// Compares the hub's resources with the versions an agent reported.
///
/// Hub resources come first in the order given, tombstones follow in the
/// order of the agent's list. An empty version list means the agent holds
/// nothing, so everything is sent. Hub resources that are already being
/// deleted are skipped unless the agent still holds them.
pub fn plan_spec_resync<R: Resource>(
    hub_resources: Vec<R>,
    versions: &ResourceVersionList,
) -> Result<Vec<SpecResyncDecision<R>>> {
    let mut decisions = Vec::with_capacity(hub_resources.len());
    let mut hub_uids = HashSet::with_capacity(hub_resources.len());

    for resource in hub_resources {
        let meta = resource.meta();
        hub_uids.insert(meta.uid.clone());

        match versions.find(&meta.uid) {
            None if meta.is_deleting() => {
                trace!(uid = %meta.uid, "Skip deleting resource the agent does not hold");
            }
            None => decisions.push(SpecResyncDecision::Publish {
                action: ResourceAction::Added,
                resource,
            }),
            Some(agent_version) if agent_version < meta.resource_version_number()? => {
                decisions.push(SpecResyncDecision::Publish {
                    action: ResourceAction::Modified,
                    resource,
                })
            }
            Some(_) => {}
        }
    }

    for version in &versions.versions {
        if !hub_uids.contains(&version.resource_id) {
            decisions.push(SpecResyncDecision::Tombstone {
                resource_id: version.resource_id.clone(),
                resource_version: version.resource_version,
            });
        }
    }
    Ok(decisions)
}

/// Compares an agent's resources with the status hashes the hub reported.
///
/// A resource is published when the hub has no hash for it or the hash
/// differs. Ids the hub lists that are no longer held locally become
/// tombstones. An empty hash list publishes everything.
pub fn plan_status_resync<R: Resource>(
    local_resources: Vec<R>,
    hashes: &ResourceStatusHashList,
    hash_fn: &StatusHashFn<R>,
) -> Result<Vec<StatusResyncDecision<R>>> {
    let mut decisions = Vec::with_capacity(local_resources.len());
    let mut local_uids = HashSet::with_capacity(local_resources.len());

    for resource in local_resources {
        local_uids.insert(resource.meta().uid.clone());
        let publish = match hashes.find(&resource.meta().uid) {
            None => true,
            Some(hub_hash) => hub_hash != hash_fn(&resource)?,
        };
        if publish {
            decisions.push(StatusResyncDecision::Publish(resource));
        }
    }

    for hash in &hashes.hashes {
        if !local_uids.contains(&hash.resource_id) {
            decisions.push(StatusResyncDecision::Tombstone {
                resource_id: hash.resource_id.clone(),
            });
        }
    }
    Ok(decisions)
}

/// `resync_response` event type for `data_type`.
pub fn resync_response_type(
    data_type: &CloudEventsDataType,
    sub_resource: EventSubResource,
) -> CloudEventsType {
    CloudEventsType::new(data_type.clone(), sub_resource, EventAction::ResyncResponse)
}

/// Payload-less deletion notice for a resource the requester should drop.
pub fn tombstone(
    source: &str,
    event_type: CloudEventsType,
    cluster_name: &str,
    resource_id: &str,
    resource_version: i64,
    original_source: Option<&str>,
) -> Envelope {
    let mut builder = EventBuilder::new(source, event_type)
        .with_resource_id(resource_id)
        .with_resource_version(resource_version)
        .with_cluster_name(cluster_name)
        .with_deletion_timestamp(Utc::now());
    if let Some(original_source) = original_source {
        builder = builder.with_original_source(original_source);
    }
    builder.build()
}
