//! MQTT style topic routing shared by every transport.
//!
//! Publishers pick a concrete topic from the envelope, subscribers register
//! filters that may contain the `+` (one level) and `#` (remaining levels)
//! wildcards.

use crate::config::CLUSTER_PLACEHOLDER;
use crate::config::SOURCE_PLACEHOLDER;
use crate::ClientIdentity;
use crate::ClientRole;
use crate::CodecError;
use crate::Envelope;
use crate::EventAction;
use crate::EventSubResource;
use crate::Result;
use crate::TopicsConfig;
use crate::TransportError;
use crate::CLUSTER_ALL;
use crate::SOURCE_ALL;

const SINGLE_LEVEL: &str = "+";
const MULTI_LEVEL: &str = "#";

/// Checks that wildcards occupy whole levels and `#` only the last one.
pub fn validate_topic_filter(filter: &str) -> Result<()> {
    if filter.is_empty() {
        return Err(TransportError::InvalidUri("empty topic filter".to_string()).into());
    }
    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        let misplaced_multi = *level == MULTI_LEVEL && i != levels.len() - 1;
        let partial_wildcard = level.len() > 1 && level.contains(['+', '#']);
        if misplaced_multi || partial_wildcard {
            return Err(TransportError::InvalidUri(format!("invalid topic filter {filter:?}")).into());
        }
    }
    Ok(())
}

/// True when `topic` is selected by `filter`.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some(MULTI_LEVEL), _) => return true,
            (Some(SINGLE_LEVEL), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Resolves publish topics and subscription filters from [`TopicsConfig`].
#[derive(Debug, Clone, Default)]
pub struct TopicRouter {
    topics: TopicsConfig,
}

impl TopicRouter {
    pub fn new(topics: TopicsConfig) -> Self {
        Self { topics }
    }

    /// Topic an envelope published by `identity` goes to.
    ///
    /// Hubs publish per cluster, or broadcast a status resync request
    /// addressed to every cluster. Agents publish to the hub named by the
    /// `originalsource` extension, or broadcast a spec resync request
    /// addressed to every hub.
    pub fn publish_topic(&self, identity: &ClientIdentity, envelope: &Envelope) -> Result<String> {
        let event_type = envelope.cloud_events_type()?;
        let resync_request = event_type.action == EventAction::ResyncRequest;

        match identity.role {
            ClientRole::Source => {
                let cluster = envelope
                    .cluster_name()
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| unroutable(envelope, "no clustername extension"))?;
                if resync_request && event_type.sub_resource == EventSubResource::Status && cluster == CLUSTER_ALL {
                    return Ok(render(&self.topics.source_broadcast, &identity.source_id, ""));
                }
                Ok(render(&self.topics.source_events, &identity.source_id, &cluster))
            }
            ClientRole::Agent => {
                let original_source = envelope.original_source().filter(|s| !s.is_empty());
                if resync_request && event_type.sub_resource == EventSubResource::Spec {
                    return Ok(match original_source {
                        Some(source) if source != SOURCE_ALL => {
                            render(&self.topics.agent_events, &source, &identity.cluster_name)
                        }
                        _ => render(&self.topics.agent_broadcast, "", &identity.cluster_name),
                    });
                }
                let source = original_source
                    .filter(|s| s != SOURCE_ALL)
                    .ok_or_else(|| unroutable(envelope, "no originalsource extension"))?;
                Ok(render(&self.topics.agent_events, &source, &identity.cluster_name))
            }
        }
    }

    /// Filters a client subscribes with to receive everything addressed to it.
    pub fn subscriptions(&self, identity: &ClientIdentity) -> Vec<String> {
        match identity.role {
            ClientRole::Source => vec![
                render(&self.topics.agent_events, &identity.source_id, SINGLE_LEVEL),
                render(&self.topics.agent_broadcast, "", SINGLE_LEVEL),
            ],
            ClientRole::Agent => vec![
                render(&self.topics.source_events, SINGLE_LEVEL, &identity.cluster_name),
                render(&self.topics.source_broadcast, SINGLE_LEVEL, ""),
            ],
        }
    }
}

fn render(template: &str, source: &str, cluster: &str) -> String {
    template
        .replace(SOURCE_PLACEHOLDER, source)
        .replace(CLUSTER_PLACEHOLDER, cluster)
}

fn unroutable(envelope: &Envelope, reason: &str) -> crate::Error {
    CodecError::Encode(format!(
        "event {} of type {} cannot be routed: {reason}",
        envelope.id, envelope.event_type
    ))
    .into()
}
