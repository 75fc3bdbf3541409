//! Cloud event type vocabulary shared by hub and agents.
//!
//! A cloud event type is the dotted string
//! `<group>.<version>.<resource>.<subresource>.<action>`. The group may itself
//! contain dots, so parsing works from the right.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::CodecError;
use crate::Error;
use crate::Result;

/// Matches every cluster when used as a cluster name in list options or resync requests.
pub const CLUSTER_ALL: &str = "+";
/// Matches every source when used as a source name in list options or resync requests.
pub const SOURCE_ALL: &str = "+";

/// Identifies a resource kind: `{group, version, resource}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CloudEventsDataType {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl CloudEventsDataType {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }
}

impl fmt::Display for CloudEventsDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.group, self.version, self.resource)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSubResource {
    /// Desired state, published by the hub
    Spec,
    /// Observed state, published by agents
    Status,
}

impl EventSubResource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSubResource::Spec => "spec",
            EventSubResource::Status => "status",
        }
    }
}

impl fmt::Display for EventSubResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventSubResource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "spec" => Ok(EventSubResource::Spec),
            "status" => Ok(EventSubResource::Status),
            other => Err(CodecError::InvalidEventType {
                event_type: other.to_string(),
                reason: format!("unsupported subresource {other}"),
            }
            .into()),
        }
    }
}

/// Event verb. `resync_request` and `resync_response` are reserved by the
/// protocol, every other verb is free-form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventAction {
    ResyncRequest,
    ResyncResponse,
    Other(String),
}

impl EventAction {
    pub fn new(action: impl Into<String>) -> Self {
        let action = action.into();
        match action.as_str() {
            "resync_request" => EventAction::ResyncRequest,
            "resync_response" => EventAction::ResyncResponse,
            _ => EventAction::Other(action),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventAction::ResyncRequest => "resync_request",
            EventAction::ResyncResponse => "resync_response",
            EventAction::Other(action) => action,
        }
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CloudEventsType {
    pub data_type: CloudEventsDataType,
    pub sub_resource: EventSubResource,
    pub action: EventAction,
}

impl CloudEventsType {
    pub fn new(
        data_type: CloudEventsDataType,
        sub_resource: EventSubResource,
        action: EventAction,
    ) -> Self {
        Self {
            data_type,
            sub_resource,
            action,
        }
    }

    pub fn is_resync_request(&self) -> bool {
        self.action == EventAction::ResyncRequest
    }

    /// Which side of the protocol emits events of this type.
    ///
    /// Spec events and status resync requests flow hub to agent, status events
    /// and spec resync requests flow agent to hub.
    pub fn direction(&self) -> EventDirection {
        match (self.sub_resource, self.is_resync_request()) {
            (EventSubResource::Spec, false) | (EventSubResource::Status, true) => {
                EventDirection::SourceToAgent
            }
            (EventSubResource::Status, false) | (EventSubResource::Spec, true) => {
                EventDirection::AgentToSource
            }
        }
    }
}

impl fmt::Display for CloudEventsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.data_type, self.sub_resource, self.action)
    }
}

impl FromStr for CloudEventsType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| -> Error {
            CodecError::InvalidEventType {
                event_type: s.to_string(),
                reason: reason.to_string(),
            }
            .into()
        };

        let mut parts = s.rsplitn(5, '.');
        let action = parts.next().ok_or_else(|| invalid("missing action"))?;
        let sub_resource = parts.next().ok_or_else(|| invalid("missing subresource"))?;
        let resource = parts.next().ok_or_else(|| invalid("missing resource"))?;
        let version = parts.next().ok_or_else(|| invalid("missing version"))?;
        let group = parts.next().ok_or_else(|| invalid("missing group"))?;

        if [group, version, resource, sub_resource, action]
            .iter()
            .any(|segment| segment.is_empty())
        {
            return Err(invalid("empty segment"));
        }

        let sub_resource = match sub_resource {
            "spec" => EventSubResource::Spec,
            "status" => EventSubResource::Status,
            _ => return Err(invalid("unsupported subresource")),
        };

        Ok(CloudEventsType {
            data_type: CloudEventsDataType::new(group, version, resource),
            sub_resource,
            action: EventAction::new(action),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDirection {
    SourceToAgent,
    AgentToSource,
}

/// Classified change handed to resource handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceAction {
    Added,
    Modified,
    StatusModified,
    Deleted,
}

impl fmt::Display for ResourceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceAction::Added => "ADDED",
            ResourceAction::Modified => "MODIFIED",
            ResourceAction::StatusModified => "STATUSMODIFIED",
            ResourceAction::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// Filter handed to listers: which cluster, which source, which data type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub cluster_name: String,
    pub source: String,
    pub data_type: CloudEventsDataType,
}

impl ListOptions {
    pub fn all_clusters(&self) -> bool {
        self.cluster_name.is_empty() || self.cluster_name == CLUSTER_ALL
    }

    pub fn all_sources(&self) -> bool {
        self.source.is_empty() || self.source == SOURCE_ALL
    }
}
