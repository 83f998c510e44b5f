//! Device identity, topic derivation and name validation

use thiserror::Error;

/// Identity of this node on the broker, derived once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub thing_name: String,
    pub publish_topic: String,
    pub subscribe_topic: String,
}

impl DeviceIdentity {
    /// Derive topics deterministically from the thing name
    pub fn derive(
        namespace: &str,
        project: &str,
        thing_name: &str,
    ) -> Result<Self, ValidationError> {
        validate_thing_name(thing_name)?;
        validate_topic_segment(namespace)?;
        validate_topic_segment(project)?;

        Ok(Self {
            thing_name: thing_name.to_string(),
            publish_topic: TopicBuilder::build_data_topic(namespace, project, thing_name),
            subscribe_topic: TopicBuilder::build_command_topic(namespace, project, thing_name),
        })
    }
}

/// Topic construction functions
pub struct TopicBuilder;

impl TopicBuilder {
    /// Build telemetry topic: `<namespace>/data/<project>/<thing_name>`
    pub fn build_data_topic(namespace: &str, project: &str, thing_name: &str) -> String {
        format!("{namespace}/data/{project}/{thing_name}")
    }

    /// Build command topic: `<namespace>/commands/<project>/<thing_name>`
    pub fn build_command_topic(namespace: &str, project: &str, thing_name: &str) -> String {
        format!("{namespace}/commands/{project}/{thing_name}")
    }
}

/// Thing names double as MQTT client identifiers and topic segments
pub fn validate_thing_name(thing_name: &str) -> Result<(), ValidationError> {
    if thing_name.is_empty() {
        return Err(ValidationError::EmptyThingName);
    }

    for ch in thing_name.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidThingNameChar(ch));
        }
    }

    Ok(())
}

/// Namespace and project must be single topic levels without wildcards
pub fn validate_topic_segment(segment: &str) -> Result<(), ValidationError> {
    if segment.is_empty() {
        return Err(ValidationError::EmptyTopicSegment);
    }
    if let Some(ch) = segment.chars().find(|c| matches!(c, '/' | '+' | '#')) {
        return Err(ValidationError::InvalidTopicSegmentChar(ch));
    }
    Ok(())
}

/// Identity validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Thing name cannot be empty")]
    EmptyThingName,
    #[error("Thing name contains invalid character: '{0}'")]
    InvalidThingNameChar(char),
    #[error("Topic segment cannot be empty")]
    EmptyTopicSegment,
    #[error("Topic segment contains reserved character: '{0}'")]
    InvalidTopicSegmentChar(char),
}
