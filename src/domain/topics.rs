//! Topic shapes and validation
//!
//! Two shapes exist on the broker: static bring-up topics of the form
//! `<app>/devices/<kind>` or `<app>/sensors/<kind>`, and opaque per-entity topics
//! equal to a device's or sensor's API key. Only the static shape carries
//! structure; opaque topics are classified by lookup.

use thiserror::Error;

/// High-level message domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Devices,
    Sensors,
}

impl Domain {
    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            "devices" => Some(Domain::Devices),
            "sensors" => Some(Domain::Sensors),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Devices => "devices",
            Domain::Sensors => "sensors",
        }
    }
}

/// A topic following the static `<namespace>/<domain>/<leaf>` shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticTopic<'a> {
    pub namespace: &'a str,
    pub domain: Domain,
    pub leaf: &'a str,
}

impl<'a> StaticTopic<'a> {
    /// Parse a topic as a static topic; anything with fewer than three
    /// non-empty leading segments or an unknown domain is not static
    pub fn parse(topic: &'a str) -> Option<Self> {
        let mut segments = topic.split('/');
        let namespace = segments.next().filter(|s| !s.is_empty())?;
        let domain = segments.next().and_then(Domain::parse)?;
        let leaf = segments.next().filter(|s| !s.is_empty())?;
        Some(Self {
            namespace,
            domain,
            leaf,
        })
    }

    /// Device type label a static device leaf refers to
    pub fn device_type(&self) -> Option<&'static str> {
        if self.domain != Domain::Devices {
            return None;
        }
        device_type_for_leaf(self.leaf)
    }
}

/// Build a static topic string
pub fn static_topic(namespace: &str, domain: Domain, leaf: &str) -> String {
    format!("{namespace}/{}/{leaf}", domain.as_str())
}

/// Map a static device leaf to the stored device type label
pub fn device_type_for_leaf(leaf: &str) -> Option<&'static str> {
    match leaf {
        "fan" => Some("Mini fan"),
        "door" => Some("Door"),
        "led" => Some("Led"),
        "buzzer" => Some("Buzzer"),
        _ => None,
    }
}

/// Topic validation errors
#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    Empty,
    #[error("Topic contains wildcard character: '{0}'")]
    Wildcard(char),
    #[error("Topic contains NUL character")]
    Nul,
}

/// Validate an entity topic before it is subscribed or published to
pub fn validate_entity_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    for ch in topic.chars() {
        match ch {
            '+' | '#' => return Err(TopicError::Wildcard(ch)),
            '\0' => return Err(TopicError::Nul),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_static_topics() {
        let topic = StaticTopic::parse("home/devices/fan").unwrap();
        assert_eq!(topic.namespace, "home");
        assert_eq!(topic.domain, Domain::Devices);
        assert_eq!(topic.leaf, "fan");
        assert_eq!(topic.device_type(), Some("Mini fan"));

        let topic = StaticTopic::parse("home/sensors/temperature").unwrap();
        assert_eq!(topic.domain, Domain::Sensors);
        assert_eq!(topic.device_type(), None);
    }

    #[test]
    fn test_non_static_topics() {
        assert!(StaticTopic::parse("a1b2c3").is_none());
        assert!(StaticTopic::parse("unknown/x/y").is_none());
        assert!(StaticTopic::parse("home/devices").is_none());
        assert!(StaticTopic::parse("home/devices/").is_none());
        assert!(StaticTopic::parse("/devices/fan").is_none());
    }

    #[test]
    fn test_unknown_device_leaf() {
        let topic = StaticTopic::parse("home/devices/kettle").unwrap();
        assert_eq!(topic.device_type(), None);
    }

    #[test]
    fn test_static_topic_builder() {
        assert_eq!(static_topic("home", Domain::Devices, "led"), "home/devices/led");
        assert_eq!(
            static_topic("home", Domain::Sensors, "gas"),
            "home/sensors/gas"
        );
    }

    #[test]
    fn test_validate_entity_topic() {
        assert!(validate_entity_topic("a1b2c3").is_ok());
        assert!(validate_entity_topic("home/devices/fan").is_ok());
        assert_eq!(validate_entity_topic(""), Err(TopicError::Empty));
        assert_eq!(validate_entity_topic("home/#"), Err(TopicError::Wildcard('#')));
        assert_eq!(validate_entity_topic("+/x"), Err(TopicError::Wildcard('+')));
        assert_eq!(validate_entity_topic("a\0b"), Err(TopicError::Nul));
    }

    proptest! {
        #[test]
        fn static_topic_round_trips(
            namespace in "[a-z0-9_-]{1,12}",
            leaf in "[a-z0-9_-]{1,12}",
            devices in any::<bool>(),
        ) {
            let domain = if devices { Domain::Devices } else { Domain::Sensors };
            let topic = static_topic(&namespace, domain, &leaf);
            let parsed = StaticTopic::parse(&topic).unwrap();
            prop_assert_eq!(parsed.namespace, namespace.as_str());
            prop_assert_eq!(parsed.domain, domain);
            prop_assert_eq!(parsed.leaf, leaf.as_str());
        }

        #[test]
        fn opaque_keys_are_never_static(key in "[A-Za-z0-9]{1,32}") {
            prop_assert!(StaticTopic::parse(&key).is_none());
        }
    }
}
