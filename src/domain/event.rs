use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Build lifecycle notifications published on the `common` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BuildEvent {
    #[serde(rename = "build:created")]
    Created,
    #[serde(rename = "build:started")]
    Started,
    #[serde(rename = "build:finished")]
    Finished,
    #[serde(rename = "build:canceled")]
    Canceled,
}

impl BuildEvent {
    pub const ALL: [BuildEvent; 4] = [
        BuildEvent::Created,
        BuildEvent::Started,
        BuildEvent::Finished,
        BuildEvent::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildEvent::Created => "build:created",
            BuildEvent::Started => "build:started",
            BuildEvent::Finished => "build:finished",
            BuildEvent::Canceled => "build:canceled",
        }
    }
}

impl fmt::Display for BuildEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("not a bound build event: {0}")]
pub struct UnknownEvent(pub String);

impl FromStr for BuildEvent {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BuildEvent::ALL
            .into_iter()
            .find(|ev| ev.as_str() == s)
            .ok_or_else(|| UnknownEvent(s.to_string()))
    }
}

/// One notification as delivered by the subscription, payload still unparsed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub event: BuildEvent,
    pub payload: String,
}

impl RawEvent {
    pub fn new(event: BuildEvent, payload: impl Into<String>) -> Self {
        Self {
            event,
            payload: payload.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_bound_event_name() {
        for ev in BuildEvent::ALL {
            assert_eq!(ev.as_str().parse::<BuildEvent>(), Ok(ev));
        }
    }

    #[test]
    fn rejects_unbound_event_names() {
        let err = "build:restarted".parse::<BuildEvent>().unwrap_err();
        assert_eq!(err, UnknownEvent("build:restarted".into()));
        assert!("pusher:ping".parse::<BuildEvent>().is_err());
    }
}
