//! The JSON array frames of the event wire protocol:
//! `["EVENT"|"REQ"|"CLOSE", …]` inbound and
//! `["OK"|"EVENT"|"EOSE"|"NOTICE", …]` outbound.

use serde::de::Error as DeError;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use nectar_primitives::{Event, EventId, Filter};

#[derive(Clone, Debug, PartialEq)]
pub enum ClientMessage {
    Event(Box<Event>),
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },
    Close {
        subscription_id: String,
    },
}

impl<'de> Deserialize<'de> for ClientMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut parts = Vec::<Value>::deserialize(deserializer)?;

        if parts.is_empty() {
            return Err(D::Error::custom("empty frame"));
        }

        let tail = parts.split_off(1);
        let label = parts
            .into_iter()
            .next()
            .and_then(|v| v.as_str().map(str::to_owned))
            .ok_or_else(|| D::Error::custom("frame label is not a string"))?;

        match label.as_str() {
            "EVENT" => {
                let [event]: [Value; 1] = tail
                    .try_into()
                    .map_err(|_| D::Error::custom("EVENT frame takes exactly one event"))?;

                let event: Event = serde_json::from_value(event).map_err(D::Error::custom)?;
                Ok(Self::Event(Box::new(event)))
            }
            "REQ" => {
                let mut tail = tail.into_iter();

                let subscription_id = tail
                    .next()
                    .and_then(|v| v.as_str().map(str::to_owned))
                    .ok_or_else(|| D::Error::custom("REQ frame misses a subscription id"))?;

                let filters = tail
                    .map(serde_json::from_value)
                    .collect::<Result<Vec<Filter>, _>>()
                    .map_err(D::Error::custom)?;

                if filters.is_empty() {
                    return Err(D::Error::custom("REQ frame carries no filters"));
                }

                Ok(Self::Req {
                    subscription_id,
                    filters,
                })
            }
            "CLOSE" => {
                let subscription_id = tail
                    .into_iter()
                    .next()
                    .and_then(|v| v.as_str().map(str::to_owned))
                    .ok_or_else(|| D::Error::custom("CLOSE frame misses a subscription id"))?;

                Ok(Self::Close { subscription_id })
            }
            other => Err(D::Error::custom(format!("unknown frame label {other}"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RelayMessage {
    Ok {
        id: EventId,
        accepted: bool,
        message: String,
    },
    Event {
        subscription_id: String,
        event: Box<Event>,
    },
    Eose {
        subscription_id: String,
    },
    Notice {
        message: String,
    },
}

impl Serialize for RelayMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Ok {
                id,
                accepted,
                message,
            } => {
                let mut seq = serializer.serialize_seq(Some(4))?;
                seq.serialize_element("OK")?;
                seq.serialize_element(id)?;
                seq.serialize_element(accepted)?;
                seq.serialize_element(message)?;
                seq.end()
            }
            Self::Event {
                subscription_id,
                event,
            } => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element("EVENT")?;
                seq.serialize_element(subscription_id)?;
                seq.serialize_element(event)?;
                seq.end()
            }
            Self::Eose { subscription_id } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("EOSE")?;
                seq.serialize_element(subscription_id)?;
                seq.end()
            }
            Self::Notice { message } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("NOTICE")?;
                seq.serialize_element(message)?;
                seq.end()
            }
        }
    }
}
