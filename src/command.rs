use serde_json::{Map, Value};

use crate::error::{JobdError, Result};
use crate::job::JobId;

/// Commands are serialized as small delimited strings so that every backend
/// can carry them as a single opaque message.
pub const MAX_WIRE_LEN: usize = 512;

/// One of the four messages exchanged between job producers and the
/// scheduler. Immutable once constructed; consumed exactly once by the
/// scheduler's dispatch loop.
///
/// Commands are wakeup *hints*: the scheduler always re-reads the job store
/// before acting, so losing one is annoying but never corrupting.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// A new user job is waiting for a slot.
    Start { job_id: JobId },
    /// A spawned job process finished and its slot can be released.
    End { job_id: JobId },
    /// Some fields of a job row changed; carries the new values.
    Refresh {
        job_id: JobId,
        fields: Map<String, Value>,
    },
    /// Liveness probe; answered with a PONG correlated by `token`.
    Ping { token: String },
}

impl Command {
    /// Wire encoding: `"START-{id}"`, `"END-{id}"`, `"REFRESH-{id}-{json}"`,
    /// `"PING-{token}"`.
    pub fn to_wire(&self) -> String {
        match self {
            Command::Start { job_id } => format!("START-{job_id}"),
            Command::End { job_id } => format!("END-{job_id}"),
            Command::Refresh { job_id, fields } => {
                // Map serialization cannot fail.
                let payload = serde_json::to_string(&Value::Object(fields.clone()))
                    .unwrap_or_else(|_| "{}".to_owned());
                format!("REFRESH-{job_id}-{payload}")
            }
            Command::Ping { token } => format!("PING-{token}"),
        }
    }

    pub fn from_wire(raw: &str) -> Result<Self> {
        let malformed = || JobdError::MalformedCommand(raw.to_owned());

        let (kind, rest) = raw.split_once('-').ok_or_else(malformed)?;
        match kind {
            "START" => Ok(Command::Start {
                job_id: rest.parse().map_err(|_| malformed())?,
            }),
            "END" => Ok(Command::End {
                job_id: rest.parse().map_err(|_| malformed())?,
            }),
            "REFRESH" => {
                let (id, payload) = rest.split_once('-').ok_or_else(malformed)?;
                let job_id = id.parse().map_err(|_| malformed())?;
                let fields = match serde_json::from_str(payload).map_err(|_| malformed())? {
                    Value::Object(map) => map,
                    _ => return Err(malformed()),
                };
                Ok(Command::Refresh { job_id, fields })
            }
            "PING" => Ok(Command::Ping {
                token: rest.to_owned(),
            }),
            _ => Err(malformed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn start_end_round_trip() {
        for cmd in [Command::Start { job_id: 42 }, Command::End { job_id: 7 }] {
            assert_eq!(Command::from_wire(&cmd.to_wire()).unwrap(), cmd);
        }
    }

    #[test]
    fn refresh_round_trip_preserves_fields() {
        let fields = json!({"enabled": false, "periodicity_secs": 60})
            .as_object()
            .unwrap()
            .clone();
        let cmd = Command::Refresh { job_id: 3, fields };
        let parsed = Command::from_wire(&cmd.to_wire()).unwrap();
        assert_eq!(parsed, cmd);
    }

    #[test]
    fn ping_token_may_contain_hyphens() {
        let cmd = Command::Ping {
            token: "8d4c7310-4be3-45b1-9b2f-000000000000".to_owned(),
        };
        assert_eq!(Command::from_wire(&cmd.to_wire()).unwrap(), cmd);
    }

    #[test]
    fn malformed_messages_are_rejected() {
        for raw in ["", "NOPE-1", "START-", "START-abc", "REFRESH-1", "REFRESH-1-[]"] {
            assert!(Command::from_wire(raw).is_err(), "{raw:?} should not parse");
        }
    }
}
