use std::mem;

use tracing::debug;

use super::DmlEvent;
use crate::constants::DATA_FIELD;
use crate::constants::EVENT_FIELD;
use crate::constants::ID_FIELD;

/// Why a framed record never reached the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DropReason {
    /// `id:` was not an integer
    Malformed,
    /// `event:` missing or not the change-event type
    UnknownType,
    /// `data:` missing or not a change record
    Decode,
}

impl DropReason {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            DropReason::Malformed => "malformed",
            DropReason::UnknownType => "unknown_type",
            DropReason::Decode => "decode",
        }
    }
}

#[derive(Debug)]
pub(crate) enum Flushed {
    Event {
        message_id: Option<i64>,
        dml: DmlEvent,
    },
    Dropped(DropReason),
}

/// In-progress record of the line protocol.
///
/// Lines are `id:<int>`, `event:<type>` or `data:<json>`; a blank line ends
/// the record. A repeated field overwrites the earlier value and lines with
/// any other prefix are ignored.
#[derive(Debug, Default)]
pub(crate) struct RecordBuffer {
    id: Option<i64>,
    event: Option<String>,
    data: Option<String>,
    /// First reason the record can no longer be delivered
    rejected: Option<DropReason>,
}

impl RecordBuffer {
    pub(crate) fn is_empty(&self) -> bool {
        self.id.is_none() && self.event.is_none() && self.data.is_none() && self.rejected.is_none()
    }

    /// Feeds one line. Returns the flushed record when `line` terminates a
    /// non-empty one; the buffer is empty afterwards whatever the outcome.
    pub(crate) fn push_line(
        &mut self,
        line: &str,
        event_type: &str,
    ) -> Option<Flushed> {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            if self.is_empty() {
                return None;
            }
            return Some(mem::take(self).finish(event_type));
        }

        if let Some(value) = field_value(line, ID_FIELD) {
            match value.trim().parse::<i64>() {
                Ok(id) => self.id = Some(id),
                Err(e) => {
                    debug!(line = %line, "invalid message id: {}", e);
                    self.rejected.get_or_insert(DropReason::Malformed);
                }
            }
        } else if let Some(value) = field_value(line, EVENT_FIELD) {
            self.event = Some(value.to_string());
        } else if let Some(value) = field_value(line, DATA_FIELD) {
            self.data = Some(value.to_string());
        }
        None
    }

    /// Marks the record as carrying a line that could not be decoded; it is
    /// dropped when the blank line ends it.
    pub(crate) fn reject_undecodable(&mut self) {
        self.rejected.get_or_insert(DropReason::Decode);
    }

    fn finish(
        self,
        event_type: &str,
    ) -> Flushed {
        if let Some(reason) = self.rejected {
            debug!(message_id = ?self.id, reason = reason.as_str(), "drop rejected record");
            return Flushed::Dropped(reason);
        }
        if self.event.as_deref() != Some(event_type) {
            debug!(event = ?self.event, "drop record of unknown type");
            return Flushed::Dropped(DropReason::UnknownType);
        }
        let Some(data) = self.data else {
            debug!(message_id = ?self.id, "drop record without data");
            return Flushed::Dropped(DropReason::Decode);
        };
        match serde_json::from_str::<DmlEvent>(&data) {
            Ok(dml) => Flushed::Event {
                message_id: self.id,
                dml,
            },
            Err(e) => {
                debug!(message_id = ?self.id, "drop undecodable record: {}", e);
                Flushed::Dropped(DropReason::Decode)
            }
        }
    }
}

/// Value after `prefix`, without the single optional space that may follow it.
fn field_value<'a>(
    line: &'a str,
    prefix: &str,
) -> Option<&'a str> {
    line.strip_prefix(prefix)
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
}
