//! Stats-to-fields decoder (§4.6): consumes a graphite-style payload
//! (`bucket value timestamp` lines), attaches a field per bucket plus a
//! `timestamp` field, and splits into one pack per distinct timestamp.

use crate::error::RunnerError;
use crate::message::{Field, FieldValue, Message};

/// Decodes a graphite-style payload into one [`Message`] per distinct
/// timestamp found in the lines. A malformed line rejects the whole pack
/// (§4.6: "fatal decode error").
pub fn decode_graphite(payload: &str) -> Result<Vec<Message>, RunnerError> {
    // Preserve first-seen order of distinct timestamps so output is
    // deterministic.
    let mut order: Vec<i64> = Vec::new();
    let mut by_timestamp: std::collections::HashMap<i64, Vec<(String, f64)>> =
        std::collections::HashMap::new();

    for line in payload.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let bucket = parts
            .next()
            .ok_or_else(|| RunnerError::Fatal(format!("malformed stats line: {line}")))?;
        let value: f64 = parts
            .next()
            .ok_or_else(|| RunnerError::Fatal(format!("malformed stats line: {line}")))?
            .parse()
            .map_err(|_| RunnerError::Fatal(format!("malformed stats line: {line}")))?;
        let timestamp: i64 = parts
            .next()
            .ok_or_else(|| RunnerError::Fatal(format!("malformed stats line: {line}")))?
            .parse()
            .map_err(|_| RunnerError::Fatal(format!("malformed stats line: {line}")))?;
        if parts.next().is_some() {
            return Err(RunnerError::Fatal(format!("malformed stats line: {line}")));
        }

        if !by_timestamp.contains_key(&timestamp) {
            order.push(timestamp);
        }
        by_timestamp.entry(timestamp).or_default().push((bucket.to_string(), value));
    }

    let mut messages = Vec::with_capacity(order.len());
    for ts in order {
        let mut message = Message::new();
        message.payload.clear();
        message.timestamp = ts;
        message.add_field(Field {
            name: "timestamp".into(),
            representation: String::new(),
            value: FieldValue::Integer(vec![ts]),
        });
        for (bucket, value) in &by_timestamp[&ts] {
            message.add_field(Field {
                name: bucket.clone(),
                representation: String::new(),
                value: FieldValue::Double(vec![*value]),
            });
        }
        messages.push(message);
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_timestamps_scenario() {
        // End-to-end scenario 5.
        let payload = "a 1 100\nb 2 200\nc 3 100\n";
        let messages = decode_graphite(payload).unwrap();
        assert_eq!(messages.len(), 2);

        let first = &messages[0];
        assert_eq!(first.timestamp, 100);
        assert_eq!(first.find_field("a", 0).unwrap().value.as_f64_at(0), Some(1.0));
        assert_eq!(first.find_field("c", 0).unwrap().value.as_f64_at(0), Some(3.0));
        assert!(first.find_field("b", 0).is_none());

        let second = &messages[1];
        assert_eq!(second.timestamp, 200);
        assert_eq!(second.find_field("b", 0).unwrap().value.as_f64_at(0), Some(2.0));
    }

    #[test]
    fn malformed_line_rejects_whole_pack() {
        let payload = "a 1 100\nnotaline\n";
        assert!(decode_graphite(payload).is_err());
    }
}
