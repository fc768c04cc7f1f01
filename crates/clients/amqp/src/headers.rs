//! Correlation id and credential transport headers.

use jobflow_config::Redacted;
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};

/// Header carrying the request correlation id.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Header carrying the bearer credential.
pub const AUTHORIZATION_HEADER: &str = "authorization";

const BEARER_PREFIX: &str = "Bearer ";

/// Transport metadata of a job message.
///
/// Empty header values are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeaders {
    pub correlation_id: Option<String>,
    /// Bearer credential without the `Bearer ` scheme prefix
    pub credential: Option<Redacted<String>>,
}

impl MessageHeaders {
    pub fn new(correlation_id: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            correlation_id: non_empty(correlation_id.into()),
            credential: non_empty(credential.into()).map(Redacted::from),
        }
    }

    /// Returns the correlation id and credential when both are present.
    pub fn require(&self) -> Option<(&str, &str)> {
        match (&self.correlation_id, &self.credential) {
            (Some(correlation_id), Some(credential)) => {
                Some((correlation_id.as_str(), credential.as_str()))
            }
            _ => None,
        }
    }

    /// Decodes the headers of an inbound delivery.
    pub fn from_field_table(table: &FieldTable) -> Self {
        let correlation_id = header(table, CORRELATION_ID_HEADER)
            .and_then(header_string)
            .and_then(non_empty);
        let credential = header(table, AUTHORIZATION_HEADER)
            .and_then(header_string)
            .map(|value| strip_bearer(&value).to_string())
            .and_then(non_empty)
            .map(Redacted::from);

        Self {
            correlation_id,
            credential,
        }
    }

    /// Encodes the present headers for publishing.
    pub fn to_field_table(&self) -> FieldTable {
        let mut table = FieldTable::default();
        if let Some(correlation_id) = &self.correlation_id {
            table.insert(
                ShortString::from(CORRELATION_ID_HEADER),
                AMQPValue::LongString(LongString::from(correlation_id.as_str())),
            );
        }
        if let Some(credential) = &self.credential {
            table.insert(
                ShortString::from(AUTHORIZATION_HEADER),
                AMQPValue::LongString(LongString::from(bearer(credential))),
            );
        }
        table
    }
}

/// Formats a credential as an `authorization` header value.
pub fn bearer(credential: &str) -> String {
    format!("{BEARER_PREFIX}{credential}")
}

/// Removes a leading `Bearer ` scheme (case-insensitive) from a header value.
pub fn strip_bearer(value: &str) -> &str {
    match value.get(..BEARER_PREFIX.len()) {
        Some(scheme) if scheme.eq_ignore_ascii_case(BEARER_PREFIX) => {
            value[BEARER_PREFIX.len()..].trim_start()
        }
        _ => value,
    }
}

fn header<'a>(table: &'a FieldTable, name: &str) -> Option<&'a AMQPValue> {
    table.inner().get(&ShortString::from(name))
}

fn header_string(value: &AMQPValue) -> Option<String> {
    let bytes = match value {
        AMQPValue::LongString(value) => value.as_bytes(),
        AMQPValue::ShortString(value) => value.as_str().as_bytes(),
        AMQPValue::ByteArray(value) => value.as_slice(),
        other => {
            tracing::debug!(value = ?other, "ignoring non-string header value");
            return None;
        }
    };
    match std::str::from_utf8(bytes) {
        Ok(value) => Some(value.to_string()),
        Err(err) => {
            tracing::debug!(error = %err, "ignoring header value that is not valid UTF-8");
            None
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

#[cfg(test)]
mod tests {
    use lapin::types::ByteArray;

    use super::*;

    fn table(entries: Vec<(&str, AMQPValue)>) -> FieldTable {
        let mut table = FieldTable::default();
        for (key, value) in entries {
            table.insert(ShortString::from(key), value);
        }
        table
    }

    #[test]
    fn decodes_every_string_encoding() {
        let values = [
            AMQPValue::LongString(LongString::from("corr-1")),
            AMQPValue::ShortString(ShortString::from("corr-1")),
            AMQPValue::ByteArray(ByteArray::from(b"corr-1".to_vec())),
        ];

        for value in values {
            let headers =
                MessageHeaders::from_field_table(&table(vec![(CORRELATION_ID_HEADER, value)]));

            assert_eq!(headers.correlation_id.as_deref(), Some("corr-1"));
        }
    }

    #[test]
    fn strips_bearer_scheme_from_credential() {
        //* Given
        let inbound = table(vec![
            (
                CORRELATION_ID_HEADER,
                AMQPValue::LongString(LongString::from("corr-1")),
            ),
            (
                AUTHORIZATION_HEADER,
                AMQPValue::LongString(LongString::from("bearer token-1")),
            ),
        ]);

        //* When
        let headers = MessageHeaders::from_field_table(&inbound);

        //* Then
        assert_eq!(headers.require(), Some(("corr-1", "token-1")));
    }

    #[test]
    fn credential_without_scheme_is_kept() {
        let inbound = table(vec![(
            AUTHORIZATION_HEADER,
            AMQPValue::LongString(LongString::from("token-1")),
        )]);

        let headers = MessageHeaders::from_field_table(&inbound);

        assert_eq!(
            headers.credential.map(Redacted::into_inner).as_deref(),
            Some("token-1")
        );
    }

    #[test]
    fn empty_and_missing_values_are_absent() {
        let inbound = table(vec![
            (
                CORRELATION_ID_HEADER,
                AMQPValue::LongString(LongString::from("")),
            ),
            (AUTHORIZATION_HEADER, AMQPValue::LongString(LongString::from("Bearer "))),
        ]);

        let headers = MessageHeaders::from_field_table(&inbound);

        assert_eq!(headers, MessageHeaders::default());
        assert_eq!(headers.require(), None);
    }

    #[test]
    fn encodes_credential_as_bearer_and_decodes_it_back() {
        //* Given
        let headers = MessageHeaders::new("corr-1", "token-1");

        //* When
        let table = headers.to_field_table();

        //* Then
        assert_eq!(
            header(&table, AUTHORIZATION_HEADER),
            Some(&AMQPValue::LongString(LongString::from("Bearer token-1")))
        );
        assert_eq!(MessageHeaders::from_field_table(&table), headers);
    }

    #[test]
    fn absent_headers_are_not_encoded() {
        let table = MessageHeaders::default().to_field_table();

        assert!(table.inner().is_empty());
    }

    #[test]
    fn debug_output_hides_credential() {
        let headers = MessageHeaders::new("corr-1", "token-1");

        let debug = format!("{headers:?}");

        assert!(!debug.contains("token-1"), "credential leaked: {debug}");
        assert!(debug.contains("corr-1"));
    }
}
