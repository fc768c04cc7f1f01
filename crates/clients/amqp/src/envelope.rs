//! The JSON job envelope exchanged between services.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A job message as it travels through the broker.
///
/// Every field is required when decoding. `time` is kept as sent: any ISO-8601 form is
/// accepted on the way in, outgoing envelopes are stamped in RFC 3339 UTC. A success envelope carries an empty `errors` list
/// and the extraction result in `message`; a failure envelope carries at least one error and
/// `T::default()` as `message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope<T> {
    /// Queue of the service that produced the message
    pub from: String,
    /// Destination queue
    pub to: String,
    /// Creation timestamp
    pub time: String,
    /// Upstream-assigned job identifier, may be empty
    pub job_id: String,
    /// Failure reasons, empty on success
    pub errors: Vec<String>,
    /// Locator of the payload in the job manager
    pub filepath: String,
    /// Opaque checksum of the payload
    pub md5: String,
    /// Job result
    pub message: T,
}

impl<T> JobEnvelope<T> {
    /// Builds an envelope for `job`, stamped with the current time.
    pub fn new(from: impl Into<String>, to: impl Into<String>, job: OutgoingJob<T>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            job_id: job.job_id,
            errors: job.errors,
            filepath: job.filepath,
            md5: job.md5,
            message: job.message,
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn is_failure(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// The caller-provided part of an envelope.
///
/// The sender fills in `from`, `to` and `time`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingJob<T> {
    pub job_id: String,
    pub filepath: String,
    pub md5: String,
    pub errors: Vec<String>,
    pub message: T,
}

impl<T> OutgoingJob<T> {
    /// A success result for the given job.
    pub fn success(job_id: String, filepath: String, md5: String, message: T) -> Self {
        Self {
            job_id,
            filepath,
            md5,
            errors: Vec::new(),
            message,
        }
    }
}

impl<T: Default> OutgoingJob<T> {
    /// A failure result carrying `reason` and a default message.
    pub fn failure(job_id: String, filepath: String, md5: String, reason: String) -> Self {
        Self {
            job_id,
            filepath,
            md5,
            errors: vec![reason],
            message: T::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    #[test]
    fn serializes_with_wire_field_names() {
        //* Given
        let job = OutgoingJob::success(
            "1".to_string(),
            "a.jpg".to_string(),
            "abc".to_string(),
            json!({"width": 640}),
        );

        //* When
        let envelope = JobEnvelope::new("Exif", "JobManager", job);
        let value = serde_json::to_value(&envelope).expect("envelope should serialize");

        //* Then
        let object = value.as_object().expect("envelope should be a JSON object");
        let mut keys: Vec<_> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            ["errors", "filepath", "from", "jobId", "md5", "message", "time", "to"]
        );
        assert_eq!(value["from"], "Exif");
        assert_eq!(value["to"], "JobManager");
        assert_eq!(value["jobId"], "1");
        assert_eq!(value["errors"], json!([]));
        assert_eq!(value["message"]["width"], 640);
    }

    #[test]
    fn stamps_utc_timestamp_on_creation() {
        let job = OutgoingJob::success(String::new(), "a.jpg".to_string(), String::new(), ());

        let envelope = JobEnvelope::new("Exif", "JobManager", job);

        let time = chrono::DateTime::parse_from_rfc3339(&envelope.time)
            .expect("time should be RFC 3339");
        assert_eq!(time.offset().local_minus_utc(), 0);
        assert!(envelope.time.ends_with('Z'));
    }

    #[test]
    fn decodes_any_iso8601_timestamp_as_sent() {
        for time in [
            "2024-05-01T12:00:00Z",
            "2024-05-01T12:00:00+00:00",
            "2024-05-01T12:00:00.250Z",
            "2024-05-01T12:00:00",
            "2024-05-01T12:00Z",
            "20240501T120000Z",
        ] {
            //* Given
            let body = json!({
                "from": "JobManager",
                "to": "Exif",
                "time": time,
                "jobId": "",
                "errors": [],
                "filepath": "a.jpg",
                "md5": "abc",
                "message": {},
            });

            //* When
            let envelope: JobEnvelope<Value> =
                serde_json::from_value(body).expect("envelope should decode");

            //* Then
            assert_eq!(envelope.time, time);
            assert!(envelope.is_success());
        }
    }

    #[test]
    fn decoding_rejects_missing_fields() {
        let body = json!({
            "from": "JobManager",
            "to": "Exif",
            "time": "2024-05-01T12:00:00Z",
            "jobId": "1",
            "errors": [],
            "filepath": "a.jpg",
            "md5": "abc",
        });

        let result = serde_json::from_value::<JobEnvelope<Value>>(body);

        assert!(result.is_err(), "message field is required");
    }

    #[test]
    fn failure_carries_reason_and_default_message() {
        let job = OutgoingJob::<Vec<String>>::failure(
            "7".to_string(),
            "b.png".to_string(),
            "def".to_string(),
            "bad request, no credentials provided".to_string(),
        );

        let envelope = JobEnvelope::new("Faces", "JobManager", job);

        assert!(envelope.is_failure());
        assert_eq!(envelope.errors, ["bad request, no credentials provided"]);
        assert!(envelope.message.is_empty());
    }
}
