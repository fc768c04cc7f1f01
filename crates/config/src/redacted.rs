/// A secret loaded from configuration or received with a job.
///
/// Reads through to the wrapped value, but formats as `<redacted>` so configs and headers can
/// be logged with `?`. It can be deserialized, never serialized.
#[derive(Clone, PartialEq, Eq)]
pub struct Redacted<T>(T);

impl<T> Redacted<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> From<T> for Redacted<T> {
    fn from(secret: T) -> Self {
        Self(secret)
    }
}

impl<T> std::ops::Deref for Redacted<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> std::fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

impl<'de, T: serde::Deserialize<'de>> serde::Deserialize<'de> for Redacted<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::Redacted;

    #[test]
    fn debug_hides_the_secret() {
        let secret = Redacted::from("hunter2".to_string());

        assert_eq!(format!("{secret:?}"), "<redacted>");
        assert_eq!(format!("{:?}", Some(secret.clone())), "Some(<redacted>)");
        assert_eq!(secret.as_str(), "hunter2");
    }

    #[test]
    fn deserializes_the_wrapped_value() {
        let secret: Redacted<String> =
            serde_json::from_str("\"s3cret\"").expect("string should deserialize");

        assert_eq!(secret.into_inner(), "s3cret");
    }
}
