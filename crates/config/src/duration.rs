use std::time::Duration;

/// A duration configured as a (floating-point) number of seconds.
///
/// `DEFAULT_SECS` is used when the value is absent or `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigDuration<const DEFAULT_SECS: u64>(Duration);

impl<const DEFAULT_SECS: u64> Default for ConfigDuration<DEFAULT_SECS> {
    fn default() -> Self {
        Self(Duration::from_secs(DEFAULT_SECS))
    }
}

impl<const DEFAULT_SECS: u64> From<Duration> for ConfigDuration<DEFAULT_SECS> {
    fn from(value: Duration) -> Self {
        Self(value)
    }
}

impl<const DEFAULT_SECS: u64> From<ConfigDuration<DEFAULT_SECS>> for Duration {
    fn from(val: ConfigDuration<DEFAULT_SECS>) -> Self {
        val.0
    }
}

impl<'de, const DEFAULT_SECS: u64> serde::Deserialize<'de> for ConfigDuration<DEFAULT_SECS> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserialize_duration(deserializer).map(|opt| opt.map_or_else(Self::default, Self))
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs = <Option<f64> as serde::Deserialize>::deserialize(deserializer)?;
    match secs {
        Some(secs) if !secs.is_finite() || secs < 0.0 => Err(serde::de::Error::custom(format!(
            "duration must be a non-negative number of seconds, got {secs}"
        ))),
        secs => Ok(secs.map(Duration::from_secs_f64)),
    }
}
