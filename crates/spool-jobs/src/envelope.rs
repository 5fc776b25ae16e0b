//! Job envelope: the routable unit persisted for each job.
//!
//! An envelope pairs routing metadata (queue, delay, weight, failure
//! callback) with the job's attributes. [`PayloadCodec`] turns it into the
//! stored payload string, encrypting attributes when asked to.

use crate::error::{JobError, JobResult};
use crate::job::Job;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use spool_crypto::Encrypter;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Attribute names that always travel in clear form.
pub const PROTECTED_FIELDS: [&str; 5] = ["encrypter", "delay_unit", "delay", "queue", "queued"];

/// Returns true if `key` is never encrypted.
#[must_use]
pub fn is_protected(key: &str) -> bool {
    PROTECTED_FIELDS.contains(&key)
}

/// Unit of a dispatch delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DelayUnit {
    Seconds,
    #[default]
    Minutes,
    Hours,
    Days,
}

impl DelayUnit {
    const fn seconds(self) -> u64 {
        match self {
            DelayUnit::Seconds => 1,
            DelayUnit::Minutes => 60,
            DelayUnit::Hours => 3600,
            DelayUnit::Days => 86_400,
        }
    }

    /// Converts `amount` of this unit into a duration.
    #[must_use]
    pub const fn duration(self, amount: u64) -> Duration {
        Duration::from_secs(amount.saturating_mul(self.seconds()))
    }
}

impl fmt::Display for DelayUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelayUnit::Seconds => write!(f, "seconds"),
            DelayUnit::Minutes => write!(f, "minutes"),
            DelayUnit::Hours => write!(f, "hours"),
            DelayUnit::Days => write!(f, "days"),
        }
    }
}

/// Explicit key/value bag holding a job's arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(Map<String, Value>);

impl Attributes {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures the serialized state of a job.
    ///
    /// Fails when the job has a field named after a bookkeeping key
    /// ([`PROTECTED_FIELDS`]); such a field could not survive the round trip.
    pub fn from_job<J: Serialize>(job: &J) -> JobResult<Self> {
        let mut map = match serde_json::to_value(job)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(JobError::Payload(format!(
                    "job must serialize to an object, got {}",
                    kind_of(&other)
                )))
            }
        };
        if let Some(key) = PROTECTED_FIELDS.iter().find(|key| map.contains_key(**key)) {
            return Err(JobError::Payload(format!(
                "job field `{}` uses a reserved name",
                key
            )));
        }
        Ok(Self(map))
    }

    /// Rebuilds a job from its attributes.
    pub fn to_job<J: DeserializeOwned>(&self) -> JobResult<J> {
        match serde_json::from_value(Value::Object(self.0.clone())) {
            Ok(job) => Ok(job),
            // unit structs serialize to null
            Err(_) if self.0.is_empty() => Ok(serde_json::from_value(Value::Null)?),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns a typed attribute.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> JobResult<Option<T>> {
        self.0
            .get(key)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(Into::into)
    }

    /// Returns the raw attribute value.
    #[must_use]
    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Sets a typed attribute.
    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> JobResult<()> {
        self.0.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Removes an attribute.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Returns true if the attribute exists.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over attribute names and values.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Value)> {
        self.0.iter_mut()
    }
}

/// The routable unit handed to a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    /// Registered job name.
    pub job: String,
    /// Target queue; `None` uses the connector's default.
    #[serde(default)]
    pub queue: Option<String>,
    /// Delay amount, in `delay_unit`.
    #[serde(default)]
    pub delay: u64,
    #[serde(default)]
    pub delay_unit: DelayUnit,
    /// Priority override; `None` uses the connector's default weight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
    /// Whether `attributes` hold encrypted fields.
    #[serde(default)]
    pub encrypted: bool,
    /// Named failure callback registered in the job registry.
    #[serde(default)]
    pub on_failure: Option<String>,
    /// Job arguments.
    #[serde(default)]
    pub attributes: Attributes,
}

impl JobEnvelope {
    /// Creates an envelope for a named job.
    #[must_use]
    pub fn new(job: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            job: job.into(),
            queue: None,
            delay: 0,
            delay_unit: DelayUnit::default(),
            weight: None,
            encrypted: false,
            on_failure: None,
            attributes,
        }
    }

    /// Creates an envelope from a typed job, honouring its declared
    /// queue and encryption request.
    pub fn for_job<J: Job>(job: &J) -> JobResult<Self> {
        let mut envelope = Self::new(J::NAME, Attributes::from_job(job)?);
        envelope.queue = J::QUEUE.map(str::to_string);
        envelope.encrypted = J::ENCRYPTED;
        Ok(envelope)
    }

    /// Time to wait before the job becomes claimable.
    #[must_use]
    pub fn delay_duration(&self) -> Duration {
        self.delay_unit.duration(self.delay)
    }
}

/// Kind of the clear value behind an [`EncryptedField`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// A string, encrypted as-is.
    Text,
    /// Any other value, JSON encoded before encryption.
    Json,
}

/// An encrypted attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedField {
    pub kind: FieldKind,
    pub cipher: String,
}

impl EncryptedField {
    /// Encrypts a clear value.
    pub fn seal(value: &Value, encrypter: &dyn Encrypter) -> JobResult<Self> {
        let (kind, plain) = match value {
            Value::String(text) => (FieldKind::Text, text.clone()),
            other => (FieldKind::Json, serde_json::to_string(other)?),
        };
        Ok(Self {
            kind,
            cipher: encrypter.encrypt(&plain)?,
        })
    }

    /// Decrypts back to the clear value.
    pub fn open(&self, encrypter: &dyn Encrypter) -> JobResult<Value> {
        let plain = encrypter.decrypt(&self.cipher)?;
        match self.kind {
            FieldKind::Text => Ok(Value::String(plain)),
            FieldKind::Json => Ok(serde_json::from_str(&plain)?),
        }
    }
}

/// Encodes envelopes to stored payloads and back.
#[derive(Clone, Default)]
pub struct PayloadCodec {
    encrypter: Option<Arc<dyn Encrypter>>,
}

impl PayloadCodec {
    /// Creates a codec; `None` stores every payload in clear form.
    #[must_use]
    pub fn new(encrypter: Option<Arc<dyn Encrypter>>) -> Self {
        Self { encrypter }
    }

    /// Returns true if an encrypter is configured.
    #[must_use]
    pub fn can_encrypt(&self) -> bool {
        self.encrypter.is_some()
    }

    /// Serializes an envelope, encrypting unprotected attributes if the
    /// envelope asks for it.
    pub fn encode(&self, envelope: &JobEnvelope) -> JobResult<String> {
        if !envelope.encrypted {
            return Ok(serde_json::to_string(envelope)?);
        }

        let Some(encrypter) = self.encrypter.as_deref() else {
            warn!(
                job = %envelope.job,
                "Encryption requested but no encrypter configured, storing payload in clear form"
            );
            let mut clear = envelope.clone();
            clear.encrypted = false;
            return Ok(serde_json::to_string(&clear)?);
        };

        let mut sealed = envelope.clone();
        for (key, value) in sealed.attributes.iter_mut() {
            if is_protected(key) {
                continue;
            }
            let field = EncryptedField::seal(value, encrypter)?;
            *value = serde_json::to_value(field)?;
        }

        Ok(serde_json::to_string(&sealed)?)
    }

    /// Parses a stored payload, decrypting attributes if needed.
    pub fn decode(&self, payload: &str) -> JobResult<JobEnvelope> {
        let mut envelope: JobEnvelope = serde_json::from_str(payload)?;
        if !envelope.encrypted {
            return Ok(envelope);
        }

        let encrypter = self.encrypter.as_deref().ok_or_else(|| {
            JobError::Configuration(format!(
                "job '{}' has an encrypted payload but no encrypter is configured",
                envelope.job
            ))
        })?;

        for (key, value) in envelope.attributes.iter_mut() {
            if is_protected(key) {
                continue;
            }
            let field: EncryptedField = serde_json::from_value(value.take()).map_err(|e| {
                JobError::Payload(format!("attribute '{}' is not an encrypted field: {}", key, e))
            })?;
            *value = field.open(encrypter)?;
        }
        envelope.encrypted = false;

        Ok(envelope)
    }
}

impl fmt::Debug for PayloadCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadCodec")
            .field("encrypter", &self.encrypter.as_ref().map(|e| e.name()))
            .finish()
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
