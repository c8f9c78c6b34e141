//! The unit of work flowing through the queue.
//!
//! A [`Record`] is an immutable value object. Its identity is assigned by the
//! durable store on first persistence (see [`crate::core::store::Store`]);
//! nothing else in the crate ever generates one.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Store-assigned identity of a [`Record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(u64);

impl RecordId {
    pub fn value(self) -> u64 {
        self.0
    }

    pub fn from_raw(value: u64) -> Self {
        RecordId(value)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    id: Option<RecordId>,
    name: String,
    description: String,
    number: String,
    /// Milliseconds since the Unix epoch.
    created_at: u64,
}

impl Record {
    /// Creates a record without identity, stamped with the current time.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        number: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: description.into(),
            number: number.into(),
            created_at: current_timestamp(),
        }
    }

    /// Creates a record that already carries an identity.
    pub fn with_id(
        id: RecordId,
        name: impl Into<String>,
        description: impl Into<String>,
        number: impl Into<String>,
    ) -> Self {
        Self {
            id: Some(id),
            ..Self::new(name, description, number)
        }
    }

    /// Rebuilds a record from every persisted field. Used by stores when
    /// decoding.
    pub fn restore(
        id: RecordId,
        name: String,
        description: String,
        number: String,
        created_at: u64,
    ) -> Self {
        Self {
            id: Some(id),
            name,
            description,
            number,
            created_at,
        }
    }

    /// Returns a copy of this record bearing `id`. Other fields are untouched.
    pub fn with_identity(&self, id: RecordId) -> Self {
        Self {
            id: Some(id),
            ..self.clone()
        }
    }

    pub fn id(&self) -> Option<RecordId> {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{id} {}", self.name)?,
            None => write!(f, "<unsaved> {}", self.name)?,
        }
        write!(
            f,
            " [{}] {} @ {}",
            self.number, self.description, self.created_at
        )
    }
}

pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
