//! Attachment field values.

use bytes::Bytes;
use std::fmt;

/// Non-owning link from an attachment to the entity field holding it.
///
/// Only identifiers are kept; the entity is resolved by whoever needs it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttachmentBinding {
    /// Identifier of the owning entity.
    pub entity_id: String,
    /// Name of the field the attachment lives in.
    pub field: String,
}

impl fmt::Display for AttachmentBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_id, self.field)
    }
}

/// A named reference to a binary stored in the attachment store.
///
/// Only the name is persisted in the entity document. The payload is held
/// locally until it has been uploaded; attachments decoded from a snapshot
/// carry no payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    name: String,
    payload: Option<Bytes>,
    binding: Option<AttachmentBinding>,
}

impl Attachment {
    /// Creates a bare attachment reference with no local payload.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: None,
            binding: None,
        }
    }

    /// Creates an attachment with a payload waiting to be uploaded.
    pub fn with_payload(name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            payload: Some(payload.into()),
            binding: None,
        }
    }

    /// Returns the attachment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the local payload, if any.
    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// Returns the owning entity field, if bound.
    pub fn binding(&self) -> Option<&AttachmentBinding> {
        self.binding.as_ref()
    }

    /// Binds this attachment to `(entity_id, field)`, replacing any
    /// previous binding.
    pub fn bind(&mut self, entity_id: impl Into<String>, field: impl Into<String>) {
        self.binding = Some(AttachmentBinding {
            entity_id: entity_id.into(),
            field: field.into(),
        });
    }

    /// Returns a copy bound to `(entity_id, field)`.
    #[must_use]
    pub fn bound_to(mut self, entity_id: impl Into<String>, field: impl Into<String>) -> Self {
        self.bind(entity_id, field);
        self
    }

    /// Returns true if both attachments refer to the same stored name.
    pub fn same_name(&self, other: &Attachment) -> bool {
        self.name == other.name
    }
}
