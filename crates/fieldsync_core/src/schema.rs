//! Per-entity-type field descriptor tables.

use crate::error::{CoreError, CoreResult};
use crate::reference::DataRef;
use fieldsync_codec::{FieldCodec, FieldType};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Document key stamped with the server time when an entity is created.
pub const CREATED_AT_KEY: &str = "_createdAt";

/// Document key stamped with the server time on every write.
pub const UPDATED_AT_KEY: &str = "_updatedAt";

/// Schema version used when none is given.
pub const DEFAULT_VERSION: &str = "v1";

/// Describes one field of an entity type.
#[derive(Clone)]
pub struct FieldDescriptor {
    name: String,
    field_type: FieldType,
    excluded: bool,
    codec: Option<Arc<dyn FieldCodec>>,
}

impl FieldDescriptor {
    /// Creates a synchronized field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            excluded: false,
            codec: None,
        }
    }

    /// Marks the field as local-only: never encoded, decoded or observed.
    #[must_use]
    pub fn excluded(mut self) -> Self {
        self.excluded = true;
        self
    }

    /// Attaches an override codec.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn FieldCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Returns the field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared type.
    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Returns true if the field is excluded from synchronization.
    pub fn is_excluded(&self) -> bool {
        self.excluded
    }

    /// Returns the override codec, if any.
    pub fn codec(&self) -> Option<&dyn FieldCodec> {
        self.codec.as_deref()
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("field_type", &self.field_type)
            .field("excluded", &self.excluded)
            .field("codec", &self.codec.is_some())
            .finish()
    }
}

/// The field table of one entity type.
///
/// Built once per type and shared by every entity of that type. Field order
/// is declaration order and is used wherever fields are enumerated.
#[derive(Debug)]
pub struct EntitySchema {
    model: String,
    version: String,
    fields: Vec<FieldDescriptor>,
    index: HashMap<String, usize>,
}

impl EntitySchema {
    /// Starts building a schema for `model`.
    pub fn builder(model: impl Into<String>) -> EntitySchemaBuilder {
        EntitySchemaBuilder {
            model: model.into(),
            version: DEFAULT_VERSION.to_string(),
            fields: Vec::new(),
        }
    }

    /// Returns the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the schema version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the location holding all entities of this type,
    /// `{version}/{model}`.
    pub fn collection(&self) -> DataRef {
        DataRef::new(&self.version).child(&self.model)
    }

    /// Returns all field descriptors in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Looks up a field and its position.
    pub fn field(&self, name: &str) -> Option<(usize, &FieldDescriptor)> {
        self.index.get(name).map(|&i| (i, &self.fields[i]))
    }

    /// Iterates the fields that take part in synchronization.
    pub fn synced_fields(&self) -> impl Iterator<Item = (usize, &FieldDescriptor)> {
        self.fields.iter().enumerate().filter(|(_, d)| !d.excluded)
    }
}

/// Builder for [`EntitySchema`].
#[derive(Debug)]
pub struct EntitySchemaBuilder {
    model: String,
    version: String,
    fields: Vec<FieldDescriptor>,
}

impl EntitySchemaBuilder {
    /// Sets the schema version (default `v1`).
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Adds a synchronized field.
    pub fn field(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.descriptor(FieldDescriptor::new(name, field_type))
    }

    /// Adds a local-only field.
    pub fn excluded_field(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.descriptor(FieldDescriptor::new(name, field_type).excluded())
    }

    /// Adds a synchronized field with an override codec.
    pub fn field_with_codec(
        self,
        name: impl Into<String>,
        field_type: FieldType,
        codec: Arc<dyn FieldCodec>,
    ) -> Self {
        self.descriptor(FieldDescriptor::new(name, field_type).with_codec(codec))
    }

    /// Adds a prepared descriptor.
    pub fn descriptor(mut self, descriptor: FieldDescriptor) -> Self {
        self.fields.push(descriptor);
        self
    }

    /// Validates and builds the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the model or a field name is empty or contains
    /// `/`, if a field name is reserved, or if a field is declared twice.
    pub fn build(self) -> CoreResult<Arc<EntitySchema>> {
        for (what, name) in [("model", &self.model), ("version", &self.version)] {
            if name.is_empty() || name.contains('/') {
                return Err(CoreError::invalid_schema(format!("invalid {what} name `{name}`")));
            }
        }

        let mut index = HashMap::with_capacity(self.fields.len());
        for (i, descriptor) in self.fields.iter().enumerate() {
            let name = descriptor.name();
            if name.is_empty() || name.contains('/') {
                return Err(CoreError::invalid_schema(format!("invalid field name `{name}`")));
            }
            if name == CREATED_AT_KEY || name == UPDATED_AT_KEY {
                return Err(CoreError::ReservedField {
                    field: name.to_string(),
                });
            }
            if index.insert(name.to_string(), i).is_some() {
                return Err(CoreError::DuplicateField {
                    field: name.to_string(),
                });
            }
        }

        Ok(Arc::new(EntitySchema {
            model: self.model,
            version: self.version,
            fields: self.fields,
            index,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_in_declaration_order() {
        let schema = EntitySchema::builder("user")
            .field("name", FieldType::String)
            .field("friends", FieldType::Relation)
            .excluded_field("draft", FieldType::String)
            .build()
            .unwrap();

        let names: Vec<_> = schema.fields().iter().map(FieldDescriptor::name).collect();
        assert_eq!(names, ["name", "friends", "draft"]);

        let synced: Vec<_> = schema.synced_fields().map(|(_, d)| d.name()).collect();
        assert_eq!(synced, ["name", "friends"]);

        let (index, descriptor) = schema.field("friends").unwrap();
        assert_eq!(index, 1);
        assert_eq!(descriptor.field_type(), FieldType::Relation);
        assert!(schema.field("missing").is_none());
    }

    #[test]
    fn collection_path_includes_version() {
        let schema = EntitySchema::builder("user").build().unwrap();
        assert_eq!(schema.collection().path(), "v1/user");

        let schema = EntitySchema::builder("user").version("v2").build().unwrap();
        assert_eq!(schema.collection().path(), "v2/user");
    }

    #[test]
    fn rejects_duplicate_and_reserved_fields() {
        let err = EntitySchema::builder("user")
            .field("name", FieldType::String)
            .field("name", FieldType::Integer)
            .build()
            .unwrap_err();
        assert_eq!(err, CoreError::DuplicateField { field: "name".into() });

        let err = EntitySchema::builder("user")
            .field(UPDATED_AT_KEY, FieldType::Double)
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::ReservedField { .. }));

        let err = EntitySchema::builder("user")
            .field("a/b", FieldType::String)
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidSchema { .. }));

        assert!(EntitySchema::builder("").build().is_err());
    }
}
