//! Identifier generation.

use uuid::Uuid;

/// Source of channel identifiers.
pub trait IdGenerator: Send + Sync {
	fn create_uuid(&self) -> String;
}

/// Random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
	fn create_uuid(&self) -> String {
		Uuid::new_v4().to_string()
	}
}
