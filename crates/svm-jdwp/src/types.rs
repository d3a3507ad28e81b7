use crate::error::{JdwpError, Result};

pub type ObjectId = u64;
pub type ThreadId = u64;
pub type ThreadGroupId = u64;
pub type ReferenceTypeId = u64;
pub type MethodId = u64;
pub type FieldId = u64;
pub type FrameId = u64;

pub const HANDSHAKE: &[u8; 14] = b"JDWP-Handshake";
pub const HEADER_LEN: usize = 11;
pub const FLAG_REPLY: u8 = 0x80;

pub const COMMAND_SET_VIRTUAL_MACHINE: u8 = 1;
pub const COMMAND_SET_REFERENCE_TYPE: u8 = 2;
pub const COMMAND_SET_CLASS_TYPE: u8 = 3;
pub const COMMAND_SET_METHOD: u8 = 6;
pub const COMMAND_SET_THREAD_REFERENCE: u8 = 11;
pub const COMMAND_SET_THREAD_GROUP_REFERENCE: u8 = 12;
pub const COMMAND_SET_EVENT_REQUEST: u8 = 15;
pub const COMMAND_SET_EVENT: u8 = 64;
pub const COMMAND_EVENT_COMPOSITE: u8 = 100;

pub const TYPE_TAG_CLASS: u8 = 1;
pub const TYPE_TAG_INTERFACE: u8 = 2;

pub const CLASS_STATUS_VERIFIED: u32 = 1;
pub const CLASS_STATUS_PREPARED: u32 = 2;
pub const CLASS_STATUS_INITIALIZED: u32 = 4;

pub const THREAD_STATUS_RUNNING: u32 = 1;
pub const THREAD_STATUS_SLEEPING: u32 = 2;
pub const SUSPEND_STATUS_SUSPENDED: u32 = 1;

pub const TAG_OBJECT: u8 = b'L';

/// Byte widths of the variable-sized JDWP identifiers.
///
/// Fixed for the lifetime of the process; thread, thread-group and plain
/// object ids all use `object_id`. Tags are always one byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdSizes {
    pub field_id: usize,
    pub method_id: usize,
    pub object_id: usize,
    pub reference_type_id: usize,
    pub frame_id: usize,
}

impl Default for IdSizes {
    fn default() -> Self {
        Self {
            field_id: 2,
            method_id: 2,
            object_id: 4,
            reference_type_id: 4,
            frame_id: 4,
        }
    }
}

impl IdSizes {
    pub fn validate(&self) -> Result<()> {
        for size in [
            self.field_id,
            self.method_id,
            self.object_id,
            self.reference_type_id,
            self.frame_id,
        ] {
            if !matches!(size, 1 | 2 | 4 | 8) {
                return Err(JdwpError::InvalidIdSize(size));
            }
        }
        Ok(())
    }

    pub fn from_config(config: &svm_config::IdSizesConfig) -> Result<Self> {
        let sizes = Self {
            field_id: config.field_id,
            method_id: config.method_id,
            object_id: config.object_id,
            reference_type_id: config.reference_type_id,
            frame_id: config.frame_id,
        };
        sizes.validate()?;
        Ok(sizes)
    }

    /// Encoded size of a location: tag, class id, method id and an 8-byte index.
    pub fn location(&self) -> usize {
        1 + self.reference_type_id + self.method_id + 8
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Location {
    pub type_tag: u8,
    pub class_id: ReferenceTypeId,
    pub method_id: MethodId,
    pub index: u64,
}

/// Convert a binary class name (`com.example.Foo`) into a JNI signature
/// (`Lcom/example/Foo;`). Signatures pass through unchanged.
pub fn class_name_to_signature(class: &str) -> String {
    if class.starts_with('L') && class.ends_with(';') {
        return class.to_string();
    }
    let internal = class.replace('.', "/");
    format!("L{internal};")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sizes_are_valid() {
        let sizes = IdSizes::default();
        sizes.validate().unwrap();
        assert_eq!(sizes.location(), 1 + 4 + 2 + 8);
    }

    #[test]
    fn odd_sizes_are_rejected() {
        let sizes = IdSizes {
            frame_id: 3,
            ..IdSizes::default()
        };
        assert!(matches!(sizes.validate(), Err(JdwpError::InvalidIdSize(3))));
    }

    #[test]
    fn class_name_to_signature_converts_dots() {
        assert_eq!(class_name_to_signature("com.example.Foo"), "Lcom/example/Foo;");
        assert_eq!(class_name_to_signature("TestClass"), "LTestClass;");
        assert_eq!(class_name_to_signature("Ljava/lang/Error;"), "Ljava/lang/Error;");
    }
}
