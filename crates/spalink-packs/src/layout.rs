/*!
 * Structure layout definitions.
 *
 * A spa firmware pack describes its status structure with two layouts: a
 * config layout (installer settings) and a log layout (live state). Each
 * layout names a set of fields with a byte position, a decoded kind, and a
 * read/write capability, plus the begin/end byte range that scopes a
 * status-block request.
 */
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Read/write capability of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    /// The field can only be read
    ReadOnly,
    /// The field can be read and written
    ReadWrite,
}

/// The declared decoded kind of a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Single unsigned byte
    Byte,
    /// Big-endian unsigned word (two bytes)
    Word,
    /// Time of day packed into a word as (hour, minute)
    Time,
    /// Single bit within a byte
    Bool {
        /// Bit position within the byte (0 is least significant)
        bit: u8,
    },
    /// Enumeration over a declared label list
    Enum {
        /// Bit position when several enums share one byte, `None` when
        /// the enum owns the whole byte
        bit: Option<u8>,
        /// Ordered labels; the raw value indexes into this list
        labels: Vec<String>,
    },
}

impl FieldKind {
    /// Width of the field in bytes
    pub fn width(&self) -> usize {
        match self {
            FieldKind::Word | FieldKind::Time => 2,
            _ => 1,
        }
    }

    /// Bit mask for packed fields, `None` for whole-byte/word fields
    pub fn bit_mask(&self) -> Option<u16> {
        match self {
            FieldKind::Bool { .. } => Some(1),
            FieldKind::Enum {
                bit: Some(_),
                labels,
            } => Some(match labels.len() {
                n if n > 8 => 15,
                n if n > 4 => 7,
                n if n > 2 => 3,
                _ => 1,
            }),
            _ => None,
        }
    }

    /// Bit position for packed fields
    pub fn bit_position(&self) -> Option<u8> {
        match self {
            FieldKind::Bool { bit } => Some(*bit),
            FieldKind::Enum { bit, .. } => *bit,
            _ => None,
        }
    }
}

/// A single named field within a structure layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name, unique within the combined config+log layouts
    pub name: String,
    /// Absolute byte position within the status structure
    pub pos: usize,
    /// Decoded kind
    pub kind: FieldKind,
    /// Read/write capability
    pub access: Access,
}

impl FieldSpec {
    /// Create a read-only byte field
    pub fn byte<S: Into<String>>(name: S, pos: usize) -> Self {
        Self {
            name: name.into(),
            pos,
            kind: FieldKind::Byte,
            access: Access::ReadOnly,
        }
    }

    /// Create a read-only word field
    pub fn word<S: Into<String>>(name: S, pos: usize) -> Self {
        Self {
            name: name.into(),
            pos,
            kind: FieldKind::Word,
            access: Access::ReadOnly,
        }
    }

    /// Create a read-only time-of-day field
    pub fn time<S: Into<String>>(name: S, pos: usize) -> Self {
        Self {
            name: name.into(),
            pos,
            kind: FieldKind::Time,
            access: Access::ReadOnly,
        }
    }

    /// Create a read-only boolean field at a bit position
    pub fn boolean<S: Into<String>>(name: S, pos: usize, bit: u8) -> Self {
        Self {
            name: name.into(),
            pos,
            kind: FieldKind::Bool { bit },
            access: Access::ReadOnly,
        }
    }

    /// Create a read-only enumeration field owning its whole byte
    pub fn enumeration<S: Into<String>>(name: S, pos: usize, labels: &[&str]) -> Self {
        Self {
            name: name.into(),
            pos,
            kind: FieldKind::Enum {
                bit: None,
                labels: labels.iter().map(|s| s.to_string()).collect(),
            },
            access: Access::ReadOnly,
        }
    }

    /// Create a read-only enumeration field packed at a bit position
    pub fn packed_enum<S: Into<String>>(name: S, pos: usize, bit: u8, labels: &[&str]) -> Self {
        Self {
            name: name.into(),
            pos,
            kind: FieldKind::Enum {
                bit: Some(bit),
                labels: labels.iter().map(|s| s.to_string()).collect(),
            },
            access: Access::ReadOnly,
        }
    }

    /// Mark the field as writable
    pub fn writable(mut self) -> Self {
        self.access = Access::ReadWrite;
        self
    }

    /// Width of the field in bytes
    pub fn width(&self) -> usize {
        self.kind.width()
    }
}

/// A revisioned structure layout with its scoping byte range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructLayout {
    /// Layout name (for diagnostics)
    pub name: String,
    /// Layout revision, as reported by the device's config-file response
    pub revision: u16,
    /// First byte of the range this layout covers
    pub begin: usize,
    /// One past the last byte of the range this layout covers
    pub end: usize,
    /// The fields declared by this layout
    pub fields: Vec<FieldSpec>,
}

impl StructLayout {
    /// Create a new layout, validating that every field fits the range
    pub fn new<S: Into<String>>(
        name: S,
        revision: u16,
        begin: usize,
        end: usize,
        fields: Vec<FieldSpec>,
    ) -> Result<Self> {
        let name = name.into();
        if end <= begin {
            return Err(Error::InvalidLayout(format!(
                "{}: empty byte range {}..{}",
                name, begin, end
            )));
        }
        for field in &fields {
            if field.pos < begin || field.pos + field.width() > end {
                return Err(Error::InvalidLayout(format!(
                    "{}: field {} at {} (width {}) outside range {}..{}",
                    name,
                    field.name,
                    field.pos,
                    field.width(),
                    begin,
                    end
                )));
            }
        }
        Ok(Self {
            name,
            revision,
            begin,
            end,
            fields,
        })
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Length of the covered byte range
    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    /// Whether the layout covers no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Identity of a firmware pack for one platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackDescriptor {
    /// Platform key, as reported by the device (e.g. "inYT")
    pub platform_key: String,
    /// Numeric pack type used to frame pack commands
    pub pack_type: u8,
    /// Revision of the pack definitions themselves
    pub revision: String,
}

impl PackDescriptor {
    /// Create a new pack descriptor
    pub fn new<S1: Into<String>, S2: Into<String>>(
        platform_key: S1,
        pack_type: u8,
        revision: S2,
    ) -> Self {
        Self {
            platform_key: platform_key.into(),
            pack_type,
            revision: revision.into(),
        }
    }
}
