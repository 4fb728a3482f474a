/*!
 * Field accessors over the raw status structure.
 *
 * A [`StructAccessor`] binds one declared [`FieldSpec`] to the byte
 * buffer: decode reads the field's bytes, applies the bit mask for
 * packed fields and produces a typed [`Value`]; encode does the reverse,
 * merging packed fields into the byte they share so neighbouring fields
 * are preserved.
 */
use bytes::Bytes;
use tracing::warn;

use spalink_core::types::Value;
use spalink_packs::layout::{Access, FieldKind, FieldSpec};

use crate::error::{Error, Result};

/// Typed view of one field within the status structure
#[derive(Debug, Clone)]
pub struct StructAccessor {
    spec: FieldSpec,
}

impl StructAccessor {
    /// Bind an accessor to a field declaration
    pub fn new(spec: FieldSpec) -> Self {
        Self { spec }
    }

    /// The field declaration behind this accessor
    pub fn spec(&self) -> &FieldSpec {
        &self.spec
    }

    /// Absolute byte offset of the field
    pub fn pos(&self) -> usize {
        self.spec.pos
    }

    /// Width of the field in bytes
    pub fn width(&self) -> usize {
        self.spec.width()
    }

    /// Whether the field accepts writes
    pub fn is_writable(&self) -> bool {
        self.spec.access == Access::ReadWrite
    }

    /// Whether the field overlaps the byte range `offset..offset + length`
    pub fn intersects(&self, offset: usize, length: usize) -> bool {
        self.pos() < offset + length && offset < self.pos() + self.width()
    }

    fn raw_from(&self, block: &[u8]) -> Result<u16> {
        let pos = self.pos();
        let width = self.width();
        if pos + width > block.len() {
            return Err(Error::structure_not_ready(format!(
                "field {} at {}..{} is outside the {}-byte structure",
                self.spec.name,
                pos,
                pos + width,
                block.len()
            )));
        }
        let mut raw = if width == 2 {
            u16::from_be_bytes([block[pos], block[pos + 1]])
        } else {
            u16::from(block[pos])
        };
        if let (Some(mask), Some(bit)) = (self.spec.kind.bit_mask(), self.spec.kind.bit_position())
        {
            raw = (raw >> bit) & mask;
        }
        Ok(raw)
    }

    /// Decode the field's current value from the structure buffer
    pub fn decode(&self, block: &[u8]) -> Result<Value> {
        let raw = self.raw_from(block)?;
        Ok(match &self.spec.kind {
            FieldKind::Byte | FieldKind::Word => Value::Number(raw),
            FieldKind::Time => Value::Time {
                hour: (raw >> 8) as u8,
                minute: (raw & 0xff) as u8,
            },
            FieldKind::Bool { .. } => Value::Bool(raw == 1),
            FieldKind::Enum { labels, .. } => match labels.get(raw as usize) {
                Some(label) => Value::Label(label.clone()),
                None => {
                    warn!(
                        "Value {} for {} is not in its label list",
                        raw, self.spec.name
                    );
                    Value::Number(raw)
                }
            },
        })
    }

    /// Encode `value` into the bytes to write at [`Self::pos`], merging
    /// with the current buffer contents for bit-packed fields
    pub fn encode(&self, value: &Value, block: &[u8]) -> Result<Bytes> {
        let raw = self.raw_for(value)?;
        let merged = match (self.spec.kind.bit_mask(), self.spec.kind.bit_position()) {
            (Some(mask), Some(bit)) => {
                let existing = {
                    let pos = self.pos();
                    if pos >= block.len() {
                        return Err(Error::structure_not_ready(format!(
                            "field {} at {} is outside the {}-byte structure",
                            self.spec.name,
                            pos,
                            block.len()
                        )));
                    }
                    u16::from(block[pos])
                };
                (existing & !(mask << bit)) | ((raw & mask) << bit)
            }
            _ => raw,
        };
        Ok(if self.width() == 2 {
            Bytes::copy_from_slice(&merged.to_be_bytes())
        } else {
            Bytes::copy_from_slice(&[merged as u8])
        })
    }

    fn raw_for(&self, value: &Value) -> Result<u16> {
        let invalid = |reason: &str| Error::invalid_value(&self.spec.name, reason);
        match &self.spec.kind {
            FieldKind::Byte => {
                let n = value.as_number().ok_or_else(|| invalid("expected a number"))?;
                if n > u16::from(u8::MAX) {
                    return Err(invalid("does not fit in one byte"));
                }
                Ok(n)
            }
            FieldKind::Word => value.as_number().ok_or_else(|| invalid("expected a number")),
            FieldKind::Time => {
                let (hour, minute) = value.as_time().ok_or_else(|| invalid("expected a time"))?;
                if hour > 23 || minute > 59 {
                    return Err(invalid("hour or minute out of range"));
                }
                Ok(u16::from(hour) << 8 | u16::from(minute))
            }
            FieldKind::Bool { .. } => {
                let raw = value
                    .as_number()
                    .ok_or_else(|| invalid("expected a boolean"))?;
                if raw > 1 {
                    return Err(invalid("expected 0 or 1"));
                }
                Ok(raw)
            }
            FieldKind::Enum { labels, .. } => {
                let index = match value {
                    Value::Label(label) => labels
                        .iter()
                        .position(|l| l == label)
                        .ok_or_else(|| invalid("label is not in the declared list"))?
                        as u16,
                    other => other.as_number().ok_or_else(|| invalid("expected a label or index"))?,
                };
                if usize::from(index) >= labels.len() {
                    return Err(invalid("index is outside the declared labels"));
                }
                Ok(index)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_word() {
        let accessor = StructAccessor::new(FieldSpec::word("SetpointG", 1));
        let block = [0u8, 0x01, 0x72, 0];
        assert_eq!(accessor.decode(&block).unwrap(), Value::Number(370));
    }

    #[test]
    fn test_decode_packed_enum() {
        let accessor = StructAccessor::new(FieldSpec::packed_enum(
            "Pump1",
            0,
            2,
            &["OFF", "LO", "HI"],
        ));
        // Raw byte 0b0000_1000: bits 2..4 hold 0b10
        assert_eq!(
            accessor.decode(&[0b0000_1000]).unwrap(),
            Value::Label("HI".to_string())
        );
    }

    #[test]
    fn test_decode_time() {
        let accessor = StructAccessor::new(FieldSpec::time("TimeOfDay", 0));
        assert_eq!(
            accessor.decode(&[14, 30]).unwrap(),
            Value::Time {
                hour: 14,
                minute: 30
            }
        );
    }

    #[test]
    fn test_decode_out_of_range_enum_falls_back_to_number() {
        let accessor = StructAccessor::new(FieldSpec::enumeration("TempUnits", 0, &["F", "C"]));
        assert_eq!(accessor.decode(&[9]).unwrap(), Value::Number(9));
    }

    #[test]
    fn test_encode_preserves_neighbouring_bits() {
        let accessor = StructAccessor::new(FieldSpec::packed_enum(
            "Pump1",
            0,
            0,
            &["OFF", "LO", "HI"],
        ));
        // Bits above the two-bit mask stay intact
        let encoded = accessor
            .encode(&Value::Label("LO".to_string()), &[0b1100_0000])
            .unwrap();
        assert_eq!(encoded.as_ref(), &[0b1100_0001]);
    }

    #[test]
    fn test_encode_rejects_unknown_label() {
        let accessor = StructAccessor::new(FieldSpec::enumeration("TempUnits", 0, &["F", "C"]));
        let result = accessor.encode(&Value::Label("K".to_string()), &[0]);
        assert!(matches!(result, Err(Error::InvalidValue { .. })));
    }

    #[test]
    fn test_encode_time_range_check() {
        let accessor = StructAccessor::new(FieldSpec::time("FilterStartTime", 0));
        let result = accessor.encode(
            &Value::Time {
                hour: 25,
                minute: 0,
            },
            &[0, 0],
        );
        assert!(matches!(result, Err(Error::InvalidValue { .. })));
        let encoded = accessor
            .encode(
                &Value::Time {
                    hour: 6,
                    minute: 15,
                },
                &[0, 0],
            )
            .unwrap();
        assert_eq!(encoded.as_ref(), &[6, 15]);
    }

    #[test]
    fn test_encode_byte_range_check() {
        let accessor = StructAccessor::new(FieldSpec::byte("FilterDuration", 0));
        assert!(accessor.encode(&Value::Number(300), &[0]).is_err());
        assert_eq!(
            accessor.encode(&Value::Number(8), &[0]).unwrap().as_ref(),
            &[8]
        );
    }

    #[test]
    fn test_intersects() {
        let accessor = StructAccessor::new(FieldSpec::word("DisplayedTempG", 4));
        assert!(accessor.intersects(5, 1));
        assert!(accessor.intersects(3, 2));
        assert!(!accessor.intersects(6, 4));
        assert!(!accessor.intersects(0, 4));
    }
}
