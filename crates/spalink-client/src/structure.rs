/*!
 * In-memory mirror of the spa's status structure.
 *
 * Holds the raw byte buffer, the accessors built from the bound layouts
 * and the ordering flag that gates partial updates: a patch is only
 * meaningful relative to a complete baseline, so partial updates are
 * rejected until the first full status block has been applied.
 *
 * Writes never touch the local buffer. They are encoded and handed to
 * the session's write pump as [`ValueChange`]s; the device confirms by
 * sending a partial status update back, which is when the local value
 * actually changes.
 */
use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use spalink_core::types::Value;
use spalink_packs::layout::StructLayout;

use crate::accessor::StructAccessor;
use crate::error::{Error, Result};

/// An encoded write on its way to the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueChange {
    /// Absolute byte offset of the write
    pub offset: u16,
    /// The bytes to write
    pub data: Bytes,
}

/// An observed change to a decoded field value
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    /// The field that changed
    pub name: String,
    /// Decoded value before the patch
    pub old: Value,
    /// Decoded value after the patch
    pub new: Value,
}

#[derive(Debug, Default)]
struct Inner {
    block: Vec<u8>,
    accessors: HashMap<String, StructAccessor>,
    had_full_block: bool,
}

/// The status structure store
#[derive(Debug)]
pub struct StructureStore {
    inner: RwLock<Inner>,
    writes: mpsc::UnboundedSender<ValueChange>,
}

impl StructureStore {
    /// Create an empty store; encoded writes are queued on `writes`
    pub fn new(writes: mpsc::UnboundedSender<ValueChange>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            writes,
        }
    }

    /// Whether a full status block has been applied yet
    pub fn had_full_block(&self) -> bool {
        self.inner.read().unwrap().had_full_block
    }

    /// Whether accessors have been built
    pub fn accessors_built(&self) -> bool {
        !self.inner.read().unwrap().accessors.is_empty()
    }

    /// Names of all declared fields, unordered
    pub fn field_names(&self) -> Vec<String> {
        self.inner.read().unwrap().accessors.keys().cloned().collect()
    }

    /// Snapshot of the raw buffer
    pub fn snapshot(&self) -> Vec<u8> {
        self.inner.read().unwrap().block.clone()
    }

    /// Apply a complete status block starting at byte `start`, growing
    /// the buffer if needed, and unlock partial updates
    pub fn apply_full_block(&self, start: usize, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let end = start + data.len();
        if inner.block.len() < end {
            inner.block.resize(end, 0);
        }
        inner.block[start..end].copy_from_slice(data);
        inner.had_full_block = true;
        debug!("Applied full status block covering {}..{}", start, end);
        Ok(())
    }

    /// Apply a device-initiated patch and report which decoded field
    /// values it changed. Fails if no full block has been applied yet.
    pub fn apply_partial_update(&self, offset: usize, data: &[u8]) -> Result<Vec<FieldChange>> {
        let mut inner = self.inner.write().unwrap();
        if !inner.had_full_block {
            return Err(Error::structure_not_ready(
                "partial update before the first full status block",
            ));
        }
        let end = offset + data.len();
        if end > inner.block.len() {
            return Err(Error::other(format!(
                "partial update {}..{} is outside the {}-byte structure",
                offset,
                end,
                inner.block.len()
            )));
        }

        let previous = inner.block.clone();
        inner.block[offset..end].copy_from_slice(data);

        let mut changes = Vec::new();
        for accessor in inner.accessors.values() {
            if !accessor.intersects(offset, data.len()) {
                continue;
            }
            let old = accessor.decode(&previous)?;
            let new = accessor.decode(&inner.block)?;
            if old != new {
                changes.push(FieldChange {
                    name: accessor.spec().name.clone(),
                    old,
                    new,
                });
            }
        }
        Ok(changes)
    }

    /// Build the accessors from the bound config and log layouts.
    /// Requires the first full status block; may only run once.
    pub fn build_accessors(&self, config: &StructLayout, log: &StructLayout) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if !inner.had_full_block {
            return Err(Error::structure_not_ready(
                "accessors need the first full status block",
            ));
        }
        if !inner.accessors.is_empty() {
            return Err(Error::structure_not_ready("accessors already built"));
        }
        for spec in config.fields.iter().chain(log.fields.iter()) {
            inner
                .accessors
                .insert(spec.name.clone(), StructAccessor::new(spec.clone()));
        }
        debug!("Built {} accessors", inner.accessors.len());
        Ok(())
    }

    /// Decode the current value of the named field
    pub fn read(&self, name: &str) -> Result<Value> {
        let inner = self.inner.read().unwrap();
        if inner.accessors.is_empty() {
            return Err(Error::structure_not_ready("accessors not built"));
        }
        let accessor = inner
            .accessors
            .get(name)
            .ok_or_else(|| Error::UnknownField(name.to_string()))?;
        accessor.decode(&inner.block)
    }

    /// Encode a write to the named field and queue it for delivery.
    /// The local buffer is not modified.
    pub fn write(&self, name: &str, value: &Value) -> Result<()> {
        let change = {
            let inner = self.inner.read().unwrap();
            if inner.accessors.is_empty() {
                return Err(Error::structure_not_ready("accessors not built"));
            }
            let accessor = inner
                .accessors
                .get(name)
                .ok_or_else(|| Error::UnknownField(name.to_string()))?;
            if !accessor.is_writable() {
                return Err(Error::FieldNotWritable(name.to_string()));
            }
            ValueChange {
                offset: accessor.pos() as u16,
                data: accessor.encode(value, &inner.block)?,
            }
        };
        debug!("Queueing write of {} to {}", value, name);
        self.writes
            .send(change)
            .map_err(|_| Error::transport("write pump is gone"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spalink_packs::layout::FieldSpec;

    fn layouts() -> (StructLayout, StructLayout) {
        let config = StructLayout::new(
            "TestConfig",
            1,
            0,
            4,
            vec![
                FieldSpec::byte("ConfigNumber", 0),
                FieldSpec::word("SetpointG", 1).writable(),
            ],
        )
        .unwrap();
        let log = StructLayout::new(
            "TestLog",
            1,
            4,
            8,
            vec![
                FieldSpec::boolean("Heating", 4, 0),
                FieldSpec::word("DisplayedTempG", 6),
            ],
        )
        .unwrap();
        (config, log)
    }

    fn store() -> (StructureStore, mpsc::UnboundedReceiver<ValueChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (StructureStore::new(tx), rx)
    }

    #[test]
    fn test_partial_update_rejected_before_full_block() {
        let (store, _rx) = store();
        let result = store.apply_partial_update(0, &[1]);
        assert!(matches!(result, Err(Error::StructureNotReady(_))));
    }

    #[test]
    fn test_full_then_partial_reflects_patch() {
        let (store, _rx) = store();
        let (config, log) = layouts();
        store
            .apply_full_block(0, &[42, 0x01, 0x72, 0, 0, 0, 0x01, 0x5e])
            .unwrap();
        store.build_accessors(&config, &log).unwrap();

        assert_eq!(store.read("DisplayedTempG").unwrap(), Value::Number(350));

        let changes = store.apply_partial_update(6, &[0x01, 0x68]).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].name, "DisplayedTempG");
        assert_eq!(changes[0].old, Value::Number(350));
        assert_eq!(changes[0].new, Value::Number(360));
        assert_eq!(store.read("DisplayedTempG").unwrap(), Value::Number(360));

        // Patched bytes hold the patch, the rest still hold the block
        let buffer = store.snapshot();
        assert_eq!(&buffer[6..8], &[0x01, 0x68]);
        assert_eq!(&buffer[..6], &[42, 0x01, 0x72, 0, 0, 0]);
    }

    #[test]
    fn test_partial_update_without_value_change_reports_nothing() {
        let (store, _rx) = store();
        let (config, log) = layouts();
        store.apply_full_block(0, &[0; 8]).unwrap();
        store.build_accessors(&config, &log).unwrap();
        let changes = store.apply_partial_update(4, &[0, 0]).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_accessors_build_once() {
        let (store, _rx) = store();
        let (config, log) = layouts();
        store.apply_full_block(0, &[0; 8]).unwrap();
        store.build_accessors(&config, &log).unwrap();
        assert!(store.build_accessors(&config, &log).is_err());
    }

    #[test]
    fn test_write_queues_without_local_change() {
        let (store, mut rx) = store();
        let (config, log) = layouts();
        store.apply_full_block(0, &[0; 8]).unwrap();
        store.build_accessors(&config, &log).unwrap();

        store.write("SetpointG", &Value::Number(374)).unwrap();
        let change = rx.try_recv().unwrap();
        assert_eq!(change.offset, 1);
        assert_eq!(change.data.as_ref(), &[0x01, 0x76]);
        // Local buffer only changes when the device confirms
        assert_eq!(store.read("SetpointG").unwrap(), Value::Number(0));
    }

    #[test]
    fn test_write_rejects_read_only_field() {
        let (store, _rx) = store();
        let (config, log) = layouts();
        store.apply_full_block(0, &[0; 8]).unwrap();
        store.build_accessors(&config, &log).unwrap();
        let result = store.write("Heating", &Value::Bool(true));
        assert!(matches!(result, Err(Error::FieldNotWritable(_))));
    }

    #[test]
    fn test_unknown_field() {
        let (store, _rx) = store();
        let (config, log) = layouts();
        store.apply_full_block(0, &[0; 8]).unwrap();
        store.build_accessors(&config, &log).unwrap();
        assert!(matches!(
            store.read("NoSuchField"),
            Err(Error::UnknownField(_))
        ));
    }
}
