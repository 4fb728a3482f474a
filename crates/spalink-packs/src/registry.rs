/*!
 * Pack registry.
 *
 * The registry maps a device-reported platform key to its pack descriptor
 * and to the revisioned config/log structure layouts. New device models
 * plug in through the registration API at startup; the connection engine
 * resolves them by (platform key, revision) after the config-file exchange.
 * Platform key matching is case-insensitive.
 */
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::{Error, Result};
use crate::layout::{PackDescriptor, StructLayout};

/// Registered definitions for one platform
#[derive(Debug)]
struct PackEntry {
    descriptor: PackDescriptor,
    configs: HashMap<u16, Arc<StructLayout>>,
    logs: HashMap<u16, Arc<StructLayout>>,
}

/// Registry of pack descriptors and structure layouts
#[derive(Debug)]
pub struct PackRegistry {
    /// Entries keyed by lowercased platform key
    entries: RwLock<HashMap<String, PackEntry>>,
}

impl PackRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry with all built-in packs registered
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        crate::packs::register_builtin(&registry);
        registry
    }

    /// Register a pack descriptor for a platform
    pub fn register_pack(&self, descriptor: PackDescriptor) -> Result<()> {
        let key = descriptor.platform_key.to_lowercase();
        let mut entries = self
            .entries
            .write()
            .unwrap();

        if entries.contains_key(&key) {
            return Err(Error::AlreadyRegistered(descriptor.platform_key));
        }

        debug!(
            "Registered pack {} (type {})",
            descriptor.platform_key, descriptor.pack_type
        );
        entries.insert(
            key,
            PackEntry {
                descriptor,
                configs: HashMap::new(),
                logs: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Register a config layout for a platform; the revision is taken
    /// from the layout itself
    pub fn register_config_layout(&self, platform_key: &str, layout: StructLayout) -> Result<()> {
        let key = platform_key.to_lowercase();
        let mut entries = self
            .entries
            .write()
            .unwrap();

        let entry = entries
            .get_mut(&key)
            .ok_or_else(|| Error::UnknownPlatform(platform_key.to_string()))?;
        if entry.configs.contains_key(&layout.revision) {
            return Err(Error::AlreadyRegistered(format!(
                "{} config revision {}",
                platform_key, layout.revision
            )));
        }
        debug!(
            "Registered config layout {} r{} for {}",
            layout.name, layout.revision, platform_key
        );
        entry.configs.insert(layout.revision, Arc::new(layout));
        Ok(())
    }

    /// Register a log layout for a platform; the revision is taken from
    /// the layout itself
    pub fn register_log_layout(&self, platform_key: &str, layout: StructLayout) -> Result<()> {
        let key = platform_key.to_lowercase();
        let mut entries = self
            .entries
            .write()
            .unwrap();

        let entry = entries
            .get_mut(&key)
            .ok_or_else(|| Error::UnknownPlatform(platform_key.to_string()))?;
        if entry.logs.contains_key(&layout.revision) {
            return Err(Error::AlreadyRegistered(format!(
                "{} log revision {}",
                platform_key, layout.revision
            )));
        }
        debug!(
            "Registered log layout {} r{} for {}",
            layout.name, layout.revision, platform_key
        );
        entry.logs.insert(layout.revision, Arc::new(layout));
        Ok(())
    }

    /// Resolve the pack descriptor for a platform key
    pub fn resolve_pack(&self, platform_key: &str) -> Result<PackDescriptor> {
        let entries = self
            .entries
            .read()
            .unwrap();

        entries
            .get(&platform_key.to_lowercase())
            .map(|e| e.descriptor.clone())
            .ok_or_else(|| Error::UnknownPlatform(platform_key.to_string()))
    }

    /// Resolve a config layout for a platform key and revision
    pub fn resolve_config(&self, platform_key: &str, revision: u16) -> Result<Arc<StructLayout>> {
        let entries = self
            .entries
            .read()
            .unwrap();

        let entry = entries
            .get(&platform_key.to_lowercase())
            .ok_or_else(|| Error::UnknownPlatform(platform_key.to_string()))?;
        entry
            .configs
            .get(&revision)
            .cloned()
            .ok_or_else(|| Error::UnknownConfigLayout {
                key: platform_key.to_string(),
                revision,
            })
    }

    /// Resolve a log layout for a platform key and revision
    pub fn resolve_log(&self, platform_key: &str, revision: u16) -> Result<Arc<StructLayout>> {
        let entries = self
            .entries
            .read()
            .unwrap();

        let entry = entries
            .get(&platform_key.to_lowercase())
            .ok_or_else(|| Error::UnknownPlatform(platform_key.to_string()))?;
        entry
            .logs
            .get(&revision)
            .cloned()
            .ok_or_else(|| Error::UnknownLogLayout {
                key: platform_key.to_string(),
                revision,
            })
    }

    /// List the registered platform keys (in their registered casing)
    pub fn platforms(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap()
            .values()
            .map(|e| e.descriptor.platform_key.clone())
            .collect()
    }
}

impl Default for PackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::FieldSpec;

    fn layout(name: &str, revision: u16) -> StructLayout {
        StructLayout::new(name, revision, 0, 8, vec![FieldSpec::byte("A", 0)]).unwrap()
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = PackRegistry::new();
        registry
            .register_pack(PackDescriptor::new("inYT", 10, "v1"))
            .unwrap();
        registry
            .register_config_layout("inYT", layout("Cfg", 4))
            .unwrap();
        registry
            .register_log_layout("inYT", layout("Log", 3))
            .unwrap();

        let pack = registry.resolve_pack("inYT").unwrap();
        assert_eq!(pack.pack_type, 10);
        assert_eq!(registry.resolve_config("inYT", 4).unwrap().revision, 4);
        assert_eq!(registry.resolve_log("inYT", 3).unwrap().revision, 3);
    }

    #[test]
    fn test_resolution_is_case_insensitive() {
        let registry = PackRegistry::new();
        registry
            .register_pack(PackDescriptor::new("inYT", 10, "v1"))
            .unwrap();
        registry
            .register_config_layout("INYT", layout("Cfg", 4))
            .unwrap();

        assert!(registry.resolve_pack("inyt").is_ok());
        assert!(registry.resolve_pack("INYT").is_ok());
        assert!(registry.resolve_config("Inyt", 4).is_ok());
    }

    #[test]
    fn test_unknown_lookups() {
        let registry = PackRegistry::new();
        registry
            .register_pack(PackDescriptor::new("inYT", 10, "v1"))
            .unwrap();

        assert!(matches!(
            registry.resolve_pack("inXM"),
            Err(Error::UnknownPlatform(_))
        ));
        assert!(matches!(
            registry.resolve_config("inYT", 99),
            Err(Error::UnknownConfigLayout { revision: 99, .. })
        ));
        assert!(matches!(
            registry.resolve_log("inYT", 99),
            Err(Error::UnknownLogLayout { revision: 99, .. })
        ));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = PackRegistry::new();
        registry
            .register_pack(PackDescriptor::new("inYT", 10, "v1"))
            .unwrap();
        assert!(matches!(
            registry.register_pack(PackDescriptor::new("INYT", 11, "v2")),
            Err(Error::AlreadyRegistered(_))
        ));

        registry
            .register_config_layout("inYT", layout("Cfg", 4))
            .unwrap();
        assert!(matches!(
            registry.register_config_layout("inYT", layout("Cfg", 4)),
            Err(Error::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_builtin_registry() {
        let registry = PackRegistry::with_builtin();
        assert!(registry.resolve_pack("inYT").is_ok());
        assert!(!registry.platforms().is_empty());
    }
}
