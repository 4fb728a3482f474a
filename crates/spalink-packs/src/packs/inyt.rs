/*!
 * Built-in pack definitions for the inYT platform.
 *
 * Config layout revision 4 covers the installer settings block at the
 * start of the structure; log layout revision 3 covers the live state
 * block that follows it.
 */
use crate::error::Result;
use crate::layout::{FieldSpec, PackDescriptor, StructLayout};
use crate::registry::PackRegistry;

/// Platform key reported by inYT devices
pub const PLATFORM_KEY: &str = "inYT";

/// Numeric pack type used to frame pack commands
pub const PACK_TYPE: u8 = 10;

/// Config layout revision provided by this module
pub const CONFIG_REVISION: u16 = 4;

/// Log layout revision provided by this module
pub const LOG_REVISION: u16 = 3;

/// The inYT pack descriptor
pub fn descriptor() -> PackDescriptor {
    PackDescriptor::new(PLATFORM_KEY, PACK_TYPE, "v0.4")
}

/// Config layout revision 4 (bytes 0..256)
pub fn config_layout() -> StructLayout {
    StructLayout::new(
        "inYT-cfg",
        CONFIG_REVISION,
        0,
        256,
        vec![
            FieldSpec::byte("ConfigNumber", 0),
            FieldSpec::word("SetpointG", 1).writable(),
            FieldSpec::enumeration("TempUnits", 3, &["F", "C"]).writable(),
            FieldSpec::enumeration("Pump1Config", 4, &["NONE", "SINGLE_SPEED", "DUAL_SPEED"]),
            FieldSpec::enumeration("Pump2Config", 5, &["NONE", "SINGLE_SPEED", "DUAL_SPEED"]),
            FieldSpec::time("FilterStartTime", 6).writable(),
            FieldSpec::byte("FilterDuration", 8).writable(),
            FieldSpec::boolean("EconomyAvailable", 9, 0),
        ],
    )
    .expect("inYT config layout is well-formed")
}

/// Log layout revision 3 (bytes 256..480)
pub fn log_layout() -> StructLayout {
    StructLayout::new(
        "inYT-log",
        LOG_REVISION,
        256,
        480,
        vec![
            FieldSpec::packed_enum("Pump1", 257, 0, &["OFF", "LO", "HI"]).writable(),
            FieldSpec::packed_enum("Pump2", 257, 2, &["OFF", "HI"]).writable(),
            FieldSpec::boolean("Waterfall", 258, 0).writable(),
            FieldSpec::boolean("Lights", 258, 1).writable(),
            FieldSpec::word("DisplayedTempG", 260),
            FieldSpec::word("RealSetPointG", 262),
            FieldSpec::boolean("Heating", 264, 0),
            FieldSpec::time("TimeOfDay", 266).writable(),
            FieldSpec::byte("PackType", 289),
            FieldSpec::word("PackConfID", 290),
            FieldSpec::byte("PackConfRev", 292),
            FieldSpec::byte("PackConfRel", 293),
        ],
    )
    .expect("inYT log layout is well-formed")
}

/// Register the inYT pack and both layouts with a registry
pub fn register(registry: &PackRegistry) -> Result<()> {
    registry.register_pack(descriptor())?;
    registry.register_config_layout(PLATFORM_KEY, config_layout())?;
    registry.register_log_layout(PLATFORM_KEY, log_layout())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layouts_are_well_formed() {
        let cfg = config_layout();
        assert_eq!(cfg.revision, CONFIG_REVISION);
        assert_eq!(cfg.begin, 0);

        let log = log_layout();
        assert_eq!(log.revision, LOG_REVISION);
        assert!(log.field("PackType").is_some());
        assert!(log.field("Pump1").is_some());
    }

    #[test]
    fn test_register() {
        let registry = PackRegistry::new();
        register(&registry).unwrap();
        assert_eq!(registry.resolve_pack("inyt").unwrap().pack_type, PACK_TYPE);
        assert!(registry.resolve_config("inYT", CONFIG_REVISION).is_ok());
        assert!(registry.resolve_log("inYT", LOG_REVISION).is_ok());
    }
}
