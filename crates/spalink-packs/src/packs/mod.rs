/*!
 * Built-in pack definitions.
 *
 * One module per supported platform. Each module exposes its descriptor
 * and layout constructors; `register_builtin` wires them all into a
 * registry.
 */
use tracing::warn;

use crate::registry::PackRegistry;

pub mod inyt;

/// Register every built-in pack with the given registry
pub fn register_builtin(registry: &PackRegistry) {
    if let Err(e) = inyt::register(registry) {
        warn!("Failed to register built-in inYT pack: {}", e);
    }
}
