//! Idempotent creation of the isolated worker network.

use tracing::{debug, info};

use crate::engine::ContainerEngine;
use crate::error::ContainerError;

/// Tracing target for network setup.
const NETWORK_TARGET: &str = "pernosco_container::network";

/// Ensures an internal network called `name` exists.
///
/// Concurrent invocations may race to create the network. A failed create
/// is therefore re-checked, and only reported when the network is still
/// missing afterwards.
///
/// # Errors
///
/// Returns [`ContainerError::NetworkSetupFailed`] when the network neither
/// exists nor can be created.
pub fn ensure_network_exists(engine: &dyn ContainerEngine, name: &str) -> Result<(), ContainerError> {
    let setup_failed = |source| ContainerError::NetworkSetupFailed {
        network: name.to_owned(),
        source,
    };

    if engine.network_exists(name).map_err(setup_failed)? {
        debug!(target: NETWORK_TARGET, network = name, "isolated network present");
        return Ok(());
    }

    match engine.create_internal_network(name) {
        Ok(()) => {
            info!(target: NETWORK_TARGET, network = name, "created isolated network");
            Ok(())
        }
        Err(create_error) => {
            if engine.network_exists(name).unwrap_or(false) {
                debug!(
                    target: NETWORK_TARGET,
                    network = name,
                    "isolated network created concurrently"
                );
                Ok(())
            } else {
                Err(setup_failed(create_error))
            }
        }
    }
}
