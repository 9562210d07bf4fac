//! Profile change classification
//!
//! Only changes of the wire endpoint justify tearing down a running
//! session. On-demand rule changes are pushed as a reinstall, everything
//! else is left alone.

use crate::profile::Profile;
use crate::state::TunnelStatus;

/// Tunnel action required by a profile edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileChange {
    Reconnect,
    Reinstall,
    None,
}

/// Compare two versions of the same profile
pub fn classify(previous: &Profile, updated: &Profile, status: TunnelStatus) -> ProfileChange {
    let endpoint_changed = if updated.is_provider() {
        previous.provider_server_id() != updated.provider_server_id()
            || previous.provider_custom_endpoint() != updated.provider_custom_endpoint()
    } else {
        previous.host_custom_endpoint != updated.host_custom_endpoint
    };

    if endpoint_changed {
        return if status == TunnelStatus::Disconnected {
            ProfileChange::None
        } else {
            ProfileChange::Reconnect
        };
    }
    if previous.on_demand != updated.on_demand {
        return ProfileChange::Reinstall;
    }
    ProfileChange::None
}
