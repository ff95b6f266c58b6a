use log::debug;

use super::Fingerprint;
use crate::network::NetworkIdentity;

/// Relocation verdict for the current radio environment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MatchResult {
    SameLocation,
    NewLocation,
    /// Not enough data to decide. Callers treat this as the same location.
    Indeterminate,
}

impl MatchResult {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SameLocation => "same_location",
            Self::NewLocation => "new_location",
            Self::Indeterminate => "indeterminate",
        }
    }
}

/// Matches needed for a fingerprint of `stored_count` entries: 75% overlap,
/// rounded up, never less than one.
pub const fn required_matches(stored_count: usize) -> usize {
    let required = (stored_count * 3).div_ceil(4);
    if required == 0 { 1 } else { required }
}

/// Compares the visible networks against the stored fingerprint.
///
/// `visible` is `None` when the scan failed. A failed or empty scan, or an
/// empty fingerprint, yields [`MatchResult::Indeterminate`].
pub fn classify(
    stored: &Fingerprint,
    visible: Option<&[NetworkIdentity]>,
    target: &NetworkIdentity,
) -> MatchResult {
    let Some(visible) = visible else {
        debug!("fingerprint: scan failed, location indeterminate");
        return MatchResult::Indeterminate;
    };
    if visible.is_empty() {
        debug!("fingerprint: scan empty, location indeterminate");
        return MatchResult::Indeterminate;
    }
    if stored.is_empty() {
        debug!("fingerprint: nothing stored, location indeterminate");
        return MatchResult::Indeterminate;
    }

    let matches = stored
        .iter()
        .filter(|ssid| {
            visible
                .iter()
                .filter(|network| !network.same_network(target))
                .any(|network| network.ssid() == *ssid)
        })
        .count();
    let required = required_matches(stored.len());

    debug!(
        "fingerprint: matches={} required={} stored={} visible={}",
        matches,
        required,
        stored.len(),
        visible.len()
    );

    if matches >= required {
        MatchResult::SameLocation
    } else {
        MatchResult::NewLocation
    }
}
