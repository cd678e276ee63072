//! Device matcher
//!
//! Picks the device a machine should claim from the shared pool. The result
//! depends only on the inputs: devices are ordered by ID so that repeated
//! reconciliations (and the first control-plane machine in particular) land
//! on the same device. Randomising the order to reduce contention would need
//! a load balancer in front of the control plane first.

use crate::device::labels::labels_from_tags;
use crds::{DeviceSelector, SelectorError};
use hivelocity_client::tag::{DeviceTagKey, TagError, USE_ALLOWED_VALUE};
use hivelocity_client::BareMetalDevice;
use std::collections::BTreeMap;
use std::fmt;

/// Why a device was not eligible, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SkipReason {
    PermanentError,
    UseNotAllowed,
    OtherCluster,
    MachineAlreadyAssociated,
    SelectorMismatch,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PermanentError => "permanent-error",
            Self::UseNotAllowed => "use-not-allowed",
            Self::OtherCluster => "other-cluster",
            Self::MachineAlreadyAssociated => "machine-already-associated",
            Self::SelectorMismatch => "selector-mismatch",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Count of skipped devices per reason, for operator diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipSummary {
    counts: BTreeMap<SkipReason, usize>,
}

impl SkipSummary {
    fn add(&mut self, reason: SkipReason) {
        *self.counts.entry(reason).or_insert(0) += 1;
    }

    pub fn count(&self, reason: SkipReason) -> usize {
        self.counts.get(&reason).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Renders as `"permanent-error": 1, "other-cluster": 2`
impl fmt::Display for SkipSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (reason, count)) in self.counts.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "\"{reason}\": {count}")?;
        }
        Ok(())
    }
}

fn skip_reason(
    device: &BareMetalDevice,
    selector: &DeviceSelector,
    cluster_name: &str,
) -> Result<Option<SkipReason>, SelectorError> {
    let tags = &device.tags;

    if DeviceTagKey::PermanentError.has_any(tags) {
        return Ok(Some(SkipReason::PermanentError));
    }

    match DeviceTagKey::UseAllowed.find_in(tags) {
        Ok(tag) if tag.value == USE_ALLOWED_VALUE => {}
        _ => return Ok(Some(SkipReason::UseNotAllowed)),
    }

    match DeviceTagKey::ClusterName.find_in(tags) {
        Ok(tag) if tag.value != cluster_name => return Ok(Some(SkipReason::OtherCluster)),
        Err(TagError::MultipleFound) => return Ok(Some(SkipReason::OtherCluster)),
        _ => {}
    }

    if DeviceTagKey::MachineName.has_any(tags) {
        return Ok(Some(SkipReason::MachineAlreadyAssociated));
    }

    if !selector.matches(&labels_from_tags(tags))? {
        return Ok(Some(SkipReason::SelectorMismatch));
    }

    Ok(None)
}

/// Find the eligible device with the lowest ID.
///
/// Every device is evaluated so that the summary covers the whole pool.
///
/// # Errors
///
/// Returns a `SelectorError` if the selector is invalid.
pub fn find_eligible(
    devices: &[BareMetalDevice],
    selector: &DeviceSelector,
    cluster_name: &str,
) -> Result<(Option<BareMetalDevice>, SkipSummary), SelectorError> {
    selector.validate()?;

    let mut sorted: Vec<&BareMetalDevice> = devices.iter().collect();
    sorted.sort_by_key(|d| d.device_id);

    let mut chosen = None;
    let mut summary = SkipSummary::default();
    for device in sorted {
        match skip_reason(device, selector, cluster_name)? {
            Some(reason) => summary.add(reason),
            None => {
                if chosen.is_none() {
                    chosen = Some(device.clone());
                }
            }
        }
    }

    Ok((chosen, summary))
}
