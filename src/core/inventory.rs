//! Instance discovery: flattens matching instances into one work item
//! per attached volume, with its snapshot name and tag set.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::adapters::{ComputeProvider, Instance, ProviderError};
use crate::domain::{DiscoveryFilter, Tag, WorkItem, NAME_TAG};

use super::naming::{NameResolver, SnapshotNameRequest};

/// Discovery failed; no volume can be safely identified
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    #[error("unable to get instances info (check permissions or connectivity): {0}")]
    Provider(#[from] ProviderError),
}

/// Result of a discovery pass
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    /// Number of instances matched by the filter
    pub total_instances: usize,

    /// One item per attached volume, in discovery order
    pub items: Vec<WorkItem>,
}

/// Split instance tags into the copyable set and the `Name` value.
///
/// Reserved-prefix keys are dropped; `Name` is returned separately
/// because it is replaced by the generated snapshot name.
pub fn derive_tags(instance_tags: &[Tag]) -> (Vec<Tag>, Option<String>) {
    let mut name = None;
    let mut tags = Vec::new();

    for tag in instance_tags {
        if tag.key == NAME_TAG {
            name = Some(tag.value.clone());
        } else if !tag.is_reserved() {
            tags.push(tag.clone());
        }
    }

    (tags, name)
}

/// Query the provider and build the work items for a run.
///
/// Each volume's snapshot name is resolved exactly once here, with the
/// instance's `Name` tag (or its id) as the base name.
pub async fn discover(
    provider: &dyn ComputeProvider,
    resolver: &NameResolver,
    filter: &DiscoveryFilter,
    date: &str,
    verbose: bool,
) -> Result<Inventory, DiscoveryError> {
    if filter.is_empty() {
        warn!("No discovery filter given, every instance is selected");
    }
    let instances = provider.describe_instances(filter).await?;

    let mut inventory = Inventory {
        total_instances: instances.len(),
        items: Vec::new(),
    };

    for instance in &instances {
        if verbose {
            info!(instance_id = %instance.instance_id, "Instance to snapshot");
        }

        let items = instance_items(provider, resolver, instance, date).await;
        for item in &items {
            if verbose {
                info!(volume_id = %item.volume_id, device = %item.device_name, "Block device to snapshot");
            } else {
                debug!(volume_id = %item.volume_id, device = %item.device_name, "Block device to snapshot");
            }
        }
        inventory.items.extend(items);
    }

    Ok(inventory)
}

async fn instance_items(
    provider: &dyn ComputeProvider,
    resolver: &NameResolver,
    instance: &Instance,
    date: &str,
) -> Vec<WorkItem> {
    let (base_tags, name_tag) = derive_tags(&instance.tags);
    let base_name = name_tag.unwrap_or_else(|| instance.instance_id.clone());

    let mut items = Vec::new();

    for device in &instance.block_devices {
        // Devices without block storage behind them are not backed up
        let Some(volume_id) = &device.volume_id else {
            continue;
        };

        let request = SnapshotNameRequest {
            date: date.to_string(),
            base_name: base_name.clone(),
            device_name: device.device_name.clone(),
            volume_id: volume_id.clone(),
            owner_id: instance.owner_id.clone(),
        };

        let mut tags = base_tags.clone();
        let (instance_name, name_fault) = match resolver.resolve(provider, &request).await {
            Ok(name) => {
                tags.push(Tag::new(NAME_TAG, name.clone()));
                (name, None)
            }
            Err(e) => (base_name.clone(), Some(e.to_string())),
        };

        items.push(WorkItem {
            volume_id: volume_id.clone(),
            instance_id: instance.instance_id.clone(),
            instance_name,
            device_name: device.device_name.clone(),
            is_root_device: instance.root_device_name.as_deref()
                == Some(device.device_name.as_str()),
            tags,
            instance_state: instance.state.clone(),
            name_fault,
        });
    }

    items
}
