use tracing::debug;
use tracing::info;

use crate::gpu::Adapter;
use crate::gpu::AdapterDesc;
use crate::gpu::Backend;
use crate::gpu::Factory;
use crate::gpu::FeatureLevel;
use crate::sample_error::MyResult;
use crate::sample_error::StartupError;

pub struct SelectedAdapter<B: Backend> {
    pub adapter: B::Adapter,
    pub desc: AdapterDesc,
    pub device: B::Device,
}

/// Returns the first non-software adapter, in enumeration order, on which a device
/// can be created at `feature_level`.
pub fn select_hardware_adapter<B: Backend>(
    factory: &B::Factory,
    feature_level: FeatureLevel,
) -> MyResult<SelectedAdapter<B>> {
    info!("Enumerating Adapters:");
    let adapters = factory.enum_adapters()?;
    let adapters_seen = adapters.len();

    for (i, adapter) in adapters.into_iter().enumerate() {
        let desc = adapter.desc()?;

        if desc.is_software {
            info!("  Adapter {i}: {} (Software Adapter - Skipping)", desc.name);
            continue;
        }

        match factory.create_device(&adapter, feature_level) {
            Ok(device) => {
                info!("  Adapter {i}: {} (Selected)", desc.name);
                return Ok(SelectedAdapter {
                    adapter,
                    desc,
                    device,
                });
            }
            Err(e) => {
                info!(
                    "  Adapter {i}: {} (Does not support {feature_level})",
                    desc.name
                );
                debug!("device creation on adapter {i} failed: {e}");
            }
        }
    }

    Err(StartupError::NoSuitableAdapter {
        feature_level,
        adapters_seen,
    }
    .into())
}

/// The software rasterizer, selected explicitly.
pub fn select_warp_adapter<B: Backend>(
    factory: &B::Factory,
    feature_level: FeatureLevel,
) -> MyResult<SelectedAdapter<B>> {
    info!("Using WARP adapter.");
    let adapter = factory.enum_warp_adapter()?;
    let desc = adapter.desc()?;
    let device = factory.create_device(&adapter, feature_level)?;
    Ok(SelectedAdapter {
        adapter,
        desc,
        device,
    })
}
