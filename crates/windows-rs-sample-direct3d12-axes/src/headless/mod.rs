//! An in-process stand-in for a D3D12 device.
//!
//! Every object registers itself with a shared [`HeadlessInstance`] while it is
//! alive. Executed command lists, presents and fence signals go onto a single queue
//! timeline which only runs when the CPU blocks on an event, so a signal behind
//! queued work is observed as not yet completed, exactly like a busy GPU. While the
//! timeline runs, each command list is replayed against the resource states and
//! every violation the debug layer would report is collected.

mod compiler;
mod objects;
mod run;
mod world;

use std::cell::RefCell;
use std::rc::Rc;

pub use compiler::HeadlessCompiler;
pub use objects::HeadlessAdapter;
pub use objects::HeadlessAllocator;
pub use objects::HeadlessCommandList;
pub use objects::HeadlessDescriptorHeap;
pub use objects::HeadlessDevice;
pub use objects::HeadlessEvent;
pub use objects::HeadlessFactory;
pub use objects::HeadlessFence;
pub use objects::HeadlessPipelineState;
pub use objects::HeadlessQueue;
pub use objects::HeadlessResource;
pub use objects::HeadlessRootSignature;
pub use objects::HeadlessSwapChain;
pub use objects::PipelineSnapshot;
pub use objects::RTV_DESCRIPTOR_SIZE;
pub use run::run;
pub use run::RunSummary;
pub use world::Command;
pub use world::HeadlessStats;
pub use world::ObjectKind;
pub use world::QueuedWork;

use self::world::SharedWorld;
use self::world::World;
use crate::gpu::Backend;
use crate::gpu::CpuDescriptorHandle;
use crate::gpu::FeatureLevel;
use crate::gpu::ResourceState;
use crate::gpu::TopologyType;

pub enum HeadlessBackend {}

impl Backend for HeadlessBackend {
    type Factory = HeadlessFactory;
    type Adapter = HeadlessAdapter;
    type Device = HeadlessDevice;
    type Queue = HeadlessQueue;
    type SwapChain = HeadlessSwapChain;
    type DescriptorHeap = HeadlessDescriptorHeap;
    type Resource = HeadlessResource;
    type CommandAllocator = HeadlessAllocator;
    type CommandList = HeadlessCommandList;
    type RootSignature = HeadlessRootSignature;
    type PipelineState = HeadlessPipelineState;
    type Fence = HeadlessFence;
    type Event = HeadlessEvent;
    type Compiler = HeadlessCompiler;
    type Window = HeadlessWindow;
}

/// The surface a headless swap chain presents to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadlessWindow {
    pub width: u32,
    pub height: u32,
}

impl Default for HeadlessWindow {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessAdapterSpec {
    pub name: String,
    pub is_software: bool,
    pub max_feature_level: FeatureLevel,
    pub dedicated_video_memory: u64,
}

impl HeadlessAdapterSpec {
    pub fn hardware(name: impl Into<String>, max_feature_level: FeatureLevel) -> Self {
        Self {
            name: name.into(),
            is_software: false,
            max_feature_level,
            dedicated_video_memory: 4 << 30,
        }
    }

    pub fn software(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_software: true,
            max_feature_level: FeatureLevel::Level12_1,
            dedicated_video_memory: 0,
        }
    }

    pub fn warp() -> Self {
        Self::software("Microsoft Basic Render Driver")
    }
}

#[derive(Debug, Clone)]
pub struct HeadlessOptions {
    /// In enumeration order.
    pub adapters: Vec<HeadlessAdapterSpec>,
    /// Back buffer index reported after 0, 1, 2, ... presents. Once exhausted the
    /// swap chain keeps rotating from the last entry. Empty means plain rotation from 0.
    pub back_buffer_sequence: Vec<u32>,
    pub fail_root_signature_serialization: bool,
    pub fail_root_signature_creation: bool,
    pub fail_pipeline_state: Option<TopologyType>,
    /// Keep a copy of every executed command list for [`HeadlessInstance::submitted`].
    pub record_submissions: bool,
}

impl Default for HeadlessOptions {
    fn default() -> Self {
        Self {
            adapters: vec![HeadlessAdapterSpec::hardware(
                "Headless Adapter",
                FeatureLevel::Level12_1,
            )],
            back_buffer_sequence: Vec::new(),
            fail_root_signature_serialization: false,
            fail_root_signature_creation: false,
            fail_pipeline_state: None,
            record_submissions: false,
        }
    }
}

/// Owner of the shared state; also the inspection surface for tests.
pub struct HeadlessInstance {
    world: SharedWorld,
}

impl Default for HeadlessInstance {
    fn default() -> Self {
        Self::new(HeadlessOptions::default())
    }
}

impl HeadlessInstance {
    pub fn new(options: HeadlessOptions) -> Self {
        Self {
            world: Rc::new(RefCell::new(World::new(options))),
        }
    }

    pub fn factory(&self) -> HeadlessFactory {
        HeadlessFactory::new(&self.world)
    }

    /// A device without going through adapter selection.
    pub fn device(&self) -> HeadlessDevice {
        HeadlessDevice::new(&self.world)
    }

    pub fn stats(&self) -> HeadlessStats {
        self.world.borrow().stats
    }

    /// Puts work on the queue timeline ahead of whatever is submitted next.
    pub fn enqueue(&self, work: QueuedWork) {
        self.world.borrow_mut().enqueue(work);
    }

    pub fn live_objects(&self) -> usize {
        self.world.borrow().live_objects().len()
    }

    pub fn live_object_kinds(&self) -> Vec<ObjectKind> {
        self.world
            .borrow()
            .live_objects()
            .into_iter()
            .map(|(_, kind)| kind)
            .collect()
    }

    pub fn render_target_views(&self) -> usize {
        self.world.borrow().render_target_views()
    }

    /// Resource id a render target view was created for.
    pub fn rtv_target(&self, handle: CpuDescriptorHandle) -> Option<u64> {
        self.world.borrow().rtv_target(handle)
    }

    /// State of a resource as of the last drained work.
    pub fn resource_state(&self, resource: u64) -> Option<ResourceState> {
        self.world.borrow().resource_state(resource)
    }

    /// Every executed command list, in submission order. Empty unless
    /// `record_submissions` was set.
    pub fn submitted(&self) -> Vec<Vec<Command>> {
        self.world.borrow().submitted().to_vec()
    }

    /// The first validation errors reported; `stats().validation_errors` has the total.
    pub fn validation_errors(&self) -> Vec<String> {
        self.world.borrow().validation_errors().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::CommandAllocator;
    use crate::gpu::CommandQueue;
    use crate::gpu::Device;
    use crate::gpu::Factory;
    use crate::gpu::GraphicsCommandList;
    use crate::gpu::SwapChain;
    use crate::gpu::SwapChainDesc;
    use crate::pipeline::build_pipeline;
    use crate::scene::INPUT_LAYOUT;
    use crate::shader::ShaderPair;

    #[test]
    fn dropped_objects_are_no_longer_live() {
        let instance = HeadlessInstance::default();
        let device = instance.device();
        let queue = device.create_command_queue().unwrap();
        let buffer = device.create_upload_buffer(64).unwrap();
        assert_eq!(instance.live_objects(), 3);
        let alias = buffer.clone();
        drop(buffer);
        assert_eq!(instance.live_objects(), 3);
        drop((alias, queue, device));
        assert_eq!(instance.live_objects(), 0);
    }

    #[test]
    fn swap_chain_rotates_without_a_script() {
        let instance = HeadlessInstance::default();
        let device = instance.device();
        let queue = device.create_command_queue().unwrap();
        let swap_chain = instance
            .factory()
            .create_swap_chain(
                &queue,
                &HeadlessWindow::default(),
                &SwapChainDesc {
                    buffer_count: 2,
                    width: 800,
                    height: 600,
                    format: crate::gpu::Format::R8G8B8A8Unorm,
                },
            )
            .unwrap();
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(swap_chain.current_back_buffer_index());
            swap_chain.present(1).unwrap();
        }
        assert_eq!(seen, [0, 1, 0, 1]);
    }

    #[test]
    fn allocator_reset_while_in_flight_is_refused() {
        let instance = HeadlessInstance::default();
        let device = instance.device();
        let queue = device.create_command_queue().unwrap();
        let shaders = ShaderPair {
            vertex: b"vs".to_vec(),
            pixel: b"ps".to_vec(),
        };
        let pipeline = build_pipeline::<HeadlessBackend>(&device, &shaders, &INPUT_LAYOUT).unwrap();
        let pso = pipeline.for_topology_type(TopologyType::Triangle);
        let allocator = device.create_command_allocator().unwrap();
        let list = device.create_command_list(&allocator, pso).unwrap();

        list.reset(&allocator, pso).unwrap();
        list.close().unwrap();
        instance.enqueue(QueuedWork::Busy);
        queue.execute(&list).unwrap();

        assert!(allocator.reset().is_err());
        assert_eq!(instance.validation_errors().len(), 1);
    }

    #[test]
    fn recording_into_a_closed_list_is_reported() {
        let instance = HeadlessInstance::default();
        let device = instance.device();
        let shaders = ShaderPair {
            vertex: b"vs".to_vec(),
            pixel: b"ps".to_vec(),
        };
        let pipeline = build_pipeline::<HeadlessBackend>(&device, &shaders, &INPUT_LAYOUT).unwrap();
        let allocator = device.create_command_allocator().unwrap();
        let list = device
            .create_command_list(&allocator, pipeline.for_topology_type(TopologyType::Line))
            .unwrap();
        list.draw_instanced(3, 1, 0, 0);
        assert!(list.commands().is_empty());
        assert_eq!(instance.validation_errors().len(), 1);
    }
}
