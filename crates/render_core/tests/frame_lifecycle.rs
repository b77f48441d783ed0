//! Whole-frame scenarios on the headless device: materials and a render
//! target living side by side through draws, resizes and teardown.

use std::sync::Arc;

use render_core::prelude::*;
use render_core::render::api::{
    CullMode, DescriptorResource, ImageViewHandle, SamplerHandle, ShaderStages,
};
use render_core::render::backends::headless::{HeadlessDevice, ResourceKind};

fn config() -> RenderCoreConfig {
    let mut config = RenderCoreConfig::new("lifecycle").with_chunk_sizes(4, 4);
    config.pools.min_uniform_alignment = 16;
    config
}

fn surface_layout() -> Arc<UniformBufferLayout> {
    Arc::new(
        UniformBufferLayout::builder("Surface")
            .field("base_color", ShaderType::Vec4)
            .field("roughness", ShaderType::Float)
            .build()
            .unwrap(),
    )
}

fn pipeline(name: &str) -> GraphicsPipelineDesc {
    GraphicsPipelineDesc {
        name: name.to_string(),
        vertex_spirv: Arc::from(vec![0x0723_0203u32, 0x0001_0000]),
        fragment_spirv: Arc::from(vec![0x0723_0203u32, 0x0001_0000]),
        vertex_bindings: Vec::new(),
        vertex_attributes: Vec::new(),
        set_layouts: Vec::new(),
        push_constant_size: 128,
        cull_mode: CullMode::Back,
        depth_test: true,
        blend: false,
    }
}

fn texture(id: u64) -> TextureSource {
    TextureSource {
        image_view: ImageViewHandle(0x1000 + id),
        sampler: SamplerHandle(0x2000 + id),
    }
}

#[test]
fn frame_loop_survives_resize_and_tears_down_cleanly() {
    logging::init_for_tests();
    let device = Arc::new(HeadlessDevice::new());
    let config = config();

    {
        let mut target = RenderTarget::new(
            device.clone(),
            RenderTargetDesc::from_config(&config),
            1280,
            720,
        )
        .unwrap();
        let forward = target.register_pipeline(pipeline("forward")).unwrap();
        let mut materials = MaterialSystem::new(device.clone(), &config).unwrap();
        let mut frames = FrameRing::new(config.frames_in_flight);

        let material = materials
            .create_material(
                MaterialCreateInfo::new("rock", forward)
                    .with_uniform(surface_layout())
                    .with_texture("albedo", texture(1))
                    .with_stages(ShaderStages::FRAGMENT),
            )
            .unwrap();
        let instances: Vec<_> = (0..6)
            .map(|_| materials.create_instance(material).unwrap())
            .collect();

        for frame in 0..4u32 {
            for (i, instance) in instances.iter().enumerate() {
                let shade = (frame + i as u32) as f32 / 10.0;
                materials
                    .set_variable(instance, "base_color", &[shade, shade, shade, 1.0f32])
                    .unwrap();
                let binding = materials.prepare_draw(instance).unwrap();
                assert_eq!(binding.pipeline, forward);
                assert!(target.pipeline(binding.pipeline).is_ok());
                assert_eq!(binding.dynamic_offsets, vec![(instance.instance_id() % 4) * 32]);
            }
            let image = frames.advance() % target.image_count() as usize;
            assert!(target.framebuffer(image).is_ok());

            if frame == 1 {
                target.reconstruct(1920, 1080).unwrap();
                assert_eq!(target.generation(), 2);
            }
        }

        let last: [f32; 4] = materials.get_variable(&instances[5], "base_color").unwrap();
        assert_eq!(last, [0.8, 0.8, 0.8, 1.0]);
        assert_eq!(materials.dirty_flag(material).unwrap(), DirtyFlag::Clean);

        // Instances 0..4 and 4..6 sit in different uniform chunks.
        let first = materials.prepare_draw(&instances[0]).unwrap();
        let fifth = materials.prepare_draw(&instances[4]).unwrap();
        assert_ne!(first.descriptor_set, fifth.descriptor_set);
        let pool = materials.uniform_pool(material, 0).unwrap();
        assert_eq!(
            device.descriptor_binding(fifth.descriptor_set, 0),
            Some(DescriptorResource::Buffer {
                buffer: pool.chunk_buffer(1).unwrap(),
                offset: 0,
                range: 32,
            })
        );
        assert_eq!(
            device.descriptor_binding(fifth.descriptor_set, 1),
            Some(DescriptorResource::Image {
                view: ImageViewHandle(0x1001),
                sampler: SamplerHandle(0x2001),
            })
        );

        for instance in &instances {
            materials.destroy_instance(instance).unwrap();
        }
        assert_eq!(materials.destroy_material(material).unwrap(), 1);
        assert_eq!(materials.material_count(), 0);
    }

    assert_eq!(device.total_live(), 0);
    assert_eq!(device.invalid_operation_count(), 0);
}

#[test]
fn clones_share_storage_until_the_family_is_pruned() {
    let device = Arc::new(HeadlessDevice::new());
    let mut materials = MaterialSystem::new(device.clone(), &config()).unwrap();

    let root = materials
        .create_material(MaterialCreateInfo::new("metal", PipelineId(0)).with_uniform(surface_layout()))
        .unwrap();
    let clone = materials.clone_material(root).unwrap();
    let grandchild = materials.clone_material(clone).unwrap();
    assert_eq!(materials.root_ancestor(grandchild).unwrap(), root);
    assert_eq!(
        materials.set_layout(grandchild).unwrap(),
        materials.set_layout(root).unwrap()
    );

    let a = materials.create_instance(root).unwrap();
    let b = materials.create_instance(grandchild).unwrap();
    assert_eq!(a.instance_id(), b.instance_id());
    assert_eq!(a.ubos()[0].offset, b.ubos()[0].offset);

    materials.set_variable(&b, "roughness", &0.75f32).unwrap();
    let roughness: f32 = materials.get_variable(&a, "roughness").unwrap();
    approx::assert_relative_eq!(roughness, 0.75);

    // A released clone with live children or instances stays.
    materials.release_material(clone).unwrap();
    assert_eq!(materials.prune(root).unwrap(), 0);

    materials.release_material(grandchild).unwrap();
    materials.destroy_instance(&b).unwrap();
    assert_eq!(materials.prune(root).unwrap(), 2);
    assert!(materials.material(clone).is_none());

    let buffers_before = device.live_count(ResourceKind::Buffer);
    materials.destroy_instance(&a).unwrap();
    assert_eq!(materials.destroy_material(root).unwrap(), 1);
    assert!(device.live_count(ResourceKind::Buffer) < buffers_before);
    assert_eq!(device.total_live(), 0);
}

#[test]
fn failed_resize_recovers_on_next_attempt() {
    let device = Arc::new(HeadlessDevice::new());
    let mut target = RenderTarget::new(device.clone(), RenderTargetDesc::default(), 640, 480).unwrap();
    let id = target.register_pipeline(pipeline("forward")).unwrap();

    device.fail_next(ResourceKind::Pipeline);
    assert!(target.reconstruct(800, 600).is_err());
    assert_eq!(target.state(), TargetState::Invalid);
    assert_eq!(device.total_live(), 0);

    assert_eq!(target.reconstruct(0, 0).unwrap(), ReconstructOutcome::Deferred);
    assert_eq!(target.state(), TargetState::Invalid);

    target.reconstruct(800, 600).unwrap();
    assert_eq!(target.state(), TargetState::Constructed);
    assert!(target.pipeline(id).is_ok());
    assert_eq!(target.extent().width, 800);
}
