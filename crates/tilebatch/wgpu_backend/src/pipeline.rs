//! Render pipeline for the generated tile program.

use std::borrow::Cow;
use tilebatch::shader::FIRST_ATLAS_BINDING;
use tilebatch::{AttributeFormat, TileShaderSource, VertexLayout};
use wgpu::*;

/// Compiled tile program plus the bind group layout its draws use.
#[derive(Clone, Debug)]
pub struct TilePipeline {
    pub pipeline: RenderPipeline,
    pub bind_layout: BindGroupLayout,
    pub max_textures: usize,
}

const fn vertex_format(format: AttributeFormat) -> VertexFormat {
    match format {
        AttributeFormat::Float32 => VertexFormat::Float32,
        AttributeFormat::Float32x2 => VertexFormat::Float32x2,
        AttributeFormat::Float32x4 => VertexFormat::Float32x4,
    }
}

fn bind_layout_entries(max_textures: usize) -> Vec<BindGroupLayoutEntry> {
    let mut entries = vec![
        BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStages::VERTEX_FRAGMENT,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        },
        BindGroupLayoutEntry {
            binding: 1,
            visibility: ShaderStages::FRAGMENT,
            ty: BindingType::Sampler(SamplerBindingType::Filtering),
            count: None,
        },
    ];
    for unit in 0..max_textures {
        entries.push(BindGroupLayoutEntry {
            binding: FIRST_ATLAS_BINDING + unit as u32,
            visibility: ShaderStages::FRAGMENT,
            ty: BindingType::Texture {
                sample_type: TextureSampleType::Float { filterable: true },
                view_dimension: TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
    }
    entries
}

/// Build the pipeline for `source`, blending premultiplied output over `render_format`.
pub fn build_tile_pipeline(
    device: &Device,
    render_format: TextureFormat,
    source: &TileShaderSource,
    layout: &VertexLayout,
) -> TilePipeline {
    let shader = device.create_shader_module(ShaderModuleDescriptor {
        label: Some("tile-shader"),
        source: ShaderSource::Wgsl(Cow::Borrowed(source.wgsl())),
    });
    let entries = bind_layout_entries(source.max_textures());
    let bind_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
        label: Some("tile-bind-layout"),
        entries: &entries,
    });
    let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
        label: Some("tile-pipeline-layout"),
        bind_group_layouts: &[&bind_layout],
        push_constant_ranges: &[],
    });
    let attributes: Vec<VertexAttribute> = layout
        .attributes
        .iter()
        .map(|attribute| VertexAttribute {
            format: vertex_format(attribute.format),
            offset: attribute.offset,
            shader_location: attribute.location,
        })
        .collect();
    let vbuf = [VertexBufferLayout {
        array_stride: layout.stride,
        step_mode: VertexStepMode::Vertex,
        attributes: &attributes,
    }];
    let pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
        label: Some("tile-pipeline"),
        layout: Some(&pipeline_layout),
        vertex: VertexState {
            module: &shader,
            entry_point: Some(source.vertex_entry()),
            buffers: &vbuf,
            compilation_options: Default::default(),
        },
        primitive: PrimitiveState::default(),
        depth_stencil: None,
        multisample: MultisampleState::default(),
        fragment: Some(FragmentState {
            module: &shader,
            entry_point: Some(source.fragment_entry()),
            targets: &[Some(ColorTargetState {
                format: render_format,
                blend: Some(BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                write_mask: ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        multiview: None,
        cache: None,
    });
    TilePipeline {
        pipeline,
        bind_layout,
        max_textures: source.max_textures(),
    }
}

/// Sampler shared by every tile draw. Frames are clamped in the shader, so
/// linear filtering never bleeds across regions.
pub fn build_tile_sampler(device: &Device) -> Sampler {
    device.create_sampler(&SamplerDescriptor {
        label: Some("tile-sampler"),
        mag_filter: FilterMode::Linear,
        min_filter: FilterMode::Linear,
        mipmap_filter: FilterMode::Nearest,
        address_mode_u: AddressMode::ClampToEdge,
        address_mode_v: AddressMode::ClampToEdge,
        address_mode_w: AddressMode::ClampToEdge,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_has_uniform_sampler_and_one_entry_per_unit() {
        let entries = bind_layout_entries(4);
        assert_eq!(entries.len(), 6);
        assert_eq!(entries[5].binding, FIRST_ATLAS_BINDING + 3);
        assert!(matches!(entries[1].ty, BindingType::Sampler(_)));
    }

    #[test]
    fn attribute_formats_map_one_to_one() {
        assert_eq!(vertex_format(AttributeFormat::Float32x4), VertexFormat::Float32x4);
        assert_eq!(
            tilebatch::TileVertex::LAYOUT
                .attributes
                .iter()
                .map(|attribute| vertex_format(attribute.format).size())
                .sum::<u64>(),
            tilebatch::TileVertex::LAYOUT.stride
        );
    }
}
