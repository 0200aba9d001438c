//! wgpu device for the `tilebatch` hardware backend.
#![allow(
    clippy::cast_possible_truncation,
    reason = "Texture unit counts and bindings fit in u32"
)]
#![allow(
    clippy::cast_lossless,
    reason = "Binding arithmetic mixes usize and u32"
)]
#![allow(clippy::missing_errors_doc, reason = "Internal crate")]
#![allow(
    clippy::missing_docs_in_private_items,
    reason = "Recorded draw state is self-describing"
)]
#![allow(clippy::std_instead_of_core, reason = "Uses std channels and atomics")]
#![allow(
    clippy::single_call_fn,
    reason = "Pipeline pieces are split for readability"
)]
#![allow(clippy::wildcard_imports, reason = "wgpu types are used throughout")]
#![allow(
    clippy::default_trait_access,
    reason = "wgpu descriptors use Default::default() for compilation options"
)]
#![allow(
    clippy::indexing_slicing,
    reason = "Readback and staging rows are sliced within their padded row length"
)]

pub mod device;
pub mod offscreen;
pub mod pipeline;
pub mod validation;

pub use device::{WgpuTexture, WgpuTileDevice};
pub use offscreen::{
    OffscreenGpuContext, TargetReadback, create_render_texture, initialize_gpu,
    render_frame_to_rgba,
};
pub use pipeline::{TilePipeline, build_tile_pipeline, build_tile_sampler};
pub use validation::{scoped, submit_scoped};
