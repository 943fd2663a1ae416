//! Headless rendering with image readback.
//!
//! Opens a real Vulkan 1.3 device without window-system extensions, renders into a
//! single-attachment draw pass and reads the result back into an RGBA image.

use std::sync::Arc;

use ash::vk;
use image::{ImageBuffer, Rgba};

use vellum_gpu::{
    Buffer, BufferDesc, ClearFlags, ColorAttachmentDesc, CommandList, CommandType, DeviceConfig,
    DrawPass, DrawPassDesc, Fence, ImageCopyTarget, RenderDevice, RenderPassBeginInfo,
    RenderPassSource, ResourceState, Submission, TargetFormat,
};

use crate::{Result, TestError};

const OUTPUT_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Headless renderer for testing.
pub struct HeadlessRenderer {
    // Dropped before the device they were created on.
    draw_pass: DrawPass,
    commands: CommandList,
    fence: Fence,
    readback: Buffer,
    device: Arc<RenderDevice>,
    width: u32,
    height: u32,
}

impl HeadlessRenderer {
    /// Create a headless renderer with a `width`×`height` RGBA8 render target.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let device = DeviceConfig::new()
            .app_name("vellum-test")
            .validation(true)
            .headless(true)
            .build()?;

        let source = RenderPassSource::Formats {
            extent: vk::Extent2D { width, height },
            samples: vk::SampleCountFlags::TYPE_1,
            render_targets: vec![
                TargetFormat::new(OUTPUT_FORMAT).with_usage(vk::ImageUsageFlags::TRANSFER_SRC)
            ],
            depth_stencil: None,
        };
        let draw_pass = DrawPass::create(
            &device,
            DrawPassDesc::new(source)
                .with_render_target_ops(ColorAttachmentDesc::clear(ResourceState::CopySrc))
                .with_name("headless output"),
        )?;

        let commands = CommandList::new(&device, CommandType::Graphics)?;
        let fence = Fence::create(&device, false)?;
        let readback = Buffer::create(
            &device,
            BufferDesc::readback(u64::from(width) * u64::from(height) * 4)
                .with_name("headless readback"),
        )?;

        Ok(Self {
            draw_pass,
            commands,
            fence,
            readback,
            device,
            width,
            height,
        })
    }

    pub fn device(&self) -> &Arc<RenderDevice> {
        &self.device
    }

    /// Get the output dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Clear the target to `color` with no draws and read it back.
    pub fn render_clear(&mut self, color: [f32; 4]) -> Result<ImageBuffer<Rgba<u8>, Vec<u8>>> {
        self.draw_pass.set_clear_color(color);
        self.render(ClearFlags::RENDER_TARGETS, |_, _| Ok(()))
    }

    /// Record `record` inside the draw-pass variant for `flags`, submit, wait and read back.
    pub fn render<F>(
        &mut self,
        flags: ClearFlags,
        record: F,
    ) -> Result<ImageBuffer<Rgba<u8>, Vec<u8>>>
    where
        F: FnOnce(&mut CommandList, &RenderPassBeginInfo<'_>) -> vellum_gpu::Result<()>,
    {
        let begin_info = self.draw_pass.prepare_render_pass_begin_info(flags)?;

        self.commands.begin()?;
        self.commands.begin_render_pass(&begin_info)?;
        record(&mut self.commands, &begin_info)?;
        self.commands.end_render_pass();
        self.commands.end()?;

        let command_buffers = [self.commands.handle()];
        let queue = self.device.graphics_queue();
        queue.submit(
            &Submission {
                command_buffers: &command_buffers,
                ..Default::default()
            },
            self.fence.handle(),
        )?;
        self.fence.wait_and_reset()?;
        self.device.wait_idle()?;

        self.read_back()
    }

    fn read_back(&self) -> Result<ImageBuffer<Rgba<u8>, Vec<u8>>> {
        let target = self
            .draw_pass
            .attachments()
            .render_targets()
            .first()
            .ok_or_else(|| TestError::ImageComparison("draw pass has no render target".to_string()))?
            .image()
            .clone();

        self.device.graphics_queue().copy_image_to_buffer(
            &ImageCopyTarget {
                image: target.handle(),
                aspect: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
                extent: target.extent(),
                state: ResourceState::CopySrc,
            },
            self.readback.handle(),
            0,
        )?;

        let len = self.width as usize * self.height as usize * 4;
        let data = self.readback.read_bytes(0, len)?;
        ImageBuffer::from_raw(self.width, self.height, data).ok_or_else(|| {
            TestError::ImageComparison("readback size does not match the target".to_string())
        })
    }
}

impl Drop for HeadlessRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("Wait idle before headless teardown failed: {e}");
        }
    }
}

/// Compare two images and return the normalized difference (0.0-1.0).
pub fn compare_images(
    a: &ImageBuffer<Rgba<u8>, Vec<u8>>,
    b: &ImageBuffer<Rgba<u8>, Vec<u8>>,
) -> Result<f64> {
    if a.dimensions() != b.dimensions() {
        return Err(TestError::ImageComparison(format!(
            "Image dimensions don't match: {:?} vs {:?}",
            a.dimensions(),
            b.dimensions()
        )));
    }

    let total_diff: u64 = a
        .pixels()
        .zip(b.pixels())
        .map(|(pa, pb)| {
            pa.0.iter()
                .zip(pb.0.iter())
                .map(|(&x, &y)| u64::from(x.abs_diff(y)))
                .sum::<u64>()
        })
        .sum();

    let max_diff = (u64::from(a.width()) * u64::from(a.height()) * 4 * 255) as f64;
    Ok(total_diff as f64 / max_diff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_images_have_no_difference() {
        let a = ImageBuffer::from_pixel(4, 4, Rgba([10, 20, 30, 255]));
        assert_eq!(compare_images(&a, &a.clone()).unwrap(), 0.0);
    }

    #[test]
    fn opposite_images_differ_completely() {
        let black = ImageBuffer::from_pixel(2, 2, Rgba([0, 0, 0, 0]));
        let white = ImageBuffer::from_pixel(2, 2, Rgba([255, 255, 255, 255]));
        assert!((compare_images(&black, &white).unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn mismatched_sizes_are_rejected() {
        let a = ImageBuffer::from_pixel(2, 2, Rgba([0, 0, 0, 0]));
        let b = ImageBuffer::from_pixel(3, 2, Rgba([0, 0, 0, 0]));
        assert!(matches!(
            compare_images(&a, &b),
            Err(TestError::ImageComparison(_))
        ));
    }

    #[test]
    #[ignore = "requires a Vulkan 1.3 device"]
    fn headless_renderer_creation() {
        let renderer = HeadlessRenderer::new(64, 64).unwrap();
        assert_eq!(renderer.dimensions(), (64, 64));
    }
}
