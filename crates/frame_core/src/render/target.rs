//! Render target descriptions and non-owning views
//!
//! A pass owns its render targets exclusively. Later passes only see a
//! [`TargetView`] published under an [`OutputSlot`]; the view is a plain copy
//! of handles valid for the frame it was published in.

use ash::vk;

/// Sampler attached to a sampled render target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerKind {
    /// Linear filtering, clamp to edge
    Linear,
    /// Depth comparison (`LESS_OR_EQUAL`), clamp to border white
    DepthCompare,
}

/// Pure description of a render target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSpec {
    /// Size in pixels
    pub extent: vk::Extent2D,
    /// Image format
    pub format: vk::Format,
    /// Image usage
    pub usage: vk::ImageUsageFlags,
    /// View aspect
    pub aspect: vk::ImageAspectFlags,
    /// Sampler, if later passes read the target
    pub sampler: Option<SamplerKind>,
}

impl TargetSpec {
    /// Sampled color attachment
    pub fn color(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            aspect: vk::ImageAspectFlags::COLOR,
            sampler: Some(SamplerKind::Linear),
        }
    }

    /// Depth attachment, optionally sampled with a compare sampler
    pub fn depth(extent: vk::Extent2D, format: vk::Format, sampled: bool) -> Self {
        let mut usage = vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        if sampled {
            usage |= vk::ImageUsageFlags::SAMPLED;
        }
        Self {
            extent,
            format,
            usage,
            aspect: vk::ImageAspectFlags::DEPTH,
            sampler: sampled.then_some(SamplerKind::DepthCompare),
        }
    }

    /// Same target at another size
    pub fn resized(self, extent: vk::Extent2D) -> Self {
        Self { extent, ..self }
    }

    /// Whether the target is a depth image
    pub fn is_depth(&self) -> bool {
        self.aspect.contains(vk::ImageAspectFlags::DEPTH)
    }
}

/// Non-owning view of a render target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetView {
    /// Image handle
    pub image: vk::Image,
    /// View handle
    pub view: vk::ImageView,
    /// Sampler handle; null for attachment-only targets
    pub sampler: vk::Sampler,
    /// Image format
    pub format: vk::Format,
    /// Size in pixels
    pub extent: vk::Extent2D,
    /// View aspect
    pub aspect: vk::ImageAspectFlags,
}

impl TargetView {
    /// Descriptor info for sampling the target in `SHADER_READ_ONLY_OPTIMAL`
    pub fn sampled_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

/// Named outputs passes publish for later passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputSlot {
    /// Shadow-map depth
    ShadowMap,
    /// Scene depth written by the depth pre-pass
    SceneDepth,
    /// Latest HDR scene color
    SceneColor,
}

/// Outputs published so far, in pass order
///
/// Publishing a slot again replaces the earlier view, which is how each
/// post effect republishes `SceneColor`.
#[derive(Debug, Default, Clone)]
pub struct PassOutputs {
    entries: Vec<(OutputSlot, TargetView)>,
}

impl PassOutputs {
    /// Publish (or replace) an output
    pub fn publish(&mut self, slot: OutputSlot, view: TargetView) {
        match self.entries.iter_mut().find(|(s, _)| *s == slot) {
            Some(entry) => entry.1 = view,
            None => self.entries.push((slot, view)),
        }
    }

    /// Latest view published for `slot`
    pub fn get(&self, slot: OutputSlot) -> Option<&TargetView> {
        self.entries.iter().find(|(s, _)| *s == slot).map(|(_, view)| view)
    }

    /// Drop every published output
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn view(raw: u64) -> TargetView {
        TargetView {
            image: vk::Image::from_raw(raw),
            view: vk::ImageView::from_raw(raw),
            sampler: vk::Sampler::null(),
            format: vk::Format::R16G16B16A16_SFLOAT,
            extent: vk::Extent2D { width: 4, height: 4 },
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }

    #[test]
    fn test_resized_keeps_everything_but_extent() {
        let spec = TargetSpec::depth(vk::Extent2D { width: 800, height: 600 }, vk::Format::D32_SFLOAT, true);
        let resized = spec.resized(vk::Extent2D { width: 1024, height: 768 });
        assert_eq!(resized.format, spec.format);
        assert_eq!(resized.usage, spec.usage);
        assert_eq!(resized.sampler, Some(SamplerKind::DepthCompare));
        assert_eq!(resized.extent.width, 1024);
        assert!(resized.is_depth());
    }

    #[test]
    fn test_republishing_replaces_view() {
        let mut outputs = PassOutputs::default();
        outputs.publish(OutputSlot::SceneColor, view(1));
        outputs.publish(OutputSlot::ShadowMap, view(2));
        outputs.publish(OutputSlot::SceneColor, view(3));

        assert_eq!(outputs.get(OutputSlot::SceneColor).unwrap().image, vk::Image::from_raw(3));
        assert_eq!(outputs.get(OutputSlot::ShadowMap).unwrap().image, vk::Image::from_raw(2));
        assert!(outputs.get(OutputSlot::SceneDepth).is_none());
    }
}
