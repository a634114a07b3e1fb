// SPDX-License-Identifier: CEPL-1.0
//! Window-side collaborator. The backend only ever sees raw handles and a
//! framebuffer size; everything winit-specific stays behind this crate.
pub use winit;

use winit::dpi::PhysicalSize;
use winit::window::Window;

/// Framebuffer size in the `u16` form the renderer's resize contract takes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct FramebufferSize {
    pub width: u16,
    pub height: u16,
}

impl FramebufferSize {
    pub fn is_zero_area(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl From<PhysicalSize<u32>> for FramebufferSize {
    fn from(size: PhysicalSize<u32>) -> Self {
        let clamp = |v: u32| u16::try_from(v).unwrap_or(u16::MAX);
        Self {
            width: clamp(size.width),
            height: clamp(size.height),
        }
    }
}

pub fn framebuffer_size(window: &Window) -> FramebufferSize {
    let size = FramebufferSize::from(window.inner_size());
    tracing::trace!("framebuffer size {}x{}", size.width, size.height);
    size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oversized_dimensions_clamp() {
        let size = FramebufferSize::from(PhysicalSize::new(70_000u32, 600u32));
        assert_eq!(size.width, u16::MAX);
        assert_eq!(size.height, 600);
    }

    #[test]
    fn test_minimized_is_zero_area() {
        assert!(FramebufferSize::from(PhysicalSize::new(0u32, 600u32)).is_zero_area());
        assert!(!FramebufferSize::from(PhysicalSize::new(800u32, 600u32)).is_zero_area());
    }
}
