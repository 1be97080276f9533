/// Per-frame render settings, passed by value into each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSettings {
    /// Multiplies every splat's extent. 1.0 draws splats at trained size.
    pub scaling_modifier: f32,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self { scaling_modifier: 1.0 }
    }
}

impl FrameSettings {
    pub fn with_scaling_modifier(scaling_modifier: f32) -> Self {
        Self {
            scaling_modifier: scaling_modifier.clamp(0.01, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaling_modifier_clamped() {
        assert_eq!(FrameSettings::default().scaling_modifier, 1.0);
        assert_eq!(FrameSettings::with_scaling_modifier(4.0).scaling_modifier, 1.0);
        assert_eq!(FrameSettings::with_scaling_modifier(0.0).scaling_modifier, 0.01);
        assert_eq!(FrameSettings::with_scaling_modifier(0.5).scaling_modifier, 0.5);
    }
}
