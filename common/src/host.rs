use core::fmt;

/// Host SIMD extensions a recompiler backend may depend on
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HostFeature {
    Mmx,
    Sse,
    Sse2,
    Sse41,
}

impl HostFeature {
    pub fn name(self) -> &'static str {
        match self {
            HostFeature::Mmx => "MMX",
            HostFeature::Sse => "SSE",
            HostFeature::Sse2 => "SSE2",
            HostFeature::Sse41 => "SSE4.1",
        }
    }
}

impl fmt::Display for HostFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct HostFeatures {
    mmx: bool,
    sse: bool,
    sse2: bool,
    sse41: bool,
}

impl HostFeatures {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    pub fn detect() -> HostFeatures {
        HostFeatures {
            mmx: std::is_x86_feature_detected!("mmx"),
            sse: std::is_x86_feature_detected!("sse"),
            sse2: std::is_x86_feature_detected!("sse2"),
            sse41: std::is_x86_feature_detected!("sse4.1"),
        }
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    pub fn detect() -> HostFeatures {
        HostFeatures::none()
    }

    pub fn all() -> HostFeatures {
        HostFeatures { mmx: true, sse: true, sse2: true, sse41: true }
    }

    pub fn none() -> HostFeatures {
        HostFeatures::default()
    }

    pub fn has(&self, feature: HostFeature) -> bool {
        match feature {
            HostFeature::Mmx => self.mmx,
            HostFeature::Sse => self.sse,
            HostFeature::Sse2 => self.sse2,
            HostFeature::Sse41 => self.sse41,
        }
    }

    pub fn without(mut self, feature: HostFeature) -> HostFeatures {
        match feature {
            HostFeature::Mmx => self.mmx = false,
            HostFeature::Sse => self.sse = false,
            HostFeature::Sse2 => self.sse2 = false,
            HostFeature::Sse41 => self.sse41 = false,
        }
        self
    }

    /// First entry of `required` the host lacks, in the order given
    pub fn first_missing(&self, required: &[HostFeature]) -> Option<HostFeature> {
        required.iter().copied().find(|f| !self.has(*f))
    }
}
