// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Deinterlacing methods and the catalogue of those the current pipeline offers.

use std::fmt;

/// Ways of turning interlaced pictures into progressive ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeinterlaceMethod {
    None,
    Auto,
    RenderBlend,
    RenderWeave,
    RenderBob,
    /// Software deinterlacing at full frame rate.
    Deinterlace,
    /// Software deinterlacing at half frame rate.
    DeinterlaceHalf,
    /// Deinterlacing done by the video layer of the SoC.
    Hardware,
}

impl DeinterlaceMethod {
    pub fn name(&self) -> &'static str {
        match self {
            DeinterlaceMethod::None => "none",
            DeinterlaceMethod::Auto => "auto",
            DeinterlaceMethod::RenderBlend => "render-blend",
            DeinterlaceMethod::RenderWeave => "render-weave",
            DeinterlaceMethod::RenderBob => "render-bob",
            DeinterlaceMethod::Deinterlace => "deinterlace",
            DeinterlaceMethod::DeinterlaceHalf => "deinterlace-half",
            DeinterlaceMethod::Hardware => "hardware",
        }
    }
}

impl fmt::Display for DeinterlaceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered set of the deinterlacing methods usable for the current stream.
///
/// The catalogue never holds duplicates and always offers [`DeinterlaceMethod::None`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeinterlaceCatalogue {
    methods: Vec<DeinterlaceMethod>,
    default: DeinterlaceMethod,
}

impl Default for DeinterlaceCatalogue {
    fn default() -> Self {
        Self {
            methods: vec![DeinterlaceMethod::None],
            default: DeinterlaceMethod::None,
        }
    }
}

impl DeinterlaceCatalogue {
    /// Replaces the decoder methods, keeping the methods of the renderer after them.
    pub fn update(&mut self, methods: &[DeinterlaceMethod], render_methods: &[DeinterlaceMethod]) {
        self.methods.clear();
        self.merge(methods);
        self.merge(render_methods);
        if !self.supports(DeinterlaceMethod::None) {
            self.methods.insert(0, DeinterlaceMethod::None);
        }
    }

    /// Appends the methods not offered yet.
    pub fn merge(&mut self, methods: &[DeinterlaceMethod]) {
        for method in methods {
            if !self.supports(*method) {
                self.methods.push(*method);
            }
        }
    }

    pub fn supports(&self, method: DeinterlaceMethod) -> bool {
        self.methods.contains(&method)
    }

    pub fn methods(&self) -> &[DeinterlaceMethod] {
        &self.methods
    }

    pub fn default_method(&self) -> DeinterlaceMethod {
        self.default
    }

    pub fn set_default_method(&mut self, method: DeinterlaceMethod) {
        self.default = method;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeinterlaceMethod::*;

    #[test]
    fn catalogue_is_deduplicated_and_offers_none() {
        let mut catalogue = DeinterlaceCatalogue::default();
        catalogue.update(&[Deinterlace, DeinterlaceHalf, Deinterlace], &[RenderBob, Deinterlace]);
        assert_eq!(
            catalogue.methods(),
            &[None, Deinterlace, DeinterlaceHalf, RenderBob]
        );

        catalogue.update(&[Hardware, None, Auto], &[]);
        assert_eq!(catalogue.methods(), &[Hardware, None, Auto]);

        catalogue.update(&[], &[]);
        assert_eq!(catalogue.methods(), &[None]);
    }

    #[test]
    fn merge_keeps_order() {
        let mut catalogue = DeinterlaceCatalogue::default();
        catalogue.merge(&[RenderBlend, RenderWeave, RenderBlend]);
        assert_eq!(catalogue.methods(), &[None, RenderBlend, RenderWeave]);
        assert!(catalogue.supports(RenderWeave));
        assert!(!catalogue.supports(Hardware));
    }
}
