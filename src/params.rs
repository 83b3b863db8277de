use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Highest seed accepted by the generation provider UI.
pub const MAX_SEED: u64 = 999_999;

/// Output size of a generated image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Orientation implied by the aspect ratio.
    pub fn orientation(&self) -> Orientation {
        match self.width.cmp(&self.height) {
            std::cmp::Ordering::Less => Orientation::Portrait,
            std::cmp::Ordering::Equal => Orientation::Square,
            std::cmp::Ordering::Greater => Orientation::Landscape,
        }
    }

    /// Whether this is one of the preset [`RESOLUTIONS`].
    pub fn is_preset(&self) -> bool {
        RESOLUTIONS.contains(self)
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Orientation::Square.default_dimensions()
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Dimensions {
    type Err = anyhow::Error;

    /// Parse `"WIDTHxHEIGHT"`, e.g. `"832x1216"`.
    fn from_str(s: &str) -> Result<Self> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .with_context(|| format!("Expected WIDTHxHEIGHT, got '{s}'"))?;
        let width: u32 = w.trim().parse().with_context(|| format!("Invalid width in '{s}'"))?;
        let height: u32 = h.trim().parse().with_context(|| format!("Invalid height in '{s}'"))?;
        if width == 0 || height == 0 {
            anyhow::bail!("Dimensions must be non-zero, got '{s}'");
        }
        Ok(Self { width, height })
    }
}

/// Image orientation presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Portrait,
    Square,
    Landscape,
}

impl Orientation {
    /// The size picked when only an orientation is chosen.
    pub fn default_dimensions(&self) -> Dimensions {
        match self {
            Self::Portrait => Dimensions::new(832, 1216),
            Self::Square => Dimensions::new(1024, 1024),
            Self::Landscape => Dimensions::new(1216, 832),
        }
    }

    /// All preset resolutions with this orientation.
    pub fn resolutions(&self) -> Vec<Dimensions> {
        RESOLUTIONS
            .iter()
            .copied()
            .filter(|d| d.orientation() == *self)
            .collect()
    }
}

impl FromStr for Orientation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "portrait" => Ok(Self::Portrait),
            "square" => Ok(Self::Square),
            "landscape" => Ok(Self::Landscape),
            other => anyhow::bail!("Unknown orientation '{other}' (expected portrait, square or landscape)"),
        }
    }
}

/// Preset resolutions, ordered from tallest to widest.
pub const RESOLUTIONS: [Dimensions; 7] = [
    Dimensions::new(768, 1344),
    Dimensions::new(832, 1216),
    Dimensions::new(896, 1152),
    Dimensions::new(1024, 1024),
    Dimensions::new(1152, 896),
    Dimensions::new(1216, 832),
    Dimensions::new(1344, 768),
];

/// A LoRA adapter applied during generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lora {
    /// URL or provider path of the adapter weights.
    pub path: String,
    /// Adapter weight, 0.0 to 2.0.
    pub scale: f32,
}

impl Lora {
    pub fn new(path: impl Into<String>, scale: f32) -> Self {
        Self { path: path.into(), scale }
    }

    /// Reject an empty path or a scale outside 0.0 to 2.0.
    pub fn validate(&self) -> Result<()> {
        if self.path.trim().is_empty() {
            anyhow::bail!("LoRA path is empty");
        }
        if !(0.0..=2.0).contains(&self.scale) {
            anyhow::bail!("LoRA scale {} out of range (0.0 to 2.0) for {}", self.scale, self.path);
        }
        Ok(())
    }
}

/// A LoRA adapter offered as a ready-made choice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoraPreset {
    pub label: &'static str,
    pub path: &'static str,
}

impl LoraPreset {
    /// The preset at full strength.
    pub fn to_lora(&self) -> Lora {
        Lora::new(self.path, 1.0)
    }
}

/// Known adapters. The first one is applied by default.
pub const PRESET_LORAS: &[LoraPreset] = &[LoraPreset {
    label: "AndroFlux v19",
    path: "https://huggingface.co/markury/AndroFlux/resolve/main/AndroFlux-v19.safetensors",
}];

/// Adapters used when neither the config file nor the command line names any.
pub fn default_loras() -> Vec<Lora> {
    PRESET_LORAS.iter().take(1).map(LoraPreset::to_lora).collect()
}

impl FromStr for Lora {
    type Err = anyhow::Error;

    /// Parse `"PATH"` or `"PATH:SCALE"`.
    ///
    /// Only a numeric suffix after the last `:` is taken as the scale, so
    /// `https://...` URLs without a scale parse as plain paths.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (path, scale) = match s.rsplit_once(':') {
            Some((path, scale)) => match scale.parse::<f32>() {
                Ok(scale) => (path, scale),
                Err(_) => (s, 1.0),
            },
            None => (s, 1.0),
        };
        let lora = Self::new(path, scale);
        lora.validate()?;
        Ok(lora)
    }
}

/// Everything sent to the image generator for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub prompt: String,
    pub seed: u64,
    pub dimensions: Dimensions,
    pub loras: Vec<Lora>,
    /// Provider model identifier, recorded in the embedded metadata.
    pub model: String,
    pub num_images: u32,
}

impl GenerationParams {
    /// Reject requests the provider would refuse or that make no sense.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            anyhow::bail!("Please enter a prompt before generating an image.");
        }
        if self.seed > MAX_SEED {
            anyhow::bail!("Seed {} out of range (0 to {MAX_SEED})", self.seed);
        }
        if self.num_images == 0 {
            anyhow::bail!("num_images must be at least 1");
        }
        for lora in &self.loras {
            lora.validate()?;
        }
        Ok(())
    }
}

/// A fresh random seed in `0..=MAX_SEED`.
pub fn random_seed() -> u64 {
    rand::thread_rng().gen_range(0..=MAX_SEED)
}

/// Build the human-readable description embedded as the `parameters` text chunk.
///
/// One field group per line, no escaping:
///
/// ```text
/// <prompt>
/// Seed: 42, Size: 1024x1024, Model: fal-ai/flux-general
/// LoRAs: https://example.com/a.safetensors (1), other (0.5)
/// ```
///
/// The LoRA line is omitted when no adapters are used.
pub fn metadata_text(params: &GenerationParams) -> String {
    let mut text = format!(
        "{}\nSeed: {}, Size: {}, Model: {}",
        params.prompt, params.seed, params.dimensions, params.model
    );
    if !params.loras.is_empty() {
        let loras: Vec<String> = params
            .loras
            .iter()
            .map(|l| format!("{} ({})", l.path, l.scale))
            .collect();
        text.push_str("\nLoRAs: ");
        text.push_str(&loras.join(", "));
    }
    text
}
