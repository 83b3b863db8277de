//! # flux-forge
//!
//! Generate images with hosted FLUX models (fal.ai), optionally enhance prompts with a hosted
//! chat model (Groq), and embed the generation parameters into each PNG as a `tEXt` chunk.
//!
//! ## Quick Start
//!
//! The pipeline module handles the full generate → fetch → embed → write flow:
//!
//! ```rust,no_run
//! use flux_forge::ai::FalService;
//! use flux_forge::config::Config;
//! use flux_forge::params::{random_seed, GenerationParams};
//! use flux_forge::pipeline::generate_images;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Load config from file (contains API keys, defaults, etc.)
//!     let mut config = Config::load(Some("config.json".as_ref()))?;
//!     config.apply_env();
//!
//!     let params = GenerationParams {
//!         prompt: "a lighthouse at dusk, volumetric light".into(),
//!         seed: random_seed(),
//!         dimensions: config.defaults.dimensions,
//!         loras: config.defaults.loras.clone(),
//!         model: config.providers.fal.model.clone(),
//!         num_images: 1,
//!     };
//!
//!     let service = FalService::new(config.providers.fal.clone());
//!     let client = reqwest::Client::new();
//!     let result = generate_images(&service, &client, &params, "out".as_ref(), false).await?;
//!
//!     for file in &result.files {
//!         println!("Wrote {}", file.display());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Lower-Level Usage
//!
//! The PNG writer works on any in-memory PNG:
//!
//! ```rust,no_run
//! use flux_forge::png::{inject_text_chunk, read_text_chunks, PARAMETERS_KEYWORD};
//!
//! fn main() -> anyhow::Result<()> {
//!     let bytes = std::fs::read("image.png")?;
//!     let tagged = inject_text_chunk(&bytes, PARAMETERS_KEYWORD, "a red square\nSeed: 42")?;
//!
//!     for chunk in read_text_chunks(&tagged)? {
//!         println!("{}: {}", chunk.keyword, chunk.value);
//!     }
//!     std::fs::write("image.png", tagged)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`ai`]: Image generation and prompt enhancement services (fal, Groq)
//! - [`config`]: Configuration types and loading/saving
//! - [`params`]: Generation parameters, preset sizes and the embedded metadata text
//! - [`pipeline`]: End-to-end generation and file-level embed/inspect
//! - [`png`]: `tEXt` chunk injection and reading

pub mod ai;
pub mod config;
pub mod params;
pub mod pipeline;
pub mod png;
