use anyhow::{Context, Result};
use reqwest::Client;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::ai::{self, ImageGenerator};
use crate::params::{self, GenerationParams};
use crate::png::{self, PARAMETERS_KEYWORD, TextChunk};

/// The result of one `generate` run.
///
/// # Example
///
/// ```rust,no_run
/// # use flux_forge::pipeline::{generate_images, GenerateResult};
/// # use flux_forge::ai::FalService;
/// # use flux_forge::config::Config;
/// # use flux_forge::params::GenerationParams;
/// # async fn example(params: GenerationParams) -> anyhow::Result<()> {
/// let config = Config::default();
/// let service = FalService::new(config.providers.fal.clone());
/// let client = reqwest::Client::new();
///
/// let result = generate_images(&service, &client, &params, "out".as_ref(), false).await?;
/// for file in &result.files {
///     println!("Wrote {}", file.display());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct GenerateResult {
    /// Seed the image was generated with (as reported by the provider when available).
    pub seed: u64,
    /// Files written (or that would be written, in dry-run mode).
    pub files: Vec<PathBuf>,
    /// The text embedded as the `parameters` chunk.
    pub metadata: String,
    /// Images whose metadata could not be embedded and were kept as-is.
    pub unembedded: usize,
    /// Images that could not be fetched or written: (0-based index, error).
    pub failed: Vec<(usize, String)>,
}

/// Make sure `bytes` is a PNG, re-encoding other image formats in memory.
pub fn ensure_png(bytes: &[u8]) -> Result<Vec<u8>> {
    if png::is_png(bytes) {
        return Ok(bytes.to_vec());
    }

    let img = image::load_from_memory(bytes).context("Provider returned an undecodable image")?;
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .context("Failed to re-encode image as PNG")?;
    log::debug!("Re-encoded {}-byte image as PNG", bytes.len());
    Ok(out.into_inner())
}

/// Convert to PNG and embed the generation parameters.
///
/// Returns the PNG and whether the metadata made it in. Embedding failures
/// (or an undecodable image) leave the original bytes untouched.
pub fn wrap_image(bytes: &[u8], metadata: &str) -> (Vec<u8>, bool) {
    let png_bytes = match ensure_png(bytes) {
        Ok(b) => b,
        Err(e) => {
            log::warn!("Keeping image without metadata: {e:#}");
            return (bytes.to_vec(), false);
        }
    };

    let tagged = png::embed_or_original(&png_bytes, PARAMETERS_KEYWORD, metadata);
    // A successful insert always adds at least 14 bytes
    let embedded = tagged.len() > png_bytes.len();
    (tagged, embedded)
}

/// File name for the `index`-th (0-based) of `total` images generated with `seed`.
pub fn output_file_name(seed: u64, index: usize, total: usize) -> String {
    if total <= 1 {
        format!("flux-{seed}.png")
    } else {
        format!("flux-{seed}-{}.png", index + 1)
    }
}

/// Run one generation request end to end.
///
/// 1. **Generate**: submits `params` to the image generator
/// 2. **Fetch**: downloads every returned image
/// 3. **Embed**: converts to PNG and embeds a `parameters` text chunk
/// 4. **Write**: saves the PNGs into `out_dir` (skipped when `dry_run`)
///
/// An image that cannot be fetched or written is recorded in
/// [`GenerateResult::failed`] and the rest are still saved. The call fails
/// only when no image could be saved.
pub async fn generate_images(
    generator: &dyn ImageGenerator,
    client: &Client,
    params: &GenerationParams,
    out_dir: &Path,
    dry_run: bool,
) -> Result<GenerateResult> {
    params.validate()?;

    log::info!("Generating with {} (seed {}, {})", generator.name(), params.seed, params.dimensions);
    let output = generator.generate(params).await?;

    let seed = match output.seed {
        Some(s) if s != params.seed => {
            log::debug!("Provider reported seed {s} (requested {})", params.seed);
            s
        }
        _ => params.seed,
    };
    let effective = GenerationParams { seed, ..params.clone() };
    let metadata = params::metadata_text(&effective);

    if !dry_run {
        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;
    }

    let total = output.images.len();
    let mut files = Vec::with_capacity(total);
    let mut unembedded = 0;
    let mut failed = Vec::new();

    for (i, generated) in output.images.iter().enumerate() {
        let path = out_dir.join(output_file_name(seed, i, total));
        match save_image(client, &generated.url, &metadata, &path, dry_run).await {
            Ok(embedded) => {
                if !embedded {
                    unembedded += 1;
                }
                files.push(path);
            }
            Err(e) => {
                log::error!("  Image {} of {total} failed: {e:#}", i + 1);
                failed.push((i, format!("{e:#}")));
            }
        }
    }

    if files.is_empty() {
        if let Some((_, first)) = failed.first() {
            anyhow::bail!("All {total} image(s) failed; first error: {first}");
        }
    }

    Ok(GenerateResult {
        seed,
        files,
        metadata,
        unembedded,
        failed,
    })
}

/// Fetch one generated image, embed `metadata` and write it to `path`.
///
/// Returns whether the metadata was embedded.
async fn save_image(
    client: &Client,
    url: &str,
    metadata: &str,
    path: &Path,
    dry_run: bool,
) -> Result<bool> {
    let bytes = ai::fetch_bytes(client, url).await?;
    let (wrapped, embedded) = wrap_image(&bytes, metadata);

    if dry_run {
        log::info!("  Would write {} ({} bytes)", path.display(), wrapped.len());
    } else {
        std::fs::write(path, &wrapped)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        log::info!("  Wrote {}", path.display());
    }
    Ok(embedded)
}

/// Embed a `tEXt` chunk into a PNG file on disk.
///
/// Writes to `output` when given, otherwise modifies `path` in place (after a
/// `.bak` copy when `backup` is set). Returns the path written. Unlike
/// [`generate_images`], failures here are errors: the user asked for exactly this.
pub fn embed_file(
    path: &Path,
    keyword: &str,
    value: &str,
    output: Option<&Path>,
    backup: bool,
) -> Result<PathBuf> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let tagged = png::inject_text_chunk(&bytes, keyword, value)
        .with_context(|| format!("Cannot embed metadata into {}", path.display()))?;

    let target = match output {
        Some(out) => out.to_path_buf(),
        None => {
            if backup {
                backup_file(path)?;
            }
            path.to_path_buf()
        }
    };

    std::fs::write(&target, tagged)
        .with_context(|| format!("Failed to write {}", target.display()))?;
    Ok(target)
}

/// Read the `tEXt` chunks of a PNG file on disk.
pub fn inspect_file(path: &Path) -> Result<Vec<TextChunk>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    png::read_text_chunks(&bytes).with_context(|| format!("Cannot read PNG chunks of {}", path.display()))
}

/// Copy `path` to `<path>.<ext>.bak` before it is modified in place.
///
/// An existing backup is left alone, so repeated embeds keep the file as it
/// was before the first one.
fn backup_file(path: &Path) -> Result<PathBuf> {
    let backup_path = path.with_extension(format!(
        "{}.bak",
        path.extension().unwrap_or_default().to_string_lossy()
    ));

    if backup_path.exists() {
        log::debug!("Keeping existing backup {}", backup_path.display());
    } else {
        std::fs::copy(path, &backup_path)
            .with_context(|| format!("Failed to back up {} before embedding", path.display()))?;
        log::info!("Backup created: {}", backup_path.display());
    }

    Ok(backup_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{GeneratedImage, GenerationOutput};
    use crate::params::Dimensions;
    use crate::png::test_support::solid_png;
    use std::fs;
    use tempfile::TempDir;

    fn params() -> GenerationParams {
        GenerationParams {
            prompt: "a red square".into(),
            seed: 42,
            dimensions: Dimensions::new(8, 8),
            loras: Vec::new(),
            model: "test".into(),
            num_images: 1,
        }
    }

    fn data_url(bytes: &[u8]) -> String {
        let b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes);
        format!("data:image/png;base64,{b64}")
    }

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([10, 200, 30]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    /// Generator that returns canned images without touching the network.
    struct StubGenerator {
        urls: Vec<String>,
        seed: Option<u64>,
    }

    #[async_trait::async_trait]
    impl ImageGenerator for StubGenerator {
        fn name(&self) -> &str {
            "stub"
        }

        async fn generate(&self, _params: &GenerationParams) -> Result<GenerationOutput> {
            Ok(GenerationOutput {
                images: self
                    .urls
                    .iter()
                    .map(|url| GeneratedImage {
                        url: url.clone(),
                        width: None,
                        height: None,
                        content_type: None,
                    })
                    .collect(),
                seed: self.seed,
            })
        }
    }

    // ── ensure_png ───────────────────────────────────────────────────

    #[test]
    fn ensure_png_passthrough() {
        let input = solid_png(4, 4, [1, 2, 3]);
        assert_eq!(ensure_png(&input).unwrap(), input);
    }

    #[test]
    fn ensure_png_converts_jpeg() {
        let out = ensure_png(&jpeg(16, 8)).unwrap();
        assert!(png::is_png(&out));
        let img = image::load_from_memory(&out).unwrap();
        assert_eq!((img.width(), img.height()), (16, 8));
    }

    #[test]
    fn ensure_png_rejects_garbage() {
        assert!(ensure_png(b"not an image").is_err());
    }

    // ── wrap_image ───────────────────────────────────────────────────

    #[test]
    fn wrap_image_embeds_parameters() {
        let (out, embedded) = wrap_image(&solid_png(4, 4, [0, 0, 0]), "prompt\nSeed: 1");
        assert!(embedded);
        let chunks = png::read_text_chunks(&out).unwrap();
        assert_eq!(chunks[0].keyword, PARAMETERS_KEYWORD);
        assert_eq!(chunks[0].value, "prompt\nSeed: 1");
    }

    #[test]
    fn wrap_image_jpeg_becomes_tagged_png() {
        let (out, embedded) = wrap_image(&jpeg(8, 8), "meta");
        assert!(embedded);
        assert_eq!(png::read_text_chunks(&out).unwrap()[0].value, "meta");
    }

    #[test]
    fn wrap_image_keeps_undecodable_bytes() {
        let garbage = b"neither png nor anything else".to_vec();
        let (out, embedded) = wrap_image(&garbage, "meta");
        assert!(!embedded);
        assert_eq!(out, garbage);
    }

    // ── output_file_name ─────────────────────────────────────────────

    #[test]
    fn file_names() {
        assert_eq!(output_file_name(42, 0, 1), "flux-42.png");
        assert_eq!(output_file_name(42, 0, 3), "flux-42-1.png");
        assert_eq!(output_file_name(42, 2, 3), "flux-42-3.png");
    }

    // ── generate_images ──────────────────────────────────────────────

    #[tokio::test]
    async fn generate_writes_tagged_pngs() {
        let dir = TempDir::new().unwrap();
        let url = data_url(&solid_png(8, 8, [255, 0, 0]));
        let stub = StubGenerator { urls: vec![url.clone(), url], seed: None };

        let result = generate_images(&stub, &Client::new(), &params(), dir.path(), false)
            .await
            .unwrap();

        assert_eq!(result.seed, 42);
        assert_eq!(result.unembedded, 0);
        assert!(result.failed.is_empty());
        assert_eq!(result.files.len(), 2);
        assert_eq!(result.metadata, "a red square\nSeed: 42, Size: 8x8, Model: test");
        for file in &result.files {
            let chunks = inspect_file(file).unwrap();
            assert_eq!(chunks.len(), 1);
            assert_eq!(chunks[0].value, result.metadata);
        }
        assert!(dir.path().join("flux-42-2.png").exists());
    }

    #[tokio::test]
    async fn generate_uses_reported_seed() {
        let dir = TempDir::new().unwrap();
        let stub = StubGenerator {
            urls: vec![data_url(&solid_png(4, 4, [0, 0, 0]))],
            seed: Some(777),
        };

        let result = generate_images(&stub, &Client::new(), &params(), dir.path(), false)
            .await
            .unwrap();

        assert_eq!(result.seed, 777);
        assert!(result.metadata.contains("Seed: 777"));
        assert_eq!(result.files, vec![dir.path().join("flux-777.png")]);
    }

    #[tokio::test]
    async fn generate_dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let out_dir = dir.path().join("out");
        let stub = StubGenerator {
            urls: vec![data_url(&solid_png(4, 4, [0, 0, 0]))],
            seed: None,
        };

        let result = generate_images(&stub, &Client::new(), &params(), &out_dir, true)
            .await
            .unwrap();

        assert_eq!(result.files.len(), 1);
        assert!(!out_dir.exists());
    }

    #[tokio::test]
    async fn generate_keeps_image_when_embed_fails() {
        let dir = TempDir::new().unwrap();
        let stub = StubGenerator {
            urls: vec![data_url(b"opaque provider payload")],
            seed: None,
        };

        let result = generate_images(&stub, &Client::new(), &params(), dir.path(), false)
            .await
            .unwrap();

        assert_eq!(result.unembedded, 1);
        assert_eq!(fs::read(&result.files[0]).unwrap(), b"opaque provider payload");
    }

    #[tokio::test]
    async fn generate_keeps_going_past_failed_fetch() {
        let dir = TempDir::new().unwrap();
        let stub = StubGenerator {
            urls: vec![
                data_url(&solid_png(4, 4, [0, 0, 0])),
                "data:image/png;base64,@@@".into(),
                data_url(&solid_png(4, 4, [9, 9, 9])),
            ],
            seed: None,
        };
        let mut p = params();
        p.num_images = 3;

        let result = generate_images(&stub, &Client::new(), &p, dir.path(), false)
            .await
            .unwrap();

        assert_eq!(
            result.files,
            vec![dir.path().join("flux-42-1.png"), dir.path().join("flux-42-3.png")]
        );
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].0, 1);
        assert!(result.failed[0].1.contains("base64"));
        assert!(!dir.path().join("flux-42-2.png").exists());
        for file in &result.files {
            assert_eq!(inspect_file(file).unwrap()[0].value, result.metadata);
        }
    }

    #[tokio::test]
    async fn generate_fails_when_every_fetch_fails() {
        let dir = TempDir::new().unwrap();
        let stub = StubGenerator {
            urls: vec!["data:image/png;base64,@@@".into(), "data:text/plain,hi".into()],
            seed: None,
        };

        let err = generate_images(&stub, &Client::new(), &params(), dir.path(), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("All 2 image(s) failed"));
    }

    #[test]
    fn backup_keeps_first_original() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("image.png");
        let original = solid_png(4, 4, [0, 0, 0]);
        fs::write(&path, &original).unwrap();

        embed_file(&path, "Comment", "one", None, true).unwrap();
        embed_file(&path, "Comment", "two", None, true).unwrap();

        assert_eq!(fs::read(dir.path().join("image.png.bak")).unwrap(), original);
        assert_eq!(inspect_file(&path).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn generate_rejects_invalid_params() {
        let dir = TempDir::new().unwrap();
        let stub = StubGenerator { urls: Vec::new(), seed: None };
        let mut p = params();
        p.prompt.clear();
        assert!(generate_images(&stub, &Client::new(), &p, dir.path(), false).await.is_err());
    }

    // ── embed_file / inspect_file ────────────────────────────────────

    #[test]
    fn embed_file_in_place_with_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("image.png");
        let original = solid_png(4, 4, [0, 0, 0]);
        fs::write(&path, &original).unwrap();

        let written = embed_file(&path, "Comment", "hello", None, true).unwrap();
        assert_eq!(written, path);
        assert_eq!(fs::read(dir.path().join("image.png.bak")).unwrap(), original);
        assert_eq!(inspect_file(&path).unwrap()[0].value, "hello");
    }

    #[test]
    fn embed_file_to_output_leaves_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in.png");
        let out = dir.path().join("out.png");
        let original = solid_png(4, 4, [0, 0, 0]);
        fs::write(&path, &original).unwrap();

        embed_file(&path, "Comment", "x", Some(&out), true).unwrap();
        assert_eq!(fs::read(&path).unwrap(), original);
        assert!(!dir.path().join("in.png.bak").exists());
        assert_eq!(inspect_file(&out).unwrap().len(), 1);
    }

    #[test]
    fn embed_file_rejects_non_png() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fake.png");
        fs::write(&path, b"fake").unwrap();

        let err = embed_file(&path, "Comment", "x", None, false).unwrap_err();
        assert!(format!("{err:#}").contains("malformed PNG input"));
        assert_eq!(fs::read(&path).unwrap(), b"fake");
    }

    #[test]
    fn inspect_missing_file_errors() {
        assert!(inspect_file(Path::new("/nonexistent/image.png")).is_err());
    }
}
