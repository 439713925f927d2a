//! Big random mosaic generator, used to stress the canvas with large images.
//!
//! Random tiles are downloaded once, then merged four at a time with `vips` into tiles
//! twice as wide, level after level, until a single image covers the whole canvas.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    fs::FsHandler,
    process::{CommandRunner, ToolCommand},
};

/// Configuration for the mosaic generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MosaicConfig {
    /// Scratch directory for downloaded and generated tiles.
    pub scratch_dir: PathBuf,
    /// Number of random source tiles.
    pub image_count: usize,
    /// Source tiles are `tile_unit * bootstrap` pixels wide.
    pub tile_unit: u32,
    /// Width in pixels the final image targets.
    pub canvas_size: u32,
    pub default_bootstrap: u32,
    pub picsum_url: String,
    pub vips: String,
}

impl Default for MosaicConfig {
    fn default() -> Self {
        Self {
            scratch_dir: PathBuf::from("/tmp/image_gen_scratch"),
            image_count: 100,
            tile_unit: 24,
            canvas_size: 2048,
            default_bootstrap: 8,
            picsum_url: "https://picsum.photos".to_string(),
            vips: "vips".to_string(),
        }
    }
}

/// One merge pass: `tiles` outputs, each made of four inputs `tile_dim` pixels wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MosaicLevel {
    pub tiles: u32,
    pub tile_dim: u32,
}

/// Merge passes for a bootstrap factor, from the first pass down to the single last tile.
pub fn plan_levels(config: &MosaicConfig, bootstrap: u32) -> Result<Vec<MosaicLevel>> {
    if bootstrap == 0 {
        anyhow::bail!("Bootstrap factor must be at least 1");
    }

    let mut levels = Vec::new();
    let mut tiles = config.canvas_size / bootstrap / 2;
    let mut tile_dim = config.tile_unit * bootstrap;
    while tiles >= 1 {
        levels.push(MosaicLevel { tiles, tile_dim });
        tiles /= 2;
        tile_dim *= 2;
    }

    if levels.is_empty() {
        anyhow::bail!(
            "Bootstrap factor {bootstrap} leaves nothing to merge on a {} pixel canvas",
            config.canvas_size
        );
    }
    Ok(levels)
}

/// The three merges assembling `[tl tr / bl br]` into `out`.
fn merge_commands(
    vips: &str,
    [tl, tr, bl, br]: [&Path; 4],
    top: &Path,
    bot: &Path,
    out: &Path,
    dim: u32,
) -> [ToolCommand; 3] {
    let horizontal = |left: &Path, right: &Path, dest: &Path| {
        ToolCommand::new(vips)
            .arg("merge")
            .path_arg(left)
            .path_arg(right)
            .path_arg(dest)
            .args(["horizontal", "--", &format!("-{dim}"), "0"])
    };

    [
        horizontal(bl, br, bot),
        horizontal(tl, tr, top),
        ToolCommand::new(vips)
            .arg("merge")
            .path_arg(bot)
            .path_arg(top)
            .path_arg(out)
            .args(["vertical", "--", "0", &format!("-{dim}")]),
    ]
}

pub struct Mosaic<'a, R> {
    runner: &'a R,
    config: &'a MosaicConfig,
}

impl<'a, R: CommandRunner> Mosaic<'a, R> {
    pub fn new(runner: &'a R, config: &'a MosaicConfig) -> Self {
        Self { runner, config }
    }

    fn source_tile(&self, index: usize) -> PathBuf {
        self.config.scratch_dir.join(format!("random_{index}.jpeg"))
    }

    fn gen_dir(&self) -> PathBuf {
        self.config.scratch_dir.join("gen")
    }

    fn level_tile(&self, tiles: u32, index: u32) -> PathBuf {
        self.gen_dir().join(format!("random_level_{tiles}_{index}.jpeg"))
    }

    /// Generate the mosaic and return the path of the final image.
    pub async fn generate(&self, bootstrap: u32, skip_download: bool) -> Result<PathBuf> {
        let levels = plan_levels(self.config, bootstrap)?;
        FsHandler::create_dir(&self.gen_dir())?;

        if skip_download {
            tracing::info!("Skipping image download, reusing existing tiles");
            if !self.source_tile(0).exists() {
                tracing::warn!(dir = %self.config.scratch_dir.display(), "No source tiles found");
            }
        } else {
            self.download_tiles(self.config.tile_unit * bootstrap).await?;
        }

        let mut previous: Option<u32> = None;
        for level in &levels {
            let started = std::time::Instant::now();
            tracing::info!(tiles = level.tiles, tile_dim = level.tile_dim, "Generating level");

            for index in 0..level.tiles {
                let sources = self.pick_sources(previous);
                let top = self.gen_dir().join(format!("randomtop_{}_{index}.jpeg", level.tiles));
                let bot = self.gen_dir().join(format!("randombot_{}_{index}.jpeg", level.tiles));
                let out = self.level_tile(level.tiles, index);

                for cmd in merge_commands(
                    &self.config.vips,
                    sources.each_ref().map(PathBuf::as_path),
                    &top,
                    &bot,
                    &out,
                    level.tile_dim,
                ) {
                    self.runner.run(&cmd).await?;
                }
            }

            tracing::info!(tiles = level.tiles, elapsed = ?started.elapsed(), "Level complete");
            previous = Some(level.tiles);
        }

        let last = levels.last().context("No merge levels")?;
        Ok(self.level_tile(last.tiles, 0))
    }

    /// Four random inputs, `[tl, tr, bl, br]`, from the previous level or from the source
    /// tiles for the first one.
    fn pick_sources(&self, previous: Option<u32>) -> [PathBuf; 4] {
        let mut rng = rand::rng();
        std::array::from_fn(|_| match previous {
            Some(tiles) => self.level_tile(tiles, rng.random_range(0..tiles)),
            None => self.source_tile(rng.random_range(0..self.config.image_count.max(1))),
        })
    }

    async fn download_tiles(&self, dim: u32) -> Result<()> {
        FsHandler::create_dir(&self.config.scratch_dir)?;
        let client = reqwest::Client::new();
        let url = format!("{}/{dim}/{dim}", self.config.picsum_url.trim_end_matches('/'));

        tracing::info!(count = self.config.image_count, dir = %self.config.scratch_dir.display(), "Downloading random tiles");
        for index in 0..self.config.image_count {
            let bytes = client
                .get(&url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .with_context(|| format!("Failed to fetch {url}"))?
                .bytes()
                .await
                .with_context(|| format!("Failed to read {url}"))?;

            let dest = self.source_tile(index);
            tokio::fs::write(&dest, &bytes)
                .await
                .with_context(|| format!("Failed to write {}", dest.display()))?;
        }
        Ok(())
    }
}
