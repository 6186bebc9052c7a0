use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use tilemapc::border;
use tilemapc::spawn;
use tilemapc::tilemap::{Decoder, Encoder};

#[derive(Parser)]
#[command(name = "tilemapc", version, about, next_line_help(false))]
struct Cli {
    /// The .tmx map to convert. The .tilemap file is written next to it.
    #[arg(index = 1)]
    input: PathBuf,

    /// Log everything, including the full border listing.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(&cli) {
        error!("{err:#}");
        std::process::exit(1);
    }
    info!("Success");
}

fn run(cli: &Cli) -> Result<()> {
    let target = target_file_path(&cli.input);

    let file = File::open(&cli.input)
        .with_context(|| format!("failed to read source file {:?}", cli.input))?;
    let tilemap = Decoder::new(file)
        .decode()
        .with_context(|| format!("failed to load source file {:?}", cli.input))?;

    info!("input data:\n{tilemap}");

    let (tilemap, spawns) = spawn::extract(tilemap)?;
    let borders = border::compute(&tilemap)?;

    info!("number of resource points: {}", spawns.resources.len());
    for (i, resource) in spawns.resources.iter().enumerate() {
        info!(
            "\t{i:2}: {:3} x{:3}",
            resource.position.x, resource.position.y
        );
    }
    info!("number of water drop sources: {}", spawns.waterdrops.len());
    info!("number of players: {}", spawns.players.len());
    for (i, player) in spawns.players.iter().enumerate() {
        info!(
            "\tplayer {i}: {} buildings, {} units",
            player.buildings.len(),
            player.units.len()
        );
    }
    info!(
        "number of borders (left, right, up, down): {}, {}, {}, {}",
        borders.left.len(),
        borders.right.len(),
        borders.up.len(),
        borders.down.len()
    );
    debug!("{borders}");

    info!("writing to {target:?}");
    if let Err(err) = fs::remove_file(&target) {
        if err.kind() != std::io::ErrorKind::NotFound {
            return Err(err).with_context(|| format!("failed to remove existing file {target:?}"));
        }
    }

    let output = OutputFile::create(&target)?;
    Encoder::new(output.file())
        .encode(&tilemap, &spawns, &borders)
        .with_context(|| format!("failed to write output file {target:?}"))?;
    output.commit();

    Ok(())
}

/// Derives the output path: the input's final extension replaced by
/// `.tilemap`, in the same directory.
fn target_file_path(source: &Path) -> PathBuf {
    source.with_extension("tilemap")
}

/// A created output file that is deleted again unless the write is
/// committed. Keeps partial files from surviving an encoding error.
struct OutputFile {
    path: PathBuf,
    file: Option<File>,
}

impl OutputFile {
    fn create(path: &Path) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("failed to create output file {path:?}"))?;
        Ok(OutputFile {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    fn file(&self) -> &File {
        self.file.as_ref().expect("file is present until commit")
    }

    fn commit(mut self) {
        self.file.take();
    }
}

impl Drop for OutputFile {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_file_path() {
        assert_eq!(
            target_file_path(Path::new("maps/arena.tmx")),
            PathBuf::from("maps/arena.tilemap")
        );
        assert_eq!(
            target_file_path(Path::new("arena")),
            PathBuf::from("arena.tilemap")
        );
    }
}
