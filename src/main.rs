use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use phi_info::apk::{GLOBAL_GAME_MANAGERS_ASSETS, LEVEL0};
use phi_info::catalog::{self, GameInformation};
use phi_info::typetree::Schema;
use phi_info::{Environment, apk};
use tracing::info;
use tracing_subscriber::EnvFilter;

const GAME_INFORMATION: &str = "GameInformation";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("phi_info=info".parse()?),
        )
        .init();

    let mut args = std::env::args_os().skip(1);
    let apk_path = args
        .next()
        .map(PathBuf::from)
        .context("usage: phi-info <apk> [typetree.json] [output.csv]")?;
    let typetree_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("resources/typetree.json"));
    let out_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("output.csv"));

    let schema = Schema::from_file_entry(&typetree_path, GAME_INFORMATION)?;

    let file = File::open(&apk_path)
        .with_context(|| format!("could not open apk '{}'", apk_path.display()))?;
    let mmap = unsafe { memmap2::Mmap::map(&file)? };
    info!("reading asset members from '{}'", apk_path.display());
    let members = apk::read_asset_members(&mmap, &[GLOBAL_GAME_MANAGERS_ASSETS, LEVEL0])?;
    drop(mmap);

    let env = Environment::open(members)?;
    let behaviour = env.find_behaviour(GAME_INFORMATION)?;
    info!("found {GAME_INFORMATION} at path id {}", behaviour.path_id());

    let decoded = behaviour.decode(&schema)?;
    let info = GameInformation::from_value(decoded)?;
    let rows = catalog::transform(&info);
    info!("catalog has {} songs", rows.len());

    let csv = catalog::write_csv(&rows)?;
    std::fs::write(&out_path, csv)
        .with_context(|| format!("could not write '{}'", out_path.display()))?;
    info!("wrote '{}'", out_path.display());

    Ok(())
}
