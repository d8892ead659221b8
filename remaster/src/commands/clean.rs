use std::path::Path;

use anyhow::{Context, Result};
use remaster_core::{
    EncodeSettings,
    coordinator::remove_intermediates,
    settings::FragmentName,
    util::retry::remove_file_with_retry,
};
use tracing::info;

pub fn clean_handler(settings_path: &Path) -> Result<()> {
    let settings = EncodeSettings::load(settings_path)?;

    let fragments = std::fs::read_dir(&settings.temp_directory)
        .with_context(|| format!("Failed to list {}", settings.temp_directory.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| settings.parse_fragment_name(name) != FragmentName::Foreign)
        })
        .collect::<Vec<_>>();

    remove_intermediates(&settings, &fragments);
    remove_file_with_retry(settings_path)
        .with_context(|| format!("Failed to remove {}", settings_path.display()))?;
    info!(
        "Removed {} fragments and the settings of job {}",
        fragments.len(),
        settings.job_index
    );

    Ok(())
}
