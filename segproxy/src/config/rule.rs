use crate::config::{ConfigError, FileError, ProxySettings};
use crate::dispatch::{Dispatching, DispatchingBuilder};

const INLINE_ORIGIN: &str = "inline";

fn is_rule_line(line: &str) -> bool {
    !line.is_empty() && !line.starts_with('#')
}

/// Rule files in order, then inline rules; comments and blank lines are skipped.
pub fn load_dispatching(settings: &ProxySettings) -> Result<Dispatching, ConfigError> {
    let mut builder = DispatchingBuilder::new();
    builder.set_default(settings.default_segmentation);
    for path in &settings.rules_files {
        let origin = path.to_string_lossy().to_string();
        let content =
            std::fs::read_to_string(path).map_err(|e| FileError::Io(origin.clone(), e))?;
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if is_rule_line(line) {
                builder.add_rule_line(&origin, idx + 1, line)?;
            }
        }
    }
    for (idx, line) in settings.inline_rules.iter().enumerate() {
        let line = line.trim();
        if is_rule_line(line) {
            builder.add_rule_line(INLINE_ORIGIN, idx + 1, line)?;
        }
    }
    Ok(builder.build())
}
