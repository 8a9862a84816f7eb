//! Small standalone checks: `check-name` and `score`.

use anyhow::{Context, Result, bail};
use std::io::Read;
use std::path::Path;

pub fn cmd_check_name(name: &str) -> Result<()> {
    conductor::workflow_name::validate(name)?;
    println!("'{}' is a valid workflow name", name);
    Ok(())
}

pub fn cmd_score(file: &Path, minimum: Option<f32>) -> Result<()> {
    use conductor::quality::extract_score;

    let text = if file == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        text
    } else {
        let bytes = std::fs::read(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        String::from_utf8_lossy(&bytes).into_owned()
    };

    let score = extract_score(&text);
    println!("{}", score);

    match (score.value(), minimum) {
        (None, _) => bail!("No score found in {}", file.display()),
        (Some(value), Some(minimum)) if value < minimum => {
            bail!("Score {}/10 is below the minimum of {}", value, minimum)
        }
        _ => Ok(()),
    }
}
