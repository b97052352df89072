use base64::Engine;
use std::fmt;
use std::path::{Path, PathBuf};

/// Truncate `text` to at most roughly `max_chars` bytes, keeping a prefix
/// and a suffix of the original around an elision marker. Inputs within the
/// limit pass through untouched. Cuts never land inside a UTF-8 code point.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }

    let keep = max_chars / 2;
    let mut head_end = keep;
    while !text.is_char_boundary(head_end) {
        head_end -= 1;
    }
    let mut tail_start = text.len() - keep;
    while !text.is_char_boundary(tail_start) {
        tail_start += 1;
    }

    let elided = tail_start - head_end;
    format!(
        "{}\n... [{} chars truncated] ...\n{}",
        &text[..head_end],
        elided,
        &text[tail_start..]
    )
}

/// Line-count variant for command output: keep the first and last lines,
/// eliding the middle.
pub fn truncate_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= max_lines {
        return text.to_string();
    }

    let keep = max_lines / 2;
    let elided = lines.len() - keep * 2;
    let mut out = lines[..keep].join("\n");
    out.push_str(&format!("\n... [{} lines truncated] ...\n", elided));
    out.push_str(&lines[lines.len() - keep..].join("\n"));
    out
}

#[derive(Debug)]
pub enum ArtifactError {
    Decode(String),
    Io(std::io::Error),
}

impl fmt::Display for ArtifactError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactError::Decode(msg) => write!(f, "Invalid image data: {}", msg),
            ArtifactError::Io(e) => write!(f, "Failed to save artifact: {}", e),
        }
    }
}

impl std::error::Error for ArtifactError {}

impl From<std::io::Error> for ArtifactError {
    fn from(e: std::io::Error) -> Self {
        ArtifactError::Io(e)
    }
}

/// Decode a base64 PNG payload and write it under `dir` with a unique
/// timestamped name. Returns the path written.
pub fn save_png(dir: &Path, base64_png: &str) -> Result<PathBuf, ArtifactError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(base64_png.trim())
        .map_err(|e| ArtifactError::Decode(e.to_string()))?;

    std::fs::create_dir_all(dir)?;

    let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    let short_id = &uuid::Uuid::new_v4().to_string()[..8];
    let path = dir.join(format!("chart-{}-{}.png", stamp, short_id));
    std::fs::write(&path, bytes)?;
    Ok(path)
}
