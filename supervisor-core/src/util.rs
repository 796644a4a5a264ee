use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::Result;

/// Renders a `{{var}}` template. Unknown placeholders are left untouched;
/// no conditionals or loops.
pub fn render(template: &str, context: &HashMap<&str, String>) -> String {
    let mut rendered = template.to_string();
    for (key, value) in context {
        rendered = rendered.replace(&format!("{{{{{key}}}}}"), value);
        rendered = rendered.replace(&format!("{{{{ {key} }}}}"), value);
    }
    rendered
}

/// True when the file exists and one of its lines equals `line` after trim.
pub fn file_contains_line(path: impl AsRef<Path>, line: &str) -> bool {
    let Ok(content) = fs::read_to_string(path) else {
        return false;
    };
    content.lines().any(|l| l.trim() == line.trim())
}

/// True when `lines` appear in the file in order, allowing blank lines in
/// between but nothing else.
pub fn file_contains_sequence(path: impl AsRef<Path>, lines: &[&str]) -> bool {
    let Ok(content) = fs::read_to_string(path) else {
        return false;
    };
    let file_lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    file_lines
        .windows(lines.len())
        .any(|window| window.iter().zip(lines).all(|(got, want)| got == &want.trim()))
}

/// True when the file's non-empty trimmed lines are exactly `lines` as a set.
pub fn file_matches_lines(path: impl AsRef<Path>, lines: &[String]) -> bool {
    let Ok(content) = fs::read_to_string(path) else {
        return false;
    };
    let file_lines: std::collections::HashSet<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let expected: std::collections::HashSet<&str> = lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();
    file_lines == expected
}

/// Creates (or truncates) the file with `content`, creating parent directories.
pub fn create_file(path: impl AsRef<Path>, content: &str) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

pub fn append_line(path: impl AsRef<Path>, line: &str) -> Result<()> {
    use std::io::Write;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{line}")?;
    Ok(())
}

/// Removes the file or symlink if it exists.
pub fn delete_file(path: impl AsRef<Path>) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

pub fn replace_in_file(path: impl AsRef<Path>, from: &str, to: &str) -> Result<()> {
    let content = fs::read_to_string(&path)?;
    fs::write(path, content.replace(from, to))?;
    Ok(())
}
