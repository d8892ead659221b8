use std::{
    fmt::{self, Write},
    path::{Path, PathBuf},
};

use itertools::Itertools;
use tracing::trace;

use crate::{error::ScriptError, util::path::ascii_safe_path};

pub type Dependencies = Vec<Dependency>;
pub type Lines = Vec<Line>;

/// A statement that makes functions available to the rest of the script.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dependency {
    /// `LoadPlugin("path")`
    LoadPlugin(PathBuf),
    /// `Import("path")`
    Import(PathBuf),
    /// `LoadVirtualDubPlugin("path", "name", preroll)`
    LoadVirtualDubPlugin {
        path:    PathBuf,
        name:    String,
        preroll: u32,
    },
}

impl Dependency {
    #[inline]
    pub fn path(&self) -> &Path {
        match self {
            Dependency::LoadPlugin(path) | Dependency::Import(path) => path,
            Dependency::LoadVirtualDubPlugin {
                path, ..
            } => path,
        }
    }

    #[inline]
    pub fn with_path(self, path: PathBuf) -> Self {
        match self {
            Dependency::LoadPlugin(_) => Dependency::LoadPlugin(path),
            Dependency::Import(_) => Dependency::Import(path),
            Dependency::LoadVirtualDubPlugin {
                name,
                preroll,
                ..
            } => Dependency::LoadVirtualDubPlugin {
                path,
                name,
                preroll,
            },
        }
    }

    /// Resolve a relative plugin file name against `directory`. Absolute paths
    /// are kept.
    #[inline]
    pub fn rooted_at(self, directory: &Path) -> Self {
        let path = directory.join(self.path());
        self.with_path(path)
    }

    fn parse(line: &str) -> Option<Self> {
        let (function, arguments) = line.trim().strip_suffix(')')?.split_once('(')?;
        let arguments = split_arguments(arguments);

        match (function.trim(), arguments.as_slice()) {
            ("LoadPlugin", [path]) => Some(Dependency::LoadPlugin(PathBuf::from(unquote(path)?))),
            ("Import", [path]) => Some(Dependency::Import(PathBuf::from(unquote(path)?))),
            ("LoadVirtualDubPlugin", [path, name, preroll]) => {
                Some(Dependency::LoadVirtualDubPlugin {
                    path:    PathBuf::from(unquote(path)?),
                    name:    unquote(name)?.to_owned(),
                    preroll: preroll.trim().parse().ok()?,
                })
            },
            _ => None,
        }
    }
}

impl fmt::Display for Dependency {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::LoadPlugin(path) => write!(f, "LoadPlugin(\"{}\")", path.display()),
            Dependency::Import(path) => write!(f, "Import(\"{}\")", path.display()),
            Dependency::LoadVirtualDubPlugin {
                path,
                name,
                preroll,
            } => write!(
                f,
                "LoadVirtualDubPlugin(\"{}\", \"{}\", {})",
                path.display(),
                name,
                preroll
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Dependency(Dependency),
    /// Will be prefixed with `# `
    Comment(String),
    /// Can be a function call
    ///
    /// example: `Crop(8, 0, -8, -0)`
    Term(String),
    /// Can be a function call and a comment appended
    ///
    /// example: `Trim(0, 299) # segment`
    TermWithComment(String, String),
}

impl Line {
    #[inline]
    pub fn term(term: impl Into<String>) -> Self {
        Line::Term(term.into())
    }

    #[inline]
    pub fn is_dependency(&self) -> bool {
        matches!(self, Line::Dependency(_))
    }

    #[inline]
    pub fn contains(&self, marker: &str) -> bool {
        self.to_string().contains(marker)
    }

    /// Classify one line of script text. Blank lines yield `None`.
    #[inline]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if let Some(comment) = text.strip_prefix('#') {
            return Some(Line::Comment(comment.strip_prefix(' ').unwrap_or(comment).to_owned()));
        }
        if let Some(dependency) = Dependency::parse(text) {
            return Some(Line::Dependency(dependency));
        }

        match find_unquoted(text, " # ") {
            Some(index) => Some(Line::TermWithComment(
                text[..index].trim_end().to_owned(),
                text[index + 3..].trim().to_owned(),
            )),
            None => Some(Line::Term(text.to_owned())),
        }
    }
}

impl fmt::Display for Line {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Line::Dependency(dependency) => write!(f, "{}", dependency),
            Line::Comment(comment) => write!(f, "# {}", comment),
            Line::Term(term) => f.write_str(term),
            Line::TermWithComment(term, comment) => write!(f, "{} # {}", term, comment),
        }
    }
}

/// Append-only assembler of AviSynth script text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvisynthScript {
    lines: Lines,
}

impl AvisynthScript {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    #[inline]
    pub fn add_line(&mut self, line: Line) -> &mut Self {
        self.lines.push(line);
        self
    }

    #[inline]
    pub fn add_lines(&mut self, lines: Lines) -> &mut Self {
        self.lines.extend(lines);
        self
    }

    #[inline]
    pub fn add_dependencies(&mut self, dependencies: Dependencies) -> &mut Self {
        self.lines.extend(dependencies.into_iter().map(Line::Dependency));
        self
    }

    /// Append formatted text, one line per newline-separated statement.
    #[inline]
    pub fn append_fmt(&mut self, arguments: fmt::Arguments<'_>) -> Result<&mut Self, ScriptError> {
        let mut text = String::new();
        text.write_fmt(arguments)?;
        self.lines.extend(text.lines().filter_map(Line::parse));
        Ok(self)
    }

    /// Replace `from` with `to` across the whole script and return the number
    /// of lines changed. A line that becomes blank is removed.
    #[inline]
    pub fn replace(&mut self, from: &str, to: &str) -> usize {
        if from.is_empty() {
            return 0;
        }

        let mut changed = 0;
        let lines = std::mem::take(&mut self.lines);
        for line in lines {
            let text = line.to_string();
            if text.contains(from) {
                changed += 1;
                self.lines.extend(Line::parse(&text.replace(from, to)));
            } else {
                self.lines.push(line);
            }
        }
        changed
    }

    /// Insert `line` ahead of the last line containing `marker`, or at the end
    /// when there is none.
    #[inline]
    pub fn insert_before_last(&mut self, marker: &str, line: Line) -> &mut Self {
        match self.lines.iter().rposition(|existing| existing.contains(marker)) {
            Some(index) => self.lines.insert(index, line),
            None => self.lines.push(line),
        }
        self
    }

    #[inline]
    pub fn contains_any(&self, markers: &[&str]) -> bool {
        self.lines.iter().any(|line| {
            let text = line.to_string();
            markers.iter().any(|marker| text.contains(marker))
        })
    }

    #[inline]
    pub fn remove_lines_containing(&mut self, marker: &str) -> usize {
        let before = self.lines.len();
        self.lines.retain(|line| !line.contains(marker));
        before - self.lines.len()
    }

    /// Move every dependency to the top, keeping the relative order of each
    /// group. Repeated dependencies keep their first occurrence and their
    /// paths are made readable by the engine.
    #[inline]
    pub fn cleanup(&mut self) -> &mut Self {
        let (dependencies, statements): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.lines).into_iter().partition(Line::is_dependency);

        let dependencies = dependencies
            .into_iter()
            .filter_map(|line| match line {
                Line::Dependency(dependency) => {
                    let path = ascii_safe_path(dependency.path());
                    Some(dependency.with_path(path))
                },
                _ => None,
            })
            .unique()
            .map(Line::Dependency)
            .collect::<Vec<_>>();
        trace!(
            "Script cleanup kept {} dependencies ahead of {} statements",
            dependencies.len(),
            statements.len()
        );

        self.lines = dependencies;
        self.lines.extend(statements);
        self
    }

    #[inline]
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().filter_map(Line::parse).collect(),
        }
    }

    #[inline]
    pub fn read(path: &Path) -> Result<Self, ScriptError> {
        let text = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    /// Write the script and return the path the engine should open it by.
    #[inline]
    pub fn write(&self, path: &Path) -> Result<PathBuf, ScriptError> {
        std::fs::write(path, self.to_string()).map_err(|source| ScriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(ascii_safe_path(path))
    }
}

impl fmt::Display for AvisynthScript {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            write!(f, "{}", line)?;
            f.write_char('\n')?;
        }
        Ok(())
    }
}

fn find_unquoted(text: &str, pattern: &str) -> Option<usize> {
    let mut quoted = false;
    for (index, character) in text.char_indices() {
        if character == '"' {
            quoted = !quoted;
        } else if !quoted && text[index..].starts_with(pattern) {
            return Some(index);
        }
    }
    None
}

fn split_arguments(arguments: &str) -> Vec<&str> {
    let mut parts = vec![];
    let mut quoted = false;
    let mut start = 0;
    for (index, character) in arguments.char_indices() {
        match character {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                parts.push(arguments[start..index].trim());
                start = index + 1;
            },
            _ => (),
        }
    }
    let last = arguments[start..].trim();
    if !last.is_empty() || !parts.is_empty() {
        parts.push(last);
    }
    parts
}

fn unquote(argument: &str) -> Option<&str> {
    argument.trim().strip_prefix('"')?.strip_suffix('"')
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    const SCRIPT: &str = r#"LoadPlugin("/plugins/LSMASHSource.dll")
LWLibavVideoSource("/media/clip #1.mkv", cache=false)
# denoise
Import("/plugins/HQDeringmod.avsi")
Trim(0, 299) # segment
LoadVirtualDubPlugin("/plugins/Deshaker.vdf", "Deshaker", 0)
"#;

    #[test]
    fn parse_classifies_lines() {
        let script = AvisynthScript::parse(SCRIPT);
        assert_eq!(script.lines(), &[
            Line::Dependency(Dependency::LoadPlugin(PathBuf::from("/plugins/LSMASHSource.dll"))),
            Line::term("LWLibavVideoSource(\"/media/clip #1.mkv\", cache=false)"),
            Line::Comment("denoise".to_owned()),
            Line::Dependency(Dependency::Import(PathBuf::from("/plugins/HQDeringmod.avsi"))),
            Line::TermWithComment("Trim(0, 299)".to_owned(), "segment".to_owned()),
            Line::Dependency(Dependency::LoadVirtualDubPlugin {
                path:    PathBuf::from("/plugins/Deshaker.vdf"),
                name:    "Deshaker".to_owned(),
                preroll: 0,
            }),
        ]);
        assert_eq!(script.to_string(), SCRIPT);
    }

    #[test]
    fn quoted_hash_is_not_a_comment() {
        let line = Line::parse(r#"Import("/a # b/filter.avsi")"#).unwrap();
        assert_eq!(line, Line::Dependency(Dependency::Import(PathBuf::from("/a # b/filter.avsi"))));

        let line = Line::parse(r#"Subtitle("x # y")"#).unwrap();
        assert_eq!(line, Line::term(r#"Subtitle("x # y")"#));
    }

    #[test]
    fn cleanup_hoists_and_deduplicates_dependencies() {
        let mut script = AvisynthScript::new();
        script
            .add_line(Line::term("Source()"))
            .add_dependencies(vec![Dependency::LoadPlugin(PathBuf::from("/p/a.dll"))])
            .add_line(Line::term("FilterA()"))
            .add_dependencies(vec![
                Dependency::Import(PathBuf::from("/p/b.avsi")),
                Dependency::LoadPlugin(PathBuf::from("/p/a.dll")),
            ])
            .add_line(Line::term("FilterB()"));
        script.cleanup();

        assert_eq!(
            script.to_string(),
            "LoadPlugin(\"/p/a.dll\")\nImport(\"/p/b.avsi\")\nSource()\nFilterA()\nFilterB()\n"
        );

        let once = script.clone();
        script.cleanup();
        assert_eq!(script, once);
    }

    #[test]
    fn replace_counts_changed_lines() {
        let mut script = AvisynthScript::parse("A(1)\nB(1)\nC(2)\n");
        assert_eq!(script.replace("(1)", "(3)"), 2);
        assert_eq!(script.to_string(), "A(3)\nB(3)\nC(2)\n");
        assert_eq!(script.replace("C(2)", ""), 1);
        assert_eq!(script.to_string(), "A(3)\nB(3)\n");
        assert_eq!(script.replace("", "x"), 0);
    }

    #[test]
    fn markers_and_removal() {
        let mut script = AvisynthScript::parse(SCRIPT);
        assert!(script.contains_any(&["HQDeringmod", "Nope"]));
        assert!(!script.contains_any(&["KNLMeansCL", "SMDegrain"]));

        assert_eq!(script.remove_lines_containing("# segment"), 1);
        assert!(!script.contains_any(&["Trim("]));
    }

    #[test]
    fn insert_before_last_marker() {
        let mut script = AvisynthScript::parse("A()\nPrefetch(4)\n");
        script.insert_before_last("Prefetch(", Line::term("Trim(0, 9)"));
        assert_eq!(script.to_string(), "A()\nTrim(0, 9)\nPrefetch(4)\n");

        script.insert_before_last("Missing(", Line::term("B()"));
        assert_eq!(script.lines().last(), Some(&Line::term("B()")));
    }

    #[test]
    fn append_fmt_splits_statements() {
        let mut script = AvisynthScript::new();
        script.append_fmt(format_args!("Crop({}, {}, -{}, -{})\n\nPrefetch({})", 8, 0, 8, 0, 4)).unwrap();
        assert_eq!(script.lines(), &[Line::term("Crop(8, 0, -8, -0)"), Line::term("Prefetch(4)")]);
    }

    #[test]
    fn write_and_read_back() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("Job1_Script.avs");
        let script = AvisynthScript::parse(SCRIPT);

        let engine_path = script.write(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&engine_path).unwrap(), SCRIPT);
        assert_eq!(AvisynthScript::read(&path).unwrap(), script);
    }

    #[test]
    fn write_failure_names_the_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing").join("script.avs");
        let err = AvisynthScript::new().write(&path).unwrap_err();
        assert!(matches!(err, ScriptError::Io { path: failed, .. } if failed == path));
    }

    #[test]
    fn dependencies_root_at_plugin_directory() {
        let dependency = Dependency::LoadPlugin(PathBuf::from("KNLMeansCL.dll"));
        assert_eq!(
            dependency.rooted_at(Path::new("/opt/plugins")),
            Dependency::LoadPlugin(PathBuf::from("/opt/plugins/KNLMeansCL.dll"))
        );
    }
}
