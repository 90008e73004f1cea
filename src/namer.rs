/*
 * Copyright (c) 2025 Craig Hamilton and Contributors.
 * Licensed under either of
 *  - Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> OR
 *  - MIT license <http://opensource.org/licenses/MIT>
 *  at your option.
 */

use std::path::PathBuf;

use chrono::NaiveDateTime;
use url::Url;

/// Stands in for any metadata the photo lacks
pub(crate) const SENTINEL: &str = "unknown";

const DEFAULT_EXTENSION: &str = "jpg";

/// Renders local file names from the naming and subdirectory rules.
///
/// Placeholders (case sensitive): `YYYY`, `MM`, `DD`, `hh`, `mm`, `ss` from the
/// capture time, `camera` for the camera model and `photo_id`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Namer {
    naming_rule: String,
    subdir_rule: String,
    prefix: Option<String>,
}

/// Metadata a name is rendered from
#[derive(Debug, Clone, Default)]
pub(crate) struct NamingInput<'a> {
    pub(crate) photo_id: &'a str,
    pub(crate) taken_at: Option<NaiveDateTime>,
    pub(crate) posted_at: Option<NaiveDateTime>,
    pub(crate) camera: Option<&'a str>,
    pub(crate) extension: &'a str,
}

/// Location of a photo relative to the download directory
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PhotoPath {
    pub(crate) subdir: PathBuf,
    pub(crate) stem: String,
    pub(crate) extension: String,
}

impl PhotoPath {
    pub(crate) fn file_name(&self) -> String {
        format!("{}.{}", self.stem, self.extension)
    }

    pub(crate) fn relative(&self) -> PathBuf {
        self.subdir.join(self.file_name())
    }

    /// `name-2.jpg`, `name-3.jpg`, ... used when the plain name is taken
    pub(crate) fn numbered(&self, n: u32) -> PathBuf {
        if n <= 1 {
            return self.relative();
        }
        self.subdir
            .join(format!("{}-{}.{}", self.stem, n, self.extension))
    }
}

impl Namer {
    pub(crate) fn new(naming_rule: &str, subdir_rule: &str) -> Self {
        Self {
            naming_rule: naming_rule.to_string(),
            subdir_rule: subdir_rule.to_string(),
            prefix: None,
        }
    }

    /// Puts every rendered path below `prefix` (an album title)
    pub(crate) fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = Some(prefix.to_string());
        self
    }

    pub(crate) fn naming_rule(&self) -> &str {
        &self.naming_rule
    }

    /// Describes where files will go, for the confirmation prompt
    pub(crate) fn subdir_description(&self) -> Option<String> {
        let prefix = self.prefix.as_deref().map(safe_component);
        match (prefix, self.subdir_rule.is_empty()) {
            (None, true) => None,
            (Some(p), true) => Some(p),
            (None, false) => Some(self.subdir_rule.clone()),
            (Some(p), false) => Some(format!("{}/{}", p, self.subdir_rule)),
        }
    }

    pub(crate) fn render(&self, input: &NamingInput) -> PhotoPath {
        let mut subdir = PathBuf::new();
        if let Some(prefix) = &self.prefix {
            push_component(&mut subdir, prefix);
        }
        if !self.subdir_rule.is_empty() {
            expand(&self.subdir_rule, input)
                .split(['/', '\\'])
                .for_each(|component| push_component(&mut subdir, component));
        }

        let stem = safe_component(&expand(&self.naming_rule, input));
        let extension = safe_extension(input.extension);

        PhotoPath {
            subdir,
            stem: if stem.is_empty() { SENTINEL.to_string() } else { stem },
            extension,
        }
    }
}

// Replaces the placeholders in order; values never contain path separators
fn expand(template: &str, input: &NamingInput) -> String {
    let ts = input.taken_at.or(input.posted_at);
    let part = |fmt: &str| ts.map_or(SENTINEL.to_string(), |ts| ts.format(fmt).to_string());
    let camera = input
        .camera
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(safe_component)
        .unwrap_or_else(|| SENTINEL.to_string());

    template
        .replace("YYYY", &part("%Y"))
        .replace("MM", &part("%m"))
        .replace("DD", &part("%d"))
        .replace("hh", &part("%H"))
        .replace("mm", &part("%M"))
        .replace("ss", &part("%S"))
        .replace("camera", &camera)
        .replace("photo_id", &safe_component(input.photo_id))
}

fn push_component(path: &mut PathBuf, component: &str) {
    let component = safe_component(component);
    if !component.is_empty() && component != "." && component != ".." {
        path.push(component);
    }
}

/// Makes `name` usable as a single path component
pub(crate) fn safe_component(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '\'' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

fn safe_extension(ext: &str) -> String {
    let ext: String = ext
        .trim_start_matches('.')
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if ext.is_empty() {
        DEFAULT_EXTENSION.to_string()
    } else {
        ext.to_ascii_lowercase()
    }
}

/// Extension of the original file: the upload format when Flickr reports it,
/// else whatever the download url ends with.
pub(crate) fn extension_for(original_format: Option<&str>, url: &str) -> String {
    if let Some(format) = original_format.filter(|v| !v.trim().is_empty()) {
        return safe_extension(format);
    }
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext.to_string()))
        .map(|ext| safe_extension(&ext))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}
