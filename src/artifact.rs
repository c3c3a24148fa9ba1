//! Downloadable code bundles for package names.
//!
//! [`ArtifactBuilder`] is the seam for anything that turns a README plus
//! metadata into a zip. [`StubArtifactBuilder`] writes a minimal, installable
//! project skeleton.

use std::io::{Cursor, Write};

use anyhow::Result;
use serde::Deserialize;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Metadata accepted by `POST /generate_package`. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BundleMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_email: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub python_requires: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
}

impl BundleMetadata {
    pub fn package_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unknown-package")
    }
}

pub trait ArtifactBuilder: Send + Sync {
    /// Build zip bytes. Runs on the blocking pool.
    fn build(&self, metadata: &BundleMetadata, readme: &str) -> Result<Vec<u8>>;
}

pub struct StubArtifactBuilder;

impl ArtifactBuilder for StubArtifactBuilder {
    fn build(&self, metadata: &BundleMetadata, readme: &str) -> Result<Vec<u8>> {
        build_stub(metadata, readme)
    }
}

/// Zip with `pyproject.toml`, `README.md`, `<module>/__init__.py`,
/// `MANIFEST.in` and `LICENSE`.
pub fn build_stub(metadata: &BundleMetadata, readme: &str) -> Result<Vec<u8>> {
    let name = metadata.package_name();
    let module = name.to_lowercase().replace(['-', '.'], "_");
    let default_description = format!("A Python package named {}", name);
    let description = metadata
        .description
        .as_deref()
        .or(metadata.summary.as_deref())
        .unwrap_or(&default_description);
    let version = metadata.version.as_deref().unwrap_or("0.1.0");
    let author = metadata.author.as_deref().unwrap_or("Unknown");
    let email = metadata
        .author_email
        .as_deref()
        .unwrap_or("unknown@example.com");
    let license = metadata.license.as_deref().unwrap_or("MIT");
    let default_url = format!("https://github.com/user/{}", name);
    let homepage = metadata.homepage.as_deref().unwrap_or(&default_url);
    let repository = metadata.repository.as_deref().unwrap_or(&default_url);
    let requires = metadata.python_requires.as_deref().unwrap_or(">=3.8");
    let one_line = description.lines().next().unwrap_or("").replace('"', "'");

    let pyproject = format!(
        r#"[build-system]
requires = ["setuptools>=45", "wheel"]
build-backend = "setuptools.build_meta"

[project]
name = "{name}"
version = "{version}"
description = "{one_line}"
readme = "README.md"
authors = [
    {{name = "{author}", email = "{email}"}}
]
license = {{text = "{license}"}}
requires-python = "{requires}"
classifiers = [
    "Development Status :: 3 - Alpha",
    "Intended Audience :: Developers",
    "Programming Language :: Python :: 3",
]

[project.urls]
Homepage = "{homepage}"
Repository = "{repository}"
"#
    );

    let readme = if readme.trim().is_empty() {
        format!("# {}\n\n{}\n", name, description)
    } else {
        readme.to_string()
    };

    let init = format!(
        "\"\"\"\n{name} - {one_line}\n\"\"\"\n\n__version__ = \"{version}\"\n__author__ = \"{author}\"\n__email__ = \"{email}\"\n"
    );

    let year = chrono::Utc::now().format("%Y");
    let license_text = format!("{license} License\n\nCopyright (c) {year} {author}\n");

    let files: Vec<(String, String)> = vec![
        ("pyproject.toml".into(), pyproject),
        ("README.md".into(), readme),
        (format!("{}/__init__.py", module), init),
        ("MANIFEST.in".into(), "include README.md\ninclude LICENSE\n".into()),
        ("LICENSE".into(), license_text),
    ];

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (path, body) in files {
        zip.start_file(path, options)?;
        zip.write_all(body.as_bytes())?;
    }
    Ok(zip.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn stub_contains_project_skeleton() {
        let meta = BundleMetadata {
            name: Some("fake-pkg".into()),
            version: Some("0.4.2".into()),
            description: Some("Makes fakes".into()),
            ..Default::default()
        };
        let bytes = build_stub(&meta, "# fake-pkg\n\nCustom readme\n").unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "LICENSE",
                "MANIFEST.in",
                "README.md",
                "fake_pkg/__init__.py",
                "pyproject.toml"
            ]
        );

        let mut pyproject = String::new();
        archive
            .by_name("pyproject.toml")
            .unwrap()
            .read_to_string(&mut pyproject)
            .unwrap();
        assert!(pyproject.contains("name = \"fake-pkg\""));
        assert!(pyproject.contains("version = \"0.4.2\""));

        let mut readme = String::new();
        archive
            .by_name("README.md")
            .unwrap()
            .read_to_string(&mut readme)
            .unwrap();
        assert!(readme.contains("Custom readme"));
    }

    #[test]
    fn defaults_when_metadata_is_empty() {
        let meta = BundleMetadata::default();
        assert_eq!(meta.package_name(), "unknown-package");
        let bytes = StubArtifactBuilder.build(&meta, "").unwrap();
        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert!(archive
            .file_names()
            .any(|n| n == "unknown_package/__init__.py"));
    }
}
