//! Technology profile inference from manifests and file extensions.

use crate::model::TechProfile;
use crate::scan::language_for_extension;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

pub const FRAMEWORKS: &[&str] = &[
    "express", "next", "react", "vue", "nuxt", "angular", "svelte", "gatsby", "remix", "astro",
    "solid-js", "nestjs", "fastify",
];

pub const TEST_FRAMEWORKS: &[&str] = &[
    "jest",
    "mocha",
    "vitest",
    "ava",
    "jasmine",
    "cypress",
    "playwright",
    "testing-library",
    "tap",
];

pub const TOOLING: &[&str] = &[
    "eslint",
    "prettier",
    "typescript",
    "webpack",
    "babel",
    "rollup",
    "parcel",
    "swc",
    "ts-node",
    "nodemon",
    "husky",
    "lint-staged",
];

/// Declared dependency names, runtime and development.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub dependencies: Vec<String>,
    pub dev_dependencies: Vec<String>,
}

impl Manifest {
    fn all(&self) -> impl Iterator<Item = &String> {
        self.dependencies.iter().chain(self.dev_dependencies.iter())
    }

    /// Whether `name` is declared in either dependency table.
    pub fn declares(&self, name: &str) -> bool {
        self.all().any(|dep| dep == name)
    }
}

/// Read `package.json`, falling back to `Cargo.toml`. A missing or
/// malformed manifest yields `None`.
pub fn read_manifest(repo_root: &Path) -> Option<Manifest> {
    read_package_json(repo_root).or_else(|| read_cargo_toml(repo_root))
}

fn read_package_json(repo_root: &Path) -> Option<Manifest> {
    let path = repo_root.join("package.json");
    let text = std::fs::read_to_string(&path).ok()?;
    let value: Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring malformed package.json");
            return None;
        }
    };
    let keys = |field: &str| -> Vec<String> {
        value
            .get(field)
            .and_then(Value::as_object)
            .map(|obj| obj.keys().cloned().collect())
            .unwrap_or_default()
    };
    Some(Manifest {
        dependencies: keys("dependencies"),
        dev_dependencies: keys("devDependencies"),
    })
}

fn read_cargo_toml(repo_root: &Path) -> Option<Manifest> {
    let path = repo_root.join("Cargo.toml");
    let text = std::fs::read_to_string(&path).ok()?;
    let value: toml::Table = match toml::from_str(&text) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring malformed Cargo.toml");
            return None;
        }
    };
    let keys = |field: &str| -> Vec<String> {
        value
            .get(field)
            .and_then(toml::Value::as_table)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    };
    Some(Manifest {
        dependencies: keys("dependencies"),
        dev_dependencies: keys("dev-dependencies"),
    })
}

fn is_test_framework(dep: &str) -> bool {
    TEST_FRAMEWORKS.contains(&dep) || dep.starts_with("@testing-library/")
}

/// Classify declared dependencies and file extensions into a profile.
///
/// Libraries are the runtime dependencies left over after classification;
/// languages are taken from extensions with no weighting.
pub fn infer_profile<'a>(
    manifest: Option<&Manifest>,
    file_paths: impl IntoIterator<Item = &'a str>,
) -> TechProfile {
    let mut profile = TechProfile::default();

    for path in file_paths {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        if let Some(lang) = ext.as_deref().and_then(language_for_extension) {
            profile.languages.insert(lang.to_string());
        }
    }

    let Some(manifest) = manifest else {
        debug!("no manifest found; dependency classification left empty");
        return profile;
    };

    for dep in manifest.all() {
        if FRAMEWORKS.contains(&dep.as_str()) {
            profile.frameworks.insert(dep.clone());
        } else if is_test_framework(dep) {
            profile.test_frameworks.insert(dep.clone());
        } else if TOOLING.contains(&dep.as_str()) {
            profile.tooling.insert(dep.clone());
        }
    }
    for dep in &manifest.dependencies {
        let classified = profile.frameworks.contains(dep)
            || profile.test_frameworks.contains(dep)
            || profile.tooling.contains(dep);
        if !classified {
            profile.libraries.insert(dep.clone());
        }
    }

    profile
}
