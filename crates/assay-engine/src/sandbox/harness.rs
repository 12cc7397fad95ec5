//! Harness configuration synthesized from the detected project shape.

use assay_core::context::Manifest;
use assay_core::scan::{has_markup, has_typed_syntax};
use assay_core::SourceFile;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

pub(crate) const JEST_CONFIG_FILE: &str = "jest.config.json";
pub(crate) const SETUP_FILE: &str = "jest.setup.js";
pub(crate) const BABEL_CONFIG_FILE: &str = "babel.config.json";
pub(crate) const RESULTS_FILE: &str = "results.json";

/// Babel config names that, once copied in, take precedence over ours.
pub(crate) const BABEL_CONFIG_NAMES: &[&str] = &["babel.config.js", ".babelrc", "babel.config.json"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiFramework {
    Next,
    ReactRouter,
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectShape {
    pub typed: bool,
    pub markup: bool,
    pub framework: UiFramework,
    pub jest_dom: bool,
}

impl ProjectShape {
    /// Inspect test files (extension and content) and, when present, the
    /// original repository's manifest.
    pub fn detect(tests: &[SourceFile], manifest: Option<&Manifest>) -> Self {
        let mut typed = false;
        let mut markup = false;
        for test in tests {
            let ext = test.extension().unwrap_or_default();
            typed |= matches!(ext.as_str(), "ts" | "tsx") || has_typed_syntax(&test.content);
            markup |= matches!(ext.as_str(), "tsx" | "jsx") || has_markup(&test.content);
        }

        let declares = |name: &str| manifest.is_some_and(|m| m.declares(name));
        typed |= declares("typescript");
        let framework = if declares("next") {
            UiFramework::Next
        } else if declares("react-router-dom") {
            UiFramework::ReactRouter
        } else {
            UiFramework::Plain
        };

        Self {
            typed,
            markup,
            framework,
            jest_dom: declares("@testing-library/jest-dom"),
        }
    }

    pub fn environment(&self) -> &'static str {
        if self.markup {
            "jsdom"
        } else {
            "node"
        }
    }
}

/// Dependency directories in resolution order: the sandbox's own, then
/// every ancestor's that exists on disk.
pub(crate) fn module_paths(sandbox: &Path) -> Vec<PathBuf> {
    let mut paths = vec![sandbox.join("node_modules")];
    for ancestor in sandbox.ancestors().skip(1) {
        let candidate = ancestor.join("node_modules");
        if candidate.is_dir() {
            paths.push(candidate);
        }
    }
    paths
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

pub(crate) fn jest_config(sandbox: &Path, shape: &ProjectShape, babel_config: &Path) -> Value {
    let module_paths: Vec<String> = module_paths(sandbox).iter().map(|p| path_str(p)).collect();
    let mut module_directories = vec!["node_modules".to_string()];
    module_directories.extend(module_paths.iter().cloned());

    let mut config = json!({
        "rootDir": path_str(sandbox),
        "roots": ["<rootDir>"],
        "testMatch": [
            "<rootDir>/**/*.test.[jt]s?(x)",
            "<rootDir>/**/*.spec.[jt]s?(x)"
        ],
        "testEnvironment": shape.environment(),
        "modulePaths": module_paths,
        "moduleDirectories": module_directories,
        "moduleFileExtensions": ["ts", "tsx", "js", "jsx", "mjs", "cjs", "json", "node"],
        "transform": {
            "^.+\\.(?:[cm]?js|jsx|ts|tsx)$": ["babel-jest", { "configFile": path_str(babel_config) }]
        },
        "transformIgnorePatterns": ["/node_modules/"],
        "watchman": false
    });
    if shape.markup {
        config["setupFilesAfterEnv"] = json!([path_str(&sandbox.join(SETUP_FILE))]);
        config["moduleNameMapper"] = json!({
            "\\.(css|less|scss|sass)$": "identity-obj-proxy"
        });
    }
    config
}

pub(crate) fn babel_config(shape: &ProjectShape) -> Value {
    let mut presets = vec![json!(["@babel/preset-env", { "targets": { "node": "current" } }])];
    if shape.typed {
        presets.push(json!(["@babel/preset-typescript", { "isTSX": shape.markup, "allExtensions": shape.markup }]));
    }
    if shape.markup {
        presets.push(json!(["@babel/preset-react", { "runtime": "automatic" }]));
    }
    json!({ "presets": presets })
}

const NEXT_MOCKS: &str = r#"jest.mock('next/router', () => ({
  useRouter: () => ({
    push: jest.fn(),
    replace: jest.fn(),
    prefetch: jest.fn(() => Promise.resolve()),
    back: jest.fn(),
    pathname: '/',
    query: {},
    asPath: '/',
    events: { on: jest.fn(), off: jest.fn(), emit: jest.fn() },
  }),
}), { virtual: true });

jest.mock('next/navigation', () => ({
  useRouter: () => ({ push: jest.fn(), replace: jest.fn(), prefetch: jest.fn(), back: jest.fn(), refresh: jest.fn() }),
  usePathname: () => '/',
  useSearchParams: () => new URLSearchParams(),
  useParams: () => ({}),
}), { virtual: true });

jest.mock('next/image', () => ({
  __esModule: true,
  default: ({ src, alt, fill, priority, ...rest }) => {
    const React = require('react');
    return React.createElement('img', { src: typeof src === 'string' ? src : '', alt, ...rest });
  },
}), { virtual: true });
"#;

const REACT_ROUTER_MOCKS: &str = r#"jest.mock('react-router-dom', () => ({
  ...jest.requireActual('react-router-dom'),
  useNavigate: () => jest.fn(),
  useParams: () => ({}),
  useLocation: () => ({ pathname: '/', search: '', hash: '', state: null }),
}));
"#;

const BROWSER_SHIMS: &str = r#"const createStorage = () => {
  let store = {};
  return {
    getItem: (key) => (Object.prototype.hasOwnProperty.call(store, key) ? store[key] : null),
    setItem: (key, value) => { store[key] = String(value); },
    removeItem: (key) => { delete store[key]; },
    clear: () => { store = {}; },
    key: (index) => Object.keys(store)[index] ?? null,
    get length() { return Object.keys(store).length; },
  };
};

Object.defineProperty(window, 'localStorage', { value: createStorage(), configurable: true });
Object.defineProperty(window, 'sessionStorage', { value: createStorage(), configurable: true });

global.fetch = jest.fn(() =>
  Promise.resolve({
    ok: true,
    status: 200,
    json: () => Promise.resolve({}),
    text: () => Promise.resolve(''),
  })
);
"#;

/// Setup script for markup tests: routing/image stubs for the detected
/// framework, a storage shim, and a fetch stub.
pub(crate) fn setup_script(shape: &ProjectShape) -> String {
    let mut script = String::from("// Generated by assay for the test sandbox.\n");
    if shape.jest_dom {
        script.push_str("require('@testing-library/jest-dom');\n");
    }
    script.push('\n');
    match shape.framework {
        UiFramework::Next => script.push_str(NEXT_MOCKS),
        UiFramework::ReactRouter => script.push_str(REACT_ROUTER_MOCKS),
        UiFramework::Plain => {}
    }
    script.push('\n');
    script.push_str(BROWSER_SHIMS);
    script
}
