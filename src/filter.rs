//! Filtro de contenido: decide qué rutas del repositorio merecen descargarse.

/// Directorios que nunca se recorren (cachés de build, dependencias,
/// metadatos de control de versiones, cobertura y fixtures de test).
const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".github",
    ".svn",
    ".hg",
    "node_modules",
    "bower_components",
    "vendor",
    "target",
    "build",
    "dist",
    "out",
    ".next",
    ".nuxt",
    ".cache",
    ".gradle",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    ".tox",
    ".venv",
    "venv",
    ".idea",
    ".vscode",
    "coverage",
    ".nyc_output",
    "htmlcov",
    "fixtures",
    "__fixtures__",
    "__snapshots__",
    "testdata",
];

const ALLOWED_EXTENSIONS: &[&str] = &[
    // código
    "rs", "py", "js", "mjs", "cjs", "ts", "tsx", "jsx", "go", "java", "kt", "kts", "scala", "c",
    "cc", "cpp", "cxx", "h", "hpp", "cs", "rb", "php", "swift", "m", "lua", "dart", "ex", "exs",
    "erl", "hs", "clj", "sh", "bash", "zsh", "ps1", "sql", "vue", "svelte", "r", "jl",
    // configuración
    "toml", "yaml", "yml", "json", "ini", "cfg", "conf", "xml", "gradle", "proto", "graphql",
    "dockerfile", "tf", "nix",
    // documentación y web
    "md", "mdx", "rst", "txt", "adoc", "html", "css", "scss",
];

const EXTENSIONLESS_FILES: &[&str] = &[
    "readme",
    "license",
    "makefile",
    "dockerfile",
    "justfile",
    "gemfile",
    "rakefile",
    "procfile",
];

/// `true` si el directorio con este nombre no debe recorrerse.
pub fn is_ignored_dir(name: &str) -> bool {
    let lower = name.to_lowercase();
    IGNORED_DIRS.iter().any(|dir| *dir == lower)
}

/// `true` si alguna carpeta de la ruta está en la lista de ignorados.
pub fn is_under_ignored_dir(path: &str) -> bool {
    let mut parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    parts.pop();
    parts.iter().any(|part| is_ignored_dir(part))
}

/// `true` si la extensión (o el nombre, para ficheros sin extensión) está permitida.
pub fn has_allowed_extension(path: &str) -> bool {
    let basename = path.rsplit('/').next().unwrap_or("").to_lowercase();
    if EXTENSIONLESS_FILES.iter().any(|n| *n == basename) {
        return true;
    }
    match basename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() || basename.starts_with('.') => {
            ALLOWED_EXTENSIONS.iter().any(|allowed| *allowed == ext)
        }
        _ => false,
    }
}

/// Predicado completo usado por el fetcher antes de pedir el contenido.
pub fn should_fetch_content(path: &str) -> bool {
    !is_under_ignored_dir(path) && has_allowed_extension(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_source_config_and_docs() {
        for path in [
            "src/main.rs",
            "app/models/user.PY",
            "Cargo.toml",
            "docs/guide.md",
            "README",
            "deploy/Dockerfile",
            ".eslintrc.json",
        ] {
            assert!(should_fetch_content(path), "{path} debería aceptarse");
        }
    }

    #[test]
    fn rejects_binaries_and_unknown_extensions() {
        for path in ["logo.png", "bin/tool.exe", "archive.tar.gz", "Makefile.bak", "noext"] {
            assert!(!should_fetch_content(path), "{path} debería rechazarse");
        }
    }

    #[test]
    fn ignored_directories_win_over_extension() {
        assert!(!should_fetch_content("node_modules/lodash/index.js"));
        assert!(!should_fetch_content("web/dist/bundle.js"));
        assert!(!should_fetch_content("tests/fixtures/sample.json"));
        assert!(!should_fetch_content("a/.git/config.toml"));
        assert!(should_fetch_content("distribution/main.rs"));
    }

    #[test]
    fn directory_names_are_matched_case_insensitively() {
        assert!(is_ignored_dir("Node_Modules"));
        assert!(is_ignored_dir("coverage"));
        assert!(!is_ignored_dir("src"));
    }
}
