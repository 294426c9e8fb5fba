//! Derivation of the generated test's location from the focal file.

use std::sync::LazyLock;

use regex::Regex;

static METHOD_SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([a-zA-Z_][a-zA-Z0-9_]*)\s*\([^)]*\)")
        .expect("method signature pattern should be valid")
});

/// Where the candidate test lives and how it is named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestTarget {
    /// Project root the build tool runs in.
    pub project_dir: String,
    /// `/`-separated path of the test source file.
    pub test_path: String,
    /// Simple class name of the test (`FooTest`).
    pub test_class: String,
    /// `Focal::::method(args)` key used to look up references.
    pub focal_method_key: String,
}

impl TestTarget {
    pub fn derive(project_dir: &str, focal_file_path: &str, focal_method: &str) -> Self {
        let focal = focal_file_path.replace('\\', "/");
        let test_path = test_path_for(&focal);
        Self {
            project_dir: project_dir.replace('\\', "/"),
            test_class: file_stem(&test_path).to_string(),
            focal_method_key: focal_method_key(&focal, focal_method),
            test_path,
        }
    }
}

/// Mirror `src/main/java/.../Foo.java` to `src/test/java/.../FooTest.java`.
fn test_path_for(focal_path: &str) -> String {
    let mirrored = focal_path.replace("src/main/java", "src/test/java");
    match mirrored.strip_suffix(".java") {
        Some(stem) => format!("{stem}Test.java"),
        None => format!("{mirrored}Test"),
    }
}

fn file_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.strip_suffix(".java").unwrap_or(name)
}

fn focal_method_key(focal_path: &str, focal_method: &str) -> String {
    let class_name = file_stem(focal_path);
    let signature = METHOD_SIGNATURE
        .find(focal_method)
        .map(|m| m.as_str())
        .unwrap_or_default();
    format!("{class_name}::::{signature}")
}
