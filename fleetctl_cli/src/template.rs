//! Component J: the Template Renderer (spec §4.J).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tera::{Context, Tera};
use crate::Result;

const RENDERED_EXTENSIONS: &[&str] = &["json", "service", "conf", "yml", "yaml", "env", "txt"];

/// Whether a staged file's extension puts it in scope for rendering.
pub fn should_render(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| RENDERED_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

/// Substitutes `variables` into `content`. Purely textual: a one-off
/// `Tera` instance with a single raw template, same technique as
/// `shipcat_definitions::template::one_off`. Tera's default behaviour —
/// an undefined `{{ ref }}` is a render error, not an empty string — is
/// exactly the strict mode the spec asks for, so no extra enforcement is
/// needed here.
pub fn render(content: &str, variables: &BTreeMap<String, String>) -> Result<String> {
    let mut tera = Tera::default();
    tera.add_raw_template("tpl", content)?;
    let mut ctx = Context::new();
    for (k, v) in variables {
        ctx.insert(k, v);
    }
    Ok(tera.render("tpl", &ctx)?)
}

/// Renders the file at `path` in place when its extension is in scope.
/// Leaves the file untouched (mtime included) when the rendered content
/// is byte-identical to what's already there, so a staged tree that's
/// already in its rendered form doesn't get spuriously re-uploaded by
/// rsync. Returns whether the file was rewritten.
pub fn render_file_in_place(path: &Path, variables: &BTreeMap<String, String>) -> Result<bool> {
    if !should_render(path) {
        return Ok(false);
    }
    let original = fs::read_to_string(path)?;
    let rendered = render(&original, variables)?;
    if rendered == original {
        return Ok(false);
    }
    fs::write(path, &rendered)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn renders_known_extensions_only() {
        assert!(should_render(Path::new("service.conf")));
        assert!(should_render(Path::new("x.json")));
        assert!(!should_render(Path::new("binary.so")));
        assert!(!should_render(Path::new("no_extension")));
    }

    #[test]
    fn substitutes_a_variable() {
        let out = render("memory={{ memory }}", &vars(&[("memory", "1024")])).unwrap();
        assert_eq!(out, "memory=1024");
    }

    #[test]
    fn undefined_reference_is_fatal() {
        assert!(render("memory={{ missing }}", &BTreeMap::new()).is_err());
    }

    #[test]
    fn idempotent_rewrite_leaves_matching_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.conf");
        let mut f = fs::File::create(&path).unwrap();
        write!(f, "memory=1024").unwrap();
        drop(f);

        let rewritten = render_file_in_place(&path, &vars(&[("memory", "1024")])).unwrap();
        assert!(!rewritten, "content already rendered; should be a no-op");
    }

    #[test]
    fn rewrite_happens_when_content_differs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.conf");
        let mut f = fs::File::create(&path).unwrap();
        write!(f, "memory={{{{ memory }}}}").unwrap();
        drop(f);

        let rewritten = render_file_in_place(&path, &vars(&[("memory", "1024")])).unwrap();
        assert!(rewritten);
        assert_eq!(fs::read_to_string(&path).unwrap(), "memory=1024");
    }
}
