/*
 * integration_tests.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Integration tests for brace-template using test fixtures.
 */

use brace_template::{
    ArtifactCache, CompiledArtifact, DataContext, DirectoryCache, Engine, EngineConfig,
    MemoryCache, TemplateError,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Helper to get the path to test fixtures
fn fixture_path(name: &str) -> std::path::PathBuf {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    Path::new(manifest_dir).join("test-fixtures").join(name)
}

/// Engine with `main` = site (priority 10) over base (priority 0).
fn fixture_engine() -> Engine {
    let mut engine = Engine::new();
    engine
        .add_path("main", fixture_path("site"), 10)
        .add_path("main", fixture_path("base"), 0);
    engine
}

fn page_data(title: &str) -> DataContext {
    DataContext::from_json(json!({
        "site": "Example",
        "title": title,
        "items": ["a", "b"],
        "user": { "name": "Ann" },
    }))
    .unwrap()
}

/// A memory cache that counts stores.
#[derive(Default)]
struct CountingCache {
    inner: MemoryCache,
    stores: AtomicUsize,
}

impl ArtifactCache for CountingCache {
    fn get(&self, key: &str) -> Option<Arc<CompiledArtifact>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, artifact: Arc<CompiledArtifact>) {
        self.stores.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, artifact);
    }
}

#[test]
fn test_render_page_with_includes() {
    let engine = fixture_engine();
    let result = engine
        .render_from_file("page@main", &page_data("Home"), None)
        .unwrap();
    assert_eq!(
        result,
        "<header>Example</header>\n<h1>Home</h1>\n<li>a</li>\n<li>b</li>\n<footer>Ann</footer>\n"
    );
}

#[test]
fn test_type_fallback_prefers_type_directory() {
    let mut engine = fixture_engine();
    engine.set_types(["mobile"]);
    let result = engine
        .render_from_file("page@main", &page_data("Home"), None)
        .unwrap();
    assert!(result.starts_with("<header class=\"mobile\">Example</header>\n"));
}

#[test]
fn test_higher_priority_root_wins() {
    let engine = fixture_engine();
    let data = DataContext::new();
    assert_eq!(
        engine.render_from_file("greeting@main", &data, None).unwrap(),
        "site greeting"
    );

    let mut engine = Engine::new();
    engine
        .add_path("main", fixture_path("site"), 5)
        .add_path("main", fixture_path("base"), 10);
    assert_eq!(
        engine.render_from_file("greeting@main", &data, None).unwrap(),
        "base greeting"
    );
    assert_eq!(
        engine.resolve("greeting@main"),
        Some(fixture_path("base/default/greeting.tpl"))
    );
}

#[test]
fn test_equal_priority_uses_insertion_order() {
    let mut engine = Engine::new();
    engine
        .add_path("main", fixture_path("base"), 0)
        .add_path("main", fixture_path("site"), 0);
    assert_eq!(
        engine
            .render_from_file("greeting@main", &DataContext::new(), None)
            .unwrap(),
        "base greeting"
    );
}

#[test]
fn test_remove_path() {
    let mut engine = fixture_engine();
    assert!(engine.remove_path("nonexistent"));
    assert!(engine.remove_path("main"));
    let err = engine
        .render_from_file("greeting@main", &DataContext::new(), None)
        .unwrap_err();
    assert!(matches!(err, TemplateError::TemplateNotFound { ref reference } if reference == "greeting@main"));
}

#[test]
fn test_literal_blocks_render_verbatim() {
    let engine = fixture_engine();
    let mut data = DataContext::new();
    data.assign("x", "X");
    assert_eq!(
        engine.render_from_file("literal@main", &data, None).unwrap(),
        "{$raw} &lt;b&gt; X"
    );
}

#[test]
fn test_missing_include_names_reference() {
    let engine = fixture_engine();
    let err = engine
        .render_from_file("missing@main", &DataContext::new(), None)
        .unwrap_err();
    assert!(matches!(err, TemplateError::TemplateNotFound { ref reference } if reference == "nowhere@main"));
    assert_eq!(err.to_string(), "template file \"nowhere@main\" is not found");
}

#[test]
fn test_recursive_include_is_an_error() {
    let engine = fixture_engine();
    let err = engine
        .render_from_file("loop@main", &DataContext::new(), None)
        .unwrap_err();
    assert!(matches!(err, TemplateError::RecursiveInclude { max_depth: 50, .. }));
}

#[test]
fn test_template_functions() {
    let engine = fixture_engine();
    let data = DataContext::from_json(json!({ "rows": [[1, 2], [3]] })).unwrap();
    assert_eq!(
        engine.render_from_file("table@main", &data, None).unwrap(),
        "<tr><td>1</td><td>2</td></tr><tr><td>3</td></tr>"
    );
}

#[test]
fn test_switch_template() {
    let engine = fixture_engine();
    let render = |status: &str| {
        let mut data = DataContext::new();
        data.assign("status", status);
        engine.render_from_file("status@main", &data, None).unwrap()
    };
    assert_eq!(render("ok"), "fine");
    assert_eq!(render("warn"), "careful");
    assert_eq!(render("other"), "unknown");
}

#[test]
fn test_render_from_string() {
    let engine = Engine::new();
    let mut data = DataContext::new();
    data.assign("user", json!({ "name": "Ann" }));
    assert_eq!(
        engine.render_from_string("{$user.name}", &data, None).unwrap(),
        "Ann"
    );
    assert_eq!(
        engine
            .render_from_string("{if 1>0}A{else}B{/if}", &DataContext::new(), None)
            .unwrap(),
        "A"
    );
}

#[test]
fn test_escaping() {
    let engine = Engine::new();
    let mut data = DataContext::new();
    data.assign("html", "<b>\"hi\"</b>");
    assert_eq!(
        engine
            .render_from_string("{$html}|{echo $html}", &data, None)
            .unwrap(),
        "&lt;b&gt;&quot;hi&quot;&lt;/b&gt;|<b>\"hi\"</b>"
    );
}

#[test]
fn test_cache_compiles_at_most_once() {
    let cache = Arc::new(CountingCache::default());
    let mut engine = fixture_engine();
    engine.set_cache(cache.clone());

    let source = "Hello {$title}";
    let data = page_data("Home");
    let first = engine.render_from_string(source, &data, None).unwrap();
    let second = engine.render_from_string(source, &data, None).unwrap();
    assert_eq!(first, second);
    assert_eq!(cache.stores.load(Ordering::SeqCst), 1);

    engine.render_from_file("page@main", &data, None).unwrap();
    engine.render_from_file("page@main", &data, None).unwrap();
    assert_eq!(cache.stores.load(Ordering::SeqCst), 2);
}

#[test]
fn test_debug_mode_bypasses_cache() {
    let cache = Arc::new(CountingCache::default());
    let mut engine = fixture_engine();
    engine.set_cache(cache.clone()).set_debug(true);
    engine
        .render_from_file("greeting@main", &DataContext::new(), None)
        .unwrap();
    assert_eq!(cache.stores.load(Ordering::SeqCst), 0);
}

#[test]
fn test_directory_cache_survives_engine() {
    let dir = tempfile::tempdir().unwrap();
    let data = page_data("Home");

    let mut engine = fixture_engine();
    engine.set_cache(Arc::new(DirectoryCache::new(dir.path())));
    let first = engine.render_from_file("page@main", &data, None).unwrap();
    assert!(dir.path().join("tpl_page_main.tplc").is_file());

    // No registries at all: the stored artifact is all that can render.
    let mut cold = Engine::new();
    cold.set_cache(Arc::new(DirectoryCache::new(dir.path())));
    assert_eq!(cold.render_from_file("page@main", &data, None).unwrap(), first);
}

#[test]
fn test_concurrent_renders() {
    let mut engine = fixture_engine();
    engine.set_cache(Arc::new(MemoryCache::new()));
    let engine = Arc::new(engine);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                let title = format!("Page {}", i);
                let output = engine
                    .render_from_file("page@main", &page_data(&title), None)
                    .unwrap();
                (title, output)
            })
        })
        .collect();

    for handle in handles {
        let (title, output) = handle.join().unwrap();
        assert!(output.contains(&format!("<h1>{}</h1>", title)));
    }
}

#[test]
fn test_concurrent_renders_of_different_templates() {
    let mut engine = fixture_engine();
    engine.set_cache(Arc::new(MemoryCache::new()));
    let engine = Arc::new(engine);

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                let mut data = DataContext::new();
                data.assign("x", format!("X{}", i));
                let (output, expected) = match i % 3 {
                    0 => (
                        engine.render_from_file("literal@main", &data, None),
                        format!("{{$raw}} &lt;b&gt; X{}", i),
                    ),
                    1 => (
                        engine.render_from_file(
                            "page@main",
                            &page_data(&format!("P{}", i)),
                            None,
                        ),
                        format!(
                            "<header>Example</header>\n<h1>P{}</h1>\n<li>a</li>\n<li>b</li>\n<footer>Ann</footer>\n",
                            i
                        ),
                    ),
                    _ => (
                        engine.render_from_string("{literal}{$y} one{/literal}|{$x}", &data, None),
                        format!("{{$y}} one|X{}", i),
                    ),
                };
                let other = engine
                    .render_from_string("[{literal}{$z} two{/literal}]{$x}", &data, None)
                    .unwrap();
                assert_eq!(other, format!("[{{$z}} two]X{}", i));
                (output.unwrap(), expected)
            })
        })
        .collect();

    for handle in handles {
        let (output, expected) = handle.join().unwrap();
        assert_eq!(output, expected);
    }
}

#[test]
fn test_explicit_cache_key_stays_in_cache_dir() {
    let dir = tempfile::tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    let mut engine = Engine::new();
    engine.set_cache(Arc::new(DirectoryCache::new(&cache_dir)));
    let data = DataContext::new();

    assert_eq!(
        engine.render_from_string("hi", &data, Some("../escaped")).unwrap(),
        "hi"
    );
    engine.render_from_string("hi", &data, Some("page@main")).unwrap();

    let entries: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(entries, vec![std::ffi::OsString::from("cache")]);
    assert!(cache_dir.join("tpl_.._escaped.tplc").is_file());
    assert!(cache_dir.join("tpl_page_main.tplc").is_file());
    assert!(!cache_dir.join("page@main.tplc").exists());
}

#[test]
fn test_deeply_nested_expression_is_a_syntax_error() {
    let engine = Engine::new();
    let source = format!("{{:{}1{}}}", "(".repeat(3000), ")".repeat(3000));
    let err = engine
        .render_from_string(&source, &DataContext::new(), None)
        .unwrap_err();
    assert!(matches!(err, TemplateError::Syntax { .. }));

    let shallow = format!("{{:{}1{}}}", "(".repeat(20), ")".repeat(20));
    assert_eq!(
        engine
            .render_from_string(&shallow, &DataContext::new(), None)
            .unwrap(),
        "1"
    );
}

#[test]
fn test_engine_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("brace.toml");
    std::fs::write(
        &config_path,
        format!(
            "types = [\"mobile\"]\n\n[[paths]]\nname = \"main\"\nroot = {:?}\n",
            fixture_path("base").display().to_string()
        ),
    )
    .unwrap();

    let config = EngineConfig::from_file(&config_path).unwrap();
    let engine = Engine::from_config(&config);
    let mut data = DataContext::new();
    data.assign("site", "Example");
    assert_eq!(
        engine.render_from_file("header@main", &data, None).unwrap(),
        "<header class=\"mobile\">Example</header>"
    );
}
