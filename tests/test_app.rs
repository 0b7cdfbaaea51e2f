//! Application-level tests: settings scoping and thread-locality,
//! environment scopes, and lifecycle events.

mod support;

use serde_json::json;

use contentflow as cf;
use contentflow::environment::{self, EnvOverride};
use contentflow::node::Content;
use contentflow::{conf, events};
use support::settings_map;

#[test]
fn test_scoped_settings_restore() {
    let _guard = support::setup();

    let before = conf::settings().get_str("STORAGE");
    {
        let _scope = conf::settings().scoped(settings_map(json!({"STORAGE": "locmem://other"})));
        assert_eq!(
            conf::settings().get_str("STORAGE"),
            Some("locmem://other".to_owned())
        );
    }
    assert_eq!(conf::settings().get_str("STORAGE"), before);
}

#[test]
fn test_local_settings_are_thread_local_and_merge() {
    let _guard = support::setup();

    conf::settings().configure(settings_map(json!({
        "STORAGE_PIPE": {"FOO": "bar"},
    })));

    std::thread::spawn(|| {
        conf::settings().configure_local(settings_map(json!({
            "STORAGE_PIPE": {"HAM": "spam"},
        })));
        let value = conf::settings().get("STORAGE_PIPE").expect("value");
        // The local overlay deep-merges on top of base settings.
        assert_eq!(value["FOO"], json!("bar"));
        assert_eq!(value["HAM"], json!("spam"));
    })
    .join()
    .expect("thread");

    let value = conf::settings().get("STORAGE_PIPE").expect("value");
    assert_eq!(value["FOO"], json!("bar"));
    assert!(value.get("HAM").is_none());
}

#[test]
fn test_environment_named_scope() {
    let _guard = support::setup();

    let state = environment::state();
    assert_eq!(state.i18n, vec!["sv-se".to_owned()]);
    assert_eq!(state.l10n, vec!["tests".to_owned()]);

    assert!(environment::pop().is_err());

    {
        let _env = environment::scoped(
            EnvOverride::i18n(["sv"])
                .with_l10n(["loc"])
                .with_g11n(["glob"]),
        );
        let state = environment::state();
        assert_eq!(state.i18n, vec!["sv".to_owned()]);
        assert_eq!(state.l10n, vec!["loc".to_owned()]);
        assert_eq!(state.g11n, vec!["glob".to_owned()]);
    }

    conf::settings().configure(settings_map(json!({
        "ENVIRONMENT": {
            "default": {"i18n": "sv-se", "l10n": "tests", "g11n": "global"},
            "local": {"i18n": ["sv", "en"], "l10n": ["foo", "bar"]},
        },
    })));

    {
        let _env = environment::scoped_named("local").expect("scope");
        let state = environment::state();
        assert_eq!(state.i18n, vec!["sv".to_owned(), "en".to_owned()]);
        assert_eq!(state.l10n, vec!["foo".to_owned(), "bar".to_owned()]);
        // Unset schemes inherit.
        assert_eq!(state.g11n, vec!["global".to_owned()]);
    }

    assert!(environment::scoped_named("missing").is_err());
}

#[test]
fn test_environment_snapshot_outlives_scope() {
    let _guard = support::setup();

    let buffered = {
        let _env = environment::scoped(EnvOverride::i18n(["en-us"]));
        cf::get("i18n://label/email", Content::None)
    };

    // The node snapshotted its environment at creation; flushing after
    // the scope ended still resolves against en-us.
    assert_eq!(
        buffered.uri().expect("uri"),
        "i18n://en-us@label/email.txt"
    );
}

#[test]
fn test_publish_event() {
    let _guard = support::setup();

    let seen: std::sync::Arc<std::sync::Mutex<Vec<String>>> =
        std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&seen);
    let id = events::listen(events::PUBLISH, move |nodes| {
        let mut sink = sink.lock().expect("sink");
        sink.extend(nodes.iter().map(|node| node.uri().to_string()));
    });

    let node = cf::set_with(
        "sv-se@foo/bar",
        "baz",
        cf::SetOptions {
            publish: false,
            ..Default::default()
        },
    )
    .expect("set");
    assert!(seen.lock().expect("sink").is_empty());

    cf::publish(&node.uri().to_string()).expect("publish");
    assert_eq!(
        seen.lock().expect("sink").as_slice(),
        ["i18n://sv-se@foo/bar.txt#1".to_owned()]
    );

    events::mute(events::PUBLISH, id);
    cf::set("sv-se@foo/other", "x").expect("set");
    assert_eq!(seen.lock().expect("sink").len(), 1);
}
