//! Cache manager tests: record shape, fingerprint slots, ext guarding and
//! coherence with the API layer.

mod support;

use contentflow as cf;
use contentflow::Error;
use contentflow::backends::{cache, storage};
use contentflow::node::{Content, Meta};
use contentflow::uri::Uri;

const URI: &str = "i18n://sv-se@label/email.txt";

#[test]
fn test_cached_node_roundtrip() {
    let _guard = support::setup();

    assert!(matches!(
        storage().get(URI),
        Err(Error::NodeDoesNotExist(_))
    ));
    assert!(cache().get(URI).expect("cache get").is_none());

    let (node, _created) = storage()
        .set(
            &format!("{URI}#draft"),
            &Content::text("e-post"),
            &Meta::new(),
        )
        .expect("set");
    storage()
        .publish(&node.uri, &Meta::new())
        .expect("publish");

    let stats = support::with_cache_stats(|| {
        let node = cf::get_eager("i18n://label/email", Content::None).expect("get");
        assert_eq!(node.content().as_text(), Some("e-post"));
    });
    assert_eq!(stats.calls, 2);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.sets, 1);

    let cached = cache()
        .get("i18n://sv-se@label/email")
        .expect("cache get")
        .expect("cached node");
    assert_eq!(cached.uri, "i18n://sv-se@label/email.txt#1");
    assert_eq!(cached.content.as_deref(), Some("e-post"));

    let stats = support::with_cache_stats(|| {
        let node = cf::get_eager("i18n://label/email", Content::None).expect("get");
        assert_eq!(node.uri(), "i18n://sv-se@label/email.txt#1");
    });
    assert_eq!(stats.calls, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 0);

    cf::delete(&[URI]).expect("delete");
    assert!(cache().get(URI).expect("cache get").is_none());
}

#[test]
fn test_all_variants_share_one_slot() {
    let _guard = support::setup();

    cache()
        .set("i18n://sv-se@label/email.txt#1", Some("epost"))
        .expect("cache set");

    // Any ext/version variant of the logical node reads the same record.
    for variant in [
        "i18n://sv-se@label/email",
        "i18n://sv-se@label/email.txt",
        "i18n://sv-se@label/email#2",
    ] {
        let cached = cache()
            .get(variant)
            .expect("cache get")
            .expect("cached node");
        assert_eq!(cached.uri, "i18n://sv-se@label/email.txt#1");
        assert_eq!(cached.content.as_deref(), Some("epost"));
    }
}

#[test]
fn test_ext_mismatch_is_not_served() {
    let _guard = support::setup();

    cache()
        .set("i18n://sv-se@label/email.txt#1", Some("epost"))
        .expect("cache set");
    assert!(
        cache()
            .get("i18n://sv-se@label/email.md")
            .expect("cache get")
            .is_none()
    );
}

#[test]
fn test_get_many_deduplicates_requests() {
    let _guard = support::setup();

    cache()
        .set("i18n://sv-se@label/email.txt#1", Some("epost"))
        .expect("cache set");

    let uris = [Uri::parse(URI), Uri::parse(URI)];
    let nodes = cache().get_many(&uris).expect("get_many");
    assert_eq!(nodes.len(), 1);
    let cached = &nodes[&uris[0]];
    assert_eq!(cached.uri, "i18n://sv-se@label/email.txt#1");
    assert_eq!(cached.content.as_deref(), Some("epost"));
}

#[test]
fn test_delete_many_evicts() {
    let _guard = support::setup();

    let uris = [
        Uri::parse("i18n://sv-se@foo.txt"),
        Uri::parse("i18n://sv-se@bar.txt"),
    ];
    cache().set(&uris[0], Some("Foo")).expect("cache set");
    cache().set(&uris[1], Some("Bar")).expect("cache set");

    let stats = support::with_cache_stats(|| {
        assert_eq!(cache().get_many(&uris).expect("get_many").len(), 2);
    });
    assert_eq!(stats.hits, 2);

    cache().delete_many(&uris).expect("delete_many");

    let stats = support::with_cache_stats(|| {
        assert!(cache().get_many(&uris).expect("get_many").is_empty());
    });
    assert_eq!(stats.misses, 2);
}

#[test]
fn test_set_requires_ext() {
    let _guard = support::setup();

    assert!(matches!(
        cache().set("i18n://sv-se@foo", Some("Bar")),
        Err(Error::InvalidUri { .. })
    ));
}

#[test]
fn test_set_many_reads_back_under_base_uris() {
    let _guard = support::setup();

    let mut records = std::collections::BTreeMap::new();
    records.insert(
        Uri::parse("i18n://sv-se@foo.txt#1"),
        Some("Foo".to_owned()),
    );
    records.insert(
        Uri::parse("i18n://sv-se@bar.txt#2"),
        Some("Bar".to_owned()),
    );
    cache().set_many(&records).expect("set_many");

    let bases = [
        Uri::parse("i18n://sv-se@foo"),
        Uri::parse("i18n://sv-se@bar"),
    ];
    let stats = support::with_cache_stats(|| {
        let nodes = cache().get_many(&bases).expect("get_many");
        assert_eq!(nodes[&bases[0]].uri, "i18n://sv-se@foo.txt#1");
        assert_eq!(nodes[&bases[0]].content.as_deref(), Some("Foo"));
        assert_eq!(nodes[&bases[1]].uri, "i18n://sv-se@bar.txt#2");
        assert_eq!(nodes[&bases[1]].content.as_deref(), Some("Bar"));
    });
    assert_eq!(stats.calls, 1);
    assert_eq!(stats.hits, 2);
}
