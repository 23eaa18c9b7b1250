// tests/cache_keys_prop.rs
// Key derivation: equal queries share a key, different queries never do.

use proptest::prelude::*;

use zanly::cache::keys::{MaterialFilterQuery, MaterialListQuery, MaterialSearchQuery, MAX_LIMIT};
use zanly::cache::CacheKey;

fn list(class: Option<String>, subject: Option<String>, page: Option<u32>, limit: Option<u32>) -> MaterialListQuery {
    MaterialListQuery {
        page,
        limit,
        class,
        subject,
    }
}

proptest! {
    #[test]
    fn prop_distinct_class_values_never_collide(a in ".{1,12}", b in ".{1,12}") {
        let ka = list(Some(a.clone()), None, None, None).cache_key();
        let kb = list(Some(b.clone()), None, None, None).cache_key();
        let fa = list(Some(a), None, None, None).filter();
        let fb = list(Some(b), None, None, None).filter();
        // Same key if and only if the store would see the same filter.
        prop_assert_eq!(ka == kb, fa == fb);
    }

    #[test]
    fn prop_delimiter_cannot_shift_segments(class in "[a-z:]{1,8}", subject in "[a-z:]{1,8}") {
        let key = list(Some(class), Some(subject), None, None).cache_key();
        // Fixed shape: materials, then four name:value pairs.
        prop_assert_eq!(key.as_str().split(':').count(), 9);
    }

    #[test]
    fn prop_page_and_limit_are_clamped_before_keying(page in any::<u32>(), limit in any::<u32>()) {
        let q = list(None, None, Some(page), Some(limit));
        let p = q.pagination();
        prop_assert!(p.page >= 1);
        prop_assert!((1..=MAX_LIMIT).contains(&p.limit));

        let same = list(None, None, Some(p.page), Some(p.limit));
        prop_assert_eq!(q.cache_key(), same.cache_key());
    }

    #[test]
    fn prop_search_text_is_trimmed(q in "[a-z]{1,10}", pad in " {0,3}") {
        let padded = MaterialSearchQuery { q: Some(format!("{pad}{q}{pad}")), page: None, limit: None };
        let bare = MaterialSearchQuery { q: Some(q), page: None, limit: None };
        prop_assert_eq!(padded.cache_key(), bare.cache_key());
    }

    #[test]
    fn prop_rag_keys_are_per_prompt(a in ".{1,40}", b in ".{1,40}") {
        prop_assert_eq!(CacheKey::rag(&a) == CacheKey::rag(&b), a == b);
    }
}

#[test]
fn test_all_and_blank_mean_no_filter() {
    let none = list(None, None, None, None).cache_key();
    for sentinel in ["all", "ALL", "", "  "] {
        let q = list(Some(sentinel.to_string()), Some(sentinel.to_string()), None, None);
        assert_eq!(q.cache_key(), none, "sentinel {:?}", sentinel);
    }
}

#[test]
fn test_filter_listing_has_its_own_namespace() {
    let filter = MaterialFilterQuery {
        kind: Some("Notes".into()),
        ..Default::default()
    };
    assert!(filter.cache_key().as_str().starts_with("materials:filter:"));
    assert_ne!(filter.cache_key(), MaterialListQuery::default().cache_key());
}
