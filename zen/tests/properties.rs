//! Property tests for catalogue listing, manifest encoding and the cache bound

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::TimeZone;
use proptest::prelude::*;
use tempfile::TempDir;
use zen::assets::{AssetFilter, CacheConfig, CacheStore, Catalog, Manifest, TagMatch};
use zen::clock::ManualClock;
use zen::task::suggest::{levenshtein, suggest, MAX_SUGGESTIONS};
use zen::testing::fixtures::FixtureRepo;

const TAGS: [&str; 4] = ["ai", "technical", "agile", "qa"];

fn repo_from(entries: &[(String, usize, Vec<usize>)]) -> FixtureRepo {
    entries
        .iter()
        .fold(FixtureRepo::new(), |repo, (name, category, tags)| {
            let tags: Vec<&str> = tags.iter().map(|&t| TAGS[t % TAGS.len()]).collect();
            let category = if category % 2 == 0 { "documentation" } else { "planning" };
            repo.template(name, category, &tags, name)
        })
}

fn entries() -> impl Strategy<Value = Vec<(String, usize, Vec<usize>)>> {
    proptest::collection::btree_map(
        "[a-z][a-z0-9-]{0,11}",
        (0usize..4, proptest::collection::vec(0usize..4, 0..3)),
        0..40,
    )
    .prop_map(|m| m.into_iter().map(|(n, (c, t))| (n, c, t)).collect())
}

proptest! {
    #[test]
    fn prop_pages_partition_the_matches(
        entries in entries(),
        offset in 0usize..50,
        limit in 1usize..20,
    ) {
        let catalog = Catalog::new(repo_from(&entries).manifest());
        let filter = AssetFilter::all().with_category("documentation");
        let everything = catalog.list(&filter, TagMatch::Any);
        let page = catalog.list(&filter.clone().page(offset, limit), TagMatch::Any);

        prop_assert_eq!(page.total, everything.total);
        let expected: Vec<_> = everything.results.iter().skip(offset).take(limit).cloned().collect();
        prop_assert_eq!(&page.results, &expected);
        prop_assert_eq!(page.has_more, offset + page.results.len() < page.total);
    }

    #[test]
    fn prop_listing_is_sorted_and_independent_of_document_order(entries in entries()) {
        let forward = Catalog::new(repo_from(&entries).manifest());
        let mut reversed_entries = entries.clone();
        reversed_entries.reverse();
        let reversed = Catalog::new(repo_from(&reversed_entries).manifest());

        let filter = AssetFilter::all().with_tags(["ai", "qa"]);
        let a = forward.list(&filter, TagMatch::Any);
        let b = reversed.list(&filter, TagMatch::Any);
        prop_assert_eq!(&a, &b);
        prop_assert!(a.results.windows(2).all(|w| w[0].name < w[1].name));
    }

    #[test]
    fn prop_all_tags_is_a_subset_of_any_tag(entries in entries()) {
        let catalog = Catalog::new(repo_from(&entries).manifest());
        let filter = AssetFilter::all().with_tags(["ai", "technical"]);
        let all = catalog.list(&filter, TagMatch::All);
        let any = catalog.list(&filter, TagMatch::Any);
        prop_assert!(all.total <= any.total);
        prop_assert!(all.results.iter().all(|a| any.results.contains(a)));
    }

    #[test]
    fn prop_manifest_survives_yaml(entries in entries()) {
        let manifest = repo_from(&entries).manifest();
        let yaml = manifest.to_yaml().unwrap();
        prop_assert_eq!(Manifest::parse(yaml.as_bytes()).unwrap(), manifest);
    }

    #[test]
    fn prop_suggestions_are_bounded_known_commands(
        query in "[a-z-]{1,10}",
        commands in proptest::collection::vec("[a-z-]{1,12}", 0..20),
    ) {
        let found = suggest(&query, &commands);
        prop_assert!(found.len() <= MAX_SUGGESTIONS);
        prop_assert!(found.iter().all(|f| commands.contains(f)));
    }

    #[test]
    fn prop_levenshtein_is_symmetric(a in "[a-z]{0,8}", b in "[a-z]{0,8}") {
        prop_assert_eq!(levenshtein(&a, &b), levenshtein(&b, &a));
        prop_assert!(levenshtein(&a, &b) <= a.len().max(b.len()));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_cache_never_exceeds_its_cap(sizes in proptest::collection::vec(1usize..1_500, 1..30)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let dir = TempDir::new().unwrap();
            let clock = ManualClock::new(chrono::Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
            let config = CacheConfig {
                root: dir.path().to_path_buf(),
                max_bytes: 4_096,
                default_ttl: Duration::from_secs(3_600),
                integrity_checks: true,
            };
            let cache = Arc::new(CacheStore::open(config, clock.shared()).await.unwrap());

            for (i, size) in sizes.iter().enumerate() {
                let body = Bytes::from(vec![b'a' + (i % 26) as u8; *size]);
                cache.put(&format!("asset:{i}"), body, None).await.unwrap();
                clock.advance(chrono::Duration::seconds(1));
                let info = cache.info().await;
                assert!(info.total_size_bytes <= info.max_size_bytes);
            }

            let last = format!("asset:{}", sizes.len() - 1);
            assert!(cache.contains(&last).await);
        });
    }
}
