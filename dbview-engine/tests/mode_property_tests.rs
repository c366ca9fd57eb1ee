//! Property tests for mode policy and identity stability

use std::collections::HashMap;
use std::sync::Arc;

use dbview_engine::{DbView, Handle, LoadOptions, MemoryStore, Mode, ViewResult};
use dbview_test_utils::fixtures::{family_origin, memory_cache, FamilyShape};
use dbview_test_utils::generators::{arb_limit, arb_mode};
use dbview_test_utils::{family_schema, Child, DataStore, Parent};
use proptest::prelude::*;
use tokio::runtime::Runtime;

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn view(origin: &MemoryStore, cache: &MemoryStore, mode: Mode) -> ViewResult<DbView> {
    DbView::builder(family_schema())
        .origin(Arc::new(origin.clone()))
        .cache(Arc::new(cache.clone()))
        .mode(mode)
        .build()
}

async fn preload(origin: &MemoryStore, cache: &MemoryStore) -> ViewResult<()> {
    let view = view(origin, cache, Mode::Freshen)?;
    view.open().await?;
    view.load::<Parent>(1, LoadOptions::default()).await?;
    view.close().await
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// The effective mode alone decides whether a load by identity reaches the origin.
    #[test]
    fn prop_effective_mode_decides_origin_contact(
        view_mode in arb_mode(),
        limit in arb_limit(),
        cached in any::<bool>(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let origin = family_origin(&FamilyShape::single_parent())?;
            let cache = memory_cache();
            if cached {
                preload(&origin, &cache).await?;
            }

            let view = view(&origin, &cache, view_mode)?;
            view.open().await?;
            let before = origin.stats();
            let options = LoadOptions { mode: limit, ..LoadOptions::default() };
            let result = view.load::<Parent>(1, options).await;
            let fetches = origin.stats().since(&before).fetches();

            match Mode::effective(view_mode, limit) {
                Mode::Freshen => {
                    prop_assert!(result.is_ok());
                    prop_assert_eq!(fetches, 1);
                }
                Mode::PreferCache => {
                    prop_assert!(result.is_ok());
                    prop_assert_eq!(fetches, if cached { 0 } else { 1 });
                }
                Mode::Offline => {
                    prop_assert_eq!(result.is_ok(), cached);
                    if !cached {
                        prop_assert!(result.unwrap_err().is_offline());
                    }
                    prop_assert_eq!(fetches, 0);
                }
            }
            view.close().await?;
            Ok(())
        })?;
    }

    /// Within one open window a row is wrapped once, whatever order it is reached in.
    #[test]
    fn prop_repeated_loads_share_handles(
        ids in prop::collection::vec(0i64..3, 1..12),
        freshen in any::<bool>(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let origin = family_origin(&FamilyShape::single_parent())?;
            let mode = if freshen { Mode::Freshen } else { Mode::PreferCache };
            let view = view(&origin, &memory_cache(), mode)?;
            view.open().await?;

            let mut seen: HashMap<i64, Handle<Child>> = HashMap::new();
            for id in ids {
                let child = view.load::<Child>(id, LoadOptions::default()).await?;
                if let Some(first) = seen.get(&id) {
                    prop_assert!(first.ptr_eq(&child));
                }
                seen.insert(id, child);
            }

            let p1 = view.load::<Parent>(1, LoadOptions::default()).await?;
            for child in p1.relation::<Child>("children", LoadOptions::default()).await? {
                let id = child.get()?.id;
                if let Some(first) = seen.get(&id) {
                    prop_assert!(first.ptr_eq(&child));
                }
            }
            prop_assert_eq!(view.wrapped_count(), 4);
            view.close().await?;
            Ok(())
        })?;
    }
}
