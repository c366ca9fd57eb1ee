//! Offline reads, fallbacks, and origin round-trip counting

use std::sync::Arc;

use dbview_engine::{DbView, Entity, LoadOptions, MemoryStore, Mode, ViewError, ViewResult};
use dbview_test_utils::assertions::{assert_fetches, assert_offline};
use dbview_test_utils::fixtures::{family_origin, memory_cache, FamilyShape};
use dbview_test_utils::{family_schema, init_tracing, Child, DataStore, Grandchild, Parent};

fn online(origin: &MemoryStore, cache: &MemoryStore, mode: Mode) -> ViewResult<DbView> {
    DbView::builder(family_schema())
        .origin(Arc::new(origin.clone()))
        .cache(Arc::new(cache.clone()))
        .mode(mode)
        .build()
}

fn offline(cache: &MemoryStore) -> ViewResult<DbView> {
    DbView::builder(family_schema())
        .cache(Arc::new(cache.clone()))
        .mode(Mode::Offline)
        .build()
}

#[tokio::test]
async fn test_offline_reopen_reproduces_children() -> ViewResult<()> {
    init_tracing();
    let origin = family_origin(&FamilyShape::single_parent())?;
    let cache = memory_cache();

    let view = online(&origin, &cache, Mode::Freshen)?;
    view.open().await?;
    let before = origin.stats();
    let p1 = view.load::<Parent>(1, LoadOptions::default()).await?;
    let children = p1.relation::<Child>("children", LoadOptions::default()).await?;
    let names: Vec<String> = children
        .iter()
        .map(|c| c.get().map(|c| c.name))
        .collect::<ViewResult<_>>()?;
    assert_eq!(names, vec!["c0", "c1", "c2"]);
    assert_fetches(&origin, &before, 2);
    view.close().await?;

    let before = origin.stats();
    let view = offline(&cache)?;
    view.open().await?;
    let p1 = view.load::<Parent>(1, LoadOptions::default()).await?;
    let cached = p1.relation::<Child>("children", LoadOptions::default()).await?;
    let cached_names: Vec<String> = cached
        .iter()
        .map(|c| c.get().map(|c| c.name))
        .collect::<ViewResult<_>>()?;
    assert_eq!(cached_names, names);
    assert_fetches(&origin, &before, 0);

    assert_offline(
        cached[0]
            .relation::<Grandchild>("grandchildren", LoadOptions::default())
            .await,
    );
    view.close().await
}

#[tokio::test]
async fn test_offline_error_names_the_read() -> ViewResult<()> {
    let cache = memory_cache();
    let view = offline(&cache)?;
    view.open().await?;

    match view.load::<Parent>(7, LoadOptions::default()).await {
        Err(ViewError::IsOffline { what }) => assert_eq!(what, "parent#7"),
        other => panic!("expected IsOffline, got {:?}", other),
    }
    view.close().await
}

#[tokio::test]
async fn test_offline_fallback_is_returned_verbatim() -> ViewResult<()> {
    let origin = family_origin(&FamilyShape::three_level())?;
    let cache = memory_cache();

    let view = online(&origin, &cache, Mode::Freshen)?;
    view.open().await?;
    view.load::<Parent>(1, LoadOptions::default()).await?;
    view.load::<Child>(5, LoadOptions::default()).await?;
    view.close().await?;

    let view = offline(&cache)?;
    view.open().await?;
    let p1 = view.load::<Parent>(1, LoadOptions::default()).await?;
    let c5 = view.load::<Child>(5, LoadOptions::default()).await?;

    let none = p1
        .relation::<Child>("children", LoadOptions::new().or_fallback(Vec::new()))
        .await?;
    assert!(none.is_empty());

    let stand_in = p1
        .relation::<Child>("children", LoadOptions::new().or_fallback(vec![c5.clone()]))
        .await?;
    assert_eq!(stand_in.len(), 1);
    assert!(stand_in[0].ptr_eq(&c5));

    let parent = c5
        .reference::<Parent>("parent", "parent_id", LoadOptions::new().or_fallback(None))
        .await?;
    assert!(parent.is_none());
    view.close().await?;

    let view = online(&origin, &cache, Mode::PreferCache)?;
    view.open().await?;
    let p1 = view.load::<Parent>(1, LoadOptions::default()).await?;
    let c5 = view.load::<Child>(5, LoadOptions::default()).await?;
    assert_eq!(p1.relation::<Child>("children", LoadOptions::default()).await?.len(), 4);
    let parent = c5
        .reference::<Parent>("parent", "parent_id", LoadOptions::default())
        .await?
        .expect("c5 has a parent");
    assert_eq!(parent.get()?.id, 2);
    view.close().await?;

    let view = offline(&cache)?;
    view.open().await?;
    let p1 = view.load::<Parent>(1, LoadOptions::default()).await?;
    let c5 = view.load::<Child>(5, LoadOptions::default()).await?;
    let children = p1
        .relation::<Child>("children", LoadOptions::new().or_fallback(Vec::new()))
        .await?;
    assert_eq!(children.len(), 4);
    let parent = c5
        .reference::<Parent>("parent", "parent_id", LoadOptions::new().or_fallback(None))
        .await?;
    assert_eq!(parent.map(|p| p.get().map(|p| p.id)).transpose()?, Some(2));
    view.close().await
}

#[tokio::test]
async fn test_unloaded_relations_stay_uncached() -> ViewResult<()> {
    let origin = family_origin(&FamilyShape::three_level())?;
    let cache = memory_cache();

    let view = online(&origin, &cache, Mode::Freshen)?;
    view.open().await?;
    let p1 = view.load::<Parent>(1, LoadOptions::default()).await?;
    p1.relation::<Child>("children", LoadOptions::default()).await?;
    view.close().await?;

    let view = offline(&cache)?;
    view.open().await?;
    let p1 = view.load::<Parent>(1, LoadOptions::default()).await?;
    let children = p1.relation::<Child>("children", LoadOptions::default()).await?;
    assert_offline(
        children[0]
            .relation::<Grandchild>("grandchildren", LoadOptions::default())
            .await,
    );
    assert_offline(
        children[3]
            .relation::<Grandchild>("grandchildren", LoadOptions::default())
            .await,
    );
    view.close().await
}

#[tokio::test]
async fn test_missing_row_by_mode() -> ViewResult<()> {
    let origin = family_origin(&FamilyShape::single_parent())?;

    let view = online(&origin, &memory_cache(), Mode::Offline)?;
    view.open().await?;
    assert_offline(view.load::<Child>(100_500, LoadOptions::default()).await);
    view.close().await?;

    for mode in [Mode::PreferCache, Mode::Freshen] {
        let view = online(&origin, &memory_cache(), mode)?;
        view.open().await?;
        let err = view
            .load::<Child>(100_500, LoadOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "{:?}", err);
        view.close().await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_row_deleted_at_origin() -> ViewResult<()> {
    let origin = family_origin(&FamilyShape::single_parent())?;
    let cache = memory_cache();

    let view = online(&origin, &cache, Mode::PreferCache)?;
    view.open().await?;
    let c2 = view.load::<Child>(2, LoadOptions::default()).await?;
    assert!(origin.remove(Child::NAME, c2.identity()?)?);

    let before = origin.stats();
    let cached = view.load::<Child>(2, LoadOptions::default()).await?;
    assert!(cached.ptr_eq(&c2));
    assert_fetches(&origin, &before, 0);

    assert_eq!(c2.get()?.name, "c2");
    view.close().await?;

    let fresh = online(&origin, &cache, Mode::Freshen)?;
    fresh.open().await?;
    let err = fresh
        .load::<Child>(2, LoadOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "{:?}", err);
    fresh.close().await
}

#[tokio::test]
async fn test_offline_limit_on_online_view() -> ViewResult<()> {
    let origin = family_origin(&FamilyShape::single_parent())?;
    let view = online(&origin, &memory_cache(), Mode::Freshen)?;
    view.open().await?;

    let before = origin.stats();
    assert_offline(view.load::<Parent>(1, LoadOptions::limit(Mode::Offline)).await);
    assert_fetches(&origin, &before, 0);

    view.load::<Parent>(1, LoadOptions::default()).await?;
    let before = origin.stats();
    let p1 = view.load::<Parent>(1, LoadOptions::limit(Mode::Offline)).await?;
    assert_eq!(p1.get()?.name, "p1");
    assert_fetches(&origin, &before, 0);
    view.close().await
}

#[tokio::test]
async fn test_unavailable_origin_is_an_error() -> ViewResult<()> {
    let origin = family_origin(&FamilyShape::single_parent())?;
    let view = online(&origin, &memory_cache(), Mode::PreferCache)?;
    view.open().await?;

    origin.set_unavailable(true);
    let err = view.load::<Parent>(1, LoadOptions::default()).await.unwrap_err();
    assert!(!err.is_offline());
    assert!(matches!(err, ViewError::Storage(_)), "{:?}", err);

    origin.set_unavailable(false);
    assert_eq!(view.load::<Parent>(1, LoadOptions::default()).await?.get()?.id, 1);
    view.close().await
}
