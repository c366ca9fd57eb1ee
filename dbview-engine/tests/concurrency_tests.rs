//! Many logical requests through one session

use std::sync::Arc;

use dbview_engine::{DbView, Entity, LoadOptions, Mode, ViewResult};
use dbview_test_utils::fixtures::{family_origin, memory_cache, FamilyShape};
use dbview_test_utils::{family_schema, Child, Parent};
use futures_util::future::join_all;

fn wide() -> FamilyShape {
    FamilyShape {
        parents: 10,
        children_per_parent: 100,
        grandchildren_per_child: 0,
    }
}

async fn count_children(view: &DbView, parent_id: i64) -> ViewResult<usize> {
    let parent = view.load::<Parent>(parent_id, LoadOptions::default()).await?;
    Ok(parent
        .relation::<Child>("children", LoadOptions::default())
        .await?
        .len())
}

#[tokio::test]
async fn test_concurrent_requests_agree() -> ViewResult<()> {
    let shape = wide();
    let origin = family_origin(&shape)?;
    let view = DbView::builder(family_schema())
        .origin(Arc::new(origin))
        .build()?;
    view.open().await?;

    let counts = join_all(shape.parent_ids().into_iter().map(|id| count_children(&view, id))).await;
    let total: usize = counts.into_iter().collect::<ViewResult<Vec<_>>>()?.into_iter().sum();
    assert_eq!(total, 10 * 100);
    assert_eq!(view.wrapped_count(), 10 + 10 * 100);
    view.close().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_spawned_requests_share_handles() -> ViewResult<()> {
    let shape = wide();
    let origin = family_origin(&shape)?;
    let cache = memory_cache();
    let view = DbView::builder(family_schema())
        .origin(Arc::new(origin.clone()))
        .cache(Arc::new(cache.clone()))
        .mode(Mode::PreferCache)
        .build()?;
    view.open().await?;

    let tasks: Vec<_> = (0..4)
        .flat_map(|_| shape.parent_ids())
        .map(|id| {
            let view = view.clone();
            tokio::spawn(async move { count_children(&view, id).await })
        })
        .collect();

    let mut total = 0;
    for task in join_all(tasks).await {
        total += task.expect("task panicked")?;
    }
    assert_eq!(total, 4 * 10 * 100);

    // Every parent and child is wrapped exactly once, however many requests raced.
    assert_eq!(view.wrapped_count(), 10 + 10 * 100);
    assert_eq!(cache.row_count(Child::NAME)?, 1000);
    assert_eq!(cache.ledger_len()?, 20);
    view.close().await
}
