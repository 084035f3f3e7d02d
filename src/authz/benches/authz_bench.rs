//! Route matching and permission resolution benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;
use warden_authz::store::InMemoryEntityStore;
use warden_authz::{
    AccessGroupAdmin, EntityStore, InMemoryCache, NewAccessGroup, NewPermission, NoopCache,
    PermissionCache, PermissionResolver, RouteMatcher, RouteRule,
};

fn create_matcher(count: usize) -> RouteMatcher {
    let rules = (0..count)
        .map(|i| {
            RouteRule::new(
                &format!("/api/v1/resource{}/:id/items/:item", i),
                "GET",
                vec![format!("read:resource{}", i)],
            )
            .unwrap()
        })
        .collect();
    RouteMatcher::new(rules)
}

fn bench_route_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("route_matching");

    for rule_count in [10, 100, 1000].iter() {
        let matcher = create_matcher(*rule_count);
        let last = format!("/api/v1/resource{}/42/items/7?verbose=1", rule_count - 1);

        group.bench_with_input(BenchmarkId::new("last_rule", rule_count), &last, |b, path| {
            b.iter(|| black_box(matcher.match_route(black_box(path), "GET")));
        });
        group.bench_with_input(
            BenchmarkId::new("no_match", rule_count),
            &"/health",
            |b, path| {
                b.iter(|| black_box(matcher.match_route(black_box(path), "GET")));
            },
        );
    }

    group.finish();
}

/// User 1 in `groups` groups, each holding 5 permissions
async fn seeded_store(groups: usize) -> InMemoryEntityStore {
    let store = InMemoryEntityStore::new();
    store.register_user(1).await;

    let admin = AccessGroupAdmin::new(Arc::new(store.clone()), Arc::new(NoopCache), false);
    for g in 0..groups {
        let group = admin
            .create_group(NewAccessGroup::new(format!("group-{}", g)))
            .await
            .unwrap();
        for p in 0..5 {
            let permission = admin
                .create_permission(NewPermission::new(format!("perm:{}:{}", g, p), "bench"))
                .await
                .unwrap();
            admin.assign_permission(group.id, permission.id).await.unwrap();
        }
        admin.add_user(group.id, 1).await.unwrap();
    }
    store
}

fn bench_resolution(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("permission_resolution");

    for group_count in [1, 10, 50].iter() {
        let store: Arc<dyn EntityStore> = Arc::new(rt.block_on(seeded_store(*group_count)));

        let cached: Arc<dyn PermissionCache> = Arc::new(InMemoryCache::default());
        let cached = PermissionResolver::new(store.clone(), cached);
        let uncached = PermissionResolver::new(store, Arc::new(NoopCache));

        group.bench_with_input(BenchmarkId::new("cached", group_count), &(), |b, _| {
            b.to_async(&rt)
                .iter(|| async { black_box(cached.resolve(1).await.unwrap()) });
        });
        group.bench_with_input(BenchmarkId::new("uncached", group_count), &(), |b, _| {
            b.to_async(&rt)
                .iter(|| async { black_box(uncached.resolve(1).await.unwrap()) });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_route_matching, bench_resolution);
criterion_main!(benches);
