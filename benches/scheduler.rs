//! Benchmark for scheduler pool selection
//!
//! Every selection lists pools from the store, so cost grows with the number
//! of advertised pools.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sds_controlplane::controlplane::scheduler::{PlacementRequest, Scheduler};
use sds_controlplane::domain::model::{
    AccessProtocol, BaseModel, Dock, Pool, Profile, ProfileProperties, ReplicationType,
    StorageType,
};
use sds_controlplane::domain::ports::{MetadataStore, MetadataStoreRef};
use sds_controlplane::store::MemoryStore;
use std::sync::Arc;
use tokio::runtime::Runtime;

const ZONES: [&str; 3] = ["east", "west", "north"];

fn profile() -> Profile {
    Profile {
        base: BaseModel::new(Some("default".into()), "", ""),
        name: "default".into(),
        description: String::new(),
        storage_type: StorageType::Block,
        properties: ProfileProperties::default(),
    }
}

async fn seeded_store(pools: usize) -> MetadataStoreRef {
    let store = Arc::new(MemoryStore::new());
    let dock_id = Dock::derive_id("bench", "b1");
    store
        .docks()
        .create(Dock {
            base: BaseModel::new(Some(dock_id.clone()), "", ""),
            name: "b1".into(),
            description: String::new(),
            node_id: "bench".into(),
            endpoint: "127.0.0.1:50049".into(),
            driver_name: "sample".into(),
            backend_name: "b1".into(),
            storage_type: StorageType::Block,
            metadata: Default::default(),
        })
        .await
        .expect("seed dock");

    for i in 0..pools {
        let name = format!("pool-{:04}", i);
        store
            .pools()
            .create(Pool {
                base: BaseModel::new(Some(Pool::derive_id(&dock_id, &name)), "", ""),
                name,
                description: String::new(),
                dock_id: dock_id.clone(),
                backend_name: "b1".into(),
                total_capacity: 1000,
                free_capacity: (i as u64 * 37) % 1000,
                storage_type: StorageType::Block,
                availability_zone: ZONES[i % ZONES.len()].into(),
                access_protocols: vec![AccessProtocol::Iscsi],
                replication_type: ReplicationType::None,
                multi_attach: i % 2 == 0,
                extras: Default::default(),
                stale: false,
            })
            .await
            .expect("seed pool");
    }
    store
}

fn bench_select(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let profile = profile();

    let mut group = c.benchmark_group("scheduler");
    group.throughput(Throughput::Elements(1));

    for pools in [10usize, 100, 1000] {
        let scheduler = Scheduler::new(rt.block_on(seeded_store(pools)));
        group.bench_with_input(BenchmarkId::new("select", pools), &pools, |b, _| {
            b.iter(|| {
                let request = PlacementRequest {
                    profile: &profile,
                    size: black_box(10),
                    availability_zone: Some("east".into()),
                    pool_hint: None,
                    multi_attach: true,
                    consistency_group: false,
                };
                rt.block_on(scheduler.select(&request))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_select);
criterion_main!(benches);
