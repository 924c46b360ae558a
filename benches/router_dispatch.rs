use criterion::{black_box, criterion_group, criterion_main, Criterion};
use heka::matcher::MatcherSpecification;
use heka::pack::PackPool;
use heka::router::Router;
use tokio::runtime::Runtime;

fn bench_dispatch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("router dispatch, one matching consumer", |b| {
        b.iter(|| {
            rt.block_on(async {
                let pool = PackPool::new(64);
                let mut router = Router::new(pool.clone(), 256);
                let matcher = MatcherSpecification::compile("Type == 'nginx.access'").unwrap();
                let mut rx = router.register("sink", matcher, None, true, 256);
                let handle = router.handle();
                let join = tokio::spawn(router.run());

                for _ in 0..100 {
                    let pack = pool.acquire().await;
                    pack.with_message_mut(|m| m.msg_type = "nginx.access".to_string());
                    handle.inject(pack).await.unwrap();
                }
                for _ in 0..100 {
                    let pack = rx.recv().await.unwrap();
                    black_box(&pack);
                    pack.release().unwrap();
                }

                handle.shutdown();
                join.await.unwrap();
            })
        });
    });

    c.bench_function("router dispatch, five consumers three matching", |b| {
        b.iter(|| {
            rt.block_on(async {
                let pool = PackPool::new(64);
                let mut router = Router::new(pool.clone(), 256);
                let mut receivers = Vec::new();
                for i in 0..5 {
                    let expr = if i % 2 == 0 {
                        "Type == 'nginx.access'"
                    } else {
                        "Type == 'nginx.error'"
                    };
                    let matcher = MatcherSpecification::compile(expr).unwrap();
                    receivers.push(router.register(format!("consumer{i}"), matcher, None, true, 256));
                }
                let handle = router.handle();
                let join = tokio::spawn(router.run());

                for _ in 0..100 {
                    let pack = pool.acquire().await;
                    pack.with_message_mut(|m| m.msg_type = "nginx.access".to_string());
                    handle.inject(pack).await.unwrap();
                }
                // Consumers 0, 2, 4 matched on "nginx.access"; 1 and 3 did not.
                for rx in receivers.iter_mut().step_by(2) {
                    for _ in 0..100 {
                        let pack = rx.recv().await.unwrap();
                        black_box(&pack);
                        pack.release().unwrap();
                    }
                }

                handle.shutdown();
                join.await.unwrap();
            })
        });
    });
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
