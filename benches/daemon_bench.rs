use criterion::{black_box, criterion_group, criterion_main, Criterion};
use daemon_lifecycle::{
    CancellationSource, DaemonConfig, Daemon, HookResult, Interrupt, TaskController,
    WakeableEvent,
};
use std::sync::Arc;
use std::time::Duration;

fn bench_poll_running(c: &mut Criterion) {
    let daemon = Daemon::new();
    daemon.start_all();

    c.bench_function("is_running_poll", |b| {
        b.iter(|| black_box(daemon.is_running()));
    });
}

fn bench_deferred_dispatch(c: &mut Criterion) {
    let daemon = Daemon::new();
    daemon.set_reload_hook(|| HookResult::Success);
    daemon.start_all();

    c.bench_function("reload_dispatch", |b| {
        b.iter(|| {
            daemon.deliver(Interrupt::Reload);
            black_box(daemon.is_running());
        });
    });
}

fn bench_config_building(c: &mut Criterion) {
    c.bench_function("config_building", |b| {
        b.iter(|| {
            let config = DaemonConfig::builder()
                .name("bench-daemon")
                .poll_interval(Duration::from_millis(100))
                .unwrap()
                .initial_wait(Duration::from_millis(10))
                .unwrap()
                .build()
                .unwrap();
            black_box(config);
        });
    });
}

fn bench_task_start_stop(c: &mut Criterion) {
    let event = Arc::new(WakeableEvent::new());

    c.bench_function("task_start_stop", |b| {
        b.iter(|| {
            let source = CancellationSource::new();
            let mut task = TaskController::new("bench");
            task.start(
                Duration::from_secs(60),
                Duration::ZERO,
                |wait: Duration| wait,
                source.token(),
                Arc::clone(&event),
            )
            .unwrap();
            source.request_cancel();
            task.stop();
        });
    });
}

criterion_group!(
    benches,
    bench_poll_running,
    bench_deferred_dispatch,
    bench_config_building,
    bench_task_start_stop
);
criterion_main!(benches);
