use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use venom_channel::{ChannelConfig, DaemonChannel, ShellChannel};

fn bench_publish(c: &mut Criterion) {
    let daemon = DaemonChannel::create("bench_publish", ChannelConfig::default()).unwrap();
    let payload = [0x42u8; 256];

    let mut group = c.benchmark_group("seqlock");
    group.throughput(Throughput::Bytes(payload.len() as u64));

    group.bench_function("publish_256", |b| {
        b.iter(|| daemon.write_data(black_box(&payload)));
    });

    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let daemon = DaemonChannel::create("bench_read", ChannelConfig::default()).unwrap();
    let shell = ShellChannel::connect("bench_read").unwrap();
    daemon.write_data(&[0x42u8; 256]);
    let mut buf = [0u8; 256];

    let mut group = c.benchmark_group("seqlock");
    group.throughput(Throughput::Bytes(256));

    group.bench_function("read_256", |b| {
        b.iter(|| black_box(shell.read_data(&mut buf)));
    });

    group.finish();
    drop(shell);
    drop(daemon);
}

fn bench_command_roundtrip(c: &mut Criterion) {
    let daemon = DaemonChannel::create("bench_cmd", ChannelConfig::default()).unwrap();
    let shell = ShellChannel::connect("bench_cmd").unwrap();
    let mut buf = [0u8; 64];

    let mut group = c.benchmark_group("cmd_ring");
    group.throughput(Throughput::Elements(1));

    group.bench_function("send_recv", |b| {
        b.iter(|| {
            shell.try_send_command(black_box(b"set-volume 40"));
            black_box(daemon.try_recv_command(&mut buf));
        });
    });

    group.bench_function("recv_empty", |b| {
        b.iter(|| black_box(daemon.try_recv_command(&mut buf)));
    });

    group.finish();
    drop(shell);
    drop(daemon);
}

criterion_group!(benches, bench_publish, bench_read, bench_command_roundtrip);
criterion_main!(benches);
