mod common;

use std::fs::{self, OpenOptions};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use blockpipe::device::{AccessMode, BlockDevice, RawDevice};
use blockpipe::pipeline::{self, TransferOptions, progress::SilentProgress};

use common::{MemoryDevice, pattern};

fn options(block_size: usize, workers: usize) -> TransferOptions {
    TransferOptions {
        block_size,
        workers,
        progress_interval: Duration::from_millis(5),
        sync_on_finish: true,
    }
}

#[test]
fn file_round_trip_across_block_sizes_and_workers() {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let source_path = temp_dir.path().join("source.img");
    let size = 200_003usize;
    let source = pattern(size);
    fs::write(&source_path, &source).expect("write source");

    for workers in [1usize, 2, 8] {
        for block_size in [1000usize, 4096, 65536, 1 << 20] {
            let reader = RawDevice::open(&source_path, AccessMode::Read).expect("open source");
            let reader: Arc<dyn BlockDevice> = Arc::new(reader);
            let mut stream: Vec<u8> = Vec::new();
            let read_stats = pipeline::read_device(
                reader,
                &mut stream,
                &options(block_size, workers),
                Arc::new(SilentProgress),
            )
            .expect("read pipeline");
            assert_eq!(read_stats.bytes_transferred, size as u64);
            assert_eq!(stream, source, "workers={workers} block_size={block_size}");

            let target_path = temp_dir.path().join(format!("target_{workers}_{block_size}.img"));
            let target = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&target_path)
                .expect("create target");
            target.set_len(size as u64).expect("size target");
            drop(target);

            let writer = RawDevice::open(&target_path, AccessMode::Write).expect("open target");
            let writer: Arc<dyn BlockDevice> = Arc::new(writer);
            let write_stats = pipeline::write_device(
                writer,
                Cursor::new(stream),
                &options(block_size, workers),
                Arc::new(SilentProgress),
            )
            .expect("write pipeline");
            assert_eq!(write_stats.bytes_transferred, size as u64);

            let restored = fs::read(&target_path).expect("read target");
            assert_eq!(restored, source, "workers={workers} block_size={block_size}");
        }
    }
}

#[test]
fn memory_round_trip_with_jittered_completion() {
    let size = 64 * 1024 + 17;
    let block_size = 4096;
    let source = pattern(size);
    let jitter = |chunk: u64| Duration::from_micros((chunk * 7919 % 5) * 300);

    let reader = Arc::new(MemoryDevice::new(source.clone(), block_size).with_delay(jitter));
    let mut stream: Vec<u8> = Vec::new();
    pipeline::read_device(
        reader,
        &mut stream,
        &options(block_size, 4),
        Arc::new(SilentProgress),
    )
    .expect("read pipeline");

    let target = Arc::new(MemoryDevice::zeroed(size, block_size).with_delay(jitter));
    let stats = pipeline::write_device(
        target.clone(),
        Cursor::new(stream),
        &options(block_size, 4),
        Arc::new(SilentProgress),
    )
    .expect("write pipeline");

    assert_eq!(stats.chunks, 17);
    assert_eq!(target.contents(), source);
    let mut written = target.writes();
    written.sort_unstable();
    assert_eq!(written, (0..17).collect::<Vec<u64>>());
}

#[test]
fn empty_device_transfers_nothing() {
    let device = Arc::new(MemoryDevice::zeroed(0, 512));
    let mut stream: Vec<u8> = Vec::new();
    let stats = pipeline::read_device(
        device.clone(),
        &mut stream,
        &options(512, 2),
        Arc::new(SilentProgress),
    )
    .expect("read pipeline");
    assert!(stream.is_empty());
    assert_eq!(stats.chunks, 0);

    let stats = pipeline::write_device(
        device,
        Cursor::new(Vec::<u8>::new()),
        &options(512, 2),
        Arc::new(SilentProgress),
    )
    .expect("write pipeline");
    assert_eq!(stats.bytes_transferred, 0);
}

#[test]
fn short_input_leaves_device_tail_untouched() {
    let block_size = 100;
    let device = Arc::new(MemoryDevice::new(vec![0xAA; 1000], block_size));
    let input = pattern(250);
    let stats = pipeline::write_device(
        device.clone(),
        Cursor::new(input.clone()),
        &options(block_size, 3),
        Arc::new(SilentProgress),
    )
    .expect("write pipeline");

    assert_eq!(stats.bytes_transferred, 250);
    assert_eq!(stats.chunks, 3);
    let contents = device.contents();
    assert_eq!(&contents[..250], &input[..]);
    assert!(contents[250..].iter().all(|&b| b == 0xAA));
}
