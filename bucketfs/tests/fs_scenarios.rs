use bucketfs::cadapter::client::RemoteOp;
use bucketfs::cadapter::memory::{Fault, MemoryBackend};
use bucketfs::vfs::config::{FsConfig, MIB};
use bucketfs::vfs::gateway::RetryPolicy;
use bucketfs::vfs::io::reader::ReadOptions;
use bucketfs::vfs::io::writer::WriterOptions;
use bucketfs::vfs::listing::FindOptions;
use bucketfs::{ObjectFs, VfsError};
use bytes::Bytes;
use std::time::Duration;

fn new_fs() -> ObjectFs<MemoryBackend> {
    let backend = MemoryBackend::new();
    backend.create_bucket_now("bkt");
    ObjectFs::new(backend, FsConfig::default())
        .with_retry_policy(RetryPolicy::new(5).base_delay(Duration::from_millis(1)))
}

fn pattern(len: u64) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn batch_size(target: &str) -> usize {
    target
        .split_once('(')
        .and_then(|(_, rest)| rest.split_once(' '))
        .and_then(|(n, _)| n.parse().ok())
        .unwrap_or(0)
}

#[tokio::test]
async fn write_then_read_back_across_block_boundaries() {
    let fs = new_fs();
    let block = 5 * MIB;
    for len in [0, 1, block, block + 1, 2 * block + 3] {
        let path = format!("bkt/round/{len}");
        let data = pattern(len);

        let mut writer = fs
            .open_write(&path, WriterOptions::default().block_size(block))
            .unwrap();
        for chunk in data.chunks(MIB as usize) {
            assert_eq!(writer.write(chunk).await.unwrap(), chunk.len());
        }
        writer.close().await.unwrap();
        assert!(writer.is_closed());

        assert_eq!(fs.size(&path).await.unwrap(), len);
        let mut reader = fs.open_read(&path, ReadOptions::default()).await.unwrap();
        let back = reader.read_to_end().await.unwrap();
        assert_eq!(back.len() as u64, len, "length {len}");
        assert!(back[..] == data[..], "content mismatch at length {len}");
    }
    assert_eq!(fs.backend().pending_uploads("bkt"), 0);
}

#[tokio::test]
async fn recursive_rm_deletes_in_bounded_batches() {
    let fs = new_fs();
    fs.backend().insert_object("bkt", "many/", Vec::<u8>::new());
    for i in 0..2500 {
        fs.backend().insert_object("bkt", &format!("many/k{i:04}"), vec![1u8]);
    }
    fs.backend().insert_object("bkt", "keep", b"k".to_vec());
    fs.backend().reset_calls();

    fs.rm(&["bkt/many"], true, None).await.unwrap();

    let batches: Vec<usize> = fs
        .backend()
        .calls()
        .iter()
        .filter(|c| c.op == RemoteOp::DeleteObjects)
        .map(|c| batch_size(&c.target))
        .collect();
    assert_eq!(batches.len(), 3);
    assert!(batches.iter().all(|n| (1..=1000).contains(n)), "{batches:?}");
    // 2500 files plus the `many/` placeholder, each sent once
    assert_eq!(batches.iter().sum::<usize>(), 2501);
    assert!(fs.backend().object_data("bkt", "many/").is_none());

    for i in [0, 999, 1000, 2499] {
        assert!(fs.backend().object_data("bkt", &format!("many/k{i:04}")).is_none());
    }
    assert!(!fs.exists("bkt/many").await.unwrap());
    assert_eq!(fs.ls_names("bkt", true).await.unwrap(), vec!["bkt/keep"]);
}

#[tokio::test]
async fn find_on_empty_path_is_rejected_without_calls() {
    let fs = new_fs();
    let err = fs.find("", FindOptions::default()).await.unwrap_err();
    assert!(matches!(err, VfsError::InvalidArgument(_)));
    assert_eq!(fs.backend().total_calls(), 0);
}

#[tokio::test]
async fn timeouts_are_retried_and_other_failures_are_not() {
    let fs = new_fs();
    fs.backend().insert_object("bkt", "f", b"data".to_vec());

    fs.backend().fail_next(RemoteOp::GetObject, Fault::Timeout, 2);
    assert_eq!(&fs.cat_file("bkt/f", None, None).await.unwrap()[..], b"data");
    assert_eq!(fs.backend().count(RemoteOp::GetObject), 3);

    fs.backend().reset_calls();
    fs.backend().fail_next(RemoteOp::GetObject, Fault::Timeout, 5);
    let err = fs.cat_file("bkt/f", None, None).await.unwrap_err();
    assert!(matches!(err, VfsError::Remote { .. }), "{err:?}");
    assert_eq!(fs.backend().count(RemoteOp::GetObject), 5);

    fs.backend().reset_calls();
    fs.backend()
        .fail_next(RemoteOp::GetObject, Fault::service("AccessDenied", 403), 1);
    let err = fs.cat_file("bkt/f", None, None).await.unwrap_err();
    assert!(err.is_permission_denied());
    assert_eq!(fs.backend().count(RemoteOp::GetObject), 1);
}

#[tokio::test]
async fn undecodable_error_body_is_still_classified() {
    let fs = new_fs();
    fs.backend().insert_object("bkt", "f", b"data".to_vec());
    fs.backend().fail_next(
        RemoteOp::GetObject,
        Fault::Malformed {
            status: None,
            body: Some("<Error><Code>NoSuchKey</Code><Message>gone</Message></Error>".to_string()),
        },
        1,
    );
    let err = fs.cat_file("bkt/f", None, None).await.unwrap_err();
    assert!(err.is_not_found(), "{err:?}");
    assert_eq!(fs.backend().count(RemoteOp::GetObject), 1);
}

#[tokio::test]
async fn object_replaced_under_an_open_reader() {
    let fs = new_fs();
    fs.pipe_file("bkt/f", Bytes::from_static(b"first version"), None)
        .await
        .unwrap();
    let reader = fs.open_read("bkt/f", ReadOptions::default()).await.unwrap();
    fs.pipe_file("bkt/f", Bytes::from_static(b"second version"), None)
        .await
        .unwrap();

    let err = reader.read_range(0, 5).await.unwrap_err();
    assert!(matches!(err, VfsError::ContentExpired { .. }), "{err:?}");
}

#[tokio::test]
async fn invalidation_forces_a_live_stat() {
    let fs = new_fs();
    fs.backend().insert_object("bkt", "dir/f", b"short".to_vec());
    fs.ls("bkt/dir", false).await.unwrap();
    fs.backend().reset_calls();

    assert_eq!(fs.size("bkt/dir/f").await.unwrap(), 5);
    assert_eq!(fs.backend().total_calls(), 0);

    fs.backend()
        .insert_object("bkt", "dir/f", b"much longer".to_vec());
    assert_eq!(fs.size("bkt/dir/f").await.unwrap(), 5);

    fs.invalidate_cache(Some("bkt/dir/f"));
    assert_eq!(fs.size("bkt/dir/f").await.unwrap(), 11);
    assert!(fs.backend().total_calls() > 0);
}

#[tokio::test]
async fn etag_survives_a_preserving_copy_across_buckets() {
    let fs = new_fs();
    fs.mkdir("other", None, false, None).await.unwrap();
    fs.pipe_file("bkt/big", Bytes::from(pattern(11 * MIB)), Some(5 * MIB))
        .await
        .unwrap();

    fs.cp_file("bkt/big", "other/big", true).await.unwrap();
    let src = fs.info("bkt/big").await.unwrap();
    let dst = fs.info("other/big").await.unwrap();
    assert_eq!(src.etag, dst.etag);
    assert_eq!(src.etag_parts(), Some(3));
    assert_eq!(dst.size, 11 * MIB);
    assert_eq!(
        fs.checksum("bkt/big", true).await.unwrap(),
        fs.checksum("other/big", true).await.unwrap()
    );
}
