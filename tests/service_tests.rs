//! Integration tests for the storage service contract
//!
//! These tests drive a running node through `StorageService` and
//! `FileHandle` only, checking the envelope of every call.

use elastore::{Config, StatusCode, StorageService};
use tempfile::TempDir;

async fn running_service() -> (StorageService, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let service = StorageService::new(Config::default().with_local_storage_path(dir.path()));
    assert!(service.start().await.ok());
    assert!(service.create_bucket("data").await.ok());
    (service, dir)
}

/// The end-to-end scenario: bucket, folder, file, write, size, listing
#[tokio::test]
async fn test_end_to_end_scenario() {
    let (service, _dir) = running_service().await;

    assert!(service.mkdirs("data", "logs").await.ok());
    let handle = service
        .create("data", "logs/a.txt", false)
        .await
        .into_result()
        .unwrap();
    assert!(handle.write(b"hello", 0, 5).await.ok());
    assert_eq!(handle.size().await.into_value(), Some(5));

    let listing = service
        .list_folder("data", "logs")
        .await
        .into_result()
        .unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].key, "logs/a.txt");
    assert_eq!(listing[0].size, 5);
    assert!(!listing[0].is_directory);
}

#[tokio::test]
async fn test_failures_carry_message_and_no_value() {
    let (service, _dir) = running_service().await;

    let opened = service.open("data", "missing").await;
    assert!(!opened.ok());
    assert!(!opened.status().message().is_empty());
    assert!(opened.value().is_none());

    let listed = service.list("nope", "").await;
    assert_eq!(listed.status().code(), StatusCode::NotFound);
    assert!(listed.value().is_none());

    let created = service.create("data", "", false).await;
    assert_eq!(created.status().code(), StatusCode::InvalidArgument);
    assert!(!created.status().message().is_empty());
}

#[tokio::test]
async fn test_malformed_bucket_names_are_invalid_arguments() {
    let (service, _dir) = running_service().await;
    assert!(service.create("data", "k", false).await.ok());

    let created = service.create("", "k", false).await;
    assert_eq!(created.status().code(), StatusCode::InvalidArgument);
    assert!(created.value().is_none());
    assert_eq!(
        service.open("Bad_Bucket", "k").await.status().code(),
        StatusCode::InvalidArgument
    );
    assert_eq!(
        service.status("x", "k").await.status().code(),
        StatusCode::InvalidArgument
    );
    assert_eq!(
        service.list_folder("-data", "").await.status().code(),
        StatusCode::InvalidArgument
    );
    assert_eq!(
        service.rename("data", "k", "Bad_Bucket", "k").await.code(),
        StatusCode::InvalidArgument
    );
    assert_eq!(
        service.rename("", "k", "data", "moved").await.code(),
        StatusCode::InvalidArgument
    );
    assert_eq!(
        service.copy("data", "k", "UPPER", "k").await.code(),
        StatusCode::InvalidArgument
    );
    assert!(service.status("data", "k").await.ok());
}

#[tokio::test]
async fn test_create_overwrite_semantics() {
    let (service, _dir) = running_service().await;

    assert!(service.create("data", "k", false).await.ok());
    let second = service.create("data", "k", false).await;
    assert_eq!(second.status().code(), StatusCode::AlreadyExists);

    assert!(service.create("data", "o", true).await.ok());
    assert!(service.create("data", "o", true).await.ok());
}

#[tokio::test]
async fn test_overwrite_invalidates_old_handles() {
    let (service, _dir) = running_service().await;

    let old = service.create("data", "k", false).await.into_result().unwrap();
    assert!(old.write(b"old", 0, 3).await.ok());
    let new = service.create("data", "k", true).await.into_result().unwrap();

    assert_eq!(old.size().await.status().code(), StatusCode::NotFound);
    assert_eq!(new.size().await.into_value(), Some(0));
}

#[tokio::test]
async fn test_open_missing_is_not_found() {
    let (service, _dir) = running_service().await;
    let result = service.open("data", "nothing-here").await;
    assert_eq!(result.status().code(), StatusCode::NotFound);
}

#[tokio::test]
async fn test_write_then_read_round_trip() {
    let (service, _dir) = running_service().await;
    let handle = service.create("data", "blob", false).await.into_result().unwrap();

    let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    assert!(handle.write(&data, 0, data.len() as u64).await.ok());

    let mut buf = vec![0u8; data.len()];
    let read = handle.read(&mut buf, 0, data.len() as u64).await;
    assert_eq!(read.into_value(), Some(data.len() as u64));
    assert_eq!(buf, data);
}

#[tokio::test]
async fn test_reads_are_short_only_at_end() {
    let (service, _dir) = running_service().await;
    let handle = service.create("data", "short", false).await.into_result().unwrap();
    assert!(handle.write(b"0123456789", 0, 10).await.ok());

    let mut buf = [0xffu8; 8];
    assert_eq!(handle.read(&mut buf, 6, 8).await.into_value(), Some(4));
    assert_eq!(&buf[..4], b"6789");
    // Bytes past the short read are left untouched
    assert_eq!(buf[4], 0xff);

    let past_end = handle.read(&mut buf, 10, 8).await;
    assert!(past_end.ok());
    assert_eq!(past_end.into_value(), Some(0));
    assert_eq!(handle.read(&mut buf, 1_000, 8).await.into_value(), Some(0));
}

#[tokio::test]
async fn test_invalid_ranges() {
    let (service, _dir) = running_service().await;
    let handle = service.create("data", "ranges", false).await.into_result().unwrap();

    let mut buf = [0u8; 4];
    let overflow = handle.read(&mut buf, u64::MAX, 2).await;
    assert_eq!(overflow.status().code(), StatusCode::InvalidArgument);

    let too_long = handle.read(&mut buf, 0, 5).await;
    assert_eq!(too_long.status().code(), StatusCode::InvalidArgument);

    let status = handle.write(b"ab", 0, 3).await;
    assert_eq!(status.code(), StatusCode::InvalidArgument);
}

#[tokio::test]
async fn test_sparse_write_extends_with_zeros() {
    let (service, _dir) = running_service().await;
    let handle = service.create("data", "sparse", false).await.into_result().unwrap();

    assert!(handle.write(b"xy", 4, 2).await.ok());
    assert_eq!(handle.size().await.into_value(), Some(6));

    let mut buf = [0xffu8; 6];
    handle.read(&mut buf, 0, 6).await;
    assert_eq!(&buf, b"\0\0\0\0xy");
}

#[tokio::test]
async fn test_seal_is_final_and_idempotent() {
    let (service, _dir) = running_service().await;
    let handle = service.create("data", "sealed", false).await.into_result().unwrap();
    assert!(handle.write(b"data", 0, 4).await.ok());
    assert!(handle.is_writeable().await);

    assert!(handle.seal().await.ok());
    assert!(handle.seal().await.ok());
    assert!(!handle.is_writeable().await);

    assert_eq!(handle.write(b"more", 4, 4).await.code(), StatusCode::NotWriteable);
    assert_eq!(handle.truncate(0).await.code(), StatusCode::NotWriteable);
    assert_eq!(
        handle.set_metadata("late", false).await.code(),
        StatusCode::NotWriteable
    );

    let mut buf = [0u8; 4];
    assert_eq!(handle.read(&mut buf, 0, 4).await.into_value(), Some(4));

    let reopened = service.open("data", "sealed").await.into_result().unwrap();
    assert!(!reopened.is_writeable().await);
    assert_eq!(reopened.is_sealed().await.into_value(), Some(true));
}

#[tokio::test]
async fn test_seal_is_visible_to_other_handles() {
    let (service, _dir) = running_service().await;
    let first = service.create("data", "shared", false).await.into_result().unwrap();
    let second = service.open("data", "shared").await.into_result().unwrap();

    assert!(second.write(b"abc", 0, 3).await.ok());
    assert_eq!(first.size().await.into_value(), Some(3));

    assert!(first.seal().await.ok());
    assert_eq!(second.write(b"d", 3, 1).await.code(), StatusCode::NotWriteable);
}

#[tokio::test]
async fn test_truncate_shrinks_and_zero_fills() {
    let (service, _dir) = running_service().await;
    let handle = service.create("data", "trunc", false).await.into_result().unwrap();
    assert!(handle.write(b"abcdef", 0, 6).await.ok());

    assert!(handle.truncate(3).await.ok());
    assert_eq!(handle.size().await.into_value(), Some(3));

    assert!(handle.truncate(5).await.ok());
    let mut buf = [0xffu8; 5];
    assert_eq!(handle.read(&mut buf, 0, 5).await.into_value(), Some(5));
    assert_eq!(&buf, b"abc\0\0");
}

#[tokio::test]
async fn test_metadata_and_seal_in_one_step() {
    let (service, _dir) = running_service().await;
    let handle = service.create("data", "meta", false).await.into_result().unwrap();

    assert!(handle.set_metadata("v1", false).await.ok());
    assert_eq!(handle.metadata().await.into_value().as_deref(), Some("v1"));

    let too_long = "x".repeat(elastore::MAX_METADATA_LEN + 1);
    let status = handle.set_metadata(&too_long, true).await;
    assert_eq!(status.code(), StatusCode::InvalidArgument);
    assert_eq!(handle.metadata().await.into_value().as_deref(), Some("v1"));
    assert_eq!(handle.is_sealed().await.into_value(), Some(false));

    assert!(handle.set_metadata("final", true).await.ok());
    assert_eq!(handle.metadata().await.into_value().as_deref(), Some("final"));
    assert_eq!(handle.is_sealed().await.into_value(), Some(true));
}

#[tokio::test]
async fn test_status_is_a_snapshot() {
    let (service, _dir) = running_service().await;
    let handle = service.create("data", "snap", false).await.into_result().unwrap();
    assert!(handle.write(b"1234", 0, 4).await.ok());

    let before = service.status("data", "snap").await.into_result().unwrap();
    assert!(handle.write(b"5678", 4, 4).await.ok());
    let after = service.status("data", "snap").await.into_result().unwrap();

    assert_eq!(before.size, 4);
    assert_eq!(after.size, 8);
    assert_eq!(
        service.status("data", "absent").await.status().code(),
        StatusCode::NotFound
    );
}

#[tokio::test]
async fn test_status_of_directory() {
    let (service, _dir) = running_service().await;
    assert!(service.mkdirs("data", "a/b").await.ok());

    let dir = service.status("data", "a/b").await.into_result().unwrap();
    assert!(dir.is_directory);
    assert_eq!(dir.key, "a/b/");
    assert_eq!(dir.size, 0);
}

#[tokio::test]
async fn test_mkdirs_is_idempotent() {
    let (service, _dir) = running_service().await;
    assert!(service.mkdirs("data", "x/y/z").await.ok());
    assert!(service.mkdirs("data", "x/y/z").await.ok());
    assert_eq!(
        service.mkdirs("missing", "x").await.code(),
        StatusCode::NotFound
    );

    let root = service.list_folder("data", "").await.into_result().unwrap();
    assert_eq!(root.len(), 1);
    assert_eq!(root[0].key, "x/");
    assert!(root[0].is_directory);
}

#[tokio::test]
async fn test_empty_prefix_listing_is_ok() {
    let (service, _dir) = running_service().await;

    let listed = service.list("data", "nothing/").await;
    assert!(listed.ok());
    assert!(listed.into_value().unwrap().is_empty());

    let folder = service.list_folder("data", "nothing").await;
    assert!(folder.ok());
    assert!(folder.into_value().unwrap().is_empty());
}

#[tokio::test]
async fn test_list_is_flat_and_list_folder_groups() {
    let (service, _dir) = running_service().await;
    for key in ["logs/a", "logs/2024/b", "logs/2024/c", "other"] {
        assert!(service.create("data", key, false).await.ok());
    }

    let flat: Vec<_> = service
        .list("data", "logs/")
        .await
        .into_result()
        .unwrap()
        .into_iter()
        .map(|d| d.key)
        .collect();
    assert_eq!(flat, vec!["logs/2024/b", "logs/2024/c", "logs/a"]);

    let folder = service.list_folder("data", "logs/").await.into_result().unwrap();
    let entries: Vec<_> = folder.iter().map(|d| (d.key.as_str(), d.is_directory)).collect();
    assert_eq!(entries, vec![("logs/2024/", true), ("logs/a", false)]);
}

#[tokio::test]
async fn test_descriptors_are_detached() {
    let (service, _dir) = running_service().await;
    let handle = service.create("data", "d", false).await.into_result().unwrap();
    assert!(handle.write(b"abc", 0, 3).await.ok());

    let listing = service.list("data", "").await.into_result().unwrap();
    assert!(service.delete_object("data", "d").await.ok());
    assert_eq!(listing[0].size, 3);
}

#[tokio::test]
async fn test_delete_object() {
    let (service, _dir) = running_service().await;
    let handle = service.create("data", "gone", false).await.into_result().unwrap();

    assert!(service.delete_object("data", "gone").await.ok());
    assert_eq!(
        service.delete_object("data", "gone").await.code(),
        StatusCode::NotFound
    );
    assert_eq!(handle.size().await.status().code(), StatusCode::NotFound);
    assert_eq!(handle.write(b"x", 0, 1).await.code(), StatusCode::NotFound);
}

#[tokio::test]
async fn test_delete_prefix_leaves_siblings() {
    let (service, _dir) = running_service().await;
    for key in ["tmp/a", "tmp/b/c", "tmpfile", "keep/tmp/x"] {
        assert!(service.create("data", key, false).await.ok());
    }

    assert!(service.delete_object_prefix("data", "tmp/").await.ok());

    let remaining: Vec<_> = service
        .list("data", "")
        .await
        .into_result()
        .unwrap()
        .into_iter()
        .map(|d| d.key)
        .collect();
    assert_eq!(remaining, vec!["keep/tmp/x", "tmpfile"]);
}

#[tokio::test]
async fn test_rename_keeps_size_and_metadata() {
    let (service, _dir) = running_service().await;
    assert!(service.create_bucket("archive").await.ok());
    let handle = service.create("data", "k1", false).await.into_result().unwrap();
    assert!(handle.write(b"payload", 0, 7).await.ok());
    assert!(handle.set_metadata("tag", false).await.ok());

    assert!(service.rename("data", "k1", "archive", "k2").await.ok());

    assert_eq!(
        service.status("data", "k1").await.status().code(),
        StatusCode::NotFound
    );
    let moved = service.status("archive", "k2").await.into_result().unwrap();
    assert_eq!(moved.size, 7);
    let reopened = service.open("archive", "k2").await.into_result().unwrap();
    assert_eq!(reopened.metadata().await.into_value().as_deref(), Some("tag"));

    // The original handle follows the object
    assert_eq!(handle.size().await.into_value(), Some(7));
}

#[tokio::test]
async fn test_rename_conflicts() {
    let (service, _dir) = running_service().await;
    assert!(service.create("data", "a", false).await.ok());
    assert!(service.create("data", "b", false).await.ok());

    assert_eq!(
        service.rename("data", "a", "data", "b").await.code(),
        StatusCode::AlreadyExists
    );
    assert_eq!(
        service.rename("data", "missing", "data", "c").await.code(),
        StatusCode::NotFound
    );
    assert_eq!(
        service.rename("data", "a", "nobucket", "a").await.code(),
        StatusCode::NotFound
    );
    assert!(service.rename("data", "a", "data", "a").await.ok());
}

#[tokio::test]
async fn test_rename_prefix_is_all_or_nothing() {
    let (service, _dir) = running_service().await;
    for key in ["src/a", "src/b", "dst/b"] {
        assert!(service.create("data", key, false).await.ok());
    }

    let status = service.rename_prefix("data", "src/", "data", "dst/").await;
    assert_eq!(status.code(), StatusCode::AlreadyExists);
    assert!(service.status("data", "src/a").await.ok());
    assert_eq!(
        service.status("data", "dst/a").await.status().code(),
        StatusCode::NotFound
    );

    assert!(service.rename_prefix("data", "src/", "data", "moved/").await.ok());
    assert!(service.status("data", "moved/a").await.ok());
    assert!(service.status("data", "moved/b").await.ok());
    assert!(service.list("data", "src/").await.into_value().unwrap().is_empty());

    assert_eq!(
        service.rename_prefix("data", "src/", "data", "x/").await.code(),
        StatusCode::NotFound
    );
}

#[tokio::test]
async fn test_rename_prefix_moves_empty_folders() {
    let (service, _dir) = running_service().await;
    assert!(service.mkdirs("data", "empty/sub").await.ok());
    assert!(service.status("data", "empty/").await.ok());

    assert!(service.rename_prefix("data", "empty/", "data", "moved/").await.ok());
    let moved = service.status("data", "moved/sub").await.into_result().unwrap();
    assert!(moved.is_directory);
    assert_eq!(
        service.status("data", "empty/sub").await.status().code(),
        StatusCode::NotFound
    );

    assert!(service.copy_prefix("data", "moved/", "data", "copied/").await.ok());
    assert!(service.status("data", "copied/sub").await.ok());
    assert!(service.status("data", "moved/sub").await.ok());
}

#[tokio::test]
async fn test_copy_keeps_source_and_seal() {
    let (service, _dir) = running_service().await;
    let handle = service.create("data", "orig", false).await.into_result().unwrap();
    assert!(handle.write(b"bytes", 0, 5).await.ok());
    assert!(handle.set_metadata("m", true).await.ok());

    assert!(service.copy("data", "orig", "data", "dup").await.ok());
    assert_eq!(
        service.copy("data", "orig", "data", "dup").await.code(),
        StatusCode::AlreadyExists
    );

    let dup = service.open("data", "dup").await.into_result().unwrap();
    let mut buf = [0u8; 5];
    assert_eq!(dup.read(&mut buf, 0, 5).await.into_value(), Some(5));
    assert_eq!(&buf, b"bytes");
    assert_eq!(dup.metadata().await.into_value().as_deref(), Some("m"));
    assert!(!dup.is_writeable().await);
    assert!(service.status("data", "orig").await.ok());
}

#[tokio::test]
async fn test_copies_are_independent() {
    let (service, _dir) = running_service().await;
    let handle = service.create("data", "a", false).await.into_result().unwrap();
    assert!(handle.write(b"one", 0, 3).await.ok());
    assert!(service.copy("data", "a", "data", "b").await.ok());

    assert!(handle.write(b"two", 0, 3).await.ok());
    let copy = service.open("data", "b").await.into_result().unwrap();
    let mut buf = [0u8; 3];
    copy.read(&mut buf, 0, 3).await;
    assert_eq!(&buf, b"one");
}

#[tokio::test]
async fn test_copy_prefix_across_buckets() {
    let (service, _dir) = running_service().await;
    assert!(service.create_bucket("backup").await.ok());
    assert!(service.mkdirs("data", "photos/empty").await.ok());
    for key in ["photos/1.jpg", "photos/2.jpg"] {
        let handle = service.create("data", key, false).await.into_result().unwrap();
        assert!(handle.write(b"jpg", 0, 3).await.ok());
    }

    assert!(service.copy_prefix("data", "photos/", "backup", "2024/").await.ok());

    let copied = service.list_folder("backup", "2024").await.into_result().unwrap();
    let keys: Vec<_> = copied.iter().map(|d| d.key.as_str()).collect();
    assert_eq!(keys, vec!["2024/1.jpg", "2024/2.jpg", "2024/empty/"]);
    assert_eq!(service.list("data", "photos/").await.into_value().unwrap().len(), 2);

    assert_eq!(
        service.copy_prefix("data", "photos/", "backup", "2024/").await.code(),
        StatusCode::AlreadyExists
    );
}

#[tokio::test]
async fn test_concurrent_writers_do_not_corrupt() {
    let (service, _dir) = running_service().await;
    let handle = service.create("data", "concurrent", false).await.into_result().unwrap();

    let mut tasks = Vec::new();
    for i in 0..8u8 {
        let handle = handle.clone();
        tasks.push(tokio::spawn(async move {
            let chunk = [i; 128];
            handle.write(&chunk, u64::from(i) * 128, 128).await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().ok());
    }

    assert_eq!(handle.size().await.into_value(), Some(8 * 128));
    let mut buf = vec![0u8; 8 * 128];
    handle.read(&mut buf, 0, 8 * 128).await;
    for (i, chunk) in buf.chunks(128).enumerate() {
        assert!(chunk.iter().all(|b| *b == i as u8));
    }
}

#[tokio::test]
async fn test_local_path() {
    let dir = tempfile::tempdir().unwrap();
    let service = StorageService::new(
        Config::default()
            .with_local_storage_path(dir.path())
            .with_available_local_memory(64),
    );
    assert!(service.start().await.ok());
    assert!(service.create_bucket("data").await.ok());

    let first = service.create("data", "first", false).await.into_result().unwrap();
    assert!(first.write(&[1u8; 48], 0, 48).await.ok());
    assert!(first.seal().await.ok());
    assert_eq!(service.local_path("data", "first").await, "");

    let second = service.create("data", "second", false).await.into_result().unwrap();
    assert!(second.write(&[2u8; 48], 0, 48).await.ok());

    let path = service.local_path("data", "first").await;
    assert!(path.starts_with(dir.path().to_str().unwrap()));
    assert_eq!(service.local_path("data", "absent").await, "");
}
