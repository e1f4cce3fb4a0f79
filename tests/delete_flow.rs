mod common;

use anyhow::Result;
use common::{context, FakeRepository};
use rtsync::{
    DeleteParams, DeleteService, ItemRecord, PathsToDelete, RecordStream, TransferConfig,
    TransferError,
};

#[test]
fn wildcard_delete_removes_folders_whole() -> Result<()> {
    let repo = FakeRepository::new();
    repo.put_file("libs/a/one.txt", b"one");
    repo.put_file("libs/a/b/two.txt", b"two");
    repo.put_file("libs/a/b/c/three.txt", b"three");
    repo.put_file("libs/keep.txt", b"keep");
    let service = DeleteService::new(context(&repo, TransferConfig::default())?);

    let mut resolved = service.get_paths_to_delete(&[DeleteParams::new("libs/a/*")])?;
    assert!(resolved.search_errors.is_empty());
    let paths: Vec<String> = resolved.items.to_vec()?.iter().map(ItemRecord::chain_path).collect();
    assert_eq!(paths, vec!["libs/a/b/", "libs/a/one.txt"]);

    let totals = service.delete_files(&mut resolved)?;
    assert_eq!((totals.succeeded, totals.failed), (2, 0));
    let mut deleted: Vec<String> = repo
        .requests_with("DELETE")
        .into_iter()
        .map(|r| r.path)
        .collect();
    deleted.sort();
    assert_eq!(deleted, vec!["libs/a/b/", "libs/a/one.txt"]);
    assert_eq!(repo.file("libs/a/b/c/three.txt"), None);
    assert_eq!(repo.file("libs/keep.txt"), Some(b"keep".to_vec()));
    Ok(())
}

#[test]
fn overlapping_groups_are_reduced() -> Result<()> {
    let repo = FakeRepository::new();
    repo.put_file("libs/a/b/two.txt", b"two");
    repo.put_file("libs/a/one.txt", b"one");
    let service = DeleteService::new(context(&repo, TransferConfig::default())?);

    let mut resolved = service.get_paths_to_delete(&[
        DeleteParams::new("libs/a/b/two.txt"),
        DeleteParams::new("libs/*"),
    ])?;
    let paths: Vec<String> = resolved.items.to_vec()?.iter().map(ItemRecord::chain_path).collect();
    assert_eq!(paths, vec!["libs/a/"]);
    Ok(())
}

#[test]
fn failed_search_skips_only_its_group() -> Result<()> {
    let repo = FakeRepository::new();
    repo.put_file("libs/one.txt", b"one");
    repo.put_file("other/two.txt", b"two");
    repo.fail_search("broken/*");
    let service = DeleteService::new(context(&repo, TransferConfig::default())?);

    let mut resolved = service.get_paths_to_delete(&[
        DeleteParams::new("libs/*"),
        DeleteParams::new("broken/*"),
        DeleteParams::new("other/*"),
    ])?;
    assert_eq!(resolved.search_errors.len(), 1);

    let totals = service.delete_files(&mut resolved)?;
    assert_eq!((totals.succeeded, totals.failed), (2, 0));
    let err = totals.error.expect("search error");
    assert!(format!("{err:#}").contains("broken/*"));
    assert_eq!(repo.file("libs/one.txt"), None);
    assert_eq!(repo.file("other/two.txt"), None);
    Ok(())
}

#[test]
fn vanished_item_is_reported() -> Result<()> {
    let repo = FakeRepository::new();
    repo.put_file("libs/real.txt", b"real");
    let service = DeleteService::new(context(&repo, TransferConfig::default())?);

    let mut items = PathsToDelete::from(RecordStream::from_records(vec![
        ItemRecord::file("libs", ".", "ghost.txt"),
        ItemRecord::file("libs", ".", "real.txt"),
    ])?);
    let mut summary = service.delete_files_with_summary(&mut items)?;

    assert_eq!((summary.totals.succeeded, summary.totals.failed), (1, 1));
    let err = summary.totals.error.take().expect("status error");
    assert!(matches!(
        err.downcast_ref::<TransferError>(),
        Some(TransferError::UnexpectedStatus { status: 404, .. })
    ));
    let details = summary.transfer_details.to_vec()?;
    assert_eq!(details.len(), 1);
    assert_eq!(details[0].source_path, "libs/real.txt");
    summary.close();
    Ok(())
}

#[test]
fn dry_run_deletes_nothing() -> Result<()> {
    let repo = FakeRepository::new();
    repo.put_file("libs/a/one.txt", b"one");
    let config = TransferConfig::default().with_dry_run(true);
    let service = DeleteService::new(context(&repo, config)?);

    let mut resolved = service.get_paths_to_delete(&[DeleteParams::new("libs/a/*")])?;
    let totals = service.delete_files(&mut resolved)?;

    assert_eq!((totals.succeeded, totals.failed), (1, 0));
    assert!(repo.requests_with("DELETE").is_empty());
    assert!(repo.file("libs/a/one.txt").is_some());
    Ok(())
}
