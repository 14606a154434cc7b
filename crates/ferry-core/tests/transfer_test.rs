//! Integration tests for copying between stores.

use std::sync::Arc;

use ferry_core::exec::ExecTarget;
use ferry_core::store::{ContainerOptions, ContainerStore, Endpoint, LocalStore, RemoteStore, Scheme};
use ferry_core::transfer::{self, CopyJob};
use ferry_core::ObjectPath;
use ferry_test_utils::FakeCluster;
use tempfile::TempDir;

fn target() -> ExecTarget {
    ExecTarget::new("ns", "pod", "c")
}

#[tokio::test]
async fn container_to_local_and_back() {
    let cluster = FakeCluster::new();
    let payload: Vec<u8> = (0..300_000u32).map(|i| (i % 253) as u8).collect();
    cluster.put_file(&target(), "/var/backup/db.dump", &payload);

    let container = ContainerStore::new(cluster.clone(), ContainerOptions::default());
    let local = LocalStore::new();
    let dir = TempDir::new().unwrap();
    let local_path = dir.path().join("db.dump");

    transfer::copy(
        &container,
        "ns/pod/c/var/backup/db.dump",
        &local,
        local_path.to_str().unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(std::fs::read(&local_path).unwrap(), payload);

    transfer::copy(
        &local,
        local_path.to_str().unwrap(),
        &container,
        "ns/pod/c/restore/db.dump",
    )
    .await
    .unwrap();
    assert_eq!(cluster.file(&target(), "/restore/db.dump").unwrap(), payload);
}

#[tokio::test]
async fn copy_into_container_root_uses_source_basename() {
    let cluster = FakeCluster::new();
    let container = ContainerStore::new(cluster.clone(), ContainerOptions::default());
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("report.csv");
    std::fs::write(&src, "a,b\n").unwrap();

    transfer::copy(&LocalStore::new(), src.to_str().unwrap(), &container, "ns/pod/c")
        .await
        .unwrap();
    assert_eq!(cluster.file(&target(), "/report.csv").unwrap(), b"a,b\n");
}

#[test]
fn bucket_only_destination_takes_source_basename() {
    let path = ObjectPath::parse_for_write("backups", Some("ns/pod/c/var/db.dump")).unwrap();
    assert_eq!(path.bucket, "backups");
    assert_eq!(path.key, "db.dump");
}

#[tokio::test]
async fn recursive_copy_mirrors_container_tree() {
    let cluster = FakeCluster::new();
    cluster.put_file(&target(), "/etc/app/main.toml", b"main");
    cluster.put_file(&target(), "/etc/app/conf.d/extra.toml", b"extra");
    let container: Arc<dyn RemoteStore> =
        Arc::new(ContainerStore::new(cluster.clone(), ContainerOptions::default()));
    let local: Arc<dyn RemoteStore> = Arc::new(LocalStore::new());
    let dir = TempDir::new().unwrap();

    let source = Endpoint::new(Scheme::Kubernetes, "ns/pod/c/etc/app");
    let destination = Endpoint::new(Scheme::Local, dir.path().to_string_lossy());
    let jobs = transfer::plan_recursive(container.as_ref(), &source, &destination)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(
        jobs[0],
        CopyJob::new(
            "ns/pod/c/etc/app/conf.d/extra.toml",
            dir.path().join("conf.d/extra.toml").to_string_lossy()
        )
    );

    let outcomes = transfer::copy_many(container, local, jobs, 4).await;
    assert!(outcomes.iter().all(|o| o.result.is_ok()));
    assert_eq!(std::fs::read(dir.path().join("main.toml")).unwrap(), b"main");
    assert_eq!(
        std::fs::read(dir.path().join("conf.d/extra.toml")).unwrap(),
        b"extra"
    );
}
