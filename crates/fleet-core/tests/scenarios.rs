//! End-to-end flows driven through the command layer against the
//! in-memory runtime.

use std::sync::Arc;

use fleet_core::common::FleetError;
use fleet_core::{AssumeYes, Command, FleetConfig, FleetManager, RunTarget, Target};
use fleet_runtime::MemoryRuntime;

struct World {
    manager: FleetManager,
    runtime: Arc<MemoryRuntime>,
    _src: tempfile::TempDir,
    _state: tempfile::TempDir,
    src_path: std::path::PathBuf,
}

fn world() -> World {
    let src = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    std::fs::write(src.path().join("chall"), b"\x7fELF").unwrap();
    std::fs::write(src.path().join("flag.txt"), b"placeholder").unwrap();

    let runtime = Arc::new(MemoryRuntime::new());
    runtime.seed_image("ubuntu:22.04");
    let manager = FleetManager::new(
        FleetConfig::with_state_dir(state.path()),
        runtime.clone(),
        Box::new(AssumeYes),
    );
    let src_path = src.path().to_path_buf();
    World {
        manager,
        runtime,
        _src: src,
        _state: state,
        src_path,
    }
}

async fn must(manager: &mut FleetManager, command: Command) {
    manager.execute(command).await.unwrap();
}

async fn create_and_select(world: &mut World, name: &str) {
    must(
        &mut world.manager,
        Command::New { tokens: vec![name.to_string()] },
    )
    .await;
    must(
        &mut world.manager,
        Command::Select {
            name: name.to_string(),
        },
    )
    .await;
}

async fn configure(world: &mut World, port: u32) {
    let basedir = world.src_path.to_str().unwrap().to_string();
    let m = &mut world.manager;
    must(
        m,
        Command::SetImage {
            parent: "ubuntu:22.04".to_string(),
        },
    )
    .await;
    must(m, Command::SetBasedir { path: basedir }).await;
    must(
        m,
        Command::SetDeploy {
            files: vec!["chall".to_string(), "flag.txt".to_string()],
        },
    )
    .await;
    must(
        m,
        Command::SetEntry {
            entry: "chall".to_string(),
        },
    )
    .await;
    must(m, Command::SetPort { port }).await;
}

#[tokio::test]
async fn sibling_expansion_builds_independent_images() {
    let mut w = world();
    must(
        &mut w.manager,
        Command::New { tokens: vec!["pwn*2".to_string()] },
    )
    .await;
    assert_eq!(w.manager.registry().names(), vec!["pwn_0", "pwn_1"]);

    // `new` selects nothing; each sibling is picked and configured in turn.
    for name in ["pwn_0", "pwn_1"] {
        must(
            &mut w.manager,
            Command::Select {
                name: name.to_string(),
            },
        )
        .await;
        configure(&mut w, 13337).await;
        must(&mut w.manager, Command::Build { names: vec![] }).await;
    }

    for name in ["pwn_0", "pwn_1"] {
        let image = w.manager.registry().get(name).unwrap();
        assert!(image.built.is_some(), "{name} should be built");
    }
}

#[tokio::test]
async fn port_below_threshold_is_rejected_then_accepted() {
    let mut w = world();
    create_and_select(&mut w, "pwn").await;

    let err = w
        .manager
        .execute(Command::SetPort { port: 9999 })
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::InvalidPort(9999)));
    assert_eq!(w.manager.registry().get("pwn").unwrap().port(), 0);

    must(&mut w.manager, Command::SetPort { port: 12345 }).await;
    assert_eq!(w.manager.registry().get("pwn").unwrap().port(), 12345);
}

#[tokio::test]
async fn range_deletion_keeps_ids_dense() {
    let mut w = world();
    create_and_select(&mut w, "foo").await;
    configure(&mut w, 13337).await;
    must(&mut w.manager, Command::Build { names: vec![] }).await;
    must(
        &mut w.manager,
        Command::Run {
            targets: vec![],
            count: 3,
            port: None,
            flag: None,
        },
    )
    .await;

    must(
        &mut w.manager,
        Command::RmContainer {
            targets: vec![Target::parse("foo.2-3").unwrap()],
        },
    )
    .await;

    let image = w.manager.registry().get("foo").unwrap();
    assert_eq!(image.containers.keys().copied().collect::<Vec<_>>(), vec![1]);
    assert_eq!(w.runtime.container_count(), 1);
}

#[tokio::test]
async fn zero_based_range_aborts_the_whole_deletion() {
    let mut w = world();
    create_and_select(&mut w, "foo").await;
    configure(&mut w, 13337).await;
    must(&mut w.manager, Command::Build { names: vec![] }).await;
    must(
        &mut w.manager,
        Command::Run {
            targets: vec![],
            count: 3,
            port: None,
            flag: None,
        },
    )
    .await;

    // The malformed range is reported per target, and nothing is deleted.
    must(
        &mut w.manager,
        Command::RmContainer {
            targets: vec![Target::parse("foo.0-5").unwrap()],
        },
    )
    .await;
    assert_eq!(
        w.manager.registry().get("foo").unwrap().container_count(),
        3
    );
    assert_eq!(w.runtime.container_count(), 3);
}

#[tokio::test]
async fn state_survives_a_restart() {
    let mut w = world();
    create_and_select(&mut w, "pwn").await;
    configure(&mut w, 20002).await;
    must(&mut w.manager, Command::Build { names: vec![] }).await;
    must(
        &mut w.manager,
        Command::Run {
            targets: vec![],
            count: 2,
            port: None,
            flag: None,
        },
    )
    .await;
    let flags: Vec<String> = w
        .manager
        .registry()
        .get("pwn")
        .unwrap()
        .containers
        .values()
        .map(|c| c.flag.clone())
        .collect();

    let mut restarted = FleetManager::new(
        w.manager.config().clone(),
        w.runtime.clone(),
        Box::new(AssumeYes),
    );
    restarted.load().await.unwrap();

    let image = restarted.registry().get("pwn").unwrap();
    assert_eq!(image.parent.as_deref(), Some("ubuntu:22.04"));
    assert_eq!(image.port(), 20002);
    assert_eq!(
        image
            .containers
            .values()
            .map(|c| c.flag.clone())
            .collect::<Vec<_>>(),
        flags
    );

    // Containers removed behind our back are pruned on the next load.
    for record in image.containers.values() {
        w.runtime.forget_container(&record.runtime_ref);
    }
    let mut pruned = FleetManager::new(
        w.manager.config().clone(),
        w.runtime.clone(),
        Box::new(AssumeYes),
    );
    pruned.load().await.unwrap();
    assert_eq!(pruned.registry().get("pwn").unwrap().container_count(), 0);
}

#[tokio::test]
async fn stop_and_restart_cycle() {
    let mut w = world();
    create_and_select(&mut w, "svc").await;
    configure(&mut w, 13337).await;
    must(&mut w.manager, Command::Build { names: vec![] }).await;
    must(
        &mut w.manager,
        Command::Run {
            targets: vec![],
            count: 2,
            port: None,
            flag: None,
        },
    )
    .await;

    must(
        &mut w.manager,
        Command::StopContainer {
            targets: vec![Target::parse("svc.1-2").unwrap()],
        },
    )
    .await;
    let status = w
        .manager
        .execute(Command::ListStatus)
        .await
        .unwrap()
        .unwrap();
    assert!(status.contains("exited"));
    assert!(!status.contains("running"));

    must(
        &mut w.manager,
        Command::Run {
            targets: vec![RunTarget::parse("svc.1-2").unwrap()],
            count: 0,
            port: None,
            flag: None,
        },
    )
    .await;
    let status = w
        .manager
        .execute(Command::ListStatus)
        .await
        .unwrap()
        .unwrap();
    assert!(!status.contains("exited"));
    // Restarting never allocates: still exactly two containers.
    assert_eq!(
        w.manager.registry().get("svc").unwrap().container_count(),
        2
    );
}
