//! End-to-end platform scenarios: boot, install, events, scheduling,
//! capabilities, updates.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value, json};

use qorzen::core::bus::EventBus;
use qorzen::core::foundation::BoxError;
use qorzen::core::task::{TaskPriority, TaskSpec};
use qorzen::core::DeliveryMode;
use qorzen::framework::error::PluginError;
use qorzen::framework::hooks::HookContext;
use qorzen::framework::state::PluginState;
use qorzen::Kernel;

use common::{echo_entry, manifest_json, write_config, write_plugin_package};

async fn settle() {
    tokio::time::sleep(Duration::from_millis(80)).await;
}

// ─── S1: boot with an empty config ───────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn boot_with_defaults_publishes_system_started() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), "");

    let kernel = Kernel::builder()
        .with_config_file(config)
        .headless(true)
        .build()
        .unwrap();

    let started = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&started);
    kernel
        .event_bus()
        .subscribe(
            "boot-watcher",
            "system/*",
            None,
            DeliveryMode::Async,
            EventBus::callback(move |event| {
                let flag = Arc::clone(&flag);
                async move {
                    if event.event_type == "system/started" {
                        flag.store(true, Ordering::SeqCst);
                    }
                    Ok(())
                }
            }),
        )
        .unwrap();

    kernel.initialize_all().await.unwrap();
    settle().await;

    assert_eq!(
        kernel.config().get_value("logging.level"),
        Some(json!("info"))
    );
    assert!(started.load(Ordering::SeqCst));
    assert!(kernel.health().values().all(|healthy| *healthy));

    kernel.shutdown_all().await;
}

// ─── S2: install with a post_install hook ────────────────────────────────────

fn sample_after_install(ctx: &HookContext) -> Result<(), BoxError> {
    ctx.config
        .set("plugins.sample.refresh_interval", json!(60))
}

#[tokio::test(flavor = "multi_thread")]
async fn install_runs_post_install_hook_and_activates() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), "");
    let package = write_plugin_package(
        &tmp.path().join("packages"),
        "sample-1.0.0",
        &manifest_json(
            "sample",
            "1.0.0",
            "",
            r#"[{ "name": "core", "version": ">=0.1.0" }]"#,
            r#"{ "post_install": "sample:after_install" }"#,
        ),
    );

    let kernel = Kernel::builder()
        .with_config_file(config)
        .headless(true)
        .register_entry("sample", echo_entry)
        .register_hook("sample:after_install", sample_after_install)
        .build()
        .unwrap();
    kernel.initialize_all().await.unwrap();

    kernel
        .plugin_manager()
        .install(&package, true)
        .await
        .unwrap();

    assert_eq!(
        kernel.config().get_value("plugins.sample.refresh_interval"),
        Some(json!(60))
    );
    assert_eq!(
        kernel.plugin_manager().state("sample"),
        Some(PluginState::Active)
    );

    kernel.shutdown_all().await;
}

// ─── S3: wildcard and filtered subscriptions ─────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn wildcard_and_filtered_subscribers_see_the_right_events() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), "");
    let kernel = Kernel::builder()
        .with_config_file(config)
        .headless(true)
        .build()
        .unwrap();
    kernel.initialize_all().await.unwrap();

    let bus = kernel.event_bus();
    let wildcard_seen = Arc::new(Mutex::new(Vec::new()));
    let filtered_hits = Arc::new(AtomicUsize::new(0));

    let sink = Arc::clone(&wildcard_seen);
    bus.subscribe(
        "sub-a",
        "plugin/*",
        None,
        DeliveryMode::Async,
        EventBus::callback(move |event| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(
                    event
                        .payload_get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                );
                Ok(())
            }
        }),
    )
    .unwrap();

    let mut filter = Map::new();
    filter.insert("name".to_string(), json!("sample"));
    let counter = Arc::clone(&filtered_hits);
    bus.subscribe(
        "sub-b",
        "plugin/loaded",
        Some(filter),
        DeliveryMode::Async,
        EventBus::callback(move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
    )
    .unwrap();

    bus.publish(
        qorzen::Event::builder("plugin/loaded", "test")
            .payload_entry("name", "sample")
            .build(),
    )
    .await
    .unwrap();
    bus.publish(
        qorzen::Event::builder("plugin/loaded", "test")
            .payload_entry("name", "other")
            .build(),
    )
    .await
    .unwrap();

    settle().await;
    assert_eq!(*wildcard_seen.lock().unwrap(), vec!["sample", "other"]);
    assert_eq!(filtered_hits.load(Ordering::SeqCst), 1);

    kernel.shutdown_all().await;
}

// ─── S4: priority scheduling and pending cancellation ────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn priorities_order_starts_and_pending_cancel_is_isolated() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), "");
    let kernel = Kernel::builder()
        .with_config_file(config)
        .headless(true)
        .build()
        .unwrap();
    kernel.initialize_all().await.unwrap();

    let scheduler = kernel.scheduler();

    // Hold the single CPU slot so the three tasks queue together.
    let gate = Arc::new(AtomicBool::new(false));
    let release = Arc::clone(&gate);
    let blocker = scheduler
        .submit(TaskSpec::new("blocker", "test"), move |_| {
            while !release.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(Value::Null)
        })
        .unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for (name, priority) in [
        ("low", TaskPriority::Low),
        ("normal", TaskPriority::Normal),
        ("high", TaskPriority::High),
    ] {
        let order = Arc::clone(&order);
        handles.push(
            scheduler
                .submit(TaskSpec::new(name, "test").priority(priority), move |_| {
                    order.lock().unwrap().push(name);
                    Ok(Value::Null)
                })
                .unwrap(),
        );
    }

    // Cancel NORMAL while it is still pending.
    let normal_id = handles[1].id;
    tokio::time::sleep(Duration::from_millis(50)).await;
    scheduler.cancel(normal_id).unwrap();

    gate.store(true, Ordering::Release);
    blocker.wait().await.unwrap();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.wait().await.unwrap());
    }

    assert_eq!(*order.lock().unwrap(), vec!["high", "low"]);
    assert_eq!(results[0].status, qorzen::TaskStatus::Completed);
    assert_eq!(results[1].status, qorzen::TaskStatus::Cancelled);
    assert_eq!(results[2].status, qorzen::TaskStatus::Completed);

    kernel.shutdown_all().await;
}

// ─── S5: capability gate on config writes ────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn missing_capability_denies_config_write_without_side_effects() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), "");
    let package = write_plugin_package(
        &tmp.path().join("packages"),
        "foo-1.0.0",
        &manifest_json("foo", "1.0.0", r#"["config.read"]"#, "", ""),
    );

    let kernel = Kernel::builder()
        .with_config_file(config)
        .headless(true)
        .register_entry("foo", echo_entry)
        .build()
        .unwrap();
    kernel.initialize_all().await.unwrap();
    kernel
        .plugin_manager()
        .install(&package, true)
        .await
        .unwrap();

    let api = kernel.plugin_manager().api("foo").unwrap();

    // Reads are granted.
    assert_eq!(api.get_config("logging.level").unwrap(), Some(json!("info")));

    // Writes are denied with no side effects.
    let err = api.set_config("plugins.foo.x", json!(1)).unwrap_err();
    assert!(matches!(err, PluginError::PermissionDenied { .. }));
    assert_eq!(kernel.config().get_value("plugins.foo.x"), None);

    kernel.shutdown_all().await;
}

// ─── S6: update with pre_update hooks ────────────────────────────────────────

fn foo_pre_update(ctx: &HookContext) -> Result<(), BoxError> {
    let versions = ctx.versions.as_ref().ok_or("update hook without versions")?;
    ctx.config.set(
        "plugins.foo.observed_update",
        json!(format!("{}->{}", versions.current, versions.new)),
    )
}

fn refuse_update(_ctx: &HookContext) -> Result<(), BoxError> {
    Err("not today".into())
}

#[tokio::test(flavor = "multi_thread")]
async fn update_swaps_version_and_failed_pre_update_keeps_old() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), "");
    let packages = tmp.path().join("packages");

    let hooks = r#"{ "pre_update": "foo:pre_update" }"#;
    let foo_v1 =
        write_plugin_package(&packages, "foo-1.0.0", &manifest_json("foo", "1.0.0", "", "", hooks));
    let foo_v2 =
        write_plugin_package(&packages, "foo-2.0.0", &manifest_json("foo", "2.0.0", "", "", hooks));

    let bad_hooks = r#"{ "pre_update": "bar:refuse_update" }"#;
    let bar_v1 = write_plugin_package(
        &packages,
        "bar-1.0.0",
        &manifest_json("bar", "1.0.0", "", "", bad_hooks),
    );
    let bar_v2 = write_plugin_package(
        &packages,
        "bar-2.0.0",
        &manifest_json("bar", "2.0.0", "", "", bad_hooks),
    );

    let kernel = Kernel::builder()
        .with_config_file(config)
        .headless(true)
        .register_entry("foo", echo_entry)
        .register_entry("bar", echo_entry)
        .register_hook("foo:pre_update", foo_pre_update)
        .register_hook("bar:refuse_update", refuse_update)
        .build()
        .unwrap();
    kernel.initialize_all().await.unwrap();
    let plugins = kernel.plugin_manager();

    // Successful update: 1.0.0 → 2.0.0.
    plugins.install(&foo_v1, true).await.unwrap();
    plugins.install(&foo_v2, true).await.unwrap();
    assert_eq!(
        kernel.config().get_value("plugins.foo.version"),
        Some(json!("2.0.0"))
    );
    assert_eq!(
        kernel.config().get_value("plugins.foo.observed_update"),
        Some(json!("1.0.0->2.0.0"))
    );
    assert_eq!(plugins.state("foo"), Some(PluginState::Active));

    // pre_update refusal: the installed version stays 1.0.0.
    plugins.install(&bar_v1, true).await.unwrap();
    let err = plugins.install(&bar_v2, true).await.unwrap_err();
    assert!(matches!(err, PluginError::Hook(_)));
    let info = plugins.info("bar").unwrap();
    assert_eq!(info.manifest.version.to_string(), "1.0.0");
    assert_eq!(plugins.state("bar"), Some(PluginState::Active));
    assert_eq!(kernel.config().get_value("plugins.bar.version"), None);

    kernel.shutdown_all().await;
}
