//! Plugin lifecycle edge cases: disable/enable, uninstall, method calls,
//! and resolution failures.

mod common;

use serde_json::json;

use qorzen::framework::error::PluginError;
use qorzen::framework::resolver::ResolveError;
use qorzen::framework::state::PluginState;
use qorzen::Kernel;

use common::{echo_entry, manifest_json, write_config, write_plugin_package};

#[tokio::test(flavor = "multi_thread")]
async fn disabled_plugin_refuses_load_until_enabled() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), "");
    let package = write_plugin_package(
        &tmp.path().join("packages"),
        "sample-1.0.0",
        &manifest_json("sample", "1.0.0", "", "", ""),
    );

    let kernel = Kernel::builder()
        .with_config_file(config)
        .headless(true)
        .register_entry("sample", echo_entry)
        .build()
        .unwrap();
    kernel.initialize_all().await.unwrap();
    let plugins = kernel.plugin_manager();

    plugins.install(&package, true).await.unwrap();
    plugins.disable("sample").await.unwrap();
    assert_eq!(plugins.state("sample"), Some(PluginState::Disabled));

    let err = plugins.load("sample").await.unwrap_err();
    assert!(matches!(err, PluginError::Disabled { .. }));

    // The flag is persisted in the install registry.
    assert!(!plugins.info("sample").unwrap().enabled);

    plugins.enable("sample").await.unwrap();
    assert_eq!(plugins.state("sample"), Some(PluginState::Active));

    kernel.shutdown_all().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn uninstall_removes_install_but_can_keep_data() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), "");
    let package = write_plugin_package(
        &tmp.path().join("packages"),
        "sample-1.0.0",
        &manifest_json("sample", "1.0.0", "", "", ""),
    );

    let kernel = Kernel::builder()
        .with_config_file(config)
        .headless(true)
        .register_entry("sample", echo_entry)
        .build()
        .unwrap();
    kernel.initialize_all().await.unwrap();
    let plugins = kernel.plugin_manager();

    plugins.install(&package, true).await.unwrap();
    let info = plugins.info("sample").unwrap();
    let install_path = info.install_path.clone();
    assert!(install_path.is_dir());

    let data_dir = tmp.path().join("plugins").join("data").join("sample");
    std::fs::write(data_dir.join("notes.txt"), "keep me").unwrap();

    plugins.uninstall("sample", true).await.unwrap();
    assert!(!install_path.exists());
    assert!(data_dir.join("notes.txt").exists());
    assert!(plugins.info("sample").is_none());
    assert!(plugins.state("sample").is_none());

    // Reinstalling works now that the name is free again.
    plugins.install(&package, true).await.unwrap();
    plugins.uninstall("sample", false).await.unwrap();
    assert!(!data_dir.exists());

    kernel.shutdown_all().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn plugin_methods_run_through_the_isolation_cell() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), "");
    let package = write_plugin_package(
        &tmp.path().join("packages"),
        "sample-1.0.0",
        &manifest_json("sample", "1.0.0", "", "", ""),
    );

    let kernel = Kernel::builder()
        .with_config_file(config)
        .headless(true)
        .register_entry("sample", echo_entry)
        .build()
        .unwrap();
    kernel.initialize_all().await.unwrap();
    let plugins = kernel.plugin_manager();
    plugins.install(&package, true).await.unwrap();

    let result = plugins
        .run_plugin_method("sample", "echo", json!({ "ping": true }), None)
        .await
        .unwrap();
    assert_eq!(result, json!({ "ping": true }));

    let err = plugins
        .run_plugin_method("sample", "explode", json!(null), None)
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Isolation(_)));

    kernel.shutdown_all().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn install_with_missing_dependency_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), "");
    let package = write_plugin_package(
        &tmp.path().join("packages"),
        "needy-1.0.0",
        &manifest_json(
            "needy",
            "1.0.0",
            "",
            r#"[{ "name": "ghost", "version": ">=1.0.0" }]"#,
            "",
        ),
    );

    let kernel = Kernel::builder()
        .with_config_file(config)
        .headless(true)
        .register_entry("needy", echo_entry)
        .build()
        .unwrap();
    kernel.initialize_all().await.unwrap();

    let err = kernel
        .plugin_manager()
        .install(&package, true)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PluginError::Resolve(ResolveError::MissingDependency { .. })
    ));
    assert!(kernel.plugin_manager().info("needy").is_none());

    kernel.shutdown_all().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn reload_restarts_the_plugin() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), "");
    let package = write_plugin_package(
        &tmp.path().join("packages"),
        "sample-1.0.0",
        &manifest_json("sample", "1.0.0", "", "", ""),
    );

    let kernel = Kernel::builder()
        .with_config_file(config)
        .headless(true)
        .register_entry("sample", echo_entry)
        .build()
        .unwrap();
    kernel.initialize_all().await.unwrap();
    let plugins = kernel.plugin_manager();
    plugins.install(&package, true).await.unwrap();

    plugins.reload("sample").await.unwrap();
    assert_eq!(plugins.state("sample"), Some(PluginState::Active));

    // The fresh cell still answers.
    let result = plugins
        .run_plugin_method("sample", "echo", json!(1), None)
        .await
        .unwrap();
    assert_eq!(result, json!(1));

    kernel.shutdown_all().await;
}
