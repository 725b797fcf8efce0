use nsm_core::{SettingsError, SettingsStore, CURRENT_SCHEMA};
use nsm_store::FileStore;
use std::fs;
use std::path::Path;

fn store_with(dir: &Path, body: &str) -> SettingsStore {
    let path = dir.join("config.toml");
    fs::write(&path, body).unwrap();
    SettingsStore::new(path, FileStore::default())
}

fn backups(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".backup"))
        .count()
}

#[test]
fn flat_channel_document_migrates_in_one_call() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(dir.path(), "channel = \"nixos-unstable\"\n");

    let migration = store.migrate().unwrap().expect("a migration");
    assert_eq!(migration.from, None);
    assert_eq!(migration.to, CURRENT_SCHEMA);
    assert_eq!(migration.steps.len(), 2);

    let doc = store.load().unwrap();
    assert_eq!(doc.channel.url, "nixos-unstable");
    assert_eq!(doc.schema_version, "1.1.0");
    assert_eq!(doc.descriptor_format, "shell");
    assert!(doc.default_packages().is_empty());
    assert!(doc.pins.is_empty());

    let text = fs::read_to_string(store.path()).unwrap();
    assert!(text.contains("[channel]\nurl = \"nixos-unstable\""));
}

#[test]
fn migrating_twice_writes_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(dir.path(), "channel = \"nixpkgs-24.05\"\n");

    let first = store.migrate().unwrap();
    assert!(first.is_some());
    let after_first = fs::read_to_string(store.path()).unwrap();
    assert_eq!(backups(dir.path()), 1);

    let second = store.migrate().unwrap();
    assert!(second.is_none());
    assert_eq!(fs::read_to_string(store.path()).unwrap(), after_first);
    assert_eq!(backups(dir.path()), 1);
}

#[test]
fn migration_backs_up_previous_content() {
    let dir = tempfile::tempdir().unwrap();
    let original = "schema_version = \"1.0.0\"\nchannel = \"nixos-23.11\"\n";
    let store = store_with(dir.path(), original);

    let migration = store.migrate().unwrap().unwrap();
    let backup = migration.backup_path.expect("backup taken");
    assert_eq!(fs::read_to_string(backup).unwrap(), original);
}

#[test]
fn future_version_is_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    let body = "schema_version = \"3.0.0\"\n[channel]\nurl = \"nixos-unstable\"\n";
    let store = store_with(dir.path(), body);

    let err = store.migrate().unwrap_err();
    assert!(matches!(err, SettingsError::UnsupportedVersion { .. }));
    assert_eq!(fs::read_to_string(store.path()).unwrap(), body);
    assert_eq!(backups(dir.path()), 0);
}

#[test]
fn three_broken_rules_give_three_violations() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(
        dir.path(),
        "schema_version = \"1.1.0\"\ndescriptor_format = \"nix\"\n[channel]\nurl = \"stable\"\n[pins]\nhello = \"-1\"\n",
    );
    let doc = store.load().unwrap();
    let err = store.save(&doc).unwrap_err();
    match err {
        SettingsError::Validation(v) => {
            assert_eq!(v.len(), 3, "{v:?}");
            let fields: Vec<_> = v.iter().map(|x| x.field.as_str()).collect();
            assert_eq!(fields, ["channel.url", "descriptor_format", "pins.hello"]);
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn migrate_and_set_serialize_on_the_same_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(dir.path(), "channel = \"nixos-unstable\"\n");

    std::thread::scope(|s| {
        let a = store.clone();
        let b = store.clone();
        s.spawn(move || a.migrate().unwrap());
        s.spawn(move || {
            b.set(nsm_core::SettingKey::DefaultPackages, "git,jq")
                .unwrap()
        });
    });

    let doc = store.load().unwrap();
    assert_eq!(doc.default_packages(), ["git", "jq"]);
    // Whichever order they ran in, the nested channel form is what remains.
    assert_eq!(doc.channel.url, "nixos-unstable");
    let text = fs::read_to_string(store.path()).unwrap();
    assert!(text.contains("[channel]"));
    assert!(!text.contains("channel = "));
}

#[test]
fn future_version_blocks_writes() {
    let dir = tempfile::tempdir().unwrap();
    let body = "schema_version = \"2.0.0\"\nfeature = \"new\"\n[channel]\nurl = \"nixos-unstable\"\n";
    let store = store_with(dir.path(), body);

    let err = store
        .set(nsm_core::SettingKey::ChannelUrl, "nixos-24.05")
        .unwrap_err();
    assert!(matches!(err, SettingsError::UnsupportedVersion { ref found, .. } if found == "2.0.0"));
    assert!(matches!(
        store.pin("hello", "2.12.1"),
        Err(SettingsError::UnsupportedVersion { .. })
    ));
    let doc = store.load().unwrap();
    assert!(matches!(
        store.save(&doc),
        Err(SettingsError::UnsupportedVersion { .. })
    ));

    assert_eq!(fs::read_to_string(store.path()).unwrap(), body);
    assert_eq!(backups(dir.path()), 0);
}

#[test]
fn unknown_keys_survive_set_and_pin() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(
        dir.path(),
        "schema_version = \"1.1.0\"\ndescriptor_format = \"shell\"\ndefault_packages = []\neditor = \"vim\"\n[channel]\nurl = \"nixos-unstable\"\n[pins]\n[extra]\nflag = true\n",
    );

    store
        .set(nsm_core::SettingKey::ChannelUrl, "nixos-24.05")
        .unwrap();
    store.pin("hello", "2.12.1").unwrap();

    let text = fs::read_to_string(store.path()).unwrap();
    assert!(text.contains("editor = \"vim\""), "{text}");
    assert!(text.contains("[extra]\nflag = true"), "{text}");
    let doc = store.load().unwrap();
    assert_eq!(doc.channel.url, "nixos-24.05");
    assert_eq!(doc.pins["hello"], "2.12.1");
}

#[test]
fn unknown_keys_survive_migration() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(dir.path(), "editor = \"vim\"\nchannel = \"nixos-23.11\"\n");

    store.migrate().unwrap().unwrap();
    let text = fs::read_to_string(store.path()).unwrap();
    assert!(text.contains("editor = \"vim\""), "{text}");
    assert_eq!(store.load().unwrap().channel.url, "nixos-23.11");
}

#[test]
fn current_version_with_missing_fields_is_completed() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(
        dir.path(),
        "schema_version = \"1.1.0\"\n[channel]\nurl = \"nixos-24.05\"\n",
    );
    assert_eq!(
        store.missing_fields().unwrap(),
        ["descriptor_format", "default_packages", "pins"]
    );

    let migration = store.migrate().unwrap().expect("fields filled");
    assert_eq!(migration.from, Some(CURRENT_SCHEMA));
    assert!(migration.steps.is_empty());
    assert_eq!(migration.filled, ["descriptor_format", "default_packages", "pins"]);
    assert!(migration.backup_path.is_some());

    assert!(store.missing_fields().unwrap().is_empty());
    let text = fs::read_to_string(store.path()).unwrap();
    assert!(text.contains("default_packages = []"), "{text}");
    assert!(text.contains("url = \"nixos-24.05\""), "{text}");
    assert!(store.migrate().unwrap().is_none());
    assert_eq!(backups(dir.path()), 1);
}
