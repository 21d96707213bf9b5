use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use virtual_classpath::{
    ClassPath, ClassPathConfig, ClassPathError, HostRoot, JoinedRoot, MemoryRoot, Root, ZipRoot,
};
use zip::write::SimpleFileOptions;

const SCAN_TIMEOUT: Duration = Duration::from_secs(60);

fn write_jar(dir: &Path, name: &str, entries: &[(&str, &str)]) -> PathBuf {
    let path = dir.join(name);
    let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
    for (entry, contents) in entries {
        writer
            .start_file(*entry, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
    path
}

fn root_names(cp: &ClassPath<String>, path: &str) -> Vec<String> {
    cp.get_all_resources(path)
        .iter()
        .map(|found| found.data().unwrap().to_string())
        .collect()
}

#[test]
fn jars_on_disk_are_indexed_in_the_background() {
    let dir = tempfile::tempdir().unwrap();
    let cp = ClassPath::<String>::with_config(ClassPathConfig::default().with_max_scanners(2));

    let mut jars = Vec::new();
    for i in 0..6 {
        let own = format!("mod{i}/Main.class");
        let path = write_jar(
            dir.path(),
            &format!("mod{i}.jar"),
            &[
                ("META-INF/MANIFEST.MF", "Manifest-Version: 1.0\n"),
                (own.as_str(), "main"),
            ],
        );
        jars.push(path);
    }
    for (i, jar) in jars.iter().enumerate() {
        cp.add_root(ZipRoot::open(jar).unwrap(), Some(format!("mod{i}")));
    }

    // Answers do not depend on how far the scans got.
    assert_eq!(
        cp.find_resource("/META-INF/MANIFEST.MF")
            .unwrap()
            .data()
            .map(|d| d.as_str()),
        Some("mod0")
    );
    assert!(cp.wait_for_scans(SCAN_TIMEOUT));
    assert_eq!(cp.pending_fallback_roots(), 0);

    assert_eq!(
        root_names(&cp, "/META-INF/MANIFEST.MF"),
        ["mod0", "mod1", "mod2", "mod3", "mod4", "mod5"]
    );
    for i in 0..6 {
        let main = cp.find_resource(&format!("mod{i}/Main.class")).unwrap();
        assert_eq!(main.data().unwrap().as_str(), format!("mod{i}"));
        assert_eq!(main.read().unwrap(), b"main");
    }
}

#[test]
fn directories_and_generated_classes_overlay_jars() {
    let dir = tempfile::tempdir().unwrap();
    let classes = dir.path().join("classes");
    fs::create_dir_all(classes.join("net/example")).unwrap();
    fs::write(classes.join("net/example/Dev.class"), b"dev").unwrap();
    fs::write(classes.join("net/example/Shared.class"), b"from classes").unwrap();
    let jar = write_jar(
        dir.path(),
        "lib.jar",
        &[
            ("net/example/Shared.class", "from jar"),
            ("net/example/Lib.class", "lib"),
        ],
    );

    let cp = ClassPath::<String>::with_config(
        ClassPathConfig::default()
            .with_development(true)
            .with_validation(true),
    );
    let generated = MemoryRoot::read_write("generated");
    cp.add_root(HostRoot::new(&classes).unwrap(), Some("classes".into()));
    cp.add_root(ZipRoot::open(&jar).unwrap(), Some("lib".into()));
    cp.add_root(generated.clone(), Some("generated".into()));
    assert!(cp.wait_for_scans(SCAN_TIMEOUT));

    assert_eq!(
        cp.read_resource("net/example/Shared.class").unwrap().unwrap(),
        b"from classes"
    );
    assert_eq!(root_names(&cp, "/net/example/Shared.class"), ["classes", "lib"]);
    assert_eq!(cp.read_resource("/net/example/Lib.class").unwrap().unwrap(), b"lib");
    assert!(cp.read_resource("/net/example/Gen.class").unwrap().is_none());

    generated
        .write_file("/net/example/Gen.class", "generated")
        .unwrap();
    assert_eq!(
        cp.read_resource("/net/example/Gen.class").unwrap().unwrap(),
        b"generated"
    );
    assert_eq!(
        root_names(&cp, "/net/example"),
        ["classes", "lib", "generated"]
    );

    // Directories and the in-memory root are never indexed.
    assert_eq!(cp.pending_fallback_roots(), 2);
}

#[test]
fn joined_roots_keep_their_member_order() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_jar(dir.path(), "a.jar", &[("x.txt", "a")]);
    let b = write_jar(dir.path(), "b.jar", &[("x.txt", "b"), ("y.txt", "b")]);

    let members: Vec<Arc<dyn Root>> = vec![
        ZipRoot::open(&a).unwrap() as Arc<dyn Root>,
        ZipRoot::open(&b).unwrap(),
    ];
    let cp = ClassPath::<String>::with_config(ClassPathConfig::default().with_custom_table(false));
    cp.add_root(JoinedRoot::new("joined", members), Some("joined".into()));
    assert!(cp.wait_for_scans(SCAN_TIMEOUT));

    let x = cp.get_all_resources("/x.txt");
    assert_eq!(x.len(), 2);
    assert_eq!(x[0].read().unwrap(), b"a");
    assert_eq!(x[1].read().unwrap(), b"b");
    assert_eq!(cp.find_resource("/y.txt").unwrap().read().unwrap(), b"b");
}

#[test]
fn corrupt_jars_are_rejected_when_opened() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.jar");
    fs::write(&path, b"PK not really").unwrap();

    let err = ZipRoot::open(&path).unwrap_err();
    assert!(
        matches!(
            err,
            ClassPathError::Archive(_) | ClassPathError::Io(_)
        ),
        "{err}"
    );
}
