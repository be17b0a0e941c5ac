mod common;

use std::path::PathBuf;

use common::{analyzer, id, v, BuildTree};
use complog::loader::{
    self, ExtensionOrigin, InMemoryLoader, ModuleLocation, NoneLoader, OnDiskLoader,
    SYNTHETIC_GENERATOR,
};
use complog::module::ExtensionKind;
use complog::{
    ArchiveReader, ArchiveWriter, Error, ExtensionLoader, GeneratedOutcome, HostModules,
    InvocationKind, Language, LoaderConfig, LoaderKind, ModuleImage,
};

fn archive_with(tree: &BuildTree, analyzers: &[(&str, &ModuleImage)]) -> ArchiveReader {
    let src = tree.write("app/A.cs", "class A {}");
    let mut writer = ArchiveWriter::create(tree.archive()).expect("create");
    let builder = writer
        .begin_invocation(tree.project(), Language::CSharp, InvocationKind::Regular)
        .expect("begin")
        .add_source(&src);
    let builder = analyzers.iter().fold(builder, |b, (rel, image)| {
        b.add_analyzer(tree.module(rel, image))
    });
    builder.commit().expect("commit");
    writer.seal().expect("seal").open().expect("open")
}

fn file_locations(loader: &dyn ExtensionLoader) -> Vec<PathBuf> {
    loader
        .analyzers(Language::CSharp)
        .into_iter()
        .filter_map(|handle| match handle.origin {
            ExtensionOrigin::Module {
                location: ModuleLocation::File(path),
                ..
            } => Some(path),
            _ => None,
        })
        .collect()
}

#[test]
fn dependency_newer_than_host_is_a_conflict() {
    common::init_logging();
    let tree = BuildTree::new();
    let image = analyzer("Contoso.Analyzers", 3, v(1, 0)).dependency("Core", v(2, 0));
    let reader = archive_with(&tree, &[("analyzers/Contoso.Analyzers.dll", &image)]);
    let record = reader.record(0).expect("record");
    let host = HostModules::new().with("Core", v(1, 0));

    for kind in [LoaderKind::InMemory, LoaderKind::OnDisk] {
        let config = LoaderConfig {
            kind,
            temp_root: Some(tree.dir.path().join("loaders")),
            host: host.clone(),
        };
        match loader::create(&config, &reader, &record) {
            Err(Error::VersionConflict {
                name,
                requested,
                available,
            }) => {
                assert_eq!(name, "Core");
                assert_eq!(requested, v(2, 0));
                assert_eq!(available, v(1, 0));
            }
            Err(other) => panic!("{kind}: unexpected error {other}"),
            Ok(_) => panic!("{kind}: resolved against an older host module"),
        }
    }
}

#[test]
fn host_provided_analyzer_is_delegated() {
    let tree = BuildTree::new();
    let compiler = analyzer("Compiler", 4, v(4, 0));
    let own = analyzer("Contoso", 5, v(1, 0)).dependency("Compiler", v(4, 0));
    let reader = archive_with(
        &tree,
        &[("a/Compiler.dll", &compiler), ("a/Contoso.dll", &own)],
    );
    let record = reader.record(0).expect("record");
    let host = HostModules::new().with("Compiler", v(4, 8));

    let loaders: Vec<Box<dyn ExtensionLoader>> = vec![
        Box::new(InMemoryLoader::new(&reader, &record, &host).expect("in-memory")),
        Box::new(OnDiskLoader::new(&reader, &record, &host, None).expect("on-disk")),
    ];
    for loader in loaders {
        let analyzers = loader.analyzers(Language::CSharp);
        let names: Vec<_> = analyzers.iter().map(|h| h.type_name.as_str()).collect();
        assert_eq!(names, ["Compiler.Analyzer", "Contoso.Analyzer"]);
        match &analyzers[0].origin {
            ExtensionOrigin::Module {
                location: ModuleLocation::Host(version),
                name,
                ..
            } => {
                assert_eq!(name, "Compiler");
                assert_eq!(*version, v(4, 8));
            }
            other => panic!("{}: unexpected origin {other:?}", loader.kind()),
        }
        assert!(!matches!(
            &analyzers[1].origin,
            ExtensionOrigin::Module {
                location: ModuleLocation::Host(_),
                ..
            }
        ));
        assert_eq!(loader.generators(Language::VisualBasic).len(), 2);
    }

    let too_old_host = HostModules::new().with("Compiler", v(3, 0));
    assert!(matches!(
        InMemoryLoader::new(&reader, &record, &too_old_host),
        Err(Error::VersionConflict { .. })
    ));
}

#[test]
fn markers_select_by_kind_and_language() {
    let tree = BuildTree::new();
    let reader = archive_with(&tree, &[("a/Gen.dll", &analyzer("Gen", 6, v(1, 0)))]);
    let record = reader.record(0).expect("record");
    let loader = InMemoryLoader::new(&reader, &record, &HostModules::new()).expect("loader");

    assert_eq!(loader.analyzers(Language::CSharp).len(), 1);
    assert!(loader.analyzers(Language::VisualBasic).is_empty());
    assert_eq!(loader.generators(Language::VisualBasic).len(), 1);
    let generator = &loader.generators(Language::CSharp)[0];
    assert_eq!(generator.kind, ExtensionKind::Generator);
    match &generator.origin {
        ExtensionOrigin::Module {
            location: ModuleLocation::Memory(bytes),
            id: module,
            ..
        } => {
            assert_eq!(*module, id(6));
            assert_eq!(bytes.to_vec(), reader.module_bytes(&id(6)).expect("bytes"));
        }
        other => panic!("unexpected origin {other:?}"),
    }
}

#[test]
fn same_simple_name_different_identity_does_not_collide() {
    let tree = BuildTree::new();
    let older = analyzer("Gen", 7, v(1, 0));
    let newer = analyzer("Gen", 8, v(2, 0));
    let reader = archive_with(&tree, &[("x/Gen.dll", &older), ("y/Gen.dll", &newer)]);
    let record = reader.record(0).expect("record");
    let loader = OnDiskLoader::new(&reader, &record, &HostModules::new(), None).expect("loader");

    let paths = file_locations(&loader);
    assert_eq!(paths.len(), 2);
    assert_ne!(paths[0], paths[1]);
    for (path, module) in paths.iter().zip([id(7), id(8)]) {
        assert!(path.ends_with("Gen.dll"));
        assert_eq!(common::read(path), reader.module_bytes(&module).expect("bytes"));
    }
}

#[test]
fn module_name_cannot_escape_the_session_directory() {
    let tree = BuildTree::new();
    let hostile = analyzer("../../../escaped", 10, v(1, 0));
    let reader = archive_with(&tree, &[("a/Hostile.dll", &hostile)]);
    let record = reader.record(0).expect("record");
    let root = tree.dir.path().join("sessions");
    let mut loader =
        OnDiskLoader::new(&reader, &record, &HostModules::new(), Some(&root)).expect("loader");

    let dir = loader.directory().expect("dir").to_path_buf();
    let paths = file_locations(&loader);
    assert_eq!(paths.len(), 1);
    assert!(paths[0].starts_with(&dir), "{} outside {}", paths[0].display(), dir.display());
    assert!(paths[0].ends_with(format!("{}.dll", id(10).to_hex())));
    assert!(!tree.dir.path().join("escaped.dll").exists());

    loader.dispose();
    assert!(!paths[0].exists());
}

#[test]
fn disposing_one_session_leaves_another_intact() {
    let tree = BuildTree::new();
    let reader = archive_with(&tree, &[("a/Gen.dll", &analyzer("Gen", 9, v(1, 0)))]);
    let record = reader.record(0).expect("record");
    let root = tree.dir.path().join("sessions");
    let mut first =
        OnDiskLoader::new(&reader, &record, &HostModules::new(), Some(&root)).expect("first");
    let second =
        OnDiskLoader::new(&reader, &record, &HostModules::new(), Some(&root)).expect("second");

    let first_dir = first.directory().expect("dir").to_path_buf();
    let second_files = file_locations(&second);
    assert_ne!(Some(first_dir.as_path()), second.directory());

    first.dispose();
    first.dispose();
    assert!(first.is_disposed());
    assert!(!first_dir.exists());
    assert!(first.analyzers(Language::CSharp).is_empty());
    assert!(second_files.iter().all(|p| p.exists()));

    let second_dir = second.directory().expect("dir").to_path_buf();
    drop(second);
    assert!(!second_dir.exists(), "drop disposes");
}

#[test]
fn none_strategy_replays_captured_output_deterministically() {
    let tree = BuildTree::new();
    let mut writer = ArchiveWriter::create(tree.archive()).expect("create");
    writer
        .begin_invocation(tree.project(), Language::CSharp, InvocationKind::Regular)
        .expect("begin")
        .add_generated_text("Gen/B.g.cs", b"partial class B {}")
        .add_generated_text("Gen/A.g.cs", b"partial class A {}")
        .commit()
        .expect("commit");
    writer
        .begin_invocation(tree.project(), Language::CSharp, InvocationKind::Regular)
        .expect("begin")
        .mark_generators_captured()
        .commit()
        .expect("commit");
    writer
        .begin_invocation(tree.project(), Language::CSharp, InvocationKind::Regular)
        .expect("begin")
        .commit()
        .expect("commit");
    let reader = writer.seal().expect("seal").open().expect("open");

    let record = reader.record(0).expect("record");
    let first = NoneLoader::new(&reader, &record).expect("loader");
    let second = NoneLoader::new(&reader, &record).expect("loader");
    assert_eq!(first.outcome(), second.outcome());
    let paths: Vec<_> = first.outcome().files().iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, ["Gen/B.g.cs", "Gen/A.g.cs"]);
    assert_eq!(&*first.outcome().files()[1].text, b"partial class A {}");
    assert!(first.analyzers(Language::CSharp).is_empty());

    let empty = NoneLoader::new(&reader, &reader.record(1).expect("record")).expect("loader");
    assert_eq!(empty.outcome(), &GeneratedOutcome::Captured(Vec::new()));
    let never = NoneLoader::new(&reader, &reader.record(2).expect("record")).expect("loader");
    assert_eq!(never.outcome(), &GeneratedOutcome::NotCaptured);

    for loader in [&empty, &never] {
        let generators = loader.generators(Language::CSharp);
        assert_eq!(generators.len(), 1, "synthetic generator always exposed");
        assert_eq!(generators[0].type_name, SYNTHETIC_GENERATOR);
    }
}
