mod common;

use std::path::PathBuf;

use anyhow::anyhow;
use common::{library, v, BuildTree};
use complog::discovery::{ResolvedReference, ResolvedResource};
use complog::record::ReferenceKind;
use complog::writer::DiagnosticKind;
use complog::{
    ArchiveReader, ArchiveWriter, ContentKind, Error, InvocationKind, Language, RawInvocation,
    ResolvedInputs,
};

#[test]
fn unreadable_input_drops_only_that_invocation() {
    common::init_logging();
    let tree = BuildTree::new();
    let good = tree.write("app/Good.cs", "class Good {}");
    let missing = tree.root.join("app/Missing.cs");

    let mut writer = ArchiveWriter::create(tree.archive()).expect("create");
    let err = writer
        .begin_invocation(tree.project(), Language::CSharp, InvocationKind::Regular)
        .expect("begin")
        .add_source(&good)
        .add_source(&missing)
        .add_additional_file(&good)
        .commit()
        .expect_err("missing source");
    match &err {
        Error::InputUnreadable { path, .. } => assert_eq!(path, &missing),
        other => panic!("unexpected {other}"),
    }
    assert!(err.is_invocation_scoped());
    assert_eq!(writer.record_count(), 0);

    let index = writer
        .begin_invocation(tree.project(), Language::CSharp, InvocationKind::Regular)
        .expect("begin")
        .add_source(&good)
        .commit()
        .expect("commit");
    assert_eq!(index, 0, "dropped invocation consumed no index");

    let sealed = writer.seal().expect("seal");
    assert_eq!(sealed.record_count, 1);
    assert_eq!(sealed.diagnostics.len(), 1);
    assert_eq!(sealed.diagnostics[0].kind, DiagnosticKind::InputUnreadable);

    let reader = sealed.open().expect("open");
    assert_eq!(reader.count(), 1);
    assert_eq!(reader.diagnostics(), sealed.diagnostics.as_slice());
    assert_eq!(reader.record(0).expect("record").contents.len(), 1);
}

#[test]
fn native_library_reference_is_unsupported() {
    let tree = BuildTree::new();
    let mut elf = b"\x7fELF\x02\x01\x01\x00".to_vec();
    elf.resize(4096, 0x90);
    let native = tree.write("runtimes/linux-x64/libe_sqlite3.so", &elf);

    let mut writer = ArchiveWriter::create(tree.archive()).expect("create");
    let err = writer
        .begin_invocation(tree.project(), Language::CSharp, InvocationKind::Regular)
        .expect("begin")
        .add_reference(&native, ReferenceKind::Assembly, false, &[] as &[&str])
        .commit()
        .expect_err("native reference");
    assert!(matches!(err, Error::UnsupportedModule { .. }));
    assert_eq!(writer.diagnostics()[0].kind, DiagnosticKind::UnsupportedModule);
    assert_eq!(writer.module_count(), 0);
}

#[test]
fn seal_is_single_use_and_gates_the_path() {
    let tree = BuildTree::new();
    let mut writer = ArchiveWriter::create(tree.archive()).expect("create");
    assert!(matches!(writer.archive_path(), Err(Error::NotSealed)));
    assert!(!tree.archive().exists(), "nothing published before seal");

    let sealed = writer.seal().expect("seal");
    assert_eq!(writer.archive_path().expect("path"), tree.archive().as_path());
    assert_eq!(sealed.path, tree.archive());
    assert!(matches!(writer.seal(), Err(Error::AlreadySealed)));

    let reader = ArchiveReader::open(tree.archive()).expect("open");
    assert_eq!(reader.count(), 0);
    assert_eq!(reader.manifest().format_version, complog::codec::ARCHIVE_FORMAT_VERSION);
}

#[test]
fn dropped_writer_publishes_nothing() {
    let tree = BuildTree::new();
    let src = tree.write("app/A.cs", "class A {}");
    {
        let mut writer = ArchiveWriter::create(tree.archive()).expect("create");
        writer
            .begin_invocation(tree.project(), Language::CSharp, InvocationKind::Regular)
            .expect("begin")
            .add_source(&src)
            .commit()
            .expect("commit");
    }
    assert!(!tree.archive().exists());
    let leftovers: Vec<_> = std::fs::read_dir(tree.dir.path())
        .expect("read_dir")
        .map(|e| e.expect("entry").file_name())
        .filter(|name| name.to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "temp file removed: {leftovers:?}");
}

#[test]
fn capture_resolves_relative_paths_against_working_directory() {
    let tree = BuildTree::new();
    tree.write("app/Program.cs", "class Program {}");
    tree.write("app/Strings.resx", "<root/>");
    tree.write("app/obj/Gen.g.cs", "partial class Program {}");
    let core = tree.module("lib/Core.dll", &library("Core", 1, v(1, 0)));

    let raw = RawInvocation {
        project_path: tree.project(),
        language: Language::CSharp,
        kind: InvocationKind::Regular,
        working_directory: tree.root.join("app"),
        arguments: vec!["/target:exe".to_string(), "Program.cs".to_string()],
    };
    let core_path = core.clone();
    let resolver = move |raw: &RawInvocation| -> anyhow::Result<ResolvedInputs> {
        assert_eq!(raw.arguments.len(), 2);
        Ok(ResolvedInputs {
            target_framework: Some("net8.0".to_string()),
            output_name: Some("app.dll".to_string()),
            contents: vec![(PathBuf::from("Program.cs"), ContentKind::Source)],
            resources: vec![ResolvedResource {
                path: PathBuf::from("Strings.resx"),
                name: "app.Strings.resources".to_string(),
                is_public: true,
            }],
            references: vec![ResolvedReference::assembly(core_path.clone())],
            analyzers: Vec::new(),
            generated: Some(vec![PathBuf::from("obj/Gen.g.cs")]),
            options: Default::default(),
        })
    };

    let mut writer = ArchiveWriter::create(tree.archive()).expect("create");
    assert_eq!(writer.capture(&raw, &resolver).expect("capture"), 0);

    let failing = |_: &RawInvocation| -> anyhow::Result<ResolvedInputs> {
        Err(anyhow!("response file not found"))
    };
    match writer.capture(&raw, &failing) {
        Err(Error::Discovery { message, .. }) => assert!(message.contains("response file")),
        other => panic!("unexpected {other:?}"),
    }

    let reader = writer.seal().expect("seal").open().expect("open");
    assert_eq!(reader.count(), 1);
    assert_eq!(reader.diagnostics()[0].kind, DiagnosticKind::Discovery);
    let record = reader.record(0).expect("record");
    assert_eq!(record.arguments, raw.arguments);
    assert_eq!(record.target_framework.as_deref(), Some("net8.0"));
    let cwd = tree.root.join("app").to_string_lossy().into_owned();
    assert_eq!(record.working_directory.as_deref(), Some(cwd.as_str()));
    assert_eq!(record.resources[0].file_name.as_deref(), Some("Strings.resx"));
    assert_eq!(
        reader.blob_bytes(&record.contents[0].key).expect("blob"),
        b"class Program {}"
    );
    let generated = record.generated.expect("generated captured");
    assert_eq!(generated.len(), 1);
    assert_eq!(
        reader.blob_bytes(&generated[0].key).expect("blob"),
        b"partial class Program {}"
    );
    assert_eq!(
        reader.module_bytes(&record.references[0].module).expect("module"),
        common::read(&core)
    );
}
