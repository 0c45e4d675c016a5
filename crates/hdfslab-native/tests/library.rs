//! Integration tests for the id-based library API.

use hdfslab_native::{
    DatasetCreateProps, Datatype, FileAccessProps, Library, NativeError, ObjectKind, TypeClass,
    SIGNATURE, UNLIMITED,
};

fn i32_bytes(vals: &[i32]) -> Vec<u8> {
    vals.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn to_i32(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

// ---------------------------------------------------------------------------
// Files and ids
// ---------------------------------------------------------------------------

#[test]
fn create_write_close_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.h5");
    let lib = Library::new();

    let file = lib.file_create(&path, &FileAccessProps::new()).unwrap();
    let ty = lib.type_register(Datatype::native_int(4, true)).unwrap();
    let space = lib.space_create_simple(&[2, 3], None).unwrap();
    let ds = lib
        .dataset_create(file, "/values", ty, space, &DatasetCreateProps::new())
        .unwrap();
    lib.dataset_write(ds, None, &i32_bytes(&[1, 2, 3, 4, 5, 6]))
        .unwrap();
    lib.dataset_close(ds).unwrap();
    lib.space_close(space).unwrap();
    lib.type_close(ty).unwrap();
    lib.file_close(file).unwrap();
    assert_eq!(lib.open_id_count(), 0);
    assert_eq!(lib.open_file_count(), 0);

    let file = lib
        .file_open(&path, &FileAccessProps::new().read_only())
        .unwrap();
    let ds = lib.dataset_open(file, "values").unwrap();
    let mut buf = vec![0u8; 24];
    lib.dataset_read(ds, None, &mut buf).unwrap();
    assert_eq!(to_i32(&buf), vec![1, 2, 3, 4, 5, 6]);
    lib.dataset_close(ds).unwrap();
    lib.file_close(file).unwrap();
}

#[test]
fn created_file_carries_hdf5_signature() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sig.h5");
    let lib = Library::new();
    let file = lib.file_create(&path, &FileAccessProps::new()).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes[..8], [0x89, 0x48, 0x44, 0x46, 0x0d, 0x0a, 0x1a, 0x0a]);
    assert_eq!(bytes[..8], SIGNATURE);
    lib.file_close(file).unwrap();
}

#[test]
fn partial_rewrite_keeps_other_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("patch.h5");
    let lib = Library::new();
    let file = lib.file_create(&path, &FileAccessProps::new()).unwrap();
    let ty = lib.type_register(Datatype::native_int(4, true)).unwrap();
    let space = lib.space_create_simple(&[8], None).unwrap();
    let ds = lib
        .dataset_create(file, "/v", ty, space, &DatasetCreateProps::new().chunk(&[2]))
        .unwrap();
    lib.dataset_write(ds, None, &i32_bytes(&[0, 1, 2, 3, 4, 5, 6, 7]))
        .unwrap();
    lib.dataset_close(ds).unwrap();
    lib.file_close(file).unwrap();
    let len = std::fs::metadata(&path).unwrap().len();

    let file = lib.file_open(&path, &FileAccessProps::new()).unwrap();
    let ds = lib.dataset_open(file, "/v").unwrap();
    let fs = lib.dataset_get_space(ds).unwrap();
    lib.space_select_hyperslab(fs, &[3], &[1], &[1], &[1]).unwrap();
    lib.dataset_write(ds, Some(fs), &i32_bytes(&[-3])).unwrap();
    lib.space_close(fs).unwrap();
    lib.dataset_close(ds).unwrap();
    lib.file_close(file).unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), len);

    let file = lib
        .file_open(&path, &FileAccessProps::new().read_only())
        .unwrap();
    let ds = lib.dataset_open(file, "/v").unwrap();
    let mut buf = vec![0u8; 32];
    lib.dataset_read(ds, None, &mut buf).unwrap();
    assert_eq!(to_i32(&buf), vec![0, 1, 2, -3, 4, 5, 6, 7]);
    lib.dataset_close(ds).unwrap();
    lib.space_close(space).unwrap();
    lib.type_close(ty).unwrap();
    lib.file_close(file).unwrap();
}

#[test]
fn double_close_is_invalid_id() {
    let lib = Library::new();
    let space = lib.space_create_scalar().unwrap();
    lib.space_close(space).unwrap();
    assert!(matches!(
        lib.space_close(space),
        Err(NativeError::InvalidId(id)) if id == space
    ));
}

#[test]
fn wrong_kind_close_keeps_id() {
    let lib = Library::new();
    let space = lib.space_create_scalar().unwrap();
    assert!(matches!(
        lib.type_close(space),
        Err(NativeError::WrongIdKind { .. })
    ));
    assert_eq!(lib.open_id_count(), 1);
    lib.space_close(space).unwrap();
}

#[test]
fn file_survives_until_last_object_closes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("late.h5");
    let lib = Library::new();

    let file = lib.file_create(&path, &FileAccessProps::new()).unwrap();
    let group = lib.group_create(file, "/entry").unwrap();
    lib.file_close(file).unwrap();
    assert_eq!(lib.open_file_count(), 1);
    lib.group_close(group).unwrap();
    assert_eq!(lib.open_file_count(), 0);

    let file = lib.file_open(&path, &FileAccessProps::new()).unwrap();
    assert_eq!(
        lib.object_kind(file, "/entry").unwrap(),
        Some(ObjectKind::Group)
    );
    lib.file_close(file).unwrap();
}

#[test]
fn read_only_rejects_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ro.h5");
    let lib = Library::new();
    let file = lib.file_create(&path, &FileAccessProps::new()).unwrap();
    lib.file_close(file).unwrap();

    let file = lib
        .file_open(&path, &FileAccessProps::new().read_only())
        .unwrap();
    assert!(matches!(
        lib.group_create(file, "/g"),
        Err(NativeError::ReadOnly(_))
    ));
    lib.file_close(file).unwrap();
}

// ---------------------------------------------------------------------------
// Datasets
// ---------------------------------------------------------------------------

#[test]
fn extendible_requires_chunking() {
    let dir = tempfile::tempdir().unwrap();
    let lib = Library::new();
    let file = lib
        .file_create(&dir.path().join("x.h5"), &FileAccessProps::new())
        .unwrap();
    let ty = lib.type_register(Datatype::native_float(8)).unwrap();
    let space = lib
        .space_create_simple(&[0, 4], Some(&[UNLIMITED, 4][..]))
        .unwrap();
    assert!(matches!(
        lib.dataset_create(file, "/d", ty, space, &DatasetCreateProps::new()),
        Err(NativeError::CannotExtend(_))
    ));
    let ds = lib
        .dataset_create(
            file,
            "/d",
            ty,
            space,
            &DatasetCreateProps::new().chunk(&[16, 4]),
        )
        .unwrap();
    let props = lib.dataset_get_create_props(ds).unwrap();
    assert_eq!(props.chunk_dims, Some(vec![16, 4]));
    lib.dataset_close(ds).unwrap();
    lib.space_close(space).unwrap();
    lib.type_close(ty).unwrap();
    lib.file_close(file).unwrap();
}

#[test]
fn extend_and_write_hyperslab() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grow.h5");
    let lib = Library::new();
    let file = lib.file_create(&path, &FileAccessProps::new()).unwrap();
    let ty = lib.type_register(Datatype::native_int(4, true)).unwrap();
    let space = lib
        .space_create_simple(&[0, 4], Some(&[UNLIMITED, 4][..]))
        .unwrap();
    let dcpl = DatasetCreateProps::new().chunk(&[2, 4]).deflate(6);
    let ds = lib.dataset_create(file, "/rows", ty, space, &dcpl).unwrap();

    for row in 0..3u64 {
        lib.dataset_set_extent(ds, &[row + 1, 4]).unwrap();
        let fs = lib.dataset_get_space(ds).unwrap();
        lib.space_select_hyperslab(fs, &[row, 0], &[1, 1], &[1, 4], &[1, 1])
            .unwrap();
        assert_eq!(lib.space_get_select_npoints(fs).unwrap(), 4);
        let base = row as i32 * 4;
        lib.dataset_write(ds, Some(fs), &i32_bytes(&[base + 1, base + 2, base + 3, base + 4]))
            .unwrap();
        lib.space_close(fs).unwrap();
    }

    let fs = lib.dataset_get_space(ds).unwrap();
    assert_eq!(
        lib.space_get_dims(fs).unwrap(),
        (vec![3, 4], vec![UNLIMITED, 4])
    );
    lib.space_close(fs).unwrap();
    lib.dataset_close(ds).unwrap();
    lib.space_close(space).unwrap();
    lib.type_close(ty).unwrap();
    lib.file_close(file).unwrap();

    let file = lib.file_open(&path, &FileAccessProps::new()).unwrap();
    let ds = lib.dataset_open(file, "/rows").unwrap();
    let mut buf = vec![0u8; 48];
    lib.dataset_read(ds, None, &mut buf).unwrap();
    assert_eq!(to_i32(&buf), (1..=12).collect::<Vec<_>>());
    assert!(lib.dataset_set_extent(ds, &[3, 5]).is_err());
    lib.dataset_close(ds).unwrap();
    lib.file_close(file).unwrap();
}

#[test]
fn variable_length_strings() {
    let dir = tempfile::tempdir().unwrap();
    let lib = Library::new();
    let file = lib
        .file_create(&dir.path().join("s.h5"), &FileAccessProps::new())
        .unwrap();
    let ty = lib.type_register(Datatype::var_string()).unwrap();
    assert!(lib.type_is_variable_str(ty).unwrap());
    let space = lib.space_create_simple(&[2], None).unwrap();
    let ds = lib
        .dataset_create(file, "/names", ty, space, &DatasetCreateProps::new())
        .unwrap();
    lib.dataset_write_vlen(ds, None, &[b"alpha".to_vec(), b"b".to_vec()])
        .unwrap();
    assert_eq!(
        lib.dataset_read_vlen(ds, None).unwrap(),
        vec![b"alpha".to_vec(), b"b".to_vec()]
    );
    lib.dataset_close(ds).unwrap();
    lib.space_close(space).unwrap();
    lib.type_close(ty).unwrap();
    lib.file_close(file).unwrap();
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[test]
fn compound_member_queries() {
    let lib = Library::new();
    let ty = lib
        .type_register(Datatype::packed_compound(vec![
            ("r".into(), Datatype::native_float(8)),
            ("i".into(), Datatype::native_float(8)),
        ]))
        .unwrap();
    assert_eq!(lib.type_get_class(ty).unwrap(), TypeClass::Compound);
    assert_eq!(lib.type_get_size(ty).unwrap(), 16);
    assert_eq!(lib.type_get_nmembers(ty).unwrap(), 2);
    assert_eq!(lib.type_get_member_name(ty, 1).unwrap(), "i");
    assert_eq!(lib.type_get_member_offset(ty, 1).unwrap(), 8);
    let member = lib.type_get_member_type(ty, 0).unwrap();
    assert_eq!(lib.type_get_class(member).unwrap(), TypeClass::Float);
    lib.type_close(member).unwrap();
    lib.type_close(ty).unwrap();
    assert_eq!(lib.open_id_count(), 0);
}

#[test]
fn array_super_and_dims() {
    let lib = Library::new();
    let ty = lib
        .type_register(Datatype::Array {
            base_type: Box::new(Datatype::native_int(2, false)),
            dimensions: vec![3],
        })
        .unwrap();
    assert_eq!(lib.type_get_array_dims(ty).unwrap(), vec![3]);
    let base = lib.type_get_super(ty).unwrap();
    assert!(!lib.type_get_sign(base).unwrap());
    lib.type_close(base).unwrap();
    lib.type_close(ty).unwrap();
}

// ---------------------------------------------------------------------------
// Attributes and links
// ---------------------------------------------------------------------------

#[test]
fn attributes_on_groups() {
    let dir = tempfile::tempdir().unwrap();
    let lib = Library::new();
    let file = lib
        .file_create(&dir.path().join("a.h5"), &FileAccessProps::new())
        .unwrap();
    let group = lib.group_create(file, "/entry").unwrap();
    let ty = lib.type_register(Datatype::fixed_string(8)).unwrap();
    let space = lib.space_create_scalar().unwrap();
    let attr = lib.attr_create(group, "NX_class", ty, space).unwrap();
    lib.attr_write(attr, b"NXentry\0").unwrap();
    lib.attr_close(attr).unwrap();

    assert!(lib.attr_exists(group, "NX_class").unwrap());
    assert_eq!(lib.attr_count(group).unwrap(), 1);
    let attr = lib.attr_open_by_idx(group, 0).unwrap();
    assert_eq!(lib.attr_name(attr).unwrap(), "NX_class");
    let mut buf = [0u8; 8];
    lib.attr_read(attr, &mut buf).unwrap();
    assert_eq!(&buf, b"NXentry\0");
    lib.attr_close(attr).unwrap();

    assert!(matches!(
        lib.attr_create(group, "NX_class", ty, space),
        Err(NativeError::AlreadyExists(_))
    ));
    lib.attr_delete(group, "NX_class").unwrap();
    assert!(!lib.attr_exists(group, "NX_class").unwrap());

    lib.space_close(space).unwrap();
    lib.type_close(ty).unwrap();
    lib.group_close(group).unwrap();
    lib.file_close(file).unwrap();
}

#[test]
fn external_link_resolves_into_target() {
    let dir = tempfile::tempdir().unwrap();
    let lib = Library::new();

    let target = dir.path().join("target.h5");
    let file = lib.file_create(&target, &FileAccessProps::new()).unwrap();
    let ty = lib.type_register(Datatype::native_int(4, true)).unwrap();
    let space = lib.space_create_simple(&[2], None).unwrap();
    let ds = lib
        .dataset_create(file, "/data", ty, space, &DatasetCreateProps::new())
        .unwrap();
    lib.dataset_write(ds, None, &i32_bytes(&[7, 8])).unwrap();
    lib.dataset_close(ds).unwrap();
    lib.space_close(space).unwrap();
    lib.type_close(ty).unwrap();
    lib.file_close(file).unwrap();

    let source = dir.path().join("source.h5");
    let file = lib.file_create(&source, &FileAccessProps::new()).unwrap();
    lib.link_external_create(std::path::Path::new("target.h5"), "/data", file, "/linked")
        .unwrap();
    assert!(lib.link_exists(file, "/linked").unwrap());
    assert_eq!(
        lib.object_kind(file, "/linked").unwrap(),
        Some(ObjectKind::Dataset)
    );
    assert_eq!(lib.open_file_count(), 1);

    let ds = lib.dataset_open(file, "/linked").unwrap();
    assert_eq!(lib.open_file_count(), 2);
    let mut buf = [0u8; 8];
    lib.dataset_read(ds, None, &mut buf).unwrap();
    assert_eq!(to_i32(&buf), vec![7, 8]);
    lib.dataset_close(ds).unwrap();
    lib.file_close(file).unwrap();
    assert_eq!(lib.open_file_count(), 0);
}

#[test]
fn missing_paths() {
    let dir = tempfile::tempdir().unwrap();
    let lib = Library::new();
    let file = lib
        .file_create(&dir.path().join("m.h5"), &FileAccessProps::new())
        .unwrap();
    assert_eq!(lib.object_kind(file, "/nope").unwrap(), None);
    assert!(!lib.link_exists(file, "/a/b").unwrap());
    assert!(matches!(
        lib.dataset_open(file, "/nope"),
        Err(NativeError::NotFound(_))
    ));
    assert!(matches!(
        lib.group_create(file, "/a/b"),
        Err(NativeError::NotFound(_))
    ));
    lib.file_close(file).unwrap();
}
