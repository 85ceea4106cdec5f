//! Archive formats mounted through the filesystem, and the descriptor pool
//! under a one-descriptor limit.

mod common;

use std::io::SeekFrom;

use common::{filesystem, pak, pk3, wad, wall_vpk, write_file};
use compat_formats::pak::{PAK_HEADER_LEN, PAK_NAME_LEN, PAK_RECORD_LEN};
use compat_formats::wad::LumpType;
use game_fs::{FsError, MountPosition, SearchPathFlags, SearchPathKind, StaticAssets};

#[test]
fn pak_member_is_a_window_into_the_container() {
    let temp = tempfile::tempdir().expect("tempdir");
    let payload: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 256) as u8).collect();
    let mut data = vec![0u8; 128];
    data[0..4].copy_from_slice(b"PACK");
    data[4..8].copy_from_slice(&(PAK_HEADER_LEN as u32).to_le_bytes());
    data[8..12].copy_from_slice(&(PAK_RECORD_LEN as u32).to_le_bytes());
    let record = &mut data[PAK_HEADER_LEN..PAK_HEADER_LEN + PAK_RECORD_LEN];
    record[..13].copy_from_slice(b"sound/foo.wav");
    record[PAK_NAME_LEN..PAK_NAME_LEN + 4].copy_from_slice(&128u32.to_le_bytes());
    record[PAK_NAME_LEN + 4..].copy_from_slice(&4096u32.to_le_bytes());
    data.extend_from_slice(&payload);
    let path = write_file(&temp.path().join("pak0.pak"), &data);

    let vfs = filesystem(temp.path(), None);
    vfs.add_archive(&path, SearchPathFlags::empty(), MountPosition::Back)
        .expect("mount pak");
    let mut handle = vfs.open("SOUND/Foo.WAV", "rb", false).expect("open");
    assert_eq!(handle.length(), 4096);
    handle.seek(SeekFrom::Start(1000)).expect("seek");
    let mut chunk = [0u8; 16];
    assert_eq!(handle.read(&mut chunk).expect("read"), 16);
    assert_eq!(&chunk[..], &payload[1000..1016]);
    assert_eq!(handle.tell(), 1016);
    handle.seek(SeekFrom::End(-1)).expect("seek end");
    assert_eq!(handle.getc().expect("getc"), Some(payload[4095]));
    assert_eq!(handle.getc().expect("getc at eof"), None);
    assert!(handle.eof());
}

#[test]
fn vpk_member_is_read_from_numbered_part() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir_path = wall_vpk(temp.path());
    let vfs = filesystem(temp.path(), None);
    vfs.add_archive(&dir_path, SearchPathFlags::empty(), MountPosition::Back)
        .expect("mount vpk");
    assert_eq!(
        vfs.load_file("materials/WALL.vtf", false).expect("load"),
        b"VTF-wall!!"
    );
    assert_eq!(vfs.file_size("materials/wall.vtf", false).expect("size"), 10);
    let found = vfs.search("materials/*", true, false).into_vec();
    assert_eq!(found, vec!["materials/wall.vtf"]);
}

#[test]
fn vpk_parts_are_never_mounted_on_their_own() {
    let temp = tempfile::tempdir().expect("tempdir");
    wall_vpk(temp.path());
    let vfs = filesystem(temp.path(), None);
    assert!(matches!(
        vfs.add_archive(&temp.path().join("pak01_002.vpk"), SearchPathFlags::empty(), MountPosition::Back),
        Err(FsError::MountFailure { .. })
    ));
    std::fs::remove_file(temp.path().join("pak01_002.vpk")).expect("remove part");
    assert!(matches!(
        vfs.add_archive(&temp.path().join("pak01_dir.vpk"), SearchPathFlags::empty(), MountPosition::Back),
        Err(FsError::MountFailure { .. })
    ));
    assert!(vfs.describe_paths().is_empty());
}

#[test]
fn every_backend_matches_case_insensitively() {
    let temp = tempfile::tempdir().expect("tempdir");
    let loose = temp.path().join("Loose");
    write_file(&loose.join("Cfg/Loose.CFG"), b"dir");
    let pak_path = pak(&temp.path().join("a.pak"), &[("Pak/Member.TXT", b"pak")]);
    let zip_path = pk3(&temp.path().join("b.pk3"), &[("Zip/Member.TXT", b"zip")]);
    let wad_path = write_file(
        &temp.path().join("Textures.wad"),
        &wad(&[("BRICK", LumpType::MIPTEX, b"wad")]),
    );
    let vpk_path = wall_vpk(temp.path());

    let vfs = filesystem(temp.path(), None);
    vfs.add_directory(&loose, SearchPathFlags::empty(), MountPosition::Back)
        .expect("dir");
    for archive in [&pak_path, &zip_path, &wad_path, &vpk_path] {
        vfs.add_archive(archive, SearchPathFlags::empty(), MountPosition::Back)
            .expect("archive");
    }
    vfs.add_platform_assets(
        "bundle",
        Box::new(StaticAssets::new("bundle").with_file("Assets/Icon.PNG", b"png".to_vec())),
        SearchPathFlags::empty(),
        MountPosition::Back,
    )
    .expect("assets");

    let cases: [(&str, &[u8]); 6] = [
        ("cfg/loose.cfg", b"dir"),
        ("PAK/member.txt", b"pak"),
        ("zip\\MEMBER.txt", b"zip"),
        ("textures/brick.MIP", b"wad"),
        ("Materials/Wall.Vtf", b"VTF-wall!!"),
        ("assets/icon.png", b"png"),
    ];
    for (name, expected) in cases {
        assert_eq!(vfs.load_file(name, false).expect(name), expected, "{}", name);
    }
}

#[test]
fn wads_inside_archives_are_mounted_after_their_container() {
    let temp = tempfile::tempdir().expect("tempdir");
    let gfx = wad(&[("conback", LumpType::GFXPIC, b"console"), ("{decal", LumpType::MIPTEX, b"decal")]);
    let archive = pk3(
        &temp.path().join("pak0.pk3"),
        &[("gfx.wad", &gfx[..]), ("gfx/readme.txt", b"readme")],
    );
    let skipped = pk3(&temp.path().join("pak1.pk3"), &[("other.wad", &gfx[..])]);

    let vfs = filesystem(temp.path(), None);
    vfs.add_archive(&archive, SearchPathFlags::empty(), MountPosition::Back)
        .expect("pk3");
    vfs.add_archive(&skipped, SearchPathFlags::SKIP_ARCHIVED_WADS, MountPosition::Back)
        .expect("pk3 without wads");

    assert_eq!(vfs.load_file("gfx/conback.lmp", false).expect("lump"), b"console");
    assert_eq!(vfs.load_file("{decal.mip", false).expect("lump"), b"decal");
    assert!(!vfs.file_exists("other/conback.lmp", false));

    let layers = vfs.explain("gfx/conback.lmp", false).expect("explain");
    assert_eq!(layers.len(), 1);
    assert_eq!(layers[0].path.kind(), SearchPathKind::Wad);
    assert!(layers[0].path.flags().contains(SearchPathFlags::PACKED_WAD));
    assert_eq!(vfs.describe_paths().len(), 3);

    assert_eq!(vfs.remove_search_path(&archive), 2);
    assert!(!vfs.file_exists("gfx/conback.lmp", false));
}

#[test]
fn damaged_member_is_sized_from_the_index_and_fails_on_read() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut seed = 0x1234_5678u32;
    let noise: Vec<u8> = (0..4096)
        .map(|_| {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (seed >> 24) as u8
        })
        .collect();
    let path = pk3(&temp.path().join("pak0.pk3"), &[("maps/dm1.bsp", &noise[..])]);
    let mut bytes = std::fs::read(&path).expect("read pk3");
    bytes[1000] ^= 0xff;
    std::fs::write(&path, bytes).expect("damage pk3");

    let vfs = filesystem(temp.path(), None);
    vfs.add_archive(&path, SearchPathFlags::empty(), MountPosition::Back)
        .expect("mount");
    assert!(vfs.file_exists("maps/dm1.bsp", false));
    assert_eq!(vfs.file_size("MAPS/DM1.BSP", false).expect("size"), 4096);
    assert!(vfs.file_time("maps/dm1.bsp", false).expect("time").is_some());

    let mut handle = vfs.open("maps/dm1.bsp", "rb", false).expect("open");
    assert!(handle.is_corrupt());
    assert!(!handle.is_closed());
    assert!(matches!(
        handle.read_to_end(),
        Err(FsError::CorruptEntry { .. })
    ));
    assert!(matches!(
        vfs.load_file("maps/dm1.bsp", false),
        Err(FsError::CorruptEntry { .. })
    ));
}

#[test]
fn one_descriptor_serves_many_archives() {
    let temp = tempfile::tempdir().expect("tempdir");
    let first = pak(
        &temp.path().join("pak0.pak"),
        &[("a.txt", b"abcdefghijklmnopqrstuvwxyz")],
    );
    let second = pak(
        &temp.path().join("pak1.pak"),
        &[("b.txt", b"ABCDEFGHIJKLMNOPQRSTUVWXYZ")],
    );
    let third = pk3(&temp.path().join("pak2.pk3"), &[("c.txt", b"0123456789")]);

    let vfs = filesystem(temp.path(), Some(1));
    for archive in [&first, &second, &third] {
        vfs.add_archive(archive, SearchPathFlags::empty(), MountPosition::Back)
            .expect("mount");
    }
    let mut a = vfs.open("a.txt", "rb", false).expect("a");
    let mut b = vfs.open("b.txt", "rb", false).expect("b");
    let mut c = vfs.open("c.txt", "rb", false).expect("c");

    let mut byte = [0u8; 1];
    for round in 0..10 {
        a.read(&mut byte).expect("read a");
        assert_eq!(byte[0], b'a' + round);
        b.read(&mut byte).expect("read b");
        assert_eq!(byte[0], b'A' + round);
        c.read(&mut byte).expect("read c");
        assert_eq!(byte[0], b'0' + round);
        assert!(vfs.descriptor_pool().live_count() <= 1);
    }
    assert_eq!(a.tell(), 10);
    assert_eq!(b.tell(), 10);
    assert_eq!(c.tell(), 10);
    assert_eq!(a.read_to_end().expect("rest of a"), b"klmnopqrstuvwxyz");
}

#[test]
fn large_reads_alternate_between_suspended_containers() {
    let temp = tempfile::tempdir().expect("tempdir");
    let left: Vec<u8> = (0..3000u32).map(|i| (i % 200) as u8).collect();
    let right: Vec<u8> = (0..3000u32).map(|i| (i % 100) as u8 + 100).collect();
    let first = pak(&temp.path().join("left.pak"), &[("left.bin", &left[..])]);
    let second = pak(&temp.path().join("right.pak"), &[("right.bin", &right[..])]);

    let vfs = filesystem(temp.path(), Some(1));
    vfs.add_archive(&first, SearchPathFlags::empty(), MountPosition::Back)
        .expect("left");
    vfs.add_archive(&second, SearchPathFlags::empty(), MountPosition::Back)
        .expect("right");
    let mut l = vfs.open("left.bin", "rb", false).expect("left");
    let mut r = vfs.open("right.bin", "rb", false).expect("right");

    let mut chunk = vec![0u8; 1500];
    for part in 0..2 {
        let range = part * 1500..(part + 1) * 1500;
        assert_eq!(l.read(&mut chunk).expect("read left"), 1500);
        assert_eq!(chunk, &left[range.clone()]);
        assert_eq!(r.read(&mut chunk).expect("read right"), 1500);
        assert_eq!(chunk, &right[range]);
        assert_eq!(vfs.descriptor_pool().live_count(), 1);
    }
    assert!(l.eof() && r.eof());
}
