//! Search path ordering, write target selection and cross-layer search.

mod common;

use std::fs;

use common::{filesystem, pak, pk3, write_file};
use game_fs::mount_manifest::parse_mount_manifest;
use game_fs::{FsError, MountPosition, SearchPathFlags};

#[test]
fn closest_override_wins() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mod_dir = temp.path().join("mod");
    let base_dir = temp.path().join("base");
    write_file(&mod_dir.join("cfg/default.cfg"), b"mod");
    write_file(&base_dir.join("cfg/default.cfg"), b"base");
    let base_pak = pak(&temp.path().join("base.pak"), &[("cfg/default.cfg", b"pak"), ("progs.dat", b"progs")]);

    let vfs = filesystem(temp.path(), None);
    vfs.add_directory(&mod_dir, SearchPathFlags::CUSTOM_PATH, MountPosition::Back)
        .expect("mod");
    vfs.add_directory(&base_dir, SearchPathFlags::empty(), MountPosition::Back)
        .expect("base");
    vfs.add_archive(&base_pak, SearchPathFlags::empty(), MountPosition::Back)
        .expect("pak");

    for _ in 0..3 {
        assert_eq!(vfs.load_file("cfg/default.cfg", false).expect("load"), b"mod");
    }
    assert_eq!(vfs.load_file("progs.dat", false).expect("load"), b"progs");

    let layers = vfs.explain("CFG/Default.cfg", false).expect("explain");
    assert_eq!(layers.len(), 3);
    assert_eq!(layers[0].path.mount_name(), mod_dir.as_path());

    // Front insertion shadows everything mounted earlier.
    let front = temp.path().join("front");
    write_file(&front.join("cfg/default.cfg"), b"front");
    vfs.add_directory(&front, SearchPathFlags::empty(), MountPosition::Front)
        .expect("front");
    assert_eq!(vfs.load_file("cfg/default.cfg", false).expect("load"), b"front");
}

#[test]
fn search_is_deduplicated_across_layers() {
    let temp = tempfile::tempdir().expect("tempdir");
    let loose = temp.path().join("loose");
    write_file(&loose.join("maps/e1m1.bsp"), b"loose");
    write_file(&loose.join("maps/start.bsp"), b"start");
    let pk3 = pk3(
        &temp.path().join("pak0.pk3"),
        &[("maps/E1M1.bsp", b"packed"), ("maps/e1m2.bsp", b"two")],
    );

    let vfs = filesystem(temp.path(), None);
    vfs.add_directory(&loose, SearchPathFlags::empty(), MountPosition::Back)
        .expect("loose");
    vfs.add_archive(&pk3, SearchPathFlags::empty(), MountPosition::Back)
        .expect("pk3");

    let found = vfs.search("maps/*.bsp", true, false).into_vec();
    assert_eq!(found, vec!["maps/e1m1.bsp", "maps/start.bsp", "maps/e1m2.bsp"]);
    let again = vfs.search("maps/*.bsp", true, false).into_vec();
    assert_eq!(found, again);
    assert!(vfs.search("..", true, false).is_empty());
}

#[test]
fn written_files_load_back() {
    let temp = tempfile::tempdir().expect("tempdir");
    let game = temp.path().join("game");
    fs::create_dir_all(&game).expect("mkdir");
    let vfs = filesystem(temp.path(), None);
    vfs.add_directory(&game, SearchPathFlags::GAME_DIR, MountPosition::Back)
        .expect("mount");

    vfs.write_file("save/slot1.sav", b"health 100").expect("write");
    assert_eq!(vfs.load_file("SAVE/Slot1.SAV", false).expect("load"), b"health 100");
    assert_eq!(vfs.file_size("save/slot1.sav", false).expect("size"), 10);
    assert!(vfs.file_time("save/slot1.sav", false).expect("time").is_some());

    let mut log = vfs.open("console.log", "a", false).expect("append");
    log.printf(format_args!("{} {}\n", "map", "e1m1")).expect("printf");
    log.close();
    let mut log = vfs.open("console.log", "ab", false).expect("append again");
    log.print("quit\n").expect("print");
    log.close();
    assert_eq!(vfs.load_file("console.log", false).expect("load"), b"map e1m1\nquit\n");

    vfs.rename("save/slot1.sav", "save/quick.sav").expect("rename");
    assert!(!vfs.file_exists("save/slot1.sav", false));
    assert!(vfs.file_exists("save/quick.sav", true));
    vfs.rename("save/quick.sav", "SAVE/QUICK.SAV").expect("same-name rename");
    assert!(matches!(
        vfs.rename("save/missing.sav", "save/other.sav"),
        Err(FsError::NotFound(_))
    ));

    vfs.delete("save/quick.sav").expect("delete");
    assert!(!vfs.file_exists("save/quick.sav", false));
    vfs.delete("save/quick.sav").expect("deleting a missing file");
}

#[test]
fn archived_files_cannot_be_modified() {
    let temp = tempfile::tempdir().expect("tempdir");
    let game = temp.path().join("game");
    fs::create_dir_all(&game).expect("mkdir");
    let archive = pak(&temp.path().join("pak0.pak"), &[("gfx.wad", b"x"), ("maps/e1m1.bsp", b"bsp")]);
    let vfs = filesystem(temp.path(), None);
    vfs.add_directory(&game, SearchPathFlags::empty(), MountPosition::Back)
        .expect("dir");
    vfs.add_archive(&archive, SearchPathFlags::SKIP_ARCHIVED_WADS, MountPosition::Back)
        .expect("pak");

    let mut handle = vfs.open("maps/e1m1.bsp", "rb", false).expect("open");
    assert!(!handle.is_writable());
    assert!(matches!(
        handle.write(b"patched"),
        Err(FsError::CapabilityDenied { .. })
    ));
    assert!(matches!(
        vfs.delete("maps/e1m1.bsp"),
        Err(FsError::CapabilityDenied { .. })
    ));
    assert!(matches!(
        vfs.rename("maps/e1m1.bsp", "maps/e1m9.bsp"),
        Err(FsError::CapabilityDenied { .. })
    ));
    assert_eq!(vfs.disk_path("maps/e1m1.bsp", false), None);
    assert_eq!(vfs.load_file("maps/e1m1.bsp", false).expect("load"), b"bsp");
}

#[test]
fn game_directory_prefers_loose_then_later_archives() {
    let temp = tempfile::tempdir().expect("tempdir");
    let valve = temp.path().join("valve");
    write_file(&valve.join("liblist.gam"), b"loose");
    pak(&valve.join("pak0.pak"), &[("liblist.gam", b"pak0"), ("sound/a.wav", b"pak0"), ("sound/b.wav", b"pak0")]);
    pak(&valve.join("pak1.pak"), &[("sound/a.wav", b"pak1")]);
    write_file(&valve.join("notes.txt"), b"not an archive");

    let vfs = filesystem(temp.path(), None);
    let archives = vfs
        .add_game_directory(&valve, SearchPathFlags::GAME_DIR, MountPosition::Back)
        .expect("game dir");
    assert_eq!(archives, 2);
    assert_eq!(vfs.load_file("liblist.gam", true).expect("load"), b"loose");
    assert_eq!(vfs.load_file("sound/a.wav", true).expect("load"), b"pak1");
    assert_eq!(vfs.load_file("sound/b.wav", true).expect("load"), b"pak0");
    assert_eq!(vfs.write_path(), Some(valve.clone()));

    let lines = vfs.describe_paths();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains("(write)"));
    assert!(lines[1].contains("pak1.pak"));
    assert!(lines[2].contains("pak0.pak"));
}

#[test]
fn clear_keeps_static_layers_and_reselects_write_target() {
    let temp = tempfile::tempdir().expect("tempdir");
    let engine = temp.path().join("engine");
    let game = temp.path().join("game");
    write_file(&engine.join("engine.cfg"), b"engine");
    write_file(&game.join("game.cfg"), b"game");

    let vfs = filesystem(temp.path(), None);
    vfs.add_directory(&engine, SearchPathFlags::STATIC, MountPosition::Back)
        .expect("engine");
    vfs.add_directory(&game, SearchPathFlags::GAME_DIR, MountPosition::Back)
        .expect("game");
    assert_eq!(vfs.write_path(), Some(game.clone()));

    vfs.clear(true);
    assert!(vfs.file_exists("engine.cfg", false));
    assert!(!vfs.file_exists("game.cfg", false));
    assert_eq!(vfs.write_path(), Some(engine.clone()));

    vfs.clear(false);
    assert!(!vfs.file_exists("engine.cfg", false));
    assert_eq!(vfs.write_path(), None);
}

#[test]
fn manifest_mounts_in_order_and_reports_failures() {
    let temp = tempfile::tempdir().expect("tempdir");
    let id1 = temp.path().join("id1");
    write_file(&id1.join("autoexec.cfg"), b"loose");
    let archive = pak(&temp.path().join("pak0.pak"), &[("autoexec.cfg", b"packed"), ("default.cfg", b"default")]);
    let manifest = format!(
        "dir \"{}\" gamedir\narchive \"{}\" static\ndir \"{}\"\n",
        id1.display(),
        archive.display(),
        temp.path().join("missing").display()
    );
    let entries = parse_mount_manifest(&manifest).expect("manifest");

    let vfs = filesystem(temp.path(), None);
    let failures = vfs.apply_manifest(&entries);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].line, 3);
    assert!(matches!(failures[0].error, FsError::MountFailure { .. }));
    assert_eq!(vfs.load_file("autoexec.cfg", false).expect("load"), b"loose");
    assert_eq!(vfs.load_file("default.cfg", false).expect("load"), b"default");
}
