//! Fixture builders shared by the integration tests.

#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use compat_formats::pak::write_pak;
use compat_formats::vpk::{write_directory, VpkRecord};
use compat_formats::wad::{write_wad, LumpType};
use game_fs::{Filesystem, FsConfig};

pub fn filesystem(root: &Path, max_open_descriptors: Option<usize>) -> Filesystem {
    Filesystem::new(FsConfig {
        root_dir: root.to_path_buf(),
        max_open_descriptors,
        ..FsConfig::default()
    })
}

pub fn write_file(path: &Path, data: &[u8]) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, data).expect("write fixture");
    path.to_path_buf()
}

pub fn pak(path: &Path, files: &[(&str, &[u8])]) -> PathBuf {
    write_file(path, &write_pak(files))
}

pub fn wad(lumps: &[(&str, LumpType, &[u8])]) -> Vec<u8> {
    write_wad(lumps)
}

/// Writes a zip with every member stored, except names ending in `.bsp`,
/// which are deflated.
pub fn pk3(path: &Path, files: &[(&str, &[u8])]) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    let file = File::create(path).expect("create zip");
    let mut writer = zip::ZipWriter::new(file);
    for (name, data) in files {
        let method = if name.ends_with(".bsp") {
            zip::CompressionMethod::Deflated
        } else {
            zip::CompressionMethod::Stored
        };
        let options = zip::write::FileOptions::default().compression_method(method);
        writer.start_file(*name, options).expect("start member");
        writer.write_all(data).expect("write member");
    }
    writer.finish().expect("finish zip");
    path.to_path_buf()
}

/// `pak01_dir.vpk` whose `materials/wall.vtf` lives in `pak01_002.vpk` at
/// offset 500, 10 bytes long.
pub fn wall_vpk(dir: &Path) -> PathBuf {
    let records = [VpkRecord {
        path: "materials",
        filename: "wall",
        extension: "vtf",
        crc: 0,
        preload: b"",
        archive_index: 2,
        entry_offset: 500,
        entry_length: 10,
    }];
    let dir_path = write_file(&dir.join("pak01_dir.vpk"), &write_directory(&records, b""));
    let mut part = vec![0xeeu8; 512];
    part[500..510].copy_from_slice(b"VTF-wall!!");
    write_file(&dir.join("pak01_002.vpk"), &part);
    dir_path
}
