//! Filesystem tests: path resolution plus a full mount-open-read-write
//! round trip against an in-memory USTAR ramdisk, which needs no real block
//! device or bootloader handoff.

#![no_std]
#![no_main]

extern crate alloc;

use core::panic::PanicInfo;

use mako_kernel::fs::{self, path, ramdisk, ustar, OpenFlags};
use mako_kernel::{exit_qemu, serial_println, test_panic_handler, QemuExitCode};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("starting fs tests...");

    fs::init();

    dot_dot_resolves_against_cwd();
    absolute_path_ignores_cwd();
    canonicalize_then_to_absolute_round_trips();
    mount_create_write_and_read_back();
    mkdir_then_readdir_lists_the_new_entry();
    unlink_removes_the_entry();
    open_creat_excl_on_existing_file_fails();

    serial_println!("all tests passed!");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

fn dot_dot_resolves_against_cwd() {
    let segs = path::canonicalize("/home/user", "../etc/passwd");
    assert_eq!(
        segs,
        alloc::vec![
            alloc::string::String::from("home"),
            alloc::string::String::from("etc"),
            alloc::string::String::from("passwd"),
        ]
    );
    serial_println!("dot_dot_resolves_against_cwd... [ok]");
}

fn absolute_path_ignores_cwd() {
    let segs = path::canonicalize("/some/where", "/a/./b/../c");
    assert_eq!(
        segs,
        alloc::vec![alloc::string::String::from("a"), alloc::string::String::from("c")]
    );
    serial_println!("absolute_path_ignores_cwd... [ok]");
}

fn canonicalize_then_to_absolute_round_trips() {
    let once = path::canonicalize("/", "/a/b/../c/./d");
    let abs = path::to_absolute(&once);
    assert_eq!(abs, "/a/c/d");
    let twice = path::canonicalize("/", &abs);
    assert_eq!(once, twice);
    serial_println!("canonicalize_then_to_absolute_round_trips... [ok]");
}

fn mount_create_write_and_read_back() {
    let dev = ramdisk::new_device(&[]);
    ustar::format_blank(&dev).unwrap();
    ustar::mount(dev, "/data").unwrap();

    let node = fs::open("/", "/data/greeting.txt", OpenFlags::CREAT | OpenFlags::WRONLY).unwrap();
    assert_eq!(node.ops.write(0, b"hello").unwrap(), 5);

    let reopened = fs::open("/", "/data/greeting.txt", OpenFlags::RDONLY).unwrap();
    let mut buf = [0u8; 5];
    assert_eq!(reopened.ops.read(0, &mut buf).unwrap(), 5);
    assert_eq!(&buf, b"hello");
    serial_println!("mount_create_write_and_read_back... [ok]");
}

fn mkdir_then_readdir_lists_the_new_entry() {
    let dev = ramdisk::new_device(&[]);
    ustar::format_blank(&dev).unwrap();
    ustar::mount(dev, "/tree").unwrap();

    let dir = fs::mkdir("/", "/tree/subdir").unwrap();
    let entries = fs::readdir(&dir).unwrap();
    assert!(entries.is_empty());

    fs::open("/", "/tree/subdir/leaf", OpenFlags::CREAT).unwrap();
    let entries = fs::readdir(&dir).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "leaf");
    serial_println!("mkdir_then_readdir_lists_the_new_entry... [ok]");
}

fn unlink_removes_the_entry() {
    let dev = ramdisk::new_device(&[]);
    ustar::format_blank(&dev).unwrap();
    ustar::mount(dev, "/gone").unwrap();

    let dir = fs::open("/", "/gone", OpenFlags::DIRECTORY).unwrap();
    fs::open("/", "/gone/temp", OpenFlags::CREAT).unwrap();
    assert_eq!(fs::readdir(&dir).unwrap().len(), 1);

    fs::unlink("/", "/gone/temp").unwrap();
    assert!(fs::readdir(&dir).unwrap().is_empty());
    serial_println!("unlink_removes_the_entry... [ok]");
}

fn open_creat_excl_on_existing_file_fails() {
    let dev = ramdisk::new_device(&[]);
    ustar::format_blank(&dev).unwrap();
    ustar::mount(dev, "/excl").unwrap();

    fs::open("/", "/excl/a", OpenFlags::CREAT).unwrap();
    let err = fs::open("/", "/excl/a", OpenFlags::CREAT | OpenFlags::EXCL).unwrap_err();
    assert_eq!(err, mako_kernel::error::KernelError::Exists);
    serial_println!("open_creat_excl_on_existing_file_fails... [ok]");
}
