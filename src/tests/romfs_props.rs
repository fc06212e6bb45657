use crate::romfs::{OpenFlags, Romfs, RomfsBuilder, RomfsVfs, Whence};
use proptest::prelude::*;

const BASE: u32 = 0x0070_3000;

fn sample_image() -> Vec<u8> {
    let mut builder = RomfsBuilder::new(BASE);
    builder.add_file("/fonts/cn/regular.bin", vec![7u8; 300]).unwrap();
    builder.add_file("/img/logo.jpg", vec![0xFF, 0xD8, 0xFF, 0xE0]).unwrap();
    builder.add_file("/readme", "hello").unwrap();
    builder.build().unwrap()
}

/// Interleave the components of `parts` with 1..=3 slashes each
fn slashed(parts: &[&str], seps: &[usize]) -> String {
    let mut path = String::new();
    for (i, part) in parts.iter().enumerate() {
        path.push_str(&"/".repeat(seps.get(i).copied().unwrap_or(1)));
        path.push_str(part);
    }
    path
}

proptest! {
    #[test]
    fn repeated_slashes_resolve_to_the_same_entry(seps in prop::collection::vec(1usize..4, 3)) {
        let image = sample_image();
        let fs = Romfs::mount(&image, BASE).unwrap();
        let canonical = fs.lookup("/fonts/cn/regular.bin").unwrap();
        let path = slashed(&["fonts", "cn", "regular.bin"], &seps);
        prop_assert_eq!(fs.lookup(&path), Some(canonical));
    }

    #[test]
    fn unknown_names_never_resolve(name in "[a-z]{1,12}") {
        prop_assume!(!["fonts", "img", "readme"].contains(&name.as_str()));
        let image = sample_image();
        let fs = Romfs::mount(&image, BASE).unwrap();
        let top = format!("/{}", name);
        let nested = format!("/img/{}", name);
        prop_assert!(fs.lookup(&top).is_none());
        prop_assert!(fs.lookup(&nested).is_none());
    }

    #[test]
    fn chunked_reads_match_the_file(chunk in 1usize..64, start in 0i64..300) {
        let image = sample_image();
        let mut vfs = RomfsVfs::new(Romfs::mount(&image, BASE).unwrap());
        let fd = vfs.open("/fonts/cn/regular.bin", OpenFlags::RDONLY).unwrap();
        prop_assert_eq!(vfs.lseek(fd, start, Whence::Set).unwrap() as i64, start);

        let mut total = 0usize;
        let mut buf = vec![0u8; chunk];
        loop {
            let n = vfs.read(fd, &mut buf).unwrap();
            if n == 0 {
                break;
            }
            prop_assert!(buf[..n].iter().all(|&b| b == 7));
            total += n;
        }
        prop_assert_eq!(total as i64, 300 - start);
        vfs.close(fd).unwrap();
    }
}
