use m4af::config::GaplessMode;
use m4af_remux::config::Settings;
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Output},
};
use tempfile::TempDir;

/// An AAC-LC, 44.1 kHz, stereo ADTS frame around `payload`.
fn adts_frame(payload: &[u8]) -> Vec<u8> {
    let len = payload.len() + 7;
    let mut frame = vec![
        0xff,
        0xf1,
        0x50,
        0x80 | ((len >> 11) & 0x03) as u8,
        (len >> 3) as u8,
        (((len & 0x07) << 5) | 0x1f) as u8,
        0xfc,
    ];
    frame.extend_from_slice(payload);
    frame
}

struct Workspace {
    dir: TempDir,
    config: PathBuf,
    input: PathBuf,
    output: PathBuf,
}

impl Workspace {
    fn new(settings: &Settings, frames: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("m4af-remux.toml");
        fs::write(&config, toml::to_string(settings).unwrap()).unwrap();

        let input = dir.path().join("in.aac");
        let mut file = fs::File::create(&input).unwrap();
        for i in 0..frames {
            file.write_all(&adts_frame(&vec![i as u8; 200 + i % 64]))
                .unwrap();
        }

        let output = dir.path().join("out.m4a");
        Self {
            dir,
            config,
            input,
            output,
        }
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_m4af-remux"))
            .arg("--config")
            .arg(&self.config)
            .arg(&self.input)
            .arg(&self.output)
            .args(args)
            .env("RUST_LOG", "debug")
            .output()
            .unwrap()
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn top_level(file: &Path) -> Vec<[u8; 4]> {
    let buf = fs::read(file).unwrap();
    let mut kinds = Vec::new();
    let mut pos = 0;
    while pos + 8 <= buf.len() {
        let size = u32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
        kinds.push(buf[pos + 4..pos + 8].try_into().unwrap());
        pos += size;
    }
    assert_eq!(pos, buf.len());
    kinds
}

fn no_timestamps() -> Settings {
    let mut settings = Settings::default();
    settings.muxer.no_timestamp = true;
    settings
}

#[test]
fn remux_with_tags() {
    let ws = Workspace::new(&no_timestamps(), 100);
    let out = ws.run(&[
        "--title",
        "Song",
        "--track",
        "2/10",
        "--tag",
        "albumartist=Band",
        "--long-tag",
        "SOURCE=test",
        "--delay",
        "2112",
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    assert_eq!(top_level(&ws.output), [*b"ftyp", *b"free", *b"mdat", *b"moov"]);
    let file = fs::read(&ws.output).unwrap();
    for needle in [
        &b"Song"[..],
        b"aART",
        b"Band",
        b"SOURCE",
        b"iTunSMPB",
        b" 00000000 00000840 00000000 ",
        b"m4af-remux",
    ] {
        assert!(contains(&file, needle), "{}", String::from_utf8_lossy(needle));
    }
}

#[test]
fn separate_totals() {
    let mut settings = no_timestamps();
    settings.tags.insert("tracktotal".to_string(), "12".to_string());
    let ws = Workspace::new(&settings, 10);
    let out = ws.run(&["--track", "3", "--disc", "1", "--tag", "TOTALDISCS=2"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let file = fs::read(&ws.output).unwrap();
    let trkn = b"trkn\0\0\0\x18data\0\0\0\0\0\0\0\0\0\0\0\x03\0\x0c\0\0";
    let disk = b"disk\0\0\0\x16data\0\0\0\0\0\0\0\0\0\0\0\x01\0\x02";
    assert!(contains(&file, trkn));
    assert!(contains(&file, disk));
    assert_eq!(file.windows(4).filter(|w| *w == b"trkn").count(), 1);

    assert!(!ws.run(&["--tag", "tracktotal=lots"]).status.success());
}

#[test]
fn moov_before_mdat() {
    let ws = Workspace::new(&no_timestamps(), 300);
    let out = ws.run(&["--moov-before-mdat", "--gapless", "iso", "--delay", "1024"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(
        top_level(&ws.output),
        [*b"ftyp", *b"moov", *b"free", *b"free", *b"mdat"]
    );
    let file = fs::read(&ws.output).unwrap();
    assert!(contains(&file, b"elst"));
    assert!(!contains(&file, b"iTunSMPB"));
}

#[test]
fn config_file_provides_defaults() {
    let mut settings = no_timestamps();
    settings.muxer.gapless = GaplessMode::Both;
    settings.muxer.optimize = true;
    settings.delay = 2112;
    settings.tool_tag = false;
    settings.tags.insert("artist".to_string(), "Configured".to_string());
    let ws = Workspace::new(&settings, 50);

    let out = ws.run(&[]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(top_level(&ws.output)[1], *b"moov");
    let file = fs::read(&ws.output).unwrap();
    assert!(contains(&file, b"Configured"));
    assert!(contains(&file, b"iTunSMPB"));
    assert!(contains(&file, b"elst"));
    assert!(!contains(&file, b"\xa9too"));
}

#[test]
fn reproducible_output() {
    let ws = Workspace::new(&no_timestamps(), 20);
    assert!(ws.run(&[]).status.success());
    let first = fs::read(&ws.output).unwrap();
    assert!(ws.run(&["--no-timestamp"]).status.success());
    assert_eq!(fs::read(&ws.output).unwrap(), first);
}

#[test]
fn artwork() {
    let ws = Workspace::new(&no_timestamps(), 10);
    let png = ws.path("cover.png");
    fs::write(&png, b"\x89PNG\r\n\x1a\n\0\0\0\x0dIHDR").unwrap();
    let out = ws.run(&["--artwork", png.to_str().unwrap()]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(contains(&fs::read(&ws.output).unwrap(), b"covr"));

    let bogus = ws.path("cover.txt");
    fs::write(&bogus, b"plain text").unwrap();
    assert!(!ws.run(&["--artwork", bogus.to_str().unwrap()]).status.success());
}

#[test]
fn bad_arguments_fail() {
    let ws = Workspace::new(&no_timestamps(), 10);
    assert!(!ws.run(&["--tag", "nonsense=1"]).status.success());
    assert!(!ws.run(&["--tag", "no-equals-sign"]).status.success());
    assert!(!ws.run(&["--gapless", "sometimes"]).status.success());
    assert!(!ws.run(&["--track", "two"]).status.success());
}

#[test]
fn garbage_input_fails() {
    let ws = Workspace::new(&no_timestamps(), 0);
    fs::write(&ws.input, b"definitely not adts").unwrap();
    let out = ws.run(&[]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("sync"));
}

#[test]
fn version() {
    let out = Command::new(env!("CARGO_BIN_EXE_m4af-remux"))
        .arg("-V")
        .output()
        .unwrap();
    assert!(out.status.success());
    assert_eq!(
        String::from_utf8(out.stdout).unwrap().trim(),
        format!("m4af-remux {}", env!("CARGO_PKG_VERSION"))
    );
}
